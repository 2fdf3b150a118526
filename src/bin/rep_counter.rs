//! Standalone rep counter: consumes a pose engine feed and counts reps with
//! no arena attached. Useful for tuning thresholds against a live feed.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::StreamExt as _;

use tug_of_war::adapter::FrameAdapter;
use tug_of_war::config::Config;
use tug_of_war::detector::{FrameInput, RepDetectorState};
use tug_of_war::landmark::LandmarkFrame;
use tug_of_war::protocol::{self, TrackFrame};

const CONFIG_PATH: &str = "config.toml";

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

type LogFile = Arc<Mutex<std::io::BufWriter<std::fs::File>>>;

fn open_log_file() -> Result<LogFile> {
    std::fs::create_dir_all("logs")?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = format!("logs/rep_counter_{}.log", ts);
    let file = std::fs::File::create(&path)?;
    eprintln!("Log: {}", path);
    Ok(Arc::new(Mutex::new(std::io::BufWriter::new(file))))
}

macro_rules! log {
    ($logfile:expr, $($arg:tt)*) => {{
        let msg = format!($($arg)*);
        eprintln!("{}", msg);
        if let Ok(mut f) = $logfile.lock() {
            let _ = writeln!(f, "{}", msg);
            let _ = f.flush();
        }
    }};
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let config = Config::load_or_default(CONFIG_PATH);
    let logfile = open_log_file()?;

    log!(logfile, "Rep Counter ({})", env!("GIT_VERSION"));
    log!(
        logfile,
        "[config] feed_listen_addr={}, side={}, up={} down={} interval={}ms window={}",
        config.rep_counter.feed_listen_addr,
        config.detector.side,
        config.detector.up_threshold,
        config.detector.down_threshold,
        config.detector.min_rep_interval_ms,
        config.detector.smoothing_window
    );

    let adapter = FrameAdapter::new(
        config.detector.side_selection()?,
        config.detector.gate("plank")?,
        config.detector.min_visibility,
    );
    let rep_config = config.detector.rep_config();
    let warn_after = Duration::from_millis(config.detector.no_detection_warn_ms);

    let feed_addr: std::net::SocketAddr = config
        .rep_counter
        .feed_listen_addr
        .parse()
        .context("invalid feed_listen_addr")?;
    let feed_listener = tokio::net::TcpListener::bind(feed_addr).await?;
    log!(logfile, "[feed] waiting for pose engine on {}", feed_addr);

    loop {
        let (feed, addr) = feed_listener.accept().await?;
        feed.set_nodelay(true)?;
        log!(logfile, "[feed] engine connected from {}", addr);

        let mut stream = protocol::message_stream(feed);
        let mut detector = RepDetectorState::new();
        let mut fps_counter: u32 = 0;
        let mut fps_timer = Instant::now();
        let mut last_angle: Option<f32> = None;
        let mut last_landmarks = Instant::now();
        let mut warned_no_landmarks = false;

        loop {
            let bytes = match stream.next().await {
                Some(Ok(b)) => b,
                Some(Err(e)) => {
                    log!(logfile, "[feed] read error: {}", e);
                    break;
                }
                None => {
                    log!(logfile, "[feed] engine disconnected");
                    break;
                }
            };
            let frame: TrackFrame = match bincode::deserialize(&bytes) {
                Ok(f) => f,
                Err(e) => {
                    log!(logfile, "[feed] dropping malformed frame: {}", e);
                    continue;
                }
            };
            fps_counter += 1;

            if frame.landmarks.is_some() {
                last_landmarks = Instant::now();
                warned_no_landmarks = false;
            } else if !warned_no_landmarks && last_landmarks.elapsed() >= warn_after {
                log!(logfile, "[feed] no landmarks for {}ms", warn_after.as_millis());
                warned_no_landmarks = true;
            }

            let sample = frame
                .landmarks
                .as_deref()
                .and_then(LandmarkFrame::from_points)
                .and_then(|landmarks| adapter.sample(&landmarks));
            last_angle = sample.as_ref().map(|s| s.angle);

            let before = detector.phase;
            let input = FrameInput {
                angle: last_angle,
                posture_ok: sample.as_ref().map_or(true, |s| s.posture_ok),
                timestamp_ms: frame.timestamp_us as f64 / 1000.0,
            };
            let rep = detector.step(input, &rep_config);
            if detector.phase != before {
                let angle = last_angle.map_or("-".to_string(), |a| format!("{:.0}", a));
                log!(logfile, "[rep] phase {:?} -> {:?} (angle={})", before, detector.phase, angle);
            }
            if let Some(rep) = rep {
                log!(logfile, "[rep] #{} at {:.0} deg", rep.count, rep.angle);
            }

            if fps_timer.elapsed() >= Duration::from_secs(1) {
                let angle = last_angle.map_or("-".to_string(), |a| format!("{:.0}", a));
                let posture = sample.as_ref().map_or("-".to_string(), |s| s.posture_ok.to_string());
                log!(
                    logfile,
                    "[fps] {} (angle={} posture_ok={} phase={:?} reps={})",
                    fps_counter,
                    angle,
                    posture,
                    detector.phase,
                    detector.rep_count
                );
                fps_counter = 0;
                fps_timer = Instant::now();
            }
        }

        log!(logfile, "[feed] counter reset, waiting for pose engine on {}", feed_addr);
    }
}
