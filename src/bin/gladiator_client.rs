//! Gladiator client: the player side of the tug-of-war arena.
//!
//! Listens for a local pose engine feed, turns landmark frames into rep
//! events through the adapter + detector, and converts each rep into a
//! `pull` while the arena reports the game as running. If the feed carries
//! camera frames they are relayed to the arena's media listener.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::StreamExt as _;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use tug_of_war::adapter::FrameAdapter;
use tug_of_war::config::Config;
use tug_of_war::detector::{FrameInput, RepConfig, RepDetectorState};
use tug_of_war::landmark::LandmarkFrame;
use tug_of_war::protocol::{self, GameState, MessageStream, PeerMessage, TrackFrame};

const CONFIG_PATH: &str = "config.toml";

type ControlSink = SplitSink<MessageStream<TcpStream>, Bytes>;

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

type LogFile = Arc<Mutex<std::io::BufWriter<std::fs::File>>>;

fn open_log_file() -> Result<LogFile> {
    std::fs::create_dir_all("logs")?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = format!("logs/gladiator_{}.log", ts);
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
// Console commands
// ---------------------------------------------------------------------------

async fn handle_command(
    line: &str,
    sink: &mut ControlSink,
    running: &AtomicBool,
    logfile: &LogFile,
) -> Result<()> {
    match line.trim() {
        "ready" => {
            protocol::send_to_sink(sink, &PeerMessage::Ready).await?;
            log!(logfile, "[game] ready sent");
        }
        "q" => {
            running.store(false, Ordering::Relaxed);
        }
        "" => {}
        other => {
            log!(logfile, "[input] unknown command: {} (use ready / q)", other);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Feed session: one pose engine connection
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn run_feed_session(
    feed: TcpStream,
    sink: &mut ControlSink,
    media: &mut Option<MessageStream<TcpStream>>,
    lines: &mut mpsc::Receiver<String>,
    adapter: &FrameAdapter,
    rep_config: &RepConfig,
    game_state: &Mutex<GameState>,
    no_detection_warn_ms: u64,
    running: &AtomicBool,
    logfile: &LogFile,
) -> Result<()> {
    let mut stream = protocol::message_stream(feed);
    let mut detector = RepDetectorState::new();

    let mut fps_counter: u32 = 0;
    let mut fps_timer = Instant::now();
    let mut last_angle: Option<f32> = None;
    let mut last_landmarks = Instant::now();
    let mut warned_no_landmarks = false;

    loop {
        if !running.load(Ordering::Relaxed) {
            return Ok(());
        }

        tokio::select! {
            result = stream.next() => {
                let bytes = match result {
                    Some(Ok(b)) => b,
                    Some(Err(e)) => {
                        log!(logfile, "[feed] read error: {}", e);
                        return Ok(());
                    }
                    None => {
                        log!(logfile, "[feed] engine disconnected");
                        return Ok(());
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
                } else if !warned_no_landmarks
                    && last_landmarks.elapsed() >= Duration::from_millis(no_detection_warn_ms)
                {
                    log!(logfile, "[feed] no landmarks for {}ms", no_detection_warn_ms);
                    warned_no_landmarks = true;
                }

                let sample = frame
                    .landmarks
                    .as_deref()
                    .and_then(LandmarkFrame::from_points)
                    .and_then(|landmarks| adapter.sample(&landmarks));
                last_angle = sample.as_ref().map(|s| s.angle);

                let input = FrameInput {
                    angle: last_angle,
                    posture_ok: sample.as_ref().map_or(true, |s| s.posture_ok),
                    timestamp_ms: frame.timestamp_us as f64 / 1000.0,
                };
                if let Some(rep) = detector.step(input, rep_config) {
                    let side = sample.as_ref().map(|s| s.side);
                    log!(logfile, "[rep] #{} at {:.0} deg ({:?})", rep.count, rep.angle, side);
                    let state = *game_state.lock().unwrap();
                    if state == GameState::Running {
                        protocol::send_to_sink(sink, &PeerMessage::Pull { delta: Some(1) }).await?;
                        log!(logfile, "[game] pull sent");
                    }
                }

                if let (Some(media_stream), Some(image)) = (media.as_mut(), frame.image) {
                    if let Err(e) = protocol::send_frame(media_stream, &image).await {
                        log!(logfile, "[media] relay failed: {}, relaying disabled", e);
                        *media = None;
                    }
                }

                if fps_timer.elapsed() >= Duration::from_secs(1) {
                    let angle = last_angle.map_or("-".to_string(), |a| format!("{:.0}", a));
                    log!(
                        logfile,
                        "[fps] {} (angle={} phase={:?} reps={})",
                        fps_counter,
                        angle,
                        detector.phase,
                        detector.rep_count
                    );
                    fps_counter = 0;
                    fps_timer = Instant::now();
                }
            }
            Some(line) = lines.recv() => {
                handle_command(&line, sink, running, logfile).await?;
                if !running.load(Ordering::Relaxed) {
                    return Ok(());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let config = Config::load_or_default(CONFIG_PATH);
    let logfile = open_log_file()?;

    log!(logfile, "Gladiator Client ({})", env!("GIT_VERSION"));
    log!(
        logfile,
        "[config] arena_addr={}, feed_listen_addr={}, name={:?}, side={}, relay_media={}",
        config.gladiator.arena_addr,
        config.gladiator.feed_listen_addr,
        config.gladiator.name,
        config.detector.side,
        config.gladiator.relay_media
    );

    let adapter = FrameAdapter::new(
        config.detector.side_selection()?,
        config.detector.gate("torso_tilt")?,
        config.detector.min_visibility,
    );
    let rep_config = config.detector.rep_config();

    log!(logfile, "[tcp] connecting to {}...", config.gladiator.arena_addr);
    let stream = TcpStream::connect(&config.gladiator.arena_addr)
        .await
        .with_context(|| format!("failed to reach arena at {}", config.gladiator.arena_addr))?;
    stream.set_nodelay(true)?;
    log!(logfile, "[tcp] connected");
    let (mut sink, mut reader) = protocol::message_stream(stream).split();

    protocol::send_to_sink(
        &mut sink,
        &PeerMessage::Intro {
            name: config.gladiator.name.clone(),
        },
    )
    .await?;
    log!(logfile, "[tcp] sent intro as {:?}", config.gladiator.name);

    // Last authoritative state from the arena, read on every rep.
    let game_state = Arc::new(Mutex::new(GameState::Idle));
    let reader_state = Arc::clone(&game_state);
    let reader_logfile = logfile.clone();
    let reader_task = tokio::spawn(async move {
        while let Some(result) = reader.next().await {
            match result {
                Ok(bytes) => match protocol::decode_message(&bytes) {
                    Ok(PeerMessage::GameState { state }) => {
                        *reader_state.lock().unwrap() = state;
                        log!(reader_logfile, "[game] state -> {}", state.as_str());
                    }
                    Ok(PeerMessage::Countdown { count: Some(n) }) => {
                        log!(reader_logfile, "[game] countdown {}", n);
                    }
                    Ok(other) => {
                        log!(reader_logfile, "[game] {:?}", other);
                    }
                    Err(e) => {
                        log!(reader_logfile, "[tcp] undecodable broadcast: {}", e);
                    }
                },
                Err(e) => {
                    log!(reader_logfile, "[tcp] reader error: {}", e);
                    break;
                }
            }
        }
        log!(reader_logfile, "[tcp] connection closed by arena");
    });

    let mut media = if config.gladiator.relay_media {
        match TcpStream::connect(&config.gladiator.arena_media_addr).await {
            Ok(s) => {
                s.set_nodelay(true)?;
                log!(logfile, "[media] connected to {}", config.gladiator.arena_media_addr);
                Some(protocol::message_stream(s))
            }
            Err(e) => {
                log!(logfile, "[media] connect failed: {}, relaying disabled", e);
                None
            }
        }
    } else {
        None
    };

    // Console input thread: 'ready' + Enter, 'q' + Enter
    let running = Arc::new(AtomicBool::new(true));
    let (line_tx, mut line_rx) = mpsc::channel::<String>(8);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            if stdin.read_line(&mut line).is_err() {
                break;
            }
            if line_tx.blocking_send(line.clone()).is_err() {
                break;
            }
        }
    });

    let feed_addr: std::net::SocketAddr = config
        .gladiator
        .feed_listen_addr
        .parse()
        .context("invalid feed_listen_addr")?;
    let feed_listener = tokio::net::TcpListener::bind(feed_addr).await?;
    log!(logfile, "[feed] waiting for pose engine on {}", feed_addr);
    log!(logfile, "Type 'ready' when set, 'q' to quit");

    while running.load(Ordering::Relaxed) {
        tokio::select! {
            accepted = feed_listener.accept() => {
                let (feed, addr) = accepted?;
                feed.set_nodelay(true)?;
                log!(logfile, "[feed] engine connected from {}", addr);
                run_feed_session(
                    feed,
                    &mut sink,
                    &mut media,
                    &mut line_rx,
                    &adapter,
                    &rep_config,
                    &game_state,
                    config.detector.no_detection_warn_ms,
                    &running,
                    &logfile,
                )
                .await?;
                if running.load(Ordering::Relaxed) {
                    log!(logfile, "[feed] waiting for pose engine on {}", feed_addr);
                }
            }
            Some(line) = line_rx.recv() => {
                handle_command(&line, &mut sink, &running, &logfile).await?;
            }
        }
    }

    reader_task.abort();
    log!(logfile, "bye");
    Ok(())
}
