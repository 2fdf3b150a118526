//! Arena server: owns the authoritative tug-of-war match state, accepts player
//! control connections plus their media streams, and broadcasts every state
//! change to all connected peers.
//!
//! Control plane is length-delimited JSON, media plane is length-delimited
//! bincode. All session mutation happens on this task, fed by one event queue.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tokio::sync::mpsc;

use tug_of_war::config::Config;
use tug_of_war::peer::{self, PeerConnections, PeerEvent};
use tug_of_war::protocol::{GameState, PeerMessage};
use tug_of_war::session::{ArenaSession, SessionEvent};

const CONFIG_PATH: &str = "config.toml";

// ===========================================================================
// Logging
// ===========================================================================

type LogFile = Arc<Mutex<std::io::BufWriter<std::fs::File>>>;

fn open_log_file() -> Result<LogFile> {
    std::fs::create_dir_all("logs")?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = format!("logs/arena_{}.log", ts);
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

// ===========================================================================
// Arena identity
// ===========================================================================

fn generate_arena_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..3).map(|_| rng.gen_range(b'A'..=b'Z') as char).collect();
    format!("tug-of-war-arena-{}", suffix)
}

// ===========================================================================
// Session event fan-out
// ===========================================================================

async fn apply_session_events(
    events: Vec<SessionEvent>,
    session: &ArenaSession,
    connections: &PeerConnections,
    countdown_interval: &mut tokio::time::Interval,
    logfile: &LogFile,
) {
    for event in events {
        match event {
            SessionEvent::Broadcast(message) => {
                match &message {
                    PeerMessage::Countdown { count: Some(n) } => {
                        log!(logfile, "[game] countdown {}", n);
                    }
                    PeerMessage::GameState { state } => {
                        log!(logfile, "[game] state -> {}", state.as_str());
                    }
                    _ => {}
                }
                connections.broadcast(&message).await;
            }
            SessionEvent::CountdownStarted => {
                // next tick must land a full second from now
                countdown_interval.reset();
                log!(logfile, "[game] both players ready");
            }
            SessionEvent::Finished { winner } => {
                let name = session.name_of(winner).unwrap_or("(unnamed)");
                log!(
                    logfile,
                    "[game] match over: peer {} ({}) wins at rope {}",
                    winner,
                    name,
                    session.rope_position()
                );
            }
        }
    }
}

// ===========================================================================
// Main
// ===========================================================================

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let config = Config::load_or_default(CONFIG_PATH);
    let logfile = open_log_file()?;

    log!(logfile, "Arena Server ({})", env!("GIT_VERSION"));
    log!(
        logfile,
        "[config] listen_addr={}, media_listen_addr={}, win_threshold={}",
        config.arena.listen_addr,
        config.arena.media_listen_addr,
        config.arena.win_threshold
    );

    let mut session = ArenaSession::new(generate_arena_id(), config.arena.win_threshold);
    log!(logfile, "[game] arena id: {}", session.id());

    let control_addr: std::net::SocketAddr = config
        .arena
        .listen_addr
        .parse()
        .context("invalid listen_addr")?;
    let media_addr: std::net::SocketAddr = config
        .arena
        .media_listen_addr
        .parse()
        .context("invalid media_listen_addr")?;
    let control_listener = tokio::net::TcpListener::bind(control_addr).await?;
    let media_listener = tokio::net::TcpListener::bind(media_addr).await?;
    log!(
        logfile,
        "Listening on {} (control) / {} (media)",
        control_addr,
        media_addr
    );
    log!(logfile, "");

    let mut connections = PeerConnections::new();
    let (events_tx, mut events_rx) = mpsc::channel::<PeerEvent>(256);

    let mut next_peer_id: u64 = 0;
    let mut next_media_id: u64 = 0;
    // frames / bytes since the last stats tick, per media source
    let mut media_stats: HashMap<u64, (u32, usize)> = HashMap::new();

    let mut countdown_interval = tokio::time::interval(Duration::from_secs(1));
    let mut stats_interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            accepted = control_listener.accept() => {
                let (stream, addr) = accepted?;
                stream.set_nodelay(true)?;
                next_peer_id += 1;
                let peer = next_peer_id;
                log!(logfile, "[peer] {} connected from {}", peer, addr);
                let outbound_rx = connections.register(peer);
                tokio::spawn(peer::run_peer_connection(stream, peer, events_tx.clone(), outbound_rx));
            }
            accepted = media_listener.accept() => {
                let (stream, addr) = accepted?;
                stream.set_nodelay(true)?;
                next_media_id += 1;
                let source = next_media_id;
                log!(logfile, "[media] source {} connected from {}", source, addr);
                tokio::spawn(peer::run_media_connection(stream, source, events_tx.clone()));
            }
            Some(event) = events_rx.recv() => {
                match event {
                    PeerEvent::Connected { peer } => {
                        match session.peer_joined(peer) {
                            Some(side) => {
                                log!(logfile, "[game] peer {} takes the {} side", peer, side.as_str());
                            }
                            None => {
                                log!(logfile, "[game] peer {} is a spectator, both sides taken", peer);
                            }
                        }
                    }
                    PeerEvent::Message { peer, message } => {
                        match &message {
                            PeerMessage::Intro { name } => {
                                log!(logfile, "[peer] {} introduces as {:?}", peer, name);
                            }
                            PeerMessage::Ready => {
                                log!(logfile, "[game] peer {} is ready", peer);
                            }
                            PeerMessage::Pull { .. } => {}
                            PeerMessage::GameState { .. } | PeerMessage::Countdown { .. } => {
                                log!(logfile, "[peer] ignoring authoritative message from peer {}", peer);
                            }
                        }
                        let was_pull = matches!(message, PeerMessage::Pull { .. });
                        let events = session.handle_message(peer, message);
                        if was_pull && session.state() == GameState::Running {
                            log!(logfile, "[game] peer {} pulls, rope {}", peer, session.rope_position());
                        }
                        apply_session_events(events, &session, &connections, &mut countdown_interval, &logfile).await;
                    }
                    PeerEvent::Disconnected { peer } => {
                        connections.remove(peer);
                        session.peer_left(peer);
                        log!(logfile, "[peer] {} disconnected ({} remaining)", peer, connections.len());
                    }
                    PeerEvent::MediaConnected { source } => {
                        media_stats.insert(source, (0, 0));
                    }
                    PeerEvent::MediaFrame { source, frame } => {
                        let entry = media_stats.entry(source).or_insert((0, 0));
                        entry.0 += 1;
                        entry.1 += frame.jpeg_data.len();
                    }
                    PeerEvent::MediaClosed { source } => {
                        media_stats.remove(&source);
                        log!(logfile, "[media] source {} closed", source);
                    }
                }
            }
            _ = countdown_interval.tick(), if session.state() == GameState::Countdown => {
                let events = session.countdown_tick();
                apply_session_events(events, &session, &connections, &mut countdown_interval, &logfile).await;
            }
            _ = stats_interval.tick() => {
                for (source, (frames, bytes)) in media_stats.iter_mut() {
                    if *frames > 0 {
                        log!(logfile, "[fps] media source {}: {} ({}KB)", source, frames, *bytes / 1024);
                        *frames = 0;
                        *bytes = 0;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log!(logfile, "shutting down");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_arena_id_shape() {
        // 接頭辞 + 大文字3文字
        for _ in 0..20 {
            let id = generate_arena_id();
            let suffix = id.strip_prefix("tug-of-war-arena-").unwrap();
            assert_eq!(suffix.len(), 3);
            assert!(suffix.chars().all(|c| c.is_ascii_uppercase()), "id = {}", id);
        }
    }
}
