use anyhow::Result;
use futures::StreamExt;
use std::io::{self, Write};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tug_of_war::config::Config;
use tug_of_war::protocol::{self, PeerMessage};

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let config = Config::load_or_default(CONFIG_PATH);

    println!("=== Tug of War - Arena Test Client ===");
    println!("接続先: {}", config.gladiator.arena_addr);
    println!();
    println!("コマンド:");
    println!("  n <name>      - intro を送る (例: n hana)");
    println!("  r             - ready を送る");
    println!("  p [n]         - pull をn回送る (省略時1回)");
    println!("  q             - 終了");
    println!();

    let stream = TcpStream::connect(&config.gladiator.arena_addr).await?;
    stream.set_nodelay(true)?;
    let (mut sink, mut reader) = protocol::message_stream(stream).split();

    // アリーナからのブロードキャストはそのまま表示する
    let reader_task = tokio::spawn(async move {
        while let Some(result) = reader.next().await {
            match result {
                Ok(bytes) => match protocol::decode_message(&bytes) {
                    Ok(message) => println!("\n<< {:?}", message),
                    Err(e) => println!("\n<< 解読できないメッセージ: {}", e),
                },
                Err(e) => {
                    println!("\n接続エラー: {}", e);
                    break;
                }
            }
        }
        println!("接続が閉じられました");
    });

    // stdin はブロッキングなので専用スレッドで読む
    let (line_tx, mut line_rx) = mpsc::channel::<String>(8);
    std::thread::spawn(move || loop {
        print!("> ");
        let _ = io::stdout().flush();
        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            break;
        }
        if line_tx.blocking_send(input).is_err() {
            break;
        }
    });

    while let Some(line) = line_rx.recv().await {
        let parts: Vec<&str> = line.trim().split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "n" if parts.len() == 2 => {
                let message = PeerMessage::Intro {
                    name: parts[1].to_string(),
                };
                protocol::send_to_sink(&mut sink, &message).await?;
                println!("intro を送信しました");
            }
            "r" => {
                protocol::send_to_sink(&mut sink, &PeerMessage::Ready).await?;
                println!("ready を送信しました");
            }
            "p" => {
                let count: u32 = if parts.len() == 2 { parts[1].parse()? } else { 1 };
                for _ in 0..count {
                    protocol::send_to_sink(&mut sink, &PeerMessage::Pull { delta: None }).await?;
                }
                println!("pull を{}回送信しました", count);
            }
            "q" => {
                println!("終了します");
                break;
            }
            _ => {
                println!("不明なコマンド: {}", parts[0]);
            }
        }
    }

    reader_task.abort();
    Ok(())
}
