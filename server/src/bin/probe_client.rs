//! Minimal hand-driven client for poking at a running server.
//!
//! Logs in, walks to a target point, and prints every packet the server
//! sends for thirty seconds. Useful for eyeballing spawn/update/despawn
//! traffic without a real game client.
//!
//! Usage: `probe_client [addr] [username] [password]`

use std::time::Duration;

use shared::{frame, FrameCodec, Packet};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn send(stream: &mut TcpStream, packet: &Packet) -> std::io::Result<()> {
    stream.write_all(&frame(&packet.encode())).await?;
    stream.flush().await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:8888".to_string());
    let username = args.next().unwrap_or_else(|| "probe".to_string());
    let password = args.next().unwrap_or_else(|| "probe".to_string());

    println!("connecting to {}", addr);
    let mut stream = TcpStream::connect(&addr).await?;
    stream.set_nodelay(true)?;

    send(
        &mut stream,
        &Packet::LoginRequest {
            username: username.clone(),
            password,
        },
    )
    .await?;
    println!("login request sent for '{}'", username);

    let mut codec = FrameCodec::new();
    let mut buf = [0u8; 4096];
    let mut logged_in = false;
    let mut last_heartbeat = std::time::Instant::now();
    let deadline = std::time::Instant::now() + Duration::from_secs(30);

    while std::time::Instant::now() < deadline {
        if last_heartbeat.elapsed() > Duration::from_secs(10) {
            send(&mut stream, &Packet::Heartbeat).await?;
            last_heartbeat = std::time::Instant::now();
        }

        let n = match tokio::time::timeout(Duration::from_millis(500), stream.read(&mut buf)).await
        {
            Ok(Ok(0)) => {
                println!("server closed the connection");
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                println!("read error: {}", e);
                break;
            }
            Err(_) => continue,
        };

        codec.append(&buf[..n]);
        for body in codec.extract()? {
            let packet = Packet::decode(&body)?;
            println!("<- {:?}", packet);

            if let Packet::LoginResponse { success, token, .. } = &packet {
                if *success && !logged_in {
                    logged_in = true;
                    println!("logged in, token = {}", token);
                    // Take a short walk so other clients see updates.
                    send(
                        &mut stream,
                        &Packet::MoveRequest {
                            x: 10.0,
                            y: 0.0,
                            z: 10.0,
                        },
                    )
                    .await?;
                    println!("-> move to (10, 0, 10)");
                }
            }
        }
    }

    println!("done");
    Ok(())
}
