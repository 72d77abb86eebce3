//! Echo - raw bytes over one connection.
//!
//! This example demonstrates:
//! - Building a client with the builder pattern and the raw codec
//! - Waiting for the connection to become active
//! - Sending payloads and receiving them back as `Message` events
//!
//! A tiny echo server runs in the same process on an ephemeral port.
//!
//! ```text
//! RUST_LOG=sockwire=debug cargo run --example echo
//! ```

use std::time::Duration;

use bytes::Bytes;
use sockwire::codec::RawCodec;
use sockwire::{Client, ConnectionEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((mut stream, peer)) = listener.accept().await {
            println!("[server] accepted {}", peer);
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = stream.read(&mut buf).await {
                    if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    let client = Client::builder(RawCodec).endpoint(addr).build()?;
    let mut events = client.subscribe();
    client.connect()?;

    let lines = ["hello", "from", "sockwire"];
    let mut echoed = 0;

    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(event) = events.recv().await {
            match event {
                ConnectionEvent::Connected { peer } => {
                    println!("[client] connected to {:?}", peer);
                    for line in lines {
                        client.send(&Bytes::from_static(line.as_bytes()))?;
                    }
                }
                ConnectionEvent::Message { ack, .. } => {
                    println!("[client] echo: {}", String::from_utf8_lossy(&ack));
                    echoed += ack.len();
                    if echoed >= lines.iter().map(|l| l.len()).sum() {
                        break;
                    }
                }
                other => println!("[client] {}", other.kind()),
            }
        }
        Ok::<_, Box<dyn std::error::Error>>(())
    })
    .await;

    match result {
        Ok(inner) => inner?,
        Err(_) => println!("[client] timed out"),
    }

    client.dispose();
    Ok(())
}
