//! Framed - typed request/acknowledgement over MessagePack.
//!
//! This example demonstrates:
//! - Wrapping `MsgPackCodec` in `Framed` so messages survive split reads
//! - A server that uses `FrameAssembler` to parse the same wire format
//! - Handling codec rejections returned synchronously by `send()`
//!
//! ```text
//! RUST_LOG=sockwire=debug cargo run --example framed
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sockwire::codec::{Codec, FrameAssembler, Framed, MsgPackCodec};
use sockwire::{Client, ConnectionEvent, SendError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Serialize, Deserialize, Clone, Debug)]
struct Order {
    id: u32,
    item: String,
    quantity: u16,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct Receipt {
    id: u32,
    accepted: bool,
}

/// Read framed orders and answer each with a framed receipt.
async fn serve(mut stream: TcpStream) -> sockwire::Result<()> {
    let codec = Framed::with_max_frame_size(MsgPackCodec::<Receipt, Order>::new(), 1024);
    let mut assembler = FrameAssembler::with_max_frame_size(1024);
    let mut buf = [0u8; 7];

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        for frame in assembler.push(&buf[..n])? {
            let order: Order = MsgPackCodec::<Receipt, Order>::decode(&frame)?;
            println!("[server] order {:?}", order);
            let receipt = Receipt {
                id: order.id,
                accepted: order.quantity <= 10,
            };
            let (wire, _) = codec.serialize(&receipt);
            stream.write_all(&wire).await?;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            if let Err(e) = serve(stream).await {
                eprintln!("[server] {}", e);
            }
        }
    });

    // Tiny frame limit so an oversized order is rejected locally.
    let codec = Framed::with_max_frame_size(MsgPackCodec::<Order, Receipt>::new(), 64);
    let client = Client::builder(codec)
        .endpoint(addr)
        .receive_buffer_size(16)
        .build()?;
    let mut events = client.subscribe();
    client.connect()?;

    let orders = vec![
        Order { id: 1, item: "bolts".into(), quantity: 4 },
        Order { id: 2, item: "nuts".into(), quantity: 40 },
        Order { id: 3, item: "x".repeat(100), quantity: 1 },
        Order { id: 4, item: "washers".into(), quantity: 10 },
    ];
    let mut expected = 0;
    let mut received = 0;

    let run = tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(event) = events.recv().await {
            match event {
                ConnectionEvent::Connected { .. } => {
                    for order in &orders {
                        match client.send(order) {
                            Ok(()) => expected += 1,
                            Err(SendError::Rejected(code)) => {
                                println!("[client] order {} rejected locally (code {})", order.id, code)
                            }
                            Err(SendError::Disposed) => return,
                        }
                    }
                }
                ConnectionEvent::Message { ack, count } => {
                    for receipt in ack {
                        println!("[client] receipt {:?}", receipt);
                    }
                    received += count;
                    if received >= expected {
                        return;
                    }
                }
                ConnectionEvent::Disconnected(reason) => {
                    println!("[client] disconnected: {}", reason);
                    return;
                }
                _ => {}
            }
        }
    })
    .await;

    if run.is_err() {
        println!("[client] timed out with {}/{} receipts", received, expected);
    }
    client.dispose();
    Ok(())
}
