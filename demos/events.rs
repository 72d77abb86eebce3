//! Events - watching the connection lifecycle.
//!
//! This example demonstrates:
//! - Loading client configuration from JSON
//! - Retrying while the server is not up yet
//! - Observing `Disconnected` when the server goes away
//! - Reconnecting automatically with `reconnect_on_disconnect`
//!
//! ```text
//! RUST_LOG=sockwire=debug cargo run --example events
//! ```

use std::time::Duration;

use sockwire::codec::RawCodec;
use sockwire::{Client, ClientBuilder, ClientConfig, ConnectionEvent};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Reserve a port, then release it so the first attempts are refused.
    let addr = TcpListener::bind("127.0.0.1:0").await?.local_addr()?;

    let config = ClientConfig::from_json(&format!(
        r#"{{ "endpoint": "{}", "retry_limit": 20, "retry_interval_ms": 200, "reconnect_on_disconnect": true }}"#,
        addr
    ))?;
    println!("config: {}", config.to_json()?);

    let client: Client<RawCodec> = ClientBuilder::from_config(RawCodec, config).build()?;
    let mut events = client.subscribe();
    client.connect()?;

    // Bring the server up late; drop the first connection after a moment.
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(700)).await;
        let listener = TcpListener::bind(addr).await.expect("bind");
        let (first, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(first);
        let (_second, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let mut connections = 0;
    let watch = tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(event) = events.recv().await {
            match &event {
                ConnectionEvent::StateChanged(state) => {
                    println!("state -> {} (retries so far: {})", state, client.retry_count())
                }
                ConnectionEvent::Connected { peer } => {
                    connections += 1;
                    println!("connected #{} to {:?}", connections, peer);
                    if connections == 2 {
                        break;
                    }
                }
                ConnectionEvent::Disconnected(reason) => {
                    println!("disconnected: {} (fault: {})", reason, reason.is_fault())
                }
                ConnectionEvent::ConnectFailed {
                    attempts,
                    last_error,
                } => {
                    println!("gave up after {} retries ({:?})", attempts, last_error);
                    break;
                }
                other => println!("{}", other.kind()),
            }
        }
    })
    .await;

    if watch.is_err() {
        println!("timed out in state {}", client.state());
    }
    client.dispose();
    Ok(())
}
