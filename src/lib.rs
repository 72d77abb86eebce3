//! # sockwire
//!
//! Resilient client engine for one persistent TCP connection.
//!
//! A [`Client`] keeps a single connection to one remote endpoint alive:
//! it connects with a bounded retry policy, sends messages strictly in
//! order with one send in flight, and runs a continuous receive loop that
//! hands every read to a pluggable [`Codec`]. Lifecycle changes and inbound
//! messages are published as [`ConnectionEvent`]s.
//!
//! ## Architecture
//!
//! - **Connection controller** ([`Client`]): state machine, connect cycles,
//!   retry timer, teardown
//! - **Send engine**: in-flight counter plus FIFO backlog under one lock,
//!   drained by a single pump task
//! - **Receive engine**: one fixed buffer reused for every read
//! - **Codec** ([`codec`]): pure conversion between messages and bytes
//! - **Transport** ([`transport`]): the raw stream socket, TCP or in-memory
//!
//! ## Example
//!
//! ```ignore
//! use sockwire::{Client, ConnectionEvent};
//! use sockwire::codec::{Framed, MsgPackCodec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let codec = Framed::new(MsgPackCodec::<String, String>::new());
//!     let client = Client::builder(codec).build()?;
//!
//!     let mut events = client.subscribe();
//!     client.connect_host("localhost", 9000).await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             ConnectionEvent::Connected { .. } => {
//!                 client.send(&"hello".to_string()).ok();
//!             }
//!             ConnectionEvent::Message { ack, .. } => println!("{:?}", ack),
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod transport;

mod client;
mod config;
mod event;
mod reader;
mod retry;
mod state;
mod writer;

pub use client::{Client, ClientBuilder};
pub use codec::{Codec, Decoded};
pub use config::{ClientConfig, DEFAULT_EVENT_CAPACITY};
pub use error::{Result, SendError, SockwireError};
pub use event::{ConnectionEvent, DisconnectReason};
pub use reader::DEFAULT_RECEIVE_BUFFER_SIZE;
pub use retry::{DEFAULT_RETRY_INTERVAL, DEFAULT_RETRY_LIMIT};
pub use state::ConnectionState;
pub use transport::Transport;
