//! Client builder and connection controller.
//!
//! The [`ClientBuilder`] collects configuration and a codec and builds a
//! [`Client`]. The client owns one transport and drives its lifecycle:
//! 1. `connect()` starts a connect cycle: first attempt plus retry timer
//! 2. A successful attempt activates the connection and starts the receive loop
//! 3. `send()` serializes and queues payloads; one pump task drains them in order
//! 4. Any transport fault tears the connection down; `connect()` may be called
//!    again, or the client does it itself when `reconnect_on_disconnect` is set
//!
//! All work runs on the tokio runtime the client was built in. None of the
//! public methods wait for the network.
//!
//! # Example
//!
//! ```ignore
//! use sockwire::{Client, ConnectionEvent};
//! use sockwire::codec::RawCodec;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder(RawCodec)
//!         .endpoint("127.0.0.1:9000".parse()?)
//!         .retry_limit(5)
//!         .build()?;
//!
//!     let mut events = client.subscribe();
//!     client.connect()?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let ConnectionEvent::Connected { .. } = event {
//!             client.send(&"hello".into()).ok();
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::codec::Codec;
use crate::config::ClientConfig;
use crate::error::{Result, SendError, SockwireError};
use crate::event::{ConnectionEvent, DisconnectReason};
use crate::reader::{ReceiveEngine, ReceiveStop};
use crate::retry::{Completion, RetryState, TickAction};
use crate::state::{ConnectionState, StateGate};
use crate::transport::{resolve_endpoint, TcpTransport, Transport};
use crate::writer::{drain, Admit, SendQueue};

/// Shortest retry period the timer accepts.
const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder<C> {
    codec: C,
    config: ClientConfig,
}

impl<C: Codec> ClientBuilder<C> {
    /// Create a builder with default configuration.
    pub fn new(codec: C) -> Self {
        Self::from_config(codec, ClientConfig::default())
    }

    /// Create a builder from an existing configuration.
    pub fn from_config(codec: C, config: ClientConfig) -> Self {
        Self { codec, config }
    }

    /// Set the remote endpoint.
    pub fn endpoint(mut self, addr: SocketAddr) -> Self {
        self.config.endpoint = Some(addr);
        self
    }

    /// Set the number of retries per connect cycle (0 = unlimited).
    ///
    /// Default: 10
    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.config.retry_limit = limit;
        self
    }

    /// Set the delay between retries.
    ///
    /// Default: 1500 ms
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.retry_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the size of the fixed receive buffer.
    ///
    /// Default: 1024 bytes
    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.config.receive_buffer_size = size;
        self
    }

    /// Set how many events a slow subscriber may fall behind.
    ///
    /// Default: 1024
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Enable or disable `TCP_NODELAY` for the built-in TCP transport.
    ///
    /// Default: enabled
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.config.nodelay = nodelay;
        self
    }

    /// Start a new connect cycle whenever a transport fault drops the
    /// connection. `disconnect()` and disposal never reconnect.
    ///
    /// Default: disabled
    pub fn reconnect_on_disconnect(mut self, enabled: bool) -> Self {
        self.config.reconnect_on_disconnect = enabled;
        self
    }

    /// The configuration collected so far.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build a client over TCP.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Client<C, TcpTransport>> {
        let transport = TcpTransport::with_nodelay(self.config.nodelay);
        self.build_with_transport(transport)
    }

    /// Build a client over a custom transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build_with_transport<T: Transport>(self, transport: T) -> Result<Client<C, T>> {
        let runtime = Handle::try_current().map_err(|_| SockwireError::NoRuntime)?;
        let (events, _) = broadcast::channel(self.config.event_capacity.max(1));

        let inner = Inner {
            codec: self.codec,
            transport,
            gate: StateGate::new(),
            connecting: AtomicBool::new(false),
            reconnect: AtomicBool::new(self.config.reconnect_on_disconnect),
            retry: Mutex::new(RetryState::new(
                self.config.retry_limit,
                self.config.retry_interval(),
            )),
            endpoint: Mutex::new(self.config.endpoint),
            sends: SendQueue::new(),
            receiver: ReceiveEngine::new(self.config.receive_buffer_size),
            events,
            runtime,
            tasks: Mutex::new(Tasks::default()),
        };

        Ok(Client {
            inner: Arc::new(inner),
        })
    }
}

impl<C: fmt::Debug> fmt::Debug for ClientBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("codec", &self.codec)
            .field("config", &self.config)
            .finish()
    }
}

/// Background tasks owned by a client.
#[derive(Default)]
struct Tasks {
    timer: Option<JoinHandle<()>>,
    attempt: Option<JoinHandle<()>>,
    receive: Option<JoinHandle<()>>,
    teardown: Option<JoinHandle<()>>,
}

struct Inner<C: Codec, T: Transport> {
    codec: C,
    transport: T,
    gate: StateGate,
    /// Set for the whole duration of a connect cycle.
    connecting: AtomicBool,
    reconnect: AtomicBool,
    retry: Mutex<RetryState>,
    endpoint: Mutex<Option<SocketAddr>>,
    sends: SendQueue,
    receiver: ReceiveEngine,
    events: broadcast::Sender<ConnectionEvent<C::Ack>>,
    runtime: Handle,
    tasks: Mutex<Tasks>,
}

/// A resilient client for one persistent connection.
///
/// Dropping the client disposes it.
pub struct Client<C: Codec, T: Transport = TcpTransport> {
    inner: Arc<Inner<C, T>>,
}

impl<C: Codec> Client<C, TcpTransport> {
    /// Create a new client builder.
    pub fn builder(codec: C) -> ClientBuilder<C> {
        ClientBuilder::new(codec)
    }
}

impl<C: Codec, T: Transport> Client<C, T> {
    /// Start connecting to the configured endpoint.
    ///
    /// Returns immediately. Does nothing while a connect cycle is running or
    /// when already connected. Progress is reported through events.
    ///
    /// # Errors
    ///
    /// [`SockwireError::Disposed`] after disposal, [`SockwireError::NoEndpoint`] when no
    /// endpoint was ever configured.
    pub fn connect(&self) -> Result<()> {
        self.inner.connect()
    }

    /// Set the endpoint, then [`connect`](Self::connect).
    pub fn connect_addr(&self, addr: SocketAddr) -> Result<()> {
        self.set_endpoint(addr);
        self.connect()
    }

    /// Resolve `host`, set it as endpoint, then [`connect`](Self::connect).
    ///
    /// IP literals skip the lookup. A hostname uses its first address.
    pub async fn connect_host(&self, host: &str, port: u16) -> Result<()> {
        if self.inner.gate.state().is_disposed() {
            return Err(SockwireError::Disposed);
        }
        let addr = resolve_endpoint(host, port).await?;
        self.connect_addr(addr)
    }

    /// Tear down the current connection.
    ///
    /// Returns `false` (and does nothing) when not connected.
    pub fn disconnect(&self) -> bool {
        self.inner
            .disconnect_session(None, DisconnectReason::Requested)
    }

    /// Serialize `request` and queue it for sending.
    ///
    /// Payloads reach the transport in call order, one at a time. Transport
    /// failures are not reported here; they disconnect the client.
    ///
    /// Nothing is held back for a later connection. A payload accepted
    /// while the client is not connected (including while `Connecting`)
    /// returns `Ok(())` but is dropped when the transport refuses it, so
    /// wait for [`ConnectionEvent::Connected`] before sending.
    ///
    /// # Errors
    ///
    /// [`SendError::Rejected`] with the codec's code when serialization
    /// fails, [`SendError::Disposed`] after disposal.
    pub fn send(&self, request: &C::Request) -> std::result::Result<(), SendError<C::Code>> {
        self.inner.send(request)
    }

    /// Dispose the client: disconnect, stop retrying, drop queued sends.
    ///
    /// Terminal and idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.gate.state()
    }

    /// Whether the connection is active.
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Retries performed in the current (or last) connect cycle.
    pub fn retry_count(&self) -> u32 {
        self.inner.retry().count()
    }

    /// Retries allowed per connect cycle (0 = unlimited).
    pub fn retry_limit(&self) -> u32 {
        self.inner.retry().limit()
    }

    /// Change the retry limit. Applies from the next tick.
    pub fn set_retry_limit(&self, limit: u32) {
        self.inner.retry().set_limit(limit);
    }

    /// Delay between retries.
    pub fn retry_interval(&self) -> Duration {
        self.inner.retry().interval()
    }

    /// Change the retry interval. Applies from the next connect cycle.
    pub fn set_retry_interval(&self, interval: Duration) {
        self.inner.retry().set_interval(interval);
    }

    /// Whether a transport fault starts a new connect cycle.
    pub fn reconnects_on_disconnect(&self) -> bool {
        self.inner.reconnect.load(Ordering::SeqCst)
    }

    /// Enable or disable reconnecting after a transport fault.
    pub fn set_reconnect_on_disconnect(&self, enabled: bool) {
        self.inner.reconnect.store(enabled, Ordering::SeqCst);
    }

    /// Sends accepted but not completed, the in-flight one included.
    pub fn pending_sends(&self) -> usize {
        self.inner.sends.in_flight()
    }

    /// Configured remote endpoint.
    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.inner.endpoint()
    }

    /// Change the remote endpoint. Used by the next connect attempt.
    pub fn set_endpoint(&self, addr: SocketAddr) {
        *self
            .inner
            .endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(addr);
    }

    /// Remote address of the open connection.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.transport.peer_addr()
    }

    /// Local address of the open connection.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.transport.local_addr()
    }

    /// Size of the fixed receive buffer.
    pub fn receive_buffer_size(&self) -> usize {
        self.inner.receiver.capacity()
    }

    /// Subscribe to lifecycle and message events.
    ///
    /// Only events published after this call are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent<C::Ack>> {
        self.inner.events.subscribe()
    }

    /// The codec used by this client.
    pub fn codec(&self) -> &C {
        &self.inner.codec
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }
}

impl<C: Codec, T: Transport> Drop for Client<C, T> {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl<C: Codec, T: Transport> fmt::Debug for Client<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("endpoint", &self.endpoint())
            .field("pending_sends", &self.pending_sends())
            .finish_non_exhaustive()
    }
}

impl<C: Codec, T: Transport> Inner<C, T> {
    fn retry(&self) -> MutexGuard<'_, RetryState> {
        self.retry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn endpoint(&self) -> Option<SocketAddr> {
        *self.endpoint.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: ConnectionEvent<C::Ack>) {
        tracing::trace!("Publishing {} event", event.kind());
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn notify(&self) -> impl Fn(ConnectionState) + Copy + '_ {
        move |state| self.publish(ConnectionEvent::StateChanged(state))
    }

    fn connect(self: &Arc<Self>) -> Result<()> {
        if self.gate.state().is_disposed() {
            return Err(SockwireError::Disposed);
        }
        let addr = self.endpoint().ok_or(SockwireError::NoEndpoint)?;

        if self
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Connect already in progress");
            return Ok(());
        }

        let cycle_active = self.retry().is_cycle_active();
        if cycle_active || !self.gate.begin_connecting(self.notify()) {
            self.connecting.store(false, Ordering::SeqCst);
            if self.gate.state().is_disposed() {
                return Err(SockwireError::Disposed);
            }
            tracing::debug!("Connect ignored in state {}", self.gate.state());
            return Ok(());
        }

        let (attempt, interval) = {
            let mut retry = self.retry();
            (retry.begin_cycle(), retry.interval())
        };
        tracing::debug!("Connecting to {}", addr);

        self.start_timer(interval);
        self.spawn_attempt(attempt);
        Ok(())
    }

    fn start_timer(self: &Arc<Self>, interval: Duration) {
        let period = interval.max(MIN_RETRY_INTERVAL);
        let weak: Weak<Self> = Arc::downgrade(self);

        let timer = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !inner.on_retry_tick() {
                    break;
                }
            }
        });

        if let Some(previous) = self.tasks().timer.replace(timer) {
            previous.abort();
        }
    }

    fn stop_timer(&self) {
        if let Some(timer) = self.tasks().timer.take() {
            timer.abort();
        }
    }

    /// Returns whether the timer should keep running.
    fn on_retry_tick(self: &Arc<Self>) -> bool {
        let (action, count, limit) = {
            let mut retry = self.retry();
            let action = retry.tick();
            (action, retry.count(), retry.limit())
        };

        match action {
            TickAction::Retry { reissue } => {
                match reissue {
                    Some(attempt) => {
                        tracing::debug!("Retry {} of {}", count, limit);
                        self.spawn_attempt(attempt);
                    }
                    None => tracing::debug!("Retry {} of {}: attempt still pending", count, limit),
                }
                true
            }
            TickAction::Exhausted {
                attempts,
                last_error,
            } => {
                if let Some(attempt) = self.tasks().attempt.take() {
                    attempt.abort();
                }
                tracing::warn!("Connect failed after {} retries", attempts);
                self.gate.end_connecting(self.notify());
                self.connecting.store(false, Ordering::SeqCst);
                self.publish(ConnectionEvent::ConnectFailed {
                    attempts,
                    last_error,
                });
                false
            }
            TickAction::Idle => false,
        }
    }

    fn spawn_attempt(self: &Arc<Self>, attempt: u64) {
        let inner = self.clone();
        let task = self.runtime.spawn(async move {
            inner.await_teardown().await;
            if inner.transport.is_connected() {
                tracing::debug!("Closing connection left by a cancelled attempt");
                if let Err(e) = inner.transport.disconnect().await {
                    tracing::debug!("Ignoring transport shutdown error: {}", e);
                }
            }

            let result = match inner.endpoint() {
                Some(addr) => {
                    tracing::debug!("Connect attempt {} to {}", attempt, addr);
                    inner.transport.connect(addr).await
                }
                None => Err(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "no endpoint configured",
                )),
            };
            inner.on_connect_completed(attempt, result);
        });

        self.tasks().attempt = Some(task);
    }

    fn on_connect_completed(self: &Arc<Self>, attempt: u64, result: io::Result<()>) {
        let outcome = result.as_ref().map(|_| ()).map_err(io::Error::kind);
        let completion = self.retry().complete(attempt, outcome);

        match completion {
            Completion::Stale => {
                tracing::debug!("Ignoring stale connect attempt {}", attempt);
                if result.is_ok() {
                    self.close_stale_connection();
                }
            }
            Completion::Failed => {
                if let Err(e) = result {
                    tracing::debug!("Connect attempt {} failed: {}", attempt, e);
                }
            }
            Completion::Succeeded => {
                self.stop_timer();
                match self.activate() {
                    Some(session) => {
                        self.codec.reset();
                        let peer = self.transport.peer_addr();
                        tracing::debug!("Connection {} active, peer {:?}", session, peer);
                        self.publish(ConnectionEvent::Connected { peer });
                        self.connecting.store(false, Ordering::SeqCst);
                        self.start_receive(session);
                    }
                    None => {
                        tracing::debug!("Connected after dispose; closing");
                        self.spawn_teardown();
                    }
                }
            }
        }
    }

    /// Close a connection opened by a cancelled attempt.
    ///
    /// Once a newer cycle has begun its attempt owns the transport, so the
    /// connection is left for that attempt to replace. The check and the
    /// teardown registration share the tasks lock, which orders them against
    /// `spawn_attempt`.
    fn close_stale_connection(self: &Arc<Self>) {
        let mut tasks = self.tasks();
        if self.retry().is_cycle_active() || self.gate.state().is_connected() {
            tracing::debug!("Newer connect cycle owns the transport");
            return;
        }
        self.register_teardown(&mut tasks);
    }

    /// Set the flags that compose `Active`. Returns the new session.
    pub(crate) fn activate(&self) -> Option<u64> {
        self.gate.activate(self.notify())
    }

    fn start_receive(self: &Arc<Self>, session: u64) {
        let inner = self.clone();
        let task = self.runtime.spawn(async move {
            let stop = inner
                .receiver
                .run(&inner.transport, |chunk| inner.consume(chunk))
                .await;

            let reason = match stop {
                ReceiveStop::Closed => DisconnectReason::RemoteClosed,
                ReceiveStop::Failed(e) => {
                    tracing::debug!("Receive failed: {}", e);
                    DisconnectReason::ReceiveFailed(e.kind())
                }
                ReceiveStop::Rejected(e) => {
                    tracing::error!("Inbound data rejected: {}", e);
                    DisconnectReason::ConsumerFault(e.to_string())
                }
            };
            inner.disconnect_session(Some(session), reason);
        });

        self.tasks().receive = Some(task);
    }

    fn consume(&self, chunk: &[u8]) -> Result<()> {
        if self.events.receiver_count() > 0 {
            self.publish(ConnectionEvent::BytesReceived(Bytes::copy_from_slice(chunk)));
        }
        if let Some(decoded) = self.codec.deserialize(chunk)? {
            self.publish(ConnectionEvent::Message {
                ack: decoded.ack,
                count: decoded.count,
            });
        }
        Ok(())
    }

    fn send(
        self: &Arc<Self>,
        request: &C::Request,
    ) -> std::result::Result<(), SendError<C::Code>> {
        if self.gate.state().is_disposed() {
            return Err(SendError::Disposed);
        }

        let (payload, code) = self.codec.serialize(request);
        if code != self.codec.no_error_code() {
            tracing::warn!("Codec rejected message with code {:?}", code);
            return Err(SendError::Rejected(code));
        }

        match self.sends.admit(payload) {
            Admit::Dispatch(first) => {
                self.spawn_pump(first);
                Ok(())
            }
            Admit::Queued => Ok(()),
            Admit::Closed => Err(SendError::Disposed),
        }
    }

    fn spawn_pump(self: &Arc<Self>, first: Bytes) {
        let inner = self.clone();
        self.runtime.spawn(async move {
            let session = || inner.gate.session();
            match drain(&inner.sends, &inner.transport, first, session).await {
                Ok(written) => tracing::trace!("Send pump idle after {} payloads", written),
                Err(failure) => {
                    tracing::warn!(
                        "Send failed: {}; dropped {} queued payloads",
                        failure.error,
                        failure.dropped
                    );
                    inner.disconnect_session(
                        Some(failure.session),
                        DisconnectReason::SendFailed(failure.error.kind()),
                    );
                }
            }
        });
    }

    /// Clear `Connected` and tear the transport down.
    ///
    /// With `Some(session)`, only that connection is torn down; a fault
    /// reported by an older connection is ignored.
    fn disconnect_session(self: &Arc<Self>, session: Option<u64>, reason: DisconnectReason) -> bool {
        if !self.gate.clear_connected(session, self.notify()) {
            return false;
        }

        tracing::debug!("Disconnected: {}", reason);
        self.spawn_teardown();
        let reconnect = reason.is_fault() && self.reconnect.load(Ordering::SeqCst);
        self.publish(ConnectionEvent::Disconnected(reason));

        // The new attempt waits for the teardown spawned above.
        if reconnect {
            match self.connect() {
                Ok(()) => tracing::debug!("Reconnecting after transport fault"),
                Err(e) => tracing::debug!("Not reconnecting: {}", e),
            }
        }
        true
    }

    /// Close the transport, then wait for the receive loop to exit.
    fn spawn_teardown(self: &Arc<Self>) {
        let mut tasks = self.tasks();
        self.register_teardown(&mut tasks);
    }

    fn register_teardown(self: &Arc<Self>, tasks: &mut Tasks) {
        let inner = self.clone();
        let previous = tasks.teardown.take();
        let receive = tasks.receive.take();

        tasks.teardown = Some(self.runtime.spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            if let Err(e) = inner.transport.disconnect().await {
                tracing::debug!("Ignoring transport shutdown error: {}", e);
            }
            if let Some(receive) = receive {
                let _ = receive.await;
            }
        }));
    }

    async fn await_teardown(&self) {
        let pending = self.tasks().teardown.take();
        if let Some(teardown) = pending {
            let _ = teardown.await;
        }
    }

    fn dispose(self: &Arc<Self>) {
        let was_connected = self.gate.clear_connected(None, self.notify());
        if !self.gate.dispose(self.notify()) {
            return;
        }

        self.retry().cancel();
        self.connecting.store(false, Ordering::SeqCst);

        let dropped = self.sends.close();
        if dropped > 0 {
            tracing::debug!("Discarded {} queued sends", dropped);
        }

        {
            let mut tasks = self.tasks();
            if let Some(timer) = tasks.timer.take() {
                timer.abort();
            }
            if let Some(attempt) = tasks.attempt.take() {
                attempt.abort();
            }
        }

        self.spawn_teardown();
        if was_connected {
            self.publish(ConnectionEvent::Disconnected(DisconnectReason::Disposed));
        }
        tracing::debug!("Client disposed");
    }
}
