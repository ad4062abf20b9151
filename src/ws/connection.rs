#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::{SinkExt as _, StreamExt as _};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Interval, interval_at, sleep, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::{Config, HeartbeatConfig};
use super::error::WsError;
use super::reconnect::ReconnectSchedule;
use super::traits::MessageParser;
use crate::{Result, error::Error};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Unbounded per-consumer channels that see every decoded message.
type Taps<M> = Arc<Mutex<Vec<mpsc::UnboundedSender<M>>>>;

/// Broadcast channel capacity for incoming messages.
const BROADCAST_CAPACITY: usize = 1024;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session: never connected, or explicitly disconnected
    Idle,
    /// Attempting to open the transport
    Connecting,
    /// Transport is open
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Transport closed or failed, waiting before the next attempt
    Backoff {
        /// Reconnection attempt number since the last successful open, starting at 1
        attempt: u32,
        /// Delay before the attempt is made
        delay: Duration,
    },
    /// Reconnection attempts exhausted, nothing further will happen
    Failed,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Check if no background work remains for this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Idle | Self::Failed)
    }
}

/// One `connect` call's background work: the task's cancellation token and its
/// outgoing frame queue.
struct Session {
    token: CancellationToken,
    sender_tx: mpsc::UnboundedSender<String>,
}

struct Inner<M, P> {
    config: Config,
    parser: Arc<P>,
    /// Watch channel sender for state changes (enables reconnection detection)
    state_tx: watch::Sender<ConnectionState>,
    /// Broadcast sender for incoming messages
    broadcast_tx: broadcast::Sender<M>,
    /// Lossless consumers registered through `subscribe_unbounded`
    taps: Taps<M>,
    /// The live session, if any
    session: Mutex<Option<Session>>,
}

impl<M, P> Drop for Inner<M, P> {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = session.take() {
            session.token.cancel();
        }
    }
}

/// Manages WebSocket connection lifecycle, reconnection, and heartbeat.
///
/// This generic connection manager handles all WebSocket connection concerns:
/// - Establishing and maintaining at most one live transport
/// - Automatic reconnection with exponential backoff and an attempt ceiling
/// - Optional heartbeat monitoring via PING/PONG
/// - Broadcasting messages to multiple subscribers
///
/// Each [`connect`](Self::connect) starts a session: a background task that owns
/// the transport and its whole reconnect chain. Starting a new session or calling
/// [`disconnect`](Self::disconnect) cancels the previous one, including a
/// reconnect that is still waiting out its backoff.
///
/// # Type Parameters
///
/// - `M`: Message type that implements [`DeserializeOwned`] among other "helper" types
/// - `P`: Parser type that implements [`MessageParser<M>`]
///
/// # Example
///
/// ```ignore
/// let connection = ConnectionManager::new(Config::default(), SimpleParser);
/// connection.connect(Url::parse("wss://example.com/ws/user-42")?, None);
///
/// let mut rx = connection.subscribe();
/// while let Ok(msg) = rx.recv().await {
///     println!("Received: {:?}", msg);
/// }
/// ```
pub struct ConnectionManager<M, P> {
    inner: Arc<Inner<M, P>>,
}

impl<M, P> Clone for ConnectionManager<M, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M, P> ConnectionManager<M, P>
where
    M: DeserializeOwned + Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    /// Create a connection manager in the [`ConnectionState::Idle`] state.
    ///
    /// No connection is made until [`connect`](Self::connect) is called.
    #[must_use]
    pub fn new(config: Config, parser: P) -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        Self {
            inner: Arc::new(Inner {
                config,
                parser: Arc::new(parser),
                state_tx,
                broadcast_tx,
                taps: Arc::new(Mutex::new(Vec::new())),
                session: Mutex::new(None),
            }),
        }
    }

    /// Start a new session against `endpoint`, replacing any existing one.
    ///
    /// The state is [`ConnectionState::Connecting`] when this returns. `greeting`
    /// is written as the first frame every time the transport opens, including
    /// after automatic reconnects.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn connect(&self, endpoint: Url, greeting: Option<String>) {
        let (sender_tx, sender_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let task = SessionTask {
            endpoint,
            greeting,
            config: self.inner.config.clone(),
            parser: Arc::clone(&self.inner.parser),
            state_tx: self.inner.state_tx.clone(),
            broadcast_tx: self.inner.broadcast_tx.clone(),
            taps: Arc::clone(&self.inner.taps),
            sender_rx,
            token: token.clone(),
        };

        let previous = self.lock_session().replace(Session { token, sender_tx });
        if let Some(previous) = previous {
            tracing::debug!("Replacing existing WebSocket session");
            previous.token.cancel();
        }
        self.inner.state_tx.send_replace(ConnectionState::Connecting);

        tokio::spawn(task.run());
    }

    /// Cancel the current session, closing its transport and any pending
    /// reconnect. The state becomes [`ConnectionState::Idle`] before this returns.
    ///
    /// Returns `false` if there was no session.
    pub fn disconnect(&self) -> bool {
        let session = self.lock_session().take();
        let had_session = session.is_some();
        if let Some(session) = session {
            session.token.cancel();
        }
        self.inner.state_tx.send_replace(ConnectionState::Idle);
        had_session
    }

    /// Queue a message for the open transport.
    ///
    /// Fails with [`WsError::ConnectionClosed`] if the transport is not open;
    /// nothing is queued in that case.
    pub fn send<R: Serialize>(&self, request: &R) -> Result<()> {
        let json = serde_json::to_string(request)?;
        self.send_text(json)
    }

    /// Queue a raw text frame for the open transport.
    pub fn send_text(&self, text: String) -> Result<()> {
        if !self.state().is_connected() {
            return Err(WsError::ConnectionClosed.into());
        }

        let session = self.lock_session();
        let Some(session) = session.as_ref() else {
            return Err(WsError::ConnectionClosed.into());
        };
        session
            .sender_tx
            .send(text)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Whether a transport is open and owned by a live session.
    ///
    /// The state is [`ConnectionState::Connected`] only while the session's read
    /// loop holds an open transport. It leaves that state in the same poll that
    /// sees a Close frame, end of stream, or a read error, before any backoff
    /// starts. The session check additionally rejects a session whose task was
    /// cancelled or has exited, which can lag the state by one scheduler turn.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
            && self
                .lock_session()
                .as_ref()
                .is_some_and(|s| !s.token.is_cancelled() && !s.sender_tx.is_closed())
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to incoming messages.
    ///
    /// Each call returns a new independent receiver. Multiple subscribers can
    /// receive messages concurrently without blocking each other.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<M> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Receive every decoded message, in order, without loss.
    ///
    /// Unlike [`subscribe`](Self::subscribe) the channel is unbounded, so a slow
    /// consumer never misses messages. It must keep draining the receiver; the
    /// channel is dropped from the fan-out once the receiver is gone.
    #[must_use]
    pub fn subscribe_unbounded(&self) -> mpsc::UnboundedReceiver<M> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .taps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Subscribe to connection state changes.
    ///
    /// Returns a receiver that notifies when the connection state changes.
    /// This is useful for detecting reconnections and terminal failure.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        // Option<Session> has no inconsistent intermediate state, so a poisoned lock is usable.
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background task driving one session.
struct SessionTask<M, P> {
    endpoint: Url,
    greeting: Option<String>,
    config: Config,
    parser: Arc<P>,
    state_tx: watch::Sender<ConnectionState>,
    broadcast_tx: broadcast::Sender<M>,
    taps: Taps<M>,
    sender_rx: mpsc::UnboundedReceiver<String>,
    token: CancellationToken,
}

impl<M, P> SessionTask<M, P>
where
    M: DeserializeOwned + Debug + Clone + Send + 'static,
    P: MessageParser<M>,
{
    /// Connection loop with automatic reconnection.
    async fn run(mut self) {
        let mut schedule = ReconnectSchedule::new(self.config.reconnect.clone());

        loop {
            self.publish(ConnectionState::Connecting);
            tracing::debug!(endpoint = %self.endpoint, "Connecting to WebSocket");

            match self.open().await {
                Ok(Some(ws_stream)) => {
                    schedule.reset();

                    if let Err(e) = self.handle_connection(ws_stream).await {
                        tracing::warn!(error = %e, "WebSocket disconnected");
                    }
                }
                Ok(None) => return,
                Err(e) => tracing::warn!(error = %e, "Unable to connect"),
            }

            if self.token.is_cancelled() {
                return;
            }

            let Some(delay) = schedule.next_delay() else {
                tracing::error!(
                    attempts = schedule.attempts(),
                    "Max reconnection attempts reached, giving up"
                );
                self.publish(ConnectionState::Failed);
                return;
            };

            let attempt = schedule.attempts();
            tracing::info!(
                attempt,
                max_attempts = ?self.config.reconnect.max_attempts,
                "Reconnecting in {delay:?}"
            );
            self.publish(ConnectionState::Backoff { attempt, delay });

            tokio::select! {
                () = self.token.cancelled() => return,
                () = sleep(delay) => {}
            }
        }
    }

    /// Open the transport. `Ok(None)` means the session was cancelled meanwhile.
    async fn open(&self) -> Result<Option<WsStream>> {
        let attempt = async {
            let (ws_stream, _) = match self.config.connect_timeout {
                Some(limit) => timeout(limit, connect_async(self.endpoint.as_str()))
                    .await
                    .map_err(|_e| WsError::Timeout(limit))??,
                None => connect_async(self.endpoint.as_str()).await?,
            };
            Ok::<_, Error>(ws_stream)
        };

        tokio::select! {
            () = self.token.cancelled() => Ok(None),
            result = attempt => result.map(Some),
        }
    }

    /// Handle an active WebSocket connection.
    ///
    /// Returns `Ok(())` only when the session is cancelled; any other exit is an error.
    async fn handle_connection(&mut self, ws_stream: WsStream) -> Result<()> {
        let (mut write, mut read) = ws_stream.split();

        // Frames queued for a previous transport are never replayed.
        let mut stale = 0_usize;
        while self.sender_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            tracing::debug!(stale, "Discarded frames queued before reconnect");
        }

        if let Some(greeting) = &self.greeting {
            write.send(Message::Text(greeting.clone().into())).await?;
        }

        self.publish(ConnectionState::Connected {
            since: Instant::now(),
        });
        tracing::info!(endpoint = %self.endpoint, "WebSocket connected");

        let heartbeat = self.config.heartbeat.zip(self.parser.ping_frame());
        let mut ping_interval = heartbeat.as_ref().map(|(config, _)| heartbeat_interval(config));
        let mut awaiting_pong: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                () = self.token.cancelled() => {
                    _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }

                // Handle incoming messages
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            tracing::trace!(%text, "Received WebSocket text message");
                            self.handle_frame(text.as_bytes(), &mut awaiting_pong);
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            self.handle_frame(&bytes, &mut awaiting_pong);
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(WsError::ConnectionClosed.into());
                        }
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(_)) => {
                            // Protocol-level PING/PONG frames are answered by tungstenite.
                        }
                    }
                }

                // Handle outgoing messages from callers
                Some(text) = self.sender_rx.recv() => {
                    write.send(Message::Text(text.into())).await?;
                }

                // Heartbeat tick
                () = tick(ping_interval.as_mut()) => {
                    if let Some((config, ping)) = &heartbeat {
                        if let Some(sent) = awaiting_pong
                            && sent.elapsed() >= config.timeout
                        {
                            tracing::warn!(
                                "Heartbeat timeout: no PONG received within {:?}",
                                config.timeout
                            );
                            return Err(WsError::HeartbeatTimeout(config.timeout).into());
                        }

                        write.send(Message::Text(ping.clone().into())).await?;
                        if awaiting_pong.is_none() {
                            awaiting_pong = Some(tokio::time::Instant::now());
                        }
                    }
                }
            }
        }
    }

    fn handle_frame(&self, bytes: &[u8], awaiting_pong: &mut Option<tokio::time::Instant>) {
        match self.parser.parse(bytes) {
            Ok(messages) => {
                let mut taps = self.taps.lock().unwrap_or_else(PoisonError::into_inner);
                for message in messages {
                    if self.parser.is_pong(&message) {
                        *awaiting_pong = None;
                    }
                    tracing::trace!(?message, "Parsed WebSocket message");
                    taps.retain(|tap| tap.send(message.clone()).is_ok());
                    _ = self.broadcast_tx.send(message);
                }
            }
            Err(e) => {
                tracing::warn!(
                    text = %String::from_utf8_lossy(bytes),
                    error = %e,
                    "Failed to parse WebSocket message"
                );
            }
        }
    }

    /// Publish `state` unless this session has been cancelled.
    ///
    /// The cancellation check runs under the watch channel's lock, so a stale
    /// session can never overwrite the state written by `disconnect`.
    fn publish(&self, state: ConnectionState) {
        let token = &self.token;
        self.state_tx.send_if_modified(|current| {
            if token.is_cancelled() {
                return false;
            }
            *current = state;
            true
        });
    }
}

fn heartbeat_interval(config: &HeartbeatConfig) -> Interval {
    // The first PING goes out one full interval after open.
    interval_at(tokio::time::Instant::now() + config.interval, config.interval)
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
