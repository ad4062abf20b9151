use std::sync::{Arc, PoisonError, RwLock};

use async_stream::try_stream;
use futures::Stream;
use futures::StreamExt as _;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use url::Url;

use super::listeners::{ListenerHandle, ListenerKind, ListenerRegistry};
use super::parser::AlertParser;
use super::types::request::ClientMessage;
use super::types::response::{Alert, Notification, ServerMessage};
use crate::Result;
use crate::error::Error;
use crate::ws::config::Config;
use crate::ws::connection::ConnectionState;
use crate::ws::{ConnectionManager, WsError};

/// Alert service WebSocket base; the client id is appended as a path segment.
pub const DEFAULT_ENDPOINT: &str = "wss://eleven-drinks-count.loca.lt/api/v1/ws";

/// Realtime alert client for the Nagar Alert service.
///
/// One `Client` owns at most one live connection. Build it once at startup and
/// hand out clones; every clone shares the same connection and listeners.
///
/// # Examples
///
/// ```rust, no_run
/// use nagar_alert_realtime::realtime::Client;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::default();
///
///     let alerts = client.on_alert(|data| println!("Alert: {data}"));
///     client.connect("user-42", ["Sector4"])?;
///
///     tokio::signal::ctrl_c().await?;
///     alerts.remove();
///     client.disconnect();
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT, Config::default())
            .expect("Realtime client with default endpoint should succeed")
    }
}

struct ClientInner {
    /// Base endpoint without the client id segment
    base_endpoint: Url,
    /// Connection manager for the WebSocket
    connection: ConnectionManager<ServerMessage, AlertParser>,
    /// Alert and notification callbacks
    listeners: Arc<ListenerRegistry>,
    /// Areas sent on every open of the current session
    areas: RwLock<Vec<String>>,
}

impl Client {
    /// Create a client for the given `ws://` or `wss://` base endpoint.
    ///
    /// Nothing connects until [`connect`](Self::connect).
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        let base_endpoint = Url::parse(endpoint)?;
        if !matches!(base_endpoint.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "endpoint must use ws:// or wss://, got {endpoint}"
            )));
        }
        if base_endpoint.cannot_be_a_base() {
            return Err(Error::validation(format!(
                "endpoint cannot take a path: {endpoint}"
            )));
        }

        let connection = ConnectionManager::new(config, AlertParser);
        let listeners = ListenerRegistry::new();

        tokio::spawn(dispatch_loop(
            connection.subscribe_unbounded(),
            Arc::clone(&listeners),
        ));

        Ok(Self {
            inner: Arc::new(ClientInner {
                base_endpoint,
                connection,
                listeners,
                areas: RwLock::new(Vec::new()),
            }),
        })
    }

    /// Connect as `client_id` and keep `areas` subscribed.
    ///
    /// Any existing session is torn down first. Every time the transport opens,
    /// including automatic reconnects, a single subscribe frame for `areas` is
    /// sent (none if `areas` is empty). Transport failures are not returned;
    /// they are logged and retried, and show up in [`status`](Self::status).
    ///
    /// Errors only for a `client_id` that is empty or contains `/`.
    pub fn connect<I, S>(&self, client_id: &str, areas: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if client_id.trim().is_empty() {
            return Err(Error::validation("client id must not be empty"));
        }
        if client_id.contains('/') {
            return Err(Error::validation(format!(
                "client id must be a single path segment, got {client_id}"
            )));
        }

        let mut endpoint = self.inner.base_endpoint.clone();
        let Ok(mut segments) = endpoint.path_segments_mut() else {
            return Err(Error::validation("endpoint cannot take a path"));
        };
        segments.pop_if_empty().push(client_id);
        drop(segments);

        let areas: Vec<String> = areas.into_iter().map(Into::into).collect();
        let greeting = if areas.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&ClientMessage::subscribe(
                areas.iter().cloned(),
            ))?)
        };

        tracing::info!(%client_id, ?areas, "Connecting to alert service");
        *self
            .inner
            .areas
            .write()
            .unwrap_or_else(PoisonError::into_inner) = areas;
        self.inner.connection.connect(endpoint, greeting);

        Ok(())
    }

    /// Subscribe to `areas` on the open transport.
    ///
    /// Fire-and-forget: if the transport is not open the request is logged and
    /// dropped, never queued. Returns whether the frame was handed to the
    /// transport. The areas are not remembered for reconnects; pass them to
    /// [`connect`](Self::connect) for that.
    pub fn subscribe_to_areas<I, S>(&self, areas: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = ClientMessage::subscribe(areas);
        match self.inner.connection.send(&request) {
            Ok(()) => {
                tracing::info!(?request, "Subscribed to areas");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket not ready, dropping subscription");
                false
            }
        }
    }

    /// Send a keep-alive `ping` if the transport is open; otherwise do nothing.
    pub fn send_ping(&self) -> bool {
        match self.inner.connection.send(&ClientMessage::Ping) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Unable to send ping");
                false
            }
        }
    }

    /// Call `callback` with the `data` of every alert, in registration order.
    pub fn on_alert<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .register(ListenerKind::Alert, Arc::new(callback))
    }

    /// Call `callback` with the `data` of every notification, in registration order.
    pub fn on_notification<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .register(ListenerKind::Notification, Arc::new(callback))
    }

    /// Close the transport and cancel any pending reconnect.
    ///
    /// [`is_connected`](Self::is_connected) is `false` once this returns.
    /// Registered listeners are kept for a later [`connect`](Self::connect).
    pub fn disconnect(&self) {
        self.inner
            .areas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        if self.inner.connection.disconnect() {
            tracing::info!("WebSocket disconnected");
        }
    }

    /// Whether the transport is open right now.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    /// Get the current connection state.
    ///
    /// [`ConnectionState::Failed`] means reconnection gave up; only a new
    /// [`connect`](Self::connect) leaves it.
    #[must_use]
    pub fn status(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Watch connection state changes, e.g. to show an offline indicator.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.state_receiver()
    }

    /// Areas of the current session.
    #[must_use]
    pub fn subscribed_areas(&self) -> Vec<String> {
        self.inner
            .areas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stream of every decoded server message, from now on.
    pub fn messages(&self) -> impl Stream<Item = Result<ServerMessage>> + use<> {
        let mut rx = self.inner.connection.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(msg) => yield msg,
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("Message stream lagged, missed {n} messages");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Stream of alert payloads. Alerts whose payload lacks an `area` are skipped.
    pub fn alerts(&self) -> impl Stream<Item = Result<Alert>> + use<> {
        self.messages().filter_map(|msg_result| async move {
            match msg_result {
                Ok(msg) => msg.as_alert().map(Ok),
                Err(e) => Some(Err(e)),
            }
        })
    }

    /// Stream of notification payloads.
    pub fn notifications(&self) -> impl Stream<Item = Result<Notification>> + use<> {
        self.messages().filter_map(|msg_result| async move {
            match msg_result {
                Ok(msg) => msg.as_notification().map(Ok),
                Err(e) => Some(Err(e)),
            }
        })
    }
}

/// Route decoded messages to the registered listeners until the connection
/// manager is dropped. Every message is delivered; none are skipped when
/// listeners run slowly.
async fn dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
    listeners: Arc<ListenerRegistry>,
) {
    while let Some(message) = rx.recv().await {
        handle_message(&listeners, &message);
    }
}

fn handle_message(listeners: &ListenerRegistry, message: &ServerMessage) {
    match message {
        ServerMessage::Alert { data, .. } => {
            tracing::info!(%data, "Alert received");
            listeners.dispatch(ListenerKind::Alert, data);
        }
        ServerMessage::Notification { data, .. } => {
            tracing::info!(%data, "Notification received");
            listeners.dispatch(ListenerKind::Notification, data);
        }
        ServerMessage::SubscriptionConfirmed { areas, message, .. } => {
            tracing::debug!(?areas, ?message, "Subscription confirmed");
        }
        ServerMessage::Pong => tracing::debug!("Keep-alive pong received"),
        ServerMessage::LocationUpdate { user_id, data, .. } => {
            tracing::debug!(?user_id, %data, "Location update");
        }
        ServerMessage::Unknown { kind, .. } => {
            tracing::info!(%kind, "Unknown message type");
        }
    }
}
