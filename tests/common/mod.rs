#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Deeply nested uses in sub-modules are falsely flagged as being unused"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use nagar_alert_realtime::{Config, ReconnectConfig};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

pub const WS_PATH: &str = "/api/v1/ws";
pub const CLIENT_ID: &str = "user-42";
pub const AREA: &str = "Sector4";

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);
pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

/// Mock alert service.
///
/// Records the request path of every accepted connection and every text frame
/// clients send, and broadcasts pushed frames to all open connections.
pub struct MockAlertServer {
    addr: SocketAddr,
    /// Broadcast messages to ALL connected clients
    message_tx: broadcast::Sender<String>,
    /// Text frames received from clients
    frame_rx: mpsc::UnboundedReceiver<String>,
    /// Request path of each accepted connection
    path_rx: mpsc::UnboundedReceiver<String>,
    /// While set, open connections are dropped and new ones closed immediately
    disconnect_signal: Arc<AtomicBool>,
}

impl MockAlertServer {
    /// Start a mock alert service on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (message_tx, _) = broadcast::channel::<String>(100);
        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<String>();
        let (path_tx, path_rx) = mpsc::unbounded_channel::<String>();
        let disconnect_signal = Arc::new(AtomicBool::new(false));

        let broadcast_tx = message_tx.clone();
        let disconnect = Arc::clone(&disconnect_signal);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let path_tx = path_tx.clone();
                let record_path =
                    move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                        drop(path_tx.send(request.uri().path().to_owned()));
                        Ok(response)
                    };

                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, record_path).await
                else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let frame_tx = frame_tx.clone();
                let mut msg_rx = broadcast_tx.subscribe();
                let disconnect = Arc::clone(&disconnect);

                tokio::spawn(async move {
                    loop {
                        if disconnect.load(Ordering::SeqCst) {
                            break;
                        }

                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(frame_tx.send(text.to_string()));
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            msg = msg_rx.recv() => {
                                match msg {
                                    Ok(text) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(_) => break,
                                }
                            }
                            () = tokio::time::sleep(Duration::from_millis(20)) => {}
                        }
                    }
                });
            }
        });

        Self {
            addr,
            message_tx,
            frame_rx,
            path_rx,
            disconnect_signal,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}{WS_PATH}", self.addr)
    }

    /// Send a frame to all connected clients.
    pub fn send(&self, message: &str) {
        drop(self.message_tx.send(message.to_owned()));
    }

    pub fn send_json(&self, message: &Value) {
        self.send(&message.to_string());
    }

    /// Drop every open connection and refuse new ones until [`Self::allow_reconnect`].
    pub fn disconnect_all(&self) {
        self.disconnect_signal.store(true, Ordering::SeqCst);
    }

    pub fn allow_reconnect(&self) {
        self.disconnect_signal.store(false, Ordering::SeqCst);
    }

    /// Receive the next text frame sent by a client, decoded as JSON.
    pub async fn recv_frame(&mut self) -> Option<Value> {
        let text = timeout(RECV_TIMEOUT, self.frame_rx.recv())
            .await
            .ok()
            .flatten()?;
        Some(serde_json::from_str(&text).unwrap())
    }

    /// Receive the next frame that is not a keep-alive ping.
    pub async fn recv_non_ping(&mut self) -> Option<Value> {
        loop {
            let frame = self.recv_frame().await?;
            if frame != ping() {
                return Some(frame);
            }
        }
    }

    /// Assert no client sends anything for a short while.
    pub async fn expect_no_frame(&mut self) {
        let frame = timeout(QUIET_PERIOD, self.frame_rx.recv()).await;
        assert!(frame.is_err(), "unexpected frame: {frame:?}");
    }

    /// Receive the request path of the next accepted connection.
    pub async fn recv_path(&mut self) -> Option<String> {
        timeout(RECV_TIMEOUT, self.path_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Assert no client opens a new connection for a short while.
    pub async fn expect_no_connection(&mut self) {
        let path = timeout(QUIET_PERIOD, self.path_rx.recv()).await;
        assert!(path.is_err(), "unexpected connection: {path:?}");
    }
}

/// Reconnect quickly so tests don't wait for the production schedule.
#[must_use]
pub fn fast_config() -> Config {
    Config::builder()
        .reconnect(
            ReconnectConfig::default()
                .with_max_attempts(Some(5))
                .with_initial_backoff(Duration::from_millis(50))
                .with_max_backoff(Duration::from_millis(200)),
        )
        .build()
}

#[must_use]
pub fn subscribe(areas: &[&str]) -> Value {
    json!({"type": "subscribe", "areas": areas})
}

#[must_use]
pub fn ping() -> Value {
    json!({"type": "ping"})
}

/// Example payloads as broadcast by the alert service.
pub mod payloads {
    use serde_json::{Value, json};

    use super::AREA;

    #[must_use]
    pub fn alert_data() -> Value {
        json!({
            "id": 981,
            "area": AREA,
            "issue_type": "water-leak",
            "message": "Main line burst near the market",
            "location": {"lat": 28.61, "lng": 77.21},
            "target_count": 37
        })
    }

    #[must_use]
    pub fn alert() -> Value {
        json!({
            "type": "alert",
            "data": alert_data(),
            "timestamp": "2024-05-14T09:30:12.345678"
        })
    }

    #[must_use]
    pub fn notification_data() -> Value {
        json!({"title": "Report resolved", "message": "Your pothole report was closed"})
    }

    #[must_use]
    pub fn notification() -> Value {
        json!({
            "type": "notification",
            "data": notification_data(),
            "timestamp": "2024-05-14T09:31:00"
        })
    }

    #[must_use]
    pub fn subscription_confirmed() -> Value {
        json!({
            "type": "subscription_confirmed",
            "areas": [AREA],
            "message": "Subscribed to 1 area(s)",
            "timestamp": "2024-05-14T09:29:59.000001"
        })
    }

    #[must_use]
    pub fn unknown() -> Value {
        json!({"type": "foo", "data": {}})
    }
}
