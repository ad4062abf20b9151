#![expect(
    clippy::module_name_repetitions,
    reason = "Re-exported names intentionally match their modules for API clarity"
)]

//! Realtime alert client for the Nagar Alert service.
//!
//! One WebSocket per client id carries alert and notification pushes for the
//! areas the client subscribed to. The connection is re-established with
//! exponential backoff and the areas are re-subscribed on every open.
//!
//! # Example
//!
//! ```rust, no_run
//! use nagar_alert_realtime::realtime::Client;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Client::default();
//!     client.connect("user-42", ["Sector4"])?;
//!
//!     let mut alerts = Box::pin(client.alerts());
//!     while let Some(alert) = alerts.next().await {
//!         let alert = alert?;
//!         println!("{}: {}", alert.area, alert.message.unwrap_or_default());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod listeners;
pub mod parser;
pub mod types;

// Re-export commonly used types
pub use client::{Client, DEFAULT_ENDPOINT};
pub use listeners::{ListenerHandle, ListenerKind};
pub use parser::AlertParser;
pub use types::request::ClientMessage;
pub use types::response::{Alert, MessageKind, Notification, ServerMessage, parse_messages};
