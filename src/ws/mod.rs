//! Core WebSocket infrastructure.
//!
//! This module provides generic connection management that can be
//! specialized for different WebSocket services through [`MessageParser`].
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: Session-based connection handler with reconnection and optional heartbeat
//! - [`ReconnectSchedule`]: Bounded exponential backoff between reconnect attempts
//! - [`MessageParser`]: Trait for parsing incoming WebSocket frames
//!
//! # Example
//!
//! ```ignore
//! // Define your message type
//! #[derive(Clone, Debug, Deserialize)]
//! enum MyMessage { /* ... */ }
//!
//! let connection = ConnectionManager::new(Config::default(), SimpleParser);
//! connection.connect(endpoint, None);
//! let mut rx = connection.subscribe();
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod reconnect;
pub mod traits;

pub use connection::{ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use reconnect::ReconnectSchedule;
pub use traits::*;
