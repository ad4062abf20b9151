//! Core traits for generic WebSocket infrastructure.

use serde::de::DeserializeOwned;

/// Message parser trait for converting raw frames to messages.
///
/// Implementations also describe the protocol's keep-alive: which frame to send
/// as a PING and which decoded message counts as the PONG. Both default to
/// "none", in which case heartbeats are never sent even if configured.
///
/// # Example
///
/// ```ignore
/// pub struct SimpleParser;
///
/// impl MessageParser<MyMessage> for SimpleParser {
///     fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<MyMessage>> {
///         let msg: MyMessage = serde_json::from_slice(bytes)?;
///         Ok(vec![msg])
///     }
/// }
/// ```
pub trait MessageParser<M: DeserializeOwned>: Send + Sync + 'static {
    /// Parse incoming bytes into messages.
    ///
    /// May return empty vec for keep-alive frames.
    /// Handles both single objects and arrays of messages.
    fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<M>>;

    /// Text frame sent as a heartbeat PING.
    fn ping_frame(&self) -> Option<String> {
        None
    }

    /// Whether `message` answers a heartbeat PING.
    fn is_pong(&self, _message: &M) -> bool {
        false
    }
}
