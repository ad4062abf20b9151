use super::types::request::ClientMessage;
use super::types::response::{ServerMessage, parse_messages};
use crate::Result;
use crate::ws::traits::MessageParser;

/// Frame decoder and keep-alive vocabulary for the alert service.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertParser;

impl MessageParser<ServerMessage> for AlertParser {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<ServerMessage>> {
        parse_messages(bytes)
    }

    fn ping_frame(&self) -> Option<String> {
        serde_json::to_string(&ClientMessage::Ping).ok()
    }

    fn is_pong(&self, message: &ServerMessage) -> bool {
        matches!(message, ServerMessage::Pong)
    }
}
