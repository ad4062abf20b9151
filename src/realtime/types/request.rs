use serde::Serialize;

/// Frames the client sends to the alert service.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Replace the set of areas this client receives alerts for
    Subscribe {
        /// Area names as known to the server
        areas: Vec<String>,
    },
    /// Keep-alive, answered by a `pong`
    Ping,
}

impl ClientMessage {
    /// Create a subscribe request.
    #[must_use]
    pub fn subscribe<I, S>(areas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Subscribe {
            areas: areas.into_iter().map(Into::into).collect(),
        }
    }
}
