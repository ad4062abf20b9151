use bon::Builder;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Kind of a server push message, as carried in the envelope's `type` field.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum MessageKind {
    Alert,
    Notification,
    SubscriptionConfirmed,
    Pong,
    LocationUpdate,
    /// Any `type` this client does not know
    Unknown,
}

impl MessageKind {
    /// Map an envelope `type` to its kind; unrecognised names are [`Self::Unknown`].
    #[must_use]
    pub fn from_wire(name: &str) -> Self {
        match name {
            "alert" => Self::Alert,
            "notification" => Self::Notification,
            "subscription_confirmed" => Self::SubscriptionConfirmed,
            "pong" => Self::Pong,
            "location_update" => Self::LocationUpdate,
            _ => Self::Unknown,
        }
    }
}

/// A decoded server push message.
///
/// Every frame decodes to exactly one variant; types this client does not
/// recognise land in [`ServerMessage::Unknown`] rather than failing the decode.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawEnvelope")]
pub enum ServerMessage {
    /// Incident alert for a subscribed area
    Alert {
        data: Value,
        timestamp: Option<DateTime<Utc>>,
    },
    /// Notification addressed to this client
    Notification {
        data: Value,
        timestamp: Option<DateTime<Utc>>,
    },
    /// Server acknowledgement of a subscribe request
    SubscriptionConfirmed {
        areas: Vec<String>,
        message: Option<String>,
        data: Value,
    },
    /// Answer to a `ping`
    Pong,
    /// Live position of another user
    LocationUpdate {
        user_id: Option<String>,
        data: Value,
        timestamp: Option<DateTime<Utc>>,
    },
    /// Envelope with an unrecognised `type`
    Unknown { kind: String, data: Value },
}

impl ServerMessage {
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Alert { .. } => MessageKind::Alert,
            Self::Notification { .. } => MessageKind::Notification,
            Self::SubscriptionConfirmed { .. } => MessageKind::SubscriptionConfirmed,
            Self::Pong => MessageKind::Pong,
            Self::LocationUpdate { .. } => MessageKind::LocationUpdate,
            Self::Unknown { .. } => MessageKind::Unknown,
        }
    }

    /// The envelope's `data` payload (`null` for `pong`).
    #[must_use]
    pub fn data(&self) -> &Value {
        match self {
            Self::Alert { data, .. }
            | Self::Notification { data, .. }
            | Self::SubscriptionConfirmed { data, .. }
            | Self::LocationUpdate { data, .. }
            | Self::Unknown { data, .. } => data,
            Self::Pong => &Value::Null,
        }
    }

    /// Try to extract the payload as an alert.
    #[must_use]
    pub fn as_alert(&self) -> Option<Alert> {
        match self {
            Self::Alert { data, .. } => serde_json::from_value(data.clone()).ok(),
            _ => None,
        }
    }

    /// Try to extract the payload as a notification.
    #[must_use]
    pub fn as_notification(&self) -> Option<Notification> {
        match self {
            Self::Notification { data, .. } => serde_json::from_value(data.clone()).ok(),
            _ => None,
        }
    }
}

/// Wire shape shared by every server message.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    areas: Vec<String>,
    #[serde(default)]
    message: Option<String>,
}

impl From<RawEnvelope> for ServerMessage {
    fn from(raw: RawEnvelope) -> Self {
        let RawEnvelope {
            kind,
            data,
            timestamp,
            user_id,
            areas,
            message,
        } = raw;

        match MessageKind::from_wire(&kind) {
            MessageKind::Alert => Self::Alert { data, timestamp },
            MessageKind::Notification => Self::Notification { data, timestamp },
            MessageKind::SubscriptionConfirmed => Self::SubscriptionConfirmed {
                areas,
                message,
                data,
            },
            MessageKind::Pong => Self::Pong,
            MessageKind::LocationUpdate => Self::LocationUpdate {
                user_id,
                data,
                timestamp,
            },
            MessageKind::Unknown => Self::Unknown { kind, data },
        }
    }
}

/// Accepts RFC 3339 timestamps and offset-less ISO-8601 ones (read as UTC).
/// Anything else becomes `None` instead of failing the whole envelope.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::String(text)) = value else {
        return Ok(None);
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&text) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    Ok(text
        .parse::<NaiveDateTime>()
        .ok()
        .map(|naive| naive.and_utc()))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Alert payload as broadcast by the incident service.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Builder)]
#[builder(on(String, into))]
pub struct Alert {
    /// Alert identifier, sent as `id` or `alertId`
    #[serde(default, alias = "alertId", deserialize_with = "string_or_number")]
    pub id: Option<String>,
    /// Area the incident was reported in
    pub area: String,
    /// Incident category, e.g. `water-leak`
    #[serde(default)]
    pub issue_type: Option<String>,
    /// Human readable alert text
    #[serde(default)]
    pub message: Option<String>,
    /// Incident location, shape decided by the reporter
    #[serde(default)]
    pub location: Option<Value>,
    /// Number of citizens the alert was fanned out to
    #[serde(default)]
    pub target_count: Option<u64>,
    /// Any other fields the server attached
    #[serde(flatten)]
    #[builder(default)]
    pub extra: Map<String, Value>,
}

/// Direct notification payload.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Builder)]
#[builder(on(String, into))]
pub struct Notification {
    pub message: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(flatten)]
    #[builder(default)]
    pub extra: Map<String, Value>,
}

/// Decode one WebSocket frame.
///
/// A frame holds a single envelope or a JSON array of them; empty and
/// whitespace-only frames are keep-alives and yield nothing.
pub fn parse_messages(bytes: &[u8]) -> crate::Result<Vec<ServerMessage>> {
    let trimmed = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(&[][..], |start| &bytes[start..]);

    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.first() == Some(&b'[') {
        Ok(serde_json::from_slice(trimmed)?)
    } else {
        let msg: ServerMessage = serde_json::from_slice(trimmed)?;
        Ok(vec![msg])
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_alert_message() {
        let json = r#"{
            "type": "alert",
            "timestamp": "2025-01-14T09:30:00.123456",
            "data": {
                "area": "Sector4",
                "issue_type": "water-leak",
                "message": "Leak reported",
                "target_count": 12
            }
        }"#;

        let msgs = parse_messages(json.as_bytes()).unwrap();
        assert_eq!(msgs.len(), 1);

        let msg = &msgs[0];
        assert_eq!(msg.kind(), MessageKind::Alert);

        let alert = msg.as_alert().unwrap();
        assert_eq!(alert.area, "Sector4");
        assert_eq!(alert.issue_type.as_deref(), Some("water-leak"));
        assert_eq!(alert.target_count, Some(12));

        let ServerMessage::Alert { timestamp, .. } = msg else {
            panic!("expected alert, got {msg:?}");
        };
        let expected = Utc
            .with_ymd_and_hms(2025, 1, 14, 9, 30, 0)
            .unwrap()
            .checked_add_signed(chrono::TimeDelta::microseconds(123_456))
            .unwrap();
        assert_eq!(*timestamp, Some(expected));
    }

    #[test]
    fn alert_id_accepts_alias_and_numbers() {
        let alert: Alert =
            serde_json::from_value(json!({ "alertId": 981, "area": "Ward 7" })).unwrap();

        assert_eq!(alert.id.as_deref(), Some("981"));
        assert!(alert.extra.is_empty(), "alias must not leak into extra");
    }

    #[test]
    fn alert_keeps_unknown_fields() {
        let alert: Alert = serde_json::from_value(json!({
            "area": "Ward 7",
            "severity": "high"
        }))
        .unwrap();

        assert_eq!(alert.extra.get("severity"), Some(&json!("high")));
    }

    #[test]
    fn parse_notification_message() {
        let json = r#"{"type":"notification","data":{"message":"Your report was verified"}}"#;

        let msgs = parse_messages(json.as_bytes()).unwrap();
        let notification = msgs[0].as_notification().unwrap();

        assert_eq!(notification.message, "Your report was verified");
        assert!(msgs[0].as_alert().is_none());
    }

    #[test]
    fn parse_subscription_confirmed_with_top_level_fields() {
        let json = r#"{
            "type": "subscription_confirmed",
            "areas": ["Sector4"],
            "message": "Subscribed to 1 area(s)"
        }"#;

        let msgs = parse_messages(json.as_bytes()).unwrap();

        assert_eq!(
            msgs[0],
            ServerMessage::SubscriptionConfirmed {
                areas: vec!["Sector4".to_owned()],
                message: Some("Subscribed to 1 area(s)".to_owned()),
                data: Value::Null,
            }
        );
    }

    #[test]
    fn parse_pong_without_data() {
        let msgs = parse_messages(br#"{"type":"pong"}"#).unwrap();

        assert_eq!(msgs, vec![ServerMessage::Pong]);
        assert_eq!(msgs[0].data(), &Value::Null);
    }

    #[test]
    fn parse_location_update() {
        let json = r#"{
            "type": "location_update",
            "user_id": "user-7",
            "timestamp": "2025-01-14T09:30:00+05:30",
            "data": {"lat": 19.07, "lng": 72.87}
        }"#;

        let msgs = parse_messages(json.as_bytes()).unwrap();
        let ServerMessage::LocationUpdate {
            user_id, timestamp, ..
        } = &msgs[0]
        else {
            panic!("expected location update, got {:?}", msgs[0]);
        };

        assert_eq!(user_id.as_deref(), Some("user-7"));
        assert_eq!(
            *timestamp,
            Some(Utc.with_ymd_and_hms(2025, 1, 14, 4, 0, 0).unwrap())
        );
    }

    #[test]
    fn unknown_type_is_preserved() {
        let msgs = parse_messages(br#"{"type":"foo","data":{}}"#).unwrap();

        assert_eq!(
            msgs[0],
            ServerMessage::Unknown {
                kind: "foo".to_owned(),
                data: json!({}),
            }
        );
        assert_eq!(msgs[0].kind().to_string(), "unknown");
    }

    #[test]
    fn garbage_timestamp_does_not_fail_the_envelope() {
        let msgs =
            parse_messages(br#"{"type":"alert","timestamp":"yesterday","data":{"area":"X"}}"#)
                .unwrap();

        assert!(matches!(
            msgs[0],
            ServerMessage::Alert {
                timestamp: None,
                ..
            }
        ));
    }

    #[test]
    fn parse_message_array() {
        let json = r#"[{"type":"pong"},{"type":"alert","data":{"area":"X"}}]"#;

        let msgs = parse_messages(json.as_bytes()).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].kind(), MessageKind::Alert);
    }

    #[test]
    fn missing_type_is_a_parse_error() {
        parse_messages(br#"{"data":{}}"#).unwrap_err();
        parse_messages(b"not json").unwrap_err();
    }

    #[test]
    fn parse_empty_input() {
        let msgs = parse_messages(b"").unwrap();
        assert!(msgs.is_empty());
    }

    #[test]
    fn parse_whitespace_only_input() {
        let msgs = parse_messages(b"   \n\t  ").unwrap();
        assert!(msgs.is_empty());
    }

    #[test]
    fn wire_names_match_display() {
        for kind in [
            MessageKind::Alert,
            MessageKind::Notification,
            MessageKind::SubscriptionConfirmed,
            MessageKind::Pong,
            MessageKind::LocationUpdate,
        ] {
            assert_eq!(MessageKind::from_wire(&kind.to_string()), kind);
        }
        assert_eq!(MessageKind::from_wire("Alert"), MessageKind::Unknown);
        assert_eq!(MessageKind::from_wire("unknown"), MessageKind::Unknown);
    }
}
