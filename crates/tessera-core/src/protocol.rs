//! Subscription wire protocol
//!
//! GraphQL-over-WebSocket messages exchanged on a canvas subscription:
//! `connection_init` -> `connection_ack` -> `start`, followed by a stream of
//! `data` messages carrying full or diff frame notifications. Keep-alives
//! (`ka`) are ignored and `connection_error` is an authentication failure.

use crate::error::ChannelError;
use crate::types::SessionToken;
use serde::Deserialize;
use serde_json::{json, Value};
use tessera_canvas::CanvasId;

/// Team that owns the canvas channels
pub const CHANNEL_TEAM_OWNER: &str = "AFD2022";

/// Subscription query selecting full and diff frame payloads
pub const FRAME_SUBSCRIPTION_QUERY: &str = "subscription replace($input: SubscribeInput!) {\n  \
subscribe(input: $input) {\n    id\n    ... on BasicMessage {\n      data {\n        __typename\n        \
... on FullFrameMessageData {\n          __typename\n          name\n          timestamp\n        }\n        \
... on DiffFrameMessageData {\n          __typename\n          name\n          currentTimestamp\n          \
previousTimestamp\n        }\n      }\n      __typename\n    }\n    __typename\n  }\n}\n";

/// Messages we send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Handshake carrying the bearer token
    ConnectionInit { token: SessionToken },
    /// Subscribe to a canvas' frame channel
    Start { canvas: CanvasId },
}

impl ClientMessage {
    /// Encode as the JSON text frame sent on the wire
    #[must_use]
    pub fn encode(&self) -> String {
        let value = match self {
            Self::ConnectionInit { token } => json!({
                "type": "connection_init",
                "payload": { "Authorization": format!("Bearer {}", token.expose()) },
            }),
            Self::Start { canvas } => json!({
                "id": canvas.to_string(),
                "type": "start",
                "payload": {
                    "variables": {
                        "input": {
                            "channel": {
                                "teamOwner": CHANNEL_TEAM_OWNER,
                                "category": "CANVAS",
                                "tag": canvas.to_string(),
                            }
                        }
                    },
                    "extensions": {},
                    "operationName": "replace",
                    "query": FRAME_SUBSCRIPTION_QUERY,
                },
            }),
        };
        value.to_string()
    }
}

/// Frame notification referencing a bitmap to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// Complete current bitmap
    Full {
        subscription: CanvasId,
        url: String,
        timestamp: Option<i64>,
    },
    /// Only the pixels changed since `previous`
    Diff {
        subscription: CanvasId,
        url: String,
        current: Option<i64>,
        previous: Option<i64>,
    },
}

impl FrameEvent {
    /// Subscription (canvas) id the server attached to this frame
    #[inline]
    #[must_use]
    pub fn subscription(&self) -> CanvasId {
        match self {
            Self::Full { subscription, .. } | Self::Diff { subscription, .. } => *subscription,
        }
    }

    /// Bitmap URL
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Full { url, .. } | Self::Diff { url, .. } => url,
        }
    }
}

/// Messages we receive
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Handshake accepted
    ConnectionAck,
    /// Keep-alive
    KeepAlive,
    /// Frame notification
    Frame(FrameEvent),
    /// Authentication rejected
    ConnectionError { reason: String },
    /// Anything else; logged and ignored
    Unknown(Value),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct DataPayload {
    data: SubscribeWrapper,
}

#[derive(Deserialize)]
struct SubscribeWrapper {
    subscribe: SubscribeData,
}

#[derive(Deserialize)]
struct SubscribeData {
    data: FrameData,
}

#[derive(Deserialize)]
#[serde(tag = "__typename")]
enum FrameData {
    FullFrameMessageData {
        name: String,
        #[serde(default)]
        timestamp: Option<f64>,
    },
    DiffFrameMessageData {
        name: String,
        #[serde(rename = "currentTimestamp", default)]
        current: Option<f64>,
        #[serde(rename = "previousTimestamp", default)]
        previous: Option<f64>,
    },
    #[serde(other)]
    Other,
}

impl ServerMessage {
    /// Decode one JSON text frame
    ///
    /// Shapes we do not understand become [`ServerMessage::Unknown`]; only
    /// text that is not a JSON object with a `type` field is an error.
    ///
    /// # Errors
    /// - `ChannelError::Malformed` if the text is not a message envelope
    pub fn decode(text: &str) -> Result<Self, ChannelError> {
        let raw: Value =
            serde_json::from_str(text).map_err(|e| ChannelError::Malformed(e.to_string()))?;
        let envelope: Envelope = serde_json::from_value(raw.clone())
            .map_err(|e| ChannelError::Malformed(e.to_string()))?;

        Ok(match envelope.kind.as_str() {
            "connection_ack" => Self::ConnectionAck,
            "ka" => Self::KeepAlive,
            "connection_error" => Self::ConnectionError {
                reason: envelope.payload.to_string(),
            },
            "data" => decode_frame(envelope.id.as_deref(), envelope.payload)
                .map_or(Self::Unknown(raw), Self::Frame),
            _ => Self::Unknown(raw),
        })
    }
}

fn decode_frame(id: Option<&str>, payload: Value) -> Option<FrameEvent> {
    let subscription = CanvasId(id?.parse().ok()?);
    let payload: DataPayload = serde_json::from_value(payload).ok()?;

    match payload.data.subscribe.data {
        FrameData::FullFrameMessageData { name, timestamp } => Some(FrameEvent::Full {
            subscription,
            url: name,
            timestamp: timestamp.map(millis),
        }),
        FrameData::DiffFrameMessageData {
            name,
            current,
            previous,
        } => Some(FrameEvent::Diff {
            subscription,
            url: name,
            current: current.map(millis),
            previous: previous.map(millis),
        }),
        FrameData::Other => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn millis(ts: f64) -> i64 {
    ts as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn data_message(id: &str, data: Value) -> String {
        json!({
            "id": id,
            "type": "data",
            "payload": { "data": { "subscribe": { "id": "x", "data": data } } },
        })
        .to_string()
    }

    #[test]
    fn encode_connection_init() {
        let text = ClientMessage::ConnectionInit {
            token: SessionToken::new("tok"),
        }
        .encode();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({ "type": "connection_init", "payload": { "Authorization": "Bearer tok" } })
        );
    }

    #[test]
    fn encode_start_uses_canvas_as_id_and_tag() {
        let text = ClientMessage::Start { canvas: CanvasId(2) }.encode();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["id"], "2");
        assert_eq!(value["type"], "start");
        assert_eq!(
            value["payload"]["variables"]["input"]["channel"],
            json!({ "teamOwner": "AFD2022", "category": "CANVAS", "tag": "2" })
        );
        assert_eq!(value["payload"]["operationName"], "replace");
    }

    #[test]
    fn decode_handshake_and_keepalive() {
        assert_eq!(
            ServerMessage::decode(r#"{"type":"connection_ack"}"#).unwrap(),
            ServerMessage::ConnectionAck
        );
        assert_eq!(
            ServerMessage::decode(r#"{"type":"ka"}"#).unwrap(),
            ServerMessage::KeepAlive
        );
    }

    #[test]
    fn decode_connection_error() {
        let msg = ServerMessage::decode(r#"{"type":"connection_error","payload":{"message":"401"}}"#)
            .unwrap();
        assert!(matches!(msg, ServerMessage::ConnectionError { reason } if reason.contains("401")));
    }

    #[test]
    fn decode_full_frame() {
        let text = data_message(
            "1",
            json!({ "__typename": "FullFrameMessageData", "name": "https://x/full.png", "timestamp": 1648.0 }),
        );
        assert_eq!(
            ServerMessage::decode(&text).unwrap(),
            ServerMessage::Frame(FrameEvent::Full {
                subscription: CanvasId(1),
                url: "https://x/full.png".to_string(),
                timestamp: Some(1648),
            })
        );
    }

    #[test]
    fn decode_diff_frame() {
        let text = data_message(
            "0",
            json!({
                "__typename": "DiffFrameMessageData",
                "name": "https://x/diff.png",
                "currentTimestamp": 20,
                "previousTimestamp": 10,
            }),
        );
        let msg = ServerMessage::decode(&text).unwrap();
        let ServerMessage::Frame(frame) = &msg else {
            panic!("expected frame, got {msg:?}");
        };
        assert_eq!(frame.subscription(), CanvasId(0));
        assert_eq!(frame.url(), "https://x/diff.png");
        assert!(matches!(frame, FrameEvent::Diff { current: Some(20), previous: Some(10), .. }));
    }

    #[test]
    fn unknown_shapes_are_not_errors() {
        let other_type = data_message("0", json!({ "__typename": "ConfigurationMessageData" }));
        assert!(matches!(
            ServerMessage::decode(&other_type).unwrap(),
            ServerMessage::Unknown(_)
        ));
        assert!(matches!(
            ServerMessage::decode(r#"{"type":"complete","id":"0"}"#).unwrap(),
            ServerMessage::Unknown(_)
        ));
        // Non-numeric subscription id
        let bad_id = data_message("abc", json!({ "__typename": "FullFrameMessageData", "name": "u" }));
        assert!(matches!(
            ServerMessage::decode(&bad_id).unwrap(),
            ServerMessage::Unknown(_)
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            ServerMessage::decode("not json"),
            Err(ChannelError::Malformed(_))
        ));
        assert!(matches!(
            ServerMessage::decode(r#"{"no_type":1}"#),
            Err(ChannelError::Malformed(_))
        ));
    }
}
