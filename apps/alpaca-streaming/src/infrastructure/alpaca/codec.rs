//! Stream Codec Module
//!
//! Decodes Alpaca WebSocket frames into [`Inbound`] messages.
//!
//! - **Market data streams** send JSON arrays of objects tagged by `T`.
//! - **Account stream** sends single objects tagged by `stream`, often as
//!   binary frames holding UTF-8 JSON.
//!
//! A frame that is not valid JSON fails as a whole. Inside a valid frame,
//! each element is decoded on its own: an element that fails is logged,
//! counted and skipped, and unknown tags are ignored, so one bad element
//! never costs the rest of the batch.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::messages::{
    AuthorizationMessage, ErrorMessage, ListeningMessage, SubscriptionMessage, SuccessKind,
    SuccessMessage, TradeUpdateMessage,
};
use crate::domain::streaming::{
    Bar, BarKind, Orderbook, Quote, StreamEvent, StreamFlavor, SubscriptionAck, Trade,
};
use crate::infrastructure::metrics;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary frame was not UTF-8.
    #[error("binary frame is not UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// `{"T":"success","msg":"connected"}`
    Connected,
    /// Credentials accepted (market `success` or account `authorized`).
    Authenticated,
    /// Account authorization refused, with the reported status.
    Unauthorized(String),
    /// Server error frame.
    Error(ErrorMessage),
    /// Subscription echo or listen acknowledgement.
    Subscribed(SubscriptionAck),
    /// Data event.
    Event(StreamEvent),
}

/// JSON codec for every Alpaca stream flavor.
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec {
    flavor: StreamFlavor,
}

impl JsonCodec {
    /// Create a codec for a session of `flavor`.
    #[must_use]
    pub const fn new(flavor: StreamFlavor) -> Self {
        Self { flavor }
    }

    /// Decode a binary frame holding UTF-8 JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not UTF-8 or not JSON.
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<Vec<Inbound>, CodecError> {
        self.decode(std::str::from_utf8(bytes)?)
    }

    /// Decode a text frame into its messages, in frame order.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON array or object.
    pub fn decode(&self, text: &str) -> Result<Vec<Inbound>, CodecError> {
        let value: Value = serde_json::from_str(text.trim())?;

        match value {
            Value::Array(elements) => Ok(elements
                .into_iter()
                .filter_map(|element| self.decode_element(element))
                .collect()),
            Value::Object(_) => Ok(self.decode_element(value).into_iter().collect()),
            other => Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Decode one element, returning `None` when it is skipped.
    ///
    /// Market streams tag elements with `T`, the account stream with
    /// `stream`. An element carrying the other flavor's tag is unknown here.
    fn decode_element(&self, value: Value) -> Option<Inbound> {
        let key = if self.flavor.is_market_data() { "T" } else { "stream" };
        let Some(tag) = value.get(key).and_then(Value::as_str).map(str::to_owned) else {
            tracing::warn!(flavor = %self.flavor, key, "Message without type tag, skipping");
            metrics::record_decode_failure(self.flavor);
            return None;
        };

        if self.flavor.is_market_data() {
            self.decode_market(&tag, value)
        } else {
            self.decode_account(&tag, value)
        }
    }

    fn decode_market(&self, tag: &str, value: Value) -> Option<Inbound> {
        match tag {
            "success" => self.parse::<SuccessMessage>(tag, value).and_then(|m| match m.msg {
                SuccessKind::Connected => Some(Inbound::Connected),
                SuccessKind::Authenticated => Some(Inbound::Authenticated),
                SuccessKind::Other => None,
            }),
            "error" => self.parse::<ErrorMessage>(tag, value).map(Inbound::Error),
            "subscription" => self
                .parse::<SubscriptionMessage>(tag, value)
                .map(|m| Inbound::Subscribed(m.into())),
            "t" => self
                .parse::<Trade>(tag, value)
                .map(|t| Inbound::Event(StreamEvent::Trade(t))),
            "q" => self
                .parse::<Quote>(tag, value)
                .map(|q| Inbound::Event(StreamEvent::Quote(q))),
            "b" | "u" | "d" => {
                let kind = BarKind::from_type_tag(tag).unwrap_or_default();
                self.parse::<Bar>(tag, value)
                    .map(|bar| Inbound::Event(StreamEvent::Bar(Bar { kind, ..bar })))
            }
            "o" => self
                .parse::<Orderbook>(tag, value)
                .map(|o| Inbound::Event(StreamEvent::Orderbook(o))),
            other => self.ignore(other),
        }
    }

    fn decode_account(&self, tag: &str, value: Value) -> Option<Inbound> {
        match tag {
            "authorization" => self.parse::<AuthorizationMessage>(tag, value).map(|m| {
                if m.is_authorized() {
                    Inbound::Authenticated
                } else {
                    Inbound::Unauthorized(m.data.status)
                }
            }),
            "listening" => self
                .parse::<ListeningMessage>(tag, value)
                .map(|m| Inbound::Subscribed(m.into())),
            "trade_updates" => self
                .parse::<TradeUpdateMessage>(tag, value)
                .map(|m| Inbound::Event(StreamEvent::TradeUpdate(Box::new(m.data)))),
            other => self.ignore(other),
        }
    }

    fn ignore(&self, tag: &str) -> Option<Inbound> {
        tracing::trace!(flavor = %self.flavor, tag, "Ignoring unknown message type");
        None
    }

    fn parse<T: DeserializeOwned>(&self, tag: &str, value: Value) -> Option<T> {
        match serde_json::from_value(value) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(
                    flavor = %self.flavor,
                    tag,
                    error = %e,
                    "Failed to decode message, skipping"
                );
                metrics::record_decode_failure(self.flavor);
                None
            }
        }
    }
}

/// Serialize an outbound request.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode<T: serde::Serialize>(request: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(request)?)
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::{Channel, OrderEvent};
    use crate::infrastructure::alpaca::messages::SubscriptionRequest;

    fn stock() -> JsonCodec {
        JsonCodec::new(StreamFlavor::StockMarketData)
    }

    #[test]
    fn decodes_control_sequence() {
        let messages = stock()
            .decode(r#"[{"T":"success","msg":"connected"},{"T":"success","msg":"authenticated"}]"#)
            .unwrap();
        assert_eq!(messages, vec![Inbound::Connected, Inbound::Authenticated]);
    }

    #[test]
    fn decodes_mixed_data_batch_in_order() {
        let frame = r#"[
            {"T":"t","S":"AAPL","i":1,"x":"V","p":150.25,"s":100,"t":"2024-01-15T14:30:00Z","c":["@"],"z":"C"},
            {"T":"q","S":"AAPL","bx":"V","bp":150.2,"bs":3,"ax":"V","ap":150.3,"as":2,"t":"2024-01-15T14:30:00Z","c":["R"],"z":"C"},
            {"T":"u","S":"AAPL","o":150,"h":151,"l":149,"c":150.5,"v":1000,"n":12,"vw":150.1,"t":"2024-01-15T14:30:00Z"}
        ]"#;
        let messages = stock().decode(frame).unwrap();
        assert_eq!(messages.len(), 3);
        assert!(matches!(&messages[0], Inbound::Event(StreamEvent::Trade(t)) if t.symbol == "AAPL"));
        assert!(matches!(&messages[1], Inbound::Event(StreamEvent::Quote(_))));
        match &messages[2] {
            Inbound::Event(StreamEvent::Bar(bar)) => {
                assert_eq!(bar.kind, BarKind::Updated);
                assert_eq!(bar.kind.channel(), Channel::UpdatedBars);
            }
            other => panic!("expected bar, got {other:?}"),
        }
    }

    #[test]
    fn bad_element_is_skipped() {
        let frame = r#"[
            {"T":"t","S":"AAPL","p":"not-a-price"},
            {"T":"t","S":"MSFT","p":400,"s":1,"t":"2024-01-15T14:30:00Z"}
        ]"#;
        let messages = stock().decode(frame).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0], Inbound::Event(StreamEvent::Trade(t)) if t.symbol == "MSFT"));
    }

    #[test]
    fn unknown_tags_are_ignored() {
        let frame = r#"[{"T":"s","S":"AAPL","sc":"H"},{"T":"success","msg":"connected"}]"#;
        assert_eq!(stock().decode(frame).unwrap(), vec![Inbound::Connected]);
    }

    #[test]
    fn malformed_frame_is_an_error() {
        assert!(stock().decode("not json").is_err());
        assert!(stock().decode("[{\"T\":").is_err());
        assert!(matches!(
            stock().decode("42"),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn empty_array_decodes_to_nothing() {
        assert!(stock().decode("[]").unwrap().is_empty());
    }

    #[test]
    fn decodes_crypto_orderbook() {
        let codec = JsonCodec::new(StreamFlavor::CryptoMarketData);
        let frame = r#"[{"T":"o","S":"BTC/USD","t":"2024-03-12T10:38:50.79613221Z","b":[{"p":71000.5,"s":0.25}],"a":[{"p":71010,"s":0.5}],"r":true}]"#;
        let messages = codec.decode(frame).unwrap();
        match &messages[0] {
            Inbound::Event(StreamEvent::Orderbook(book)) => {
                assert_eq!(book.symbol, "BTC/USD");
                assert_eq!(book.bids.len(), 1);
                assert!(book.reset);
            }
            other => panic!("expected orderbook, got {other:?}"),
        }
    }

    #[test]
    fn decodes_account_authorization() {
        let codec = JsonCodec::new(StreamFlavor::AccountActivity);
        let ok = codec
            .decode_bytes(
                br#"{"stream":"authorization","data":{"status":"authorized","action":"authenticate"}}"#,
            )
            .unwrap();
        assert_eq!(ok, vec![Inbound::Authenticated]);

        let denied = codec
            .decode(r#"{"stream":"authorization","data":{"status":"unauthorized","action":"authenticate"}}"#)
            .unwrap();
        assert_eq!(denied, vec![Inbound::Unauthorized("unauthorized".to_string())]);
    }

    #[test]
    fn decodes_trade_update() {
        let codec = JsonCodec::new(StreamFlavor::AccountActivity);
        let frame = r#"{"stream":"trade_updates","data":{
            "event":"fill","execution_id":"e-1","price":"179.08","qty":"1","position_qty":"1",
            "timestamp":"2024-01-15T14:30:00Z",
            "order":{"id":"o-1","client_order_id":"c-1","symbol":"AAPL","side":"buy","type":"market",
                     "time_in_force":"day","qty":"1","filled_qty":"1","status":"filled"}
        }}"#;
        let messages = codec.decode(frame).unwrap();
        match &messages[0] {
            Inbound::Event(StreamEvent::TradeUpdate(update)) => {
                assert_eq!(update.event, OrderEvent::Fill);
                assert_eq!(update.order.symbol, "AAPL");
            }
            other => panic!("expected trade update, got {other:?}"),
        }
    }

    #[test]
    fn decodes_listening_ack() {
        let codec = JsonCodec::new(StreamFlavor::AccountActivity);
        let messages = codec
            .decode(r#"{"stream":"listening","data":{"streams":["trade_updates"]}}"#)
            .unwrap();
        match &messages[0] {
            Inbound::Subscribed(ack) => assert!(ack.channels.contains_key(&Channel::TradeUpdates)),
            other => panic!("expected listen ack, got {other:?}"),
        }
    }

    #[test]
    fn listening_ack_with_no_streams() {
        let codec = JsonCodec::new(StreamFlavor::AccountActivity);
        let messages = codec
            .decode(r#"{"stream":"listening","data":{"streams":[]}}"#)
            .unwrap();
        match &messages[0] {
            Inbound::Subscribed(ack) => assert!(ack.channels.is_empty()),
            other => panic!("expected listen ack, got {other:?}"),
        }
    }

    #[test]
    fn each_flavor_ignores_the_other_vocabulary() {
        let account = JsonCodec::new(StreamFlavor::AccountActivity);
        assert!(
            account
                .decode(r#"[{"T":"success","msg":"authenticated"},{"T":"t","S":"AAPL","p":1,"s":1,"t":"2024-01-15T14:30:00Z"}]"#)
                .unwrap()
                .is_empty()
        );

        let authorized =
            r#"{"stream":"authorization","data":{"status":"authorized","action":"authenticate"}}"#;
        assert!(stock().decode(authorized).unwrap().is_empty());
        assert!(
            JsonCodec::new(StreamFlavor::CryptoMarketData)
                .decode(r#"{"stream":"listening","data":{"streams":["trade_updates"]}}"#)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn binary_frame_must_be_utf8() {
        let codec = JsonCodec::new(StreamFlavor::AccountActivity);
        assert!(matches!(
            codec.decode_bytes(&[0xff, 0xfe]),
            Err(CodecError::Utf8(_))
        ));
    }

    #[test]
    fn encode_request() {
        let request = SubscriptionRequest::subscribe().with_channel(Channel::Quotes, vec!["SPY".into()]);
        assert_eq!(
            encode(&request).unwrap(),
            r#"{"action":"subscribe","quotes":["SPY"]}"#
        );
    }
}
