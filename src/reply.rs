//! Reply side of the client boundary.
//!
//! A completed payload is wrapped in a [`RawReply`] that remembers which
//! transport produced it, then handed to a [`ReplyDecoder`].

use bytes::Bytes;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::protocol::fields::decode_fields;
use crate::protocol::frame::PAYLOAD_FIELD;
use crate::protocol::WireVariant;

/// Key under which the storage reports a newly opened transaction
pub const TRANSACTION_ID_KEY: &str = "transaction_id";

/// A completed response payload
#[derive(Debug, Clone)]
pub struct RawReply {
    payload: Bytes,
    variant: WireVariant,
}

impl RawReply {
    pub fn new(payload: Bytes, variant: WireVariant) -> Self {
        Self { payload, variant }
    }

    /// Assembled bytes as they came off the wire (frame body or HTTP body)
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn variant(&self) -> WireVariant {
        self.variant
    }

    /// Whether the payload is a field-codec frame body
    pub fn is_binary(&self) -> bool {
        self.variant.is_binary()
    }

    /// The reply document: field 1 of a framed reply, or the HTTP body.
    pub fn text(&self) -> Result<String> {
        match self.variant {
            WireVariant::Framed => decode_fields(&self.payload)?
                .remove(&PAYLOAD_FIELD)
                .ok_or_else(|| Error::Protocol("reply frame has no payload field".to_string())),
            WireVariant::Http => String::from_utf8(self.payload.to_vec())
                .map_err(|e| Error::Decode(format!("reply is not UTF-8: {}", e))),
        }
    }
}

/// Turns completed payloads into application replies
pub trait ReplyDecoder: Send + Sync {
    /// Decoded reply type
    type Reply: Send;

    /// Decode a completed payload.
    fn decode(&self, raw: &RawReply) -> Result<Self::Reply>;

    /// Transaction id carried by a begin-transaction reply.
    fn transaction_id(&self, reply: &Self::Reply) -> Option<String>;
}

/// Decoder for the `json` response format
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReplyDecoder;

impl ReplyDecoder for JsonReplyDecoder {
    type Reply = Value;

    fn decode(&self, raw: &RawReply) -> Result<Value> {
        Ok(serde_json::from_str(&raw.text()?)?)
    }

    fn transaction_id(&self, reply: &Value) -> Option<String> {
        find_transaction_id(reply)
    }
}

/// First `transaction_id` member found walking the document depth-first.
fn find_transaction_id(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            match map.get(TRANSACTION_ID_KEY) {
                Some(Value::String(id)) => return Some(id.clone()),
                Some(Value::Number(id)) => return Some(id.to_string()),
                _ => {}
            }
            map.values().find_map(find_transaction_id)
        }
        Value::Array(items) => items.iter().find_map(find_transaction_id),
        _ => None,
    }
}

/// Passes the reply document through as text. Suits the `xml` format when
/// the application parses documents itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextReplyDecoder;

impl ReplyDecoder for TextReplyDecoder {
    type Reply = String;

    fn decode(&self, raw: &RawReply) -> Result<String> {
        raw.text()
    }

    fn transaction_id(&self, reply: &String) -> Option<String> {
        // matches both <transaction_id> and namespaced <cps:transaction_id>
        let open = reply.find("transaction_id>")? + "transaction_id>".len();
        let len = reply[open..].find("</")?;
        let id = reply[open..open + len].trim();
        (!id.is_empty()).then(|| id.to_string())
    }
}
