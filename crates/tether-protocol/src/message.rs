//! # Envelopes
//!
//! The JSON payload carried by every frame:
//!
//! ```json
//! {"seq": 3, "kind": "SET_BREAK", "args": {"unit": "app.py", "line": 12}}
//! ```
//!
//! Clients number their requests with odd sequence ids; the server numbers
//! its notifications with even ids starting at 2. A response carries the
//! sequence id of the request it answers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{ProtocolError, ProtocolResult, TransportError};

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope
{
    /// Sequence id.
    pub seq: u64,
    /// Command, response or notification kind.
    pub kind: String,
    /// Arguments, in wire order.
    #[serde(default)]
    pub args: Map<String, JsonValue>,
}

impl Envelope
{
    /// Envelope with no arguments.
    #[must_use]
    pub fn new(seq: u64, kind: impl Into<String>) -> Self
    {
        Self {
            seq,
            kind: kind.into(),
            args: Map::new(),
        }
    }

    /// Add an argument.
    #[must_use]
    pub fn with_arg(mut self, name: &str, value: impl Into<JsonValue>) -> Self
    {
        self.args.insert(name.to_string(), value.into());
        self
    }

    /// Add an argument only when it is set.
    #[must_use]
    pub fn with_opt_arg<T: Into<JsonValue>>(self, name: &str, value: Option<T>) -> Self
    {
        match value {
            Some(value) => self.with_arg(name, value),
            None => self,
        }
    }

    /// Typed view of the arguments.
    #[must_use]
    pub const fn args(&self) -> Args<'_>
    {
        Args(&self.args)
    }

    /// Serialize to a frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Encode`] when serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, TransportError>
    {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] when the payload is not an
    /// envelope.
    pub fn decode(payload: &[u8]) -> ProtocolResult<Self>
    {
        serde_json::from_slice(payload).map_err(|err| ProtocolError::Malformed(err.to_string()))
    }
}

/// Best-effort sequence id of a payload that failed to decode; 0 when even
/// that cannot be read.
#[must_use]
pub fn recover_seq(payload: &[u8]) -> u64
{
    serde_json::from_slice::<JsonValue>(payload)
        .ok()
        .and_then(|value| value.get("seq").and_then(JsonValue::as_u64))
        .unwrap_or(0)
}

/// Typed accessors over an argument map.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a>(&'a Map<String, JsonValue>);

impl<'a> Args<'a>
{
    fn invalid(name: &'static str, expected: &str, found: &JsonValue) -> ProtocolError
    {
        ProtocolError::InvalidArgument {
            name,
            reason: format!("expected {expected}, found {found}"),
        }
    }

    /// Raw value, treating JSON `null` as absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'a JsonValue>
    {
        self.0.get(name).filter(|value| !value.is_null())
    }

    /// Required argument.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::MissingArgument`] when absent.
    pub fn require(&self, name: &'static str) -> ProtocolResult<&'a JsonValue>
    {
        self.get(name).ok_or(ProtocolError::MissingArgument(name))
    }

    /// Required string.
    ///
    /// # Errors
    ///
    /// Missing or not a string.
    pub fn str(&self, name: &'static str) -> ProtocolResult<&'a str>
    {
        let value = self.require(name)?;
        value.as_str().ok_or_else(|| Self::invalid(name, "a string", value))
    }

    /// Optional string.
    ///
    /// # Errors
    ///
    /// Present but not a string.
    pub fn opt_str(&self, name: &'static str) -> ProtocolResult<Option<&'a str>>
    {
        self.get(name)
            .map(|value| value.as_str().ok_or_else(|| Self::invalid(name, "a string", value)))
            .transpose()
    }

    /// Required unsigned integer.
    ///
    /// # Errors
    ///
    /// Missing or not a non-negative integer.
    pub fn u64(&self, name: &'static str) -> ProtocolResult<u64>
    {
        let value = self.require(name)?;
        value.as_u64().ok_or_else(|| Self::invalid(name, "a non-negative integer", value))
    }

    /// Required unsigned 32-bit integer.
    ///
    /// # Errors
    ///
    /// Missing, not an integer, or out of range.
    pub fn u32(&self, name: &'static str) -> ProtocolResult<u32>
    {
        let raw = self.u64(name)?;
        u32::try_from(raw).map_err(|_| ProtocolError::InvalidArgument {
            name,
            reason: format!("{raw} is out of range"),
        })
    }

    /// Optional boolean with a default.
    ///
    /// # Errors
    ///
    /// Present but not a boolean.
    pub fn bool_or(&self, name: &'static str, default: bool) -> ProtocolResult<bool>
    {
        match self.get(name) {
            Some(value) => value.as_bool().ok_or_else(|| Self::invalid(name, "a boolean", value)),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests
{
    use serde_json::json;

    use super::*;

    #[test]
    fn test_envelope_keeps_argument_order()
    {
        let envelope = Envelope::new(7, "SET_BREAK").with_arg("unit", "b.py").with_arg("line", 3).with_arg("condition", "x > 1");
        let encoded = String::from_utf8(envelope.encode().unwrap()).unwrap();
        assert_eq!(encoded, r#"{"seq":7,"kind":"SET_BREAK","args":{"unit":"b.py","line":3,"condition":"x > 1"}}"#);
        assert_eq!(Envelope::decode(encoded.as_bytes()).unwrap(), envelope);
    }

    #[test]
    fn test_args_default_to_empty()
    {
        let envelope = Envelope::decode(br#"{"seq":1,"kind":"LIST_THREADS"}"#).unwrap();
        assert!(envelope.args.is_empty());
    }

    #[test]
    fn test_malformed_payloads()
    {
        assert!(matches!(Envelope::decode(b"not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(Envelope::decode(br#"{"seq":"one","kind":"EXIT"}"#), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_recover_seq()
    {
        assert_eq!(recover_seq(br#"{"seq":41,"kind":7}"#), 41);
        assert_eq!(recover_seq(br#"{"kind":"EXIT"}"#), 0);
        assert_eq!(recover_seq(b"\xff\xfe"), 0);
    }

    #[test]
    fn test_typed_args()
    {
        let envelope = Envelope::new(1, "X")
            .with_arg("line", 12)
            .with_arg("big", json!(u64::MAX))
            .with_arg("flag", true)
            .with_arg("name", "a")
            .with_arg("nothing", JsonValue::Null);
        let args = envelope.args();
        assert_eq!(args.u32("line").unwrap(), 12);
        assert!(matches!(args.u32("big"), Err(ProtocolError::InvalidArgument { name: "big", .. })));
        assert!(args.bool_or("flag", false).unwrap());
        assert!(!args.bool_or("absent", false).unwrap());
        assert_eq!(args.opt_str("nothing").unwrap(), None);
        assert_eq!(args.str("missing"), Err(ProtocolError::MissingArgument("missing")));
        assert!(matches!(args.str("line"), Err(ProtocolError::InvalidArgument { name: "line", .. })));
    }
}
