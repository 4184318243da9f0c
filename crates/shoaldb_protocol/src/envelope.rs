//! Response envelopes.
//!
//! Every response is a JSON object with a boolean `ok`. Successful
//! responses carry a verb-specific payload next to it; failures carry an
//! `error` object with a `kind` from [`ErrorKind`] and a message.

use crate::kind::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// The `error` member of a failed envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error category.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
}

/// Builds a success envelope from a payload object.
///
/// A non-object payload is placed under `result`.
pub fn ok_envelope(payload: Value) -> Value {
    let mut map = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("result".into(), other);
            map
        }
    };
    map.insert("ok".into(), Value::Bool(true));
    Value::Object(map)
}

/// Builds a failure envelope.
pub fn error_envelope(kind: ErrorKind, message: impl Into<String>) -> Value {
    json!({
        "ok": false,
        "error": ErrorBody { kind, message: message.into() },
    })
}

/// Builds failure envelope text.
pub fn error_response(kind: ErrorKind, message: impl Into<String>) -> String {
    error_envelope(kind, message).to_string()
}

/// A response decoded far enough to classify it.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEnvelope {
    /// `ok:true` with the whole response object.
    Ok(Map<String, Value>),
    /// `ok:false` with its error body.
    Err(ErrorBody),
}

impl ParsedEnvelope {
    /// Decodes response bytes.
    ///
    /// Fails with a message when the bytes are not a well-formed envelope.
    pub fn parse(bytes: &[u8]) -> Result<ParsedEnvelope, String> {
        let text = std::str::from_utf8(bytes).map_err(|_| "response is not valid UTF-8")?;
        let value: Value =
            serde_json::from_str(text).map_err(|e| format!("response is not valid JSON: {e}"))?;
        let Value::Object(map) = value else {
            return Err("response is not a JSON object".into());
        };
        match map.get("ok").and_then(Value::as_bool) {
            Some(true) => Ok(ParsedEnvelope::Ok(map)),
            Some(false) => {
                let body = map
                    .get("error")
                    .cloned()
                    .ok_or("error response without an 'error' object")?;
                serde_json::from_value(body)
                    .map(ParsedEnvelope::Err)
                    .map_err(|e| format!("malformed error object: {e}"))
            }
            None => Err("response lacks a boolean 'ok' field".into()),
        }
    }

    /// Returns true for a success envelope.
    pub fn is_ok(&self) -> bool {
        matches!(self, ParsedEnvelope::Ok(_))
    }

    /// Returns the error kind of a failure envelope.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ParsedEnvelope::Ok(_) => None,
            ParsedEnvelope::Err(body) => Some(body.kind),
        }
    }
}

/// Returns response text that is guaranteed to be an envelope.
///
/// Well-formed responses are passed through untouched; anything else is
/// replaced by a `protocol` error envelope.
pub fn normalize_response(bytes: &[u8]) -> String {
    match ParsedEnvelope::parse(bytes) {
        // Valid UTF-8 was checked by parse
        Ok(_) => String::from_utf8_lossy(bytes).into_owned(),
        Err(message) => error_response(ErrorKind::Protocol, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_merges_payload() {
        let value = ok_envelope(json!({"pong": true}));
        assert_eq!(value, json!({"ok": true, "pong": true}));
        assert_eq!(ok_envelope(Value::Null), json!({"ok": true}));
    }

    #[test]
    fn error_envelope_shape() {
        let value = error_envelope(ErrorKind::NotFound, "no such index");
        assert_eq!(
            value,
            json!({"ok": false, "error": {"kind": "not_found", "message": "no such index"}})
        );
    }

    #[test]
    fn parse_classifies() {
        let ok = ParsedEnvelope::parse(br#"{"ok":true,"count":3}"#).unwrap();
        assert!(ok.is_ok());
        let err = ParsedEnvelope::parse(
            br#"{"ok":false,"error":{"kind":"conflict","message":"stale"}}"#,
        )
        .unwrap();
        assert_eq!(err.error_kind(), Some(ErrorKind::Conflict));
    }

    #[test]
    fn normalize_passes_valid_responses() {
        let text = r#"{"ok":true,"pong":true}"#;
        assert_eq!(normalize_response(text.as_bytes()), text);
    }

    #[test]
    fn normalize_synthesizes_protocol_errors() {
        for bad in [
            &b"not json"[..],
            &b"[1,2]"[..],
            &br#"{"pong":true}"#[..],
            &br#"{"ok":"yes"}"#[..],
            &br#"{"ok":false}"#[..],
            &br#"{"ok":false,"error":{"kind":"weird","message":""}}"#[..],
            &[0xff, 0xfe][..],
        ] {
            let parsed = ParsedEnvelope::parse(normalize_response(bad).as_bytes()).unwrap();
            assert_eq!(parsed.error_kind(), Some(ErrorKind::Protocol));
        }
    }
}
