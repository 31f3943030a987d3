//! # Envelopes
//!
//! The two message shapes that cross the transport.
//!
//! - Outbound: a message named after the query, body `[call_id: u64, message: string]`.
//! - Inbound:  the response message, body `[call_id: u64, succeeded: bool, message: string]`.
//!
//! Any deviation in arity or element type is a decode failure.

use std::fmt;

use querypack::Message;
use querypack::Value;

use crate::handles::CallId;

/// Why a response body could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The body is not a list.
    NotAList { found: &'static str },
    /// The body has the wrong number of elements.
    Arity { expected: usize, found: usize },
    /// An element has the wrong type.
    Field { index: usize, expected: &'static str, found: &'static str },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAList { found } => write!(f, "body must be a list, found {}", found),
            Self::Arity { expected, found } => {
                write!(f, "body must have {} elements, found {}", expected, found)
            }
            Self::Field { index, expected, found } => {
                write!(f, "element {} must be {}, found {}", index, expected, found)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// A query on its way to the external process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEnvelope {
    pub name: String,
    pub call_id: CallId,
    pub message: String,
}

impl OutboundEnvelope {
    pub fn new(name: impl Into<String>, call_id: CallId, message: impl Into<String>) -> Self {
        Self { name: name.into(), call_id, message: message.into() }
    }

    /// The wire form: message `name` with body `[call_id, message]`.
    pub fn to_message(&self) -> Message {
        Message::new(
            self.name.clone(),
            Value::list([Value::U64(self.call_id.get()), Value::from(self.message.as_str())]),
        )
    }
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub call_id: CallId,
    pub succeeded: bool,
    pub message: String,
}

impl ResponseEnvelope {
    pub fn success(call_id: CallId, message: impl Into<String>) -> Self {
        Self { call_id, succeeded: true, message: message.into() }
    }

    pub fn failure(call_id: CallId, message: impl Into<String>) -> Self {
        Self { call_id, succeeded: false, message: message.into() }
    }

    /// Decodes `[u64, bool, string]`.
    pub fn decode(body: &Value) -> Result<Self, DecodeError> {
        let items = body.as_list().ok_or(DecodeError::NotAList { found: body.kind() })?;

        let [id, succeeded, message] = items else {
            return Err(DecodeError::Arity { expected: 3, found: items.len() });
        };

        let call_id = id.as_u64().ok_or(DecodeError::Field {
            index: 0,
            expected: "u64",
            found: id.kind(),
        })?;
        let succeeded = succeeded.as_bool().ok_or(DecodeError::Field {
            index: 1,
            expected: "bool",
            found: succeeded.kind(),
        })?;
        let message = message.as_str().ok_or(DecodeError::Field {
            index: 2,
            expected: "string",
            found: message.kind(),
        })?;

        Ok(Self { call_id: CallId(call_id), succeeded, message: message.to_string() })
    }

    /// The wire body: `[call_id, succeeded, message]`.
    pub fn to_value(&self) -> Value {
        Value::list([
            Value::U64(self.call_id.get()),
            Value::Bool(self.succeeded),
            Value::from(self.message.as_str()),
        ])
    }

    /// The response as a `Result`, success payload on `Ok`, error payload on `Err`.
    pub fn outcome(self) -> Result<String, String> {
        if self.succeeded { Ok(self.message) } else { Err(self.message) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_success_response() {
        let body = Value::list([Value::U64(1), Value::Bool(true), Value::from("pong")]);
        let env = ResponseEnvelope::decode(&body).unwrap();
        assert_eq!(env, ResponseEnvelope::success(CallId(1), "pong"));
        assert_eq!(env.outcome(), Ok("pong".to_string()));
    }

    #[test]
    fn test_decode_failure_response() {
        let body = ResponseEnvelope::failure(CallId(4), "boom").to_value();
        let env = ResponseEnvelope::decode(&body).unwrap();
        assert!(!env.succeeded);
        assert_eq!(env.outcome(), Err("boom".to_string()));
    }

    #[test]
    fn test_decode_rejects_non_list() {
        let err = ResponseEnvelope::decode(&Value::from("nope")).unwrap_err();
        assert_eq!(err, DecodeError::NotAList { found: "string" });
    }

    #[test]
    fn test_decode_rejects_short_and_long_bodies() {
        let short = Value::list([Value::U64(1), Value::Bool(true)]);
        assert_eq!(
            ResponseEnvelope::decode(&short).unwrap_err(),
            DecodeError::Arity { expected: 3, found: 2 }
        );

        let long = Value::list([Value::U64(1), Value::Bool(true), Value::from("a"), Value::from("b")]);
        assert_eq!(
            ResponseEnvelope::decode(&long).unwrap_err(),
            DecodeError::Arity { expected: 3, found: 4 }
        );
    }

    #[test]
    fn test_decode_rejects_non_numeric_id() {
        let body = Value::list([Value::from("1"), Value::Bool(true), Value::from("x")]);
        assert_eq!(
            ResponseEnvelope::decode(&body).unwrap_err(),
            DecodeError::Field { index: 0, expected: "u64", found: "string" }
        );
    }

    #[test]
    fn test_decode_rejects_wrong_flag_and_payload_types() {
        let body = Value::list([Value::U64(1), Value::U64(1), Value::from("x")]);
        assert!(matches!(
            ResponseEnvelope::decode(&body),
            Err(DecodeError::Field { index: 1, .. })
        ));

        let body = Value::list([Value::U64(1), Value::Bool(false), Value::list([])]);
        assert!(matches!(
            ResponseEnvelope::decode(&body),
            Err(DecodeError::Field { index: 2, expected: "string", found: "list" })
        ));
    }

    #[test]
    fn test_outbound_wire_shape() {
        let msg = OutboundEnvelope::new("ping", CallId(1), "hello").to_message();
        assert_eq!(msg.name, "ping");
        assert_eq!(msg.body, Value::list([Value::U64(1), Value::from("hello")]));
    }
}
