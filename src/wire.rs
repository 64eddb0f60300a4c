// SPDX-License-Identifier: MIT
//! Wire value model and call envelope.
//!
//! Everything that crosses the remote-invocation boundary — positional
//! arguments, unary results, stream elements — must be expressible in the
//! closed set of types below. Anything else is rejected with a
//! [`SerializationError`] at the dispatcher boundary, before a handler ever
//! sees the call. Handlers never receive raw transport bytes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A value that is safe to carry across the remote call boundary.
///
/// The set is deliberately closed: booleans, integers, floats, strings, byte
/// sequences, ordered sequences, and string-keyed mappings. There is no null
/// — an operation that has nothing to say returns `Bool(true)` by
/// convention (see the built-in power driver). Floats must be finite: JSON
/// has no representation for NaN or the infinities, so [`validate`] rejects
/// them before they reach the envelope.
///
/// [`validate`]: Value::validate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Convert a plain JSON value into a wire value.
    ///
    /// `at` names the position being converted (e.g. `args[2]`) so a
    /// rejection can be diagnosed remotely. JSON `null` has no wire
    /// representation and is rejected; integers that fit `i64` stay
    /// integers, everything else numeric becomes a float.
    pub fn from_json(json: &serde_json::Value, at: &str) -> Result<Self, SerializationError> {
        match json {
            serde_json::Value::Null => Err(SerializationError::Null { at: at.to_string() }),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(SerializationError::Number {
                        at: at.to_string(),
                        number: n.to_string(),
                    })
                }
            }
            serde_json::Value::String(s) => Ok(Value::Str(s.clone())),
            serde_json::Value::Array(items) => {
                let mut seq = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    seq.push(Value::from_json(item, &format!("{at}[{i}]"))?);
                }
                Ok(Value::Seq(seq))
            }
            serde_json::Value::Object(fields) => {
                let mut map = BTreeMap::new();
                for (key, field) in fields {
                    map.insert(key.clone(), Value::from_json(field, &format!("{at}.{key}"))?);
                }
                Ok(Value::Map(map))
            }
        }
    }

    /// Check the value against the wire contract.
    ///
    /// `from_json` only ever produces conforming values, but handlers build
    /// results directly and can smuggle in the one thing the type system
    /// does not rule out: a non-finite float, which `to_json` would silently
    /// render as `null`. The dispatcher runs this on every unary result and
    /// stream element before it leaves the process.
    pub fn validate(&self) -> Result<(), SerializationError> {
        self.validate_at("result")
    }

    fn validate_at(&self, at: &str) -> Result<(), SerializationError> {
        match self {
            Value::Float(f) if !f.is_finite() => Err(SerializationError::NonFinite {
                at: at.to_string(),
                float: *f,
            }),
            Value::Seq(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.validate_at(&format!("{at}[{i}]"))?;
                }
                Ok(())
            }
            Value::Map(fields) => {
                for (key, field) in fields {
                    field.validate_at(&format!("{at}.{key}"))?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Render as plain JSON for a transport that speaks JSON natively.
    ///
    /// Byte sequences have no JSON type and are rendered as arrays of
    /// numbers; `from_json` consequently never produces `Bytes`. Transports
    /// that need lossless bytes ship the tagged serde form of `Value`
    /// itself. Non-finite floats have no JSON representation and render as
    /// `null`; [`validate`](Value::validate) keeps them out of dispatched
    /// results.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::Array(
                b.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
            ),
            Value::Seq(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// The wire type name, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Seq(_) => "seq",
            Value::Map(_) => "map",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(seq: Vec<Value>) -> Self {
        Value::Seq(seq)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

/// Argument or result outside the supported wire set.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// JSON `null` has no wire representation.
    #[error("null value at {at} is not serializable")]
    Null { at: String },
    /// Number that fits neither `i64` nor `f64`.
    #[error("number {number} at {at} is outside the supported range")]
    Number { at: String, number: String },
    /// Float that is NaN or infinite; JSON cannot represent it.
    #[error("non-finite float {float} at {at} is not serializable")]
    NonFinite { at: String, float: f64 },
    /// Envelope `node_path` field that is not a sequence.
    #[error("node_path must be a sequence of strings")]
    Path,
    /// `node_path` entry that is not a string.
    #[error("node path segment at {at} must be a string")]
    PathSegment { at: String },
    /// Envelope `operation` field missing or not a string.
    #[error("missing or non-string operation name")]
    OperationName,
    /// Envelope `args` field that is not a sequence.
    #[error("args must be a sequence")]
    Args,
}

// ─── Call envelope ───────────────────────────────────────────────────────────

/// A single invocation attempt: target node, operation, positional arguments.
///
/// Constructed per call and discarded after the response (or the final
/// stream element) is delivered. Only positional arguments cross the remote
/// boundary; there is no keyword-argument form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    /// Child names from the root to the target node. Empty targets the root.
    pub node_path: Vec<String>,
    /// Operation name, resolved on the target node.
    pub operation: String,
    /// Positional arguments, already validated against the wire set.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Optional deadline covering the exclusivity-queue wait and the
    /// handler invocation. `None` waits indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl CallRequest {
    pub fn new(
        node_path: impl IntoIterator<Item = impl Into<String>>,
        operation: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            node_path: node_path.into_iter().map(Into::into).collect(),
            operation: operation.into(),
            args,
            timeout_ms: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Parse a transport-level JSON envelope, validating every field against
    /// the wire contract before the request reaches a handler. A malformed
    /// envelope is rejected outright rather than partially repaired: a
    /// non-string path segment, if dropped, would silently retarget the call
    /// at a different node.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, SerializationError> {
        let node_path = match json.get("node_path") {
            None => Vec::new(),
            Some(serde_json::Value::Array(segments)) => {
                let mut path = Vec::with_capacity(segments.len());
                for (i, segment) in segments.iter().enumerate() {
                    match segment.as_str() {
                        Some(name) => path.push(name.to_string()),
                        None => {
                            return Err(SerializationError::PathSegment {
                                at: format!("node_path[{i}]"),
                            })
                        }
                    }
                }
                path
            }
            Some(_) => return Err(SerializationError::Path),
        };
        let operation = json
            .get("operation")
            .and_then(serde_json::Value::as_str)
            .ok_or(SerializationError::OperationName)?
            .to_string();
        let mut args = Vec::new();
        match json.get("args") {
            None => {}
            Some(serde_json::Value::Array(raw)) => {
                for (i, arg) in raw.iter().enumerate() {
                    args.push(Value::from_json(arg, &format!("args[{i}]"))?);
                }
            }
            Some(_) => return Err(SerializationError::Args),
        }
        let timeout_ms = json.get("timeout_ms").and_then(serde_json::Value::as_u64);
        Ok(Self {
            node_path,
            operation,
            args,
            timeout_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_json_rejects_null() {
        let err = Value::from_json(&serde_json::json!({ "a": [1, null] }), "args[0]");
        match err {
            Err(SerializationError::Null { at }) => assert_eq!(at, "args[0].a[1]"),
            other => panic!("expected null rejection, got {other:?}"),
        }
    }

    #[test]
    fn from_json_keeps_integers_integral() {
        let v = Value::from_json(&serde_json::json!([1, 2.5]), "args").unwrap();
        assert_eq!(
            v,
            Value::Seq(vec![Value::Int(1), Value::Float(2.5)])
        );
    }

    #[test]
    fn wire_value_round_trips_through_serde() {
        let original = Value::Map(BTreeMap::from([
            (
                "a".to_string(),
                Value::Seq(vec![Value::Int(1), Value::Int(2), Value::Str("x".into())]),
            ),
            ("b".to_string(), Value::Bool(true)),
            ("raw".to_string(), Value::Bytes(vec![0, 255, 7])),
        ]));
        let encoded = serde_json::to_string(&original).unwrap();
        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn call_request_from_json_validates_args() {
        let req = CallRequest::from_json(&serde_json::json!({
            "node_path": ["power"],
            "operation": "on",
            "args": [],
        }))
        .unwrap();
        assert_eq!(req.node_path, vec!["power".to_string()]);
        assert_eq!(req.operation, "on");
        assert!(req.args.is_empty());

        let err = CallRequest::from_json(&serde_json::json!({
            "node_path": [],
            "operation": "echo",
            "args": [null],
        }));
        assert!(matches!(err, Err(SerializationError::Null { .. })));
    }

    #[test]
    fn call_request_rejects_malformed_envelopes() {
        // A non-string segment must not be dropped: ["dut", 42, "power"]
        // would otherwise resolve as ["dut", "power"] and hit another node.
        let err = CallRequest::from_json(&serde_json::json!({
            "node_path": ["dut", 42, "power"],
            "operation": "on",
            "args": [],
        }))
        .unwrap_err();
        match err {
            SerializationError::PathSegment { at } => assert_eq!(at, "node_path[1]"),
            other => panic!("expected path segment rejection, got {other:?}"),
        }

        let err = CallRequest::from_json(&serde_json::json!({
            "node_path": "dut.power",
            "operation": "on",
        }))
        .unwrap_err();
        assert!(matches!(err, SerializationError::Path));

        let err = CallRequest::from_json(&serde_json::json!({
            "node_path": ["dut"],
            "args": [],
        }))
        .unwrap_err();
        assert!(matches!(err, SerializationError::OperationName));

        let err = CallRequest::from_json(&serde_json::json!({
            "node_path": ["dut"],
            "operation": 7,
        }))
        .unwrap_err();
        assert!(matches!(err, SerializationError::OperationName));

        let err = CallRequest::from_json(&serde_json::json!({
            "node_path": ["dut"],
            "operation": "on",
            "args": {"v": 1},
        }))
        .unwrap_err();
        assert!(matches!(err, SerializationError::Args));
    }

    #[test]
    fn validate_rejects_non_finite_floats() {
        assert!(Value::Float(1.5).validate().is_ok());
        assert!(Value::Seq(vec![Value::Int(1), Value::Float(-0.0)])
            .validate()
            .is_ok());

        let nested = Value::Map(BTreeMap::from([(
            "reading".to_string(),
            Value::Seq(vec![Value::Float(f64::NAN)]),
        )]));
        match nested.validate().unwrap_err() {
            SerializationError::NonFinite { at, .. } => assert_eq!(at, "result.reading[0]"),
            other => panic!("expected non-finite rejection, got {other:?}"),
        }

        let err = Value::Float(f64::INFINITY).validate().unwrap_err();
        assert!(matches!(err, SerializationError::NonFinite { .. }));
    }
}
