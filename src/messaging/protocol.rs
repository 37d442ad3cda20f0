//! Wire protocol: topics, payload shapes, and failure descriptions.
//!
//! ```text
//!   client ── message.<name> {id, args}    ──▶ host
//!   client ◀─ message.<name> {id, message} ─── host   (success)
//!   client ◀─ error.<name>   {id, message} ─── host   (handler failure)
//!   peers  ◀─ event.<name>   {id, message} ─── host   (broadcast, id = source)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::types::{CallId, Error, PeerId};

/// Topic names.
pub mod topic {
    pub fn message(name: &str) -> String {
        format!("message.{name}")
    }

    pub fn error(name: &str) -> String {
        format!("error.{name}")
    }

    pub fn event(name: &str) -> String {
        format!("event.{name}")
    }
}

/// Client → host request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub id: CallId,
    #[serde(default)]
    pub args: Value,
}

/// Host → client successful response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResponse {
    pub id: CallId,
    #[serde(default)]
    pub message: Value,
}

/// Host → client handler failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub id: CallId,
    pub message: String,
}

/// Host → peers event broadcast. `id` names the emitting host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: PeerId,
    #[serde(default)]
    pub message: Value,
}

/// Normalize call arguments to a positional sequence.
///
/// An array is taken as-is, `null` means no arguments, and any other value
/// becomes a single argument.
pub fn normalize_args(args: Value) -> Vec<Value> {
    match args {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Failure raised by a message handler.
///
/// The text sent to the caller is, in priority order: `description`,
/// `message`, then the string form of `detail`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl Fault {
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Self::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Lift an arbitrary JSON failure value, picking up `description` and
    /// `message` fields when it is an object.
    pub fn from_value(value: Value) -> Self {
        let field = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            description: field("description"),
            message: field("message"),
            detail: Some(value),
        }
    }

    /// Human-readable text sent back to the caller.
    pub fn error_message(&self) -> String {
        let non_empty = |s: &Option<String>| s.as_ref().filter(|s| !s.is_empty()).cloned();
        non_empty(&self.description)
            .or_else(|| non_empty(&self.message))
            .unwrap_or_else(|| match &self.detail {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => "unknown error".to_string(),
            })
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.error_message())
    }
}

impl std::error::Error for Fault {}

impl From<Error> for Fault {
    fn from(err: Error) -> Self {
        Self::message(err.to_string())
    }
}

impl From<String> for Fault {
    fn from(message: String) -> Self {
        Self::message(message)
    }
}

impl From<&str> for Fault {
    fn from(message: &str) -> Self {
        Self::message(message)
    }
}

impl From<serde_json::Error> for Fault {
    fn from(err: serde_json::Error) -> Self {
        Self::message(err.to_string())
    }
}
