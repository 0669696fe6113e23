//! Messages and routes.
//!
//! A [`Message`] is an immutable string-keyed payload tagged with a
//! [`Route`] that tells the execution loop how to dispatch it. Payloads have
//! no global schema; blocks pull the keys they care about with the
//! dotted-path helpers below.

use crate::error::{BlockError, Result};
use serde_json::Value;

/// Open, string-keyed payload carried by every message.
pub type Payload = serde_json::Map<String, Value>;

/// Route tag selecting the dispatch path within a block.
///
/// The set is closed; anything else parses to [`Route::Unknown`] and is
/// dropped by the loop without an error (permissive routing, so older blocks
/// ignore newer control routes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `"in"` — ordinary data message.
    Data,
    /// `"set-rule"` — rule mutation.
    SetRule,
    /// `"get-rule"` — rule read (normally issued as a reply-channel query).
    GetRule,
    /// `""` — wiring/topology control, owned by the fabric; the block loop
    /// must recognize it and no-op.
    Connect,
    /// Any other tag. Dropped, never an error.
    Unknown(String),
}

impl Route {
    /// Parse a wire tag into a route.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "in" => Route::Data,
            "set-rule" => Route::SetRule,
            "get-rule" => Route::GetRule,
            "" => Route::Connect,
            other => Route::Unknown(other.to_string()),
        }
    }

    /// The wire tag for this route.
    pub fn as_str(&self) -> &str {
        match self {
            Route::Data => "in",
            Route::SetRule => "set-rule",
            Route::GetRule => "get-rule",
            Route::Connect => "",
            Route::Unknown(tag) => tag,
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload plus the route governing its dispatch.
///
/// Messages are value-like: once sent, ownership transfers to the runtime
/// and the sender must not retain a way to mutate the payload.
#[derive(Debug, Clone)]
pub struct Message {
    pub payload: Payload,
    pub route: Route,
}

impl Message {
    /// Build an ordinary data message.
    pub fn data(payload: Payload) -> Self {
        Self {
            payload,
            route: Route::Data,
        }
    }

    /// Build a set-rule message.
    pub fn set_rule(payload: Payload) -> Self {
        Self {
            payload,
            route: Route::SetRule,
        }
    }
}

// ── Dotted-path payload access ──────────────────────────────────────────────

/// Look up a value by dotted path, e.g. `"meta.user.id"`.
pub fn get_path<'a>(payload: &'a Payload, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = payload.get(first)?;
    for seg in segments {
        current = current.as_object()?.get(seg)?;
    }
    Some(current)
}

/// Look up a string value by dotted path, erroring on a missing key or a
/// non-string value. Used for grouping keys, where a type mismatch must be a
/// recoverable per-message error.
pub fn get_string_path(payload: &Payload, path: &str) -> Result<String> {
    let value = get_path(payload, path)
        .ok_or_else(|| BlockError::Message(format!("missing key at path '{}'", path)))?;
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| BlockError::Message(format!("value at path '{}' is not a string", path)))
}
