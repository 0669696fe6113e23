//! Rules: live, externally settable block configuration.
//!
//! A rule is the same open mapping a payload is, owned exclusively by its
//! block and mutated only through the set-rule route. The merge contract:
//! keys present in both the update and the existing rule are overwritten,
//! keys missing from the update are left unchanged, and unrecognized keys
//! are ignored (logged at debug, never an error).

use crate::error::{BlockError, Result};
use crate::message::Payload;
use std::time::Duration;

/// A block's rule — open string-keyed configuration mapping.
pub type Rule = Payload;

/// Merge an update into an existing rule per the set-rule contract.
///
/// Only keys the rule already declares are settable; everything else in the
/// update is silently ignored so newer controllers can talk to older blocks.
pub fn merge_rule(rule: &mut Rule, update: &Payload) {
    for (key, value) in update {
        if rule.contains_key(key) {
            rule.insert(key.clone(), value.clone());
        } else {
            tracing::debug!(key = %key, "ignoring unrecognized rule key");
        }
    }
}

/// Fetch a required string value from a rule update.
pub fn require_str<'a>(update: &'a Payload, key: &str) -> Result<&'a str> {
    update
        .get(key)
        .ok_or_else(|| BlockError::Rule(format!("rule message did not contain {}", key)))?
        .as_str()
        .ok_or_else(|| BlockError::Rule(format!("{} must be a string", key)))
}

/// Parse a duration string in the `"500ms"` / `"2s"` / `"1m30s"` style.
///
/// Accepts one or more `<number><unit>` segments with units `ns`, `us`,
/// `ms`, `s`, `m`, `h`; numbers may be fractional (`"1.5s"`).
pub fn parse_duration(text: &str) -> Result<Duration> {
    let bad = || BlockError::Rule(format!("invalid duration '{}'", text));
    if text.is_empty() {
        return Err(bad());
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(bad)?;
        if digits == 0 {
            return Err(bad());
        }
        let number: f64 = rest[..digits].parse().map_err(|_| bad())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(bad()),
        };
        rest = &rest[unit_len..];

        // Out-of-range magnitudes are rejected, not clamped; a rule carrying
        // an absurd duration is a validation error like any other.
        let part = Duration::try_from_secs_f64(number * scale).map_err(|_| bad())?;
        total = total.checked_add(part).ok_or_else(bad)?;
    }
    Ok(total)
}
