//! Mask: projects each payload onto the shape of a configured mask.

use crate::block::{Block, Capabilities};
use crate::error::{BlockError, Result};
use crate::message::Payload;
use crate::rule::{merge_rule, Rule};
use serde_json::{json, Value};

/// Transform block keeping only the keys the `Mask` rule names.
///
/// Nested objects in the mask recurse; any other mask value keeps the
/// payload's value at that key verbatim. An empty mask emits the empty
/// object for every input.
pub struct Mask {
    rule: Rule,
    /// The `Mask` rule value, kept unwrapped for the per-message path.
    mask: Payload,
}

impl Mask {
    pub fn new() -> Self {
        Self {
            rule: Rule::new(),
            mask: Payload::new(),
        }
    }
}

impl Default for Mask {
    fn default() -> Self {
        Self::new()
    }
}

fn project(payload: &Payload, mask: &Payload) -> Payload {
    let mut out = Payload::new();
    for (key, shape) in mask {
        let Some(value) = payload.get(key) else {
            continue;
        };
        match (shape.as_object(), value.as_object()) {
            (Some(inner_mask), Some(inner)) if !inner_mask.is_empty() => {
                out.insert(key.clone(), Value::Object(project(inner, inner_mask)));
            }
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    out
}

impl Block for Mask {
    fn kind(&self) -> &'static str {
        "mask"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            transform: true,
            rule_bound: true,
            ..Capabilities::default()
        }
    }

    fn setup(&mut self) -> Result<()> {
        self.rule.insert("Mask".to_string(), json!({}));
        Ok(())
    }

    fn set_rule(&mut self, update: &Payload) -> Result<()> {
        if let Some(mask) = update.get("Mask") {
            let mask = mask
                .as_object()
                .ok_or_else(|| BlockError::Rule("Mask must be an object".to_string()))?;
            self.mask = mask.clone();
        }
        merge_rule(&mut self.rule, update);
        Ok(())
    }

    fn rule(&self) -> Rule {
        self.rule.clone()
    }

    fn transform(&mut self, payload: &Payload) -> Result<Option<Payload>> {
        Ok(Some(project(payload, &self.mask)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(v: serde_json::Value) -> Payload {
        v.as_object().unwrap().clone()
    }

    fn masked(rule_mask: serde_json::Value, input: serde_json::Value) -> Payload {
        let mut m = Mask::new();
        m.setup().unwrap();
        m.set_rule(&map(json!({"Mask": rule_mask}))).unwrap();
        m.transform(&map(input)).unwrap().unwrap()
    }

    #[test]
    fn test_flat_projection() {
        let out = masked(
            json!({"a": "", "b": ""}),
            json!({"a": 1, "b": "x", "c": true}),
        );
        assert_eq!(out, map(json!({"a": 1, "b": "x"})));
    }

    #[test]
    fn test_nested_projection() {
        let out = masked(
            json!({"meta": {"id": ""}}),
            json!({"meta": {"id": "u1", "secret": "s"}, "n": 2}),
        );
        assert_eq!(out, map(json!({"meta": {"id": "u1"}})));
    }

    #[test]
    fn test_empty_mask_emits_empty_object() {
        let out = masked(json!({}), json!({"a": 1}));
        assert!(out.is_empty());
    }

    #[test]
    fn test_missing_keys_skipped() {
        let out = masked(json!({"a": "", "z": ""}), json!({"a": 1}));
        assert_eq!(out, map(json!({"a": 1})));
    }

    #[test]
    fn test_non_object_mask_rejected() {
        let mut m = Mask::new();
        m.setup().unwrap();
        assert!(m.set_rule(&map(json!({"Mask": "a,b"}))).is_err());
        assert_eq!(m.rule()["Mask"], json!({}));
    }
}
