//! Group: collects messages by key and emits a group once its key has been
//! quiet for the configured window.

use crate::block::{Block, Capabilities};
use crate::error::{BlockError, Result};
use crate::message::{get_string_path, Payload};
use crate::rule::{merge_rule, require_str, Rule};
use crate::schedule::{Shift, TimedQueue};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};

const DEFAULT_EMIT_AFTER_SECONDS: f64 = 10.0;

/// One scheduled emission check. The group only emits if it has not grown
/// since this entry was queued; otherwise the entry is stale and a later
/// one is already scheduled.
struct Pending {
    key: String,
    len: usize,
}

/// State block implementing debounce-style grouping.
///
/// Each arrival is appended to the group named by the string at
/// `GroupByPath` in its payload, and the group's emission is pushed back to
/// `EmitAfterSeconds` from that arrival. A group that stays quiet for the
/// whole window is emitted as `{"key": k, "group": [..]}` and cleared.
pub struct Group {
    rule: Rule,
    path: String,
    window: Duration,
    groups: HashMap<String, Vec<Payload>>,
    checks: TimedQueue<Pending>,
}

impl Group {
    pub fn new() -> Self {
        Self {
            rule: Rule::new(),
            path: String::new(),
            window: Duration::from_secs_f64(DEFAULT_EMIT_AFTER_SECONDS),
            groups: HashMap::new(),
            checks: TimedQueue::new(),
        }
    }
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}

impl Block for Group {
    fn kind(&self) -> &'static str {
        "group"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            state: true,
            rule_bound: true,
            ..Capabilities::default()
        }
    }

    fn setup(&mut self) -> Result<()> {
        self.rule.insert("GroupByPath".to_string(), json!(""));
        self.rule
            .insert("EmitAfterSeconds".to_string(), json!(DEFAULT_EMIT_AFTER_SECONDS));
        Ok(())
    }

    fn set_rule(&mut self, update: &Payload) -> Result<()> {
        // Validate the whole update before committing any of it.
        let path = update
            .contains_key("GroupByPath")
            .then(|| require_str(update, "GroupByPath").map(str::to_string))
            .transpose()?;
        let window = match update.get("EmitAfterSeconds") {
            Some(v) => {
                let secs = v.as_f64().filter(|s| *s >= 0.0).ok_or_else(|| {
                    BlockError::Rule("EmitAfterSeconds must be a non-negative number".to_string())
                })?;
                let window = Duration::try_from_secs_f64(secs).map_err(|_| {
                    BlockError::Rule("EmitAfterSeconds is out of range".to_string())
                })?;
                Some(window)
            }
            None => None,
        };

        if let Some(path) = path {
            self.path = path;
        }
        if let Some(window) = window {
            // Retroactive: pending checks are re-timed at the next pass.
            self.window = window;
        }
        merge_rule(&mut self.rule, update);
        Ok(())
    }

    fn rule(&self) -> Rule {
        self.rule.clone()
    }

    fn modify_state(&mut self, payload: Payload, now: Instant) -> Result<()> {
        if self.path.is_empty() {
            return Err(BlockError::Message(
                "GroupByPath is not set; message skipped".to_string(),
            ));
        }
        // A missing or non-string key is a per-message fault, never fatal.
        let key = get_string_path(&payload, &self.path)?;

        let group = self.groups.entry(key.clone()).or_default();
        group.push(payload);
        self.checks.push(
            Pending {
                key,
                len: group.len(),
            },
            now,
        );
        Ok(())
    }

    fn poll_state(&mut self, now: Instant) -> Result<Vec<Payload>> {
        let mut due = Vec::new();
        loop {
            match self.checks.peek_and_shift(now, self.window) {
                Shift::Due(pending) => {
                    // Emit only if this is the group's latest check; a grown
                    // group has a fresher entry still queued.
                    let current = self.groups.get(&pending.key).map(Vec::len);
                    if current == Some(pending.len) {
                        let members = self
                            .groups
                            .remove(&pending.key)
                            .unwrap_or_default()
                            .into_iter()
                            .map(Value::Object)
                            .collect::<Vec<_>>();
                        let mut emission = Payload::new();
                        emission.insert("key".to_string(), json!(pending.key));
                        emission.insert("group".to_string(), Value::Array(members));
                        due.push(emission);
                    } else {
                        tracing::trace!(key = %pending.key, "discarding stale group check");
                    }
                }
                Shift::Wait(_) | Shift::Empty => break,
            }
        }
        Ok(due)
    }

    fn query_state(&mut self, _now: Instant) -> Result<Payload> {
        let mut answer = Payload::new();
        answer.insert("Groups".to_string(), json!(self.groups.len()));
        Ok(answer)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.checks.next_due(self.window)
    }
}
