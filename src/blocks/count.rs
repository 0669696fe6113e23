//! Count: how many messages arrived within the sliding window.

use crate::block::{Block, Capabilities};
use crate::error::Result;
use crate::message::Payload;
use crate::rule::{merge_rule, parse_duration, require_str, Rule};
use crate::schedule::{Shift, TimedQueue};
use serde_json::json;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: &str = "1s";

/// State block answering `{"Count": n}` for arrivals within the last
/// `Window`. The count is a sliding-window census, never a running total.
pub struct Count {
    rule: Rule,
    window: Duration,
    arrivals: TimedQueue<()>,
}

impl Count {
    pub fn new() -> Self {
        Self {
            rule: Rule::new(),
            window: Duration::from_secs(1),
            arrivals: TimedQueue::new(),
        }
    }

    /// Drop every arrival that has aged out of the window.
    fn trim(&mut self, now: Instant) {
        while let Shift::Due(()) = self.arrivals.peek_and_shift(now, self.window) {}
    }
}

impl Default for Count {
    fn default() -> Self {
        Self::new()
    }
}

impl Block for Count {
    fn kind(&self) -> &'static str {
        "count"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            state: true,
            rule_bound: true,
            ..Capabilities::default()
        }
    }

    fn setup(&mut self) -> Result<()> {
        self.rule.insert("Window".to_string(), json!(DEFAULT_WINDOW));
        Ok(())
    }

    fn set_rule(&mut self, update: &Payload) -> Result<()> {
        if update.contains_key("Window") {
            // Applies retroactively: existing arrivals are re-timed against
            // the new window at the next evaluation.
            self.window = parse_duration(require_str(update, "Window")?)?;
        }
        merge_rule(&mut self.rule, update);
        Ok(())
    }

    fn rule(&self) -> Rule {
        self.rule.clone()
    }

    fn modify_state(&mut self, _payload: Payload, now: Instant) -> Result<()> {
        self.arrivals.push((), now);
        Ok(())
    }

    fn poll_state(&mut self, now: Instant) -> Result<Vec<Payload>> {
        // Expiry only prunes; counts leave through queries, not emissions.
        self.trim(now);
        Ok(Vec::new())
    }

    fn query_state(&mut self, now: Instant) -> Result<Payload> {
        self.trim(now);
        let mut answer = Payload::new();
        answer.insert("Count".to_string(), json!(self.arrivals.len()));
        Ok(answer)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.arrivals.next_due(self.window)
    }
}
