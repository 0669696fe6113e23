//! Ticker: emits a wall-clock timestamp at a fixed interval.

use crate::block::{Block, Capabilities, GeneratorControl, GeneratorLink};
use crate::error::Result;
use crate::message::Payload;
use crate::rule::{merge_rule, parse_duration, require_str, Rule};
use serde_json::json;
use std::thread::JoinHandle;
use std::time::Duration;

const DEFAULT_INTERVAL: &str = "1s";

/// Generator block producing `{"time": <RFC 3339>}` every `Interval`.
pub struct Ticker {
    rule: Rule,
}

impl Ticker {
    pub fn new() -> Self {
        Self { rule: Rule::new() }
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}

impl Block for Ticker {
    fn kind(&self) -> &'static str {
        "ticker"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            generator: true,
            rule_bound: true,
            ..Capabilities::default()
        }
    }

    fn setup(&mut self) -> Result<()> {
        self.rule
            .insert("Interval".to_string(), json!(DEFAULT_INTERVAL));
        Ok(())
    }

    fn set_rule(&mut self, update: &Payload) -> Result<()> {
        // Validate before committing; a bad interval leaves the old rule
        // (and the running producer) untouched.
        if update.contains_key("Interval") {
            parse_duration(require_str(update, "Interval")?)?;
        }
        merge_rule(&mut self.rule, update);
        Ok(())
    }

    fn rule(&self) -> Rule {
        self.rule.clone()
    }

    fn start_generator(&mut self, link: GeneratorLink) -> Result<JoinHandle<()>> {
        let interval = parse_duration(require_str(&self.rule, "Interval")?)?;
        let thread = std::thread::Builder::new()
            .name("ticker-producer".to_string())
            .spawn(move || produce(link, interval))?;
        Ok(thread)
    }
}

fn produce(link: GeneratorLink, mut interval: Duration) {
    loop {
        crossbeam_channel::select! {
            recv(link.control) -> cmd => match cmd {
                Ok(GeneratorControl::Reconfigure(update)) => {
                    // The loop validated the update before forwarding it;
                    // an update without Interval keeps the current one.
                    if let Some(next) = update
                        .get("Interval")
                        .and_then(|v| v.as_str())
                        .and_then(|s| parse_duration(s).ok())
                    {
                        tracing::debug!(interval = ?next, "ticker interval reconfigured");
                        interval = next;
                    }
                }
                Ok(GeneratorControl::Stop) | Err(_) => break,
            },
            recv(crossbeam_channel::after(interval)) -> _ => {
                let payload = json!({"time": chrono::Utc::now().to_rfc3339()});
                let payload = payload.as_object().cloned().unwrap_or_default();
                if link.emit.send(payload).is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("ticker producer exited");
}
