//! Block trait and capability set.
//!
//! A block declares what it can do through an explicit [`Capabilities`]
//! flags struct, probed once at spawn time and cached by the runtime —
//! capability support must not change while the block is running. Every
//! capability method has a default body so concrete blocks implement only
//! the subset they advertise; the runtime never calls a method whose flag
//! is off.

use crate::error::{BlockError, Result};
use crate::message::Payload;
use crate::rule::Rule;
use crossbeam_channel::{Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Instant;

/// Which capability methods a block implements. Populated once at
/// construction, queried by the runtime at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `transform` — map one data message to at most one derived message.
    pub transform: bool,
    /// `write_external` — write data messages to an external system.
    pub sink: bool,
    /// `read_external` — synchronous pull of external messages, polled on
    /// the scheduler tick.
    pub source: bool,
    /// `start_generator` — asynchronous producer bridged into the loop.
    pub generator: bool,
    /// `modify_state` / `poll_state` / `query_state` / `next_deadline` —
    /// windowed aggregation state.
    pub state: bool,
    /// `set_rule` / `rule` — externally configurable behavior.
    pub rule_bound: bool,
}

/// Control signals the execution loop sends to a generator producer.
#[derive(Debug, Clone)]
pub enum GeneratorControl {
    /// The block's rule changed; re-derive any parameters from this payload.
    Reconfigure(Payload),
    /// Stop producing and exit. Sent during shutdown, before `tidy_up`
    /// completes.
    Stop,
}

/// The channels handed to a generator producer thread.
///
/// The producer owns no part of the block's rule or state; everything it
/// needs arrives on `control`, and everything it makes leaves on `emit`.
/// Both channels disconnecting is also a stop signal, so a producer can
/// never block forever on an abandoned bridge.
pub struct GeneratorLink {
    /// Bridge into the execution loop; arrivals here are forwarded to the
    /// outbound mailbox as data messages.
    pub emit: Sender<Payload>,
    pub control: Receiver<GeneratorControl>,
}

/// A unit of the pipeline: ingests messages, may hold a rule and internal
/// state, and emits derived messages.
///
/// `setup` runs exactly once before the first dispatch and `tidy_up` exactly
/// once after the quit signal, before the exit acknowledgment; capability
/// methods are never invoked concurrently for the same instance (they all
/// run on the block's single execution loop).
pub trait Block: Send {
    /// The implementing type's name, e.g. `"ticker"`.
    fn kind(&self) -> &'static str;

    /// The capability subset this block implements.
    fn capabilities(&self) -> Capabilities;

    /// Establish the default rule and any initial resources.
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release owned resources (files, connections, producers). Called once
    /// on shutdown; after this the block is dead and cannot be restarted.
    fn tidy_up(&mut self) -> Result<()> {
        Ok(())
    }

    // ── Transform ───────────────────────────────────────────────────────────

    /// Map one payload to at most one derived payload. `Ok(None)` means
    /// suppress: emit nothing, no error.
    fn transform(&mut self, _payload: &Payload) -> Result<Option<Payload>> {
        Err(BlockError::Unsupported("transform"))
    }

    // ── Sink ────────────────────────────────────────────────────────────────

    /// Write one payload to an external system. No output message.
    fn write_external(&mut self, _payload: &Payload) -> Result<()> {
        Err(BlockError::Unsupported("sink"))
    }

    // ── Source ──────────────────────────────────────────────────────────────

    /// Pull one external message if one is available. Polled by the loop on
    /// its scheduler tick; most sources should prefer the generator pattern.
    fn read_external(&mut self) -> Result<Option<Payload>> {
        Err(BlockError::Unsupported("source"))
    }

    // ── Generator ───────────────────────────────────────────────────────────

    /// Spawn the producer thread for a generator-capable block. The thread
    /// must exit promptly on [`GeneratorControl::Stop`] or when either
    /// channel disconnects.
    fn start_generator(&mut self, _link: GeneratorLink) -> Result<JoinHandle<()>> {
        Err(BlockError::Unsupported("generator"))
    }

    // ── RuleBound ───────────────────────────────────────────────────────────

    /// Apply a rule update. Recognized keys overwrite, missing keys stay,
    /// unknown keys are ignored. A rejected update must not partially apply.
    /// Side effects (reopening a file, re-deriving a timer) happen
    /// synchronously before returning.
    fn set_rule(&mut self, _update: &Payload) -> Result<()> {
        Err(BlockError::Unsupported("rule"))
    }

    /// Snapshot of the current rule.
    fn rule(&self) -> Rule {
        Rule::new()
    }

    // ── State ───────────────────────────────────────────────────────────────

    /// Ingest a data message into aggregation state.
    fn modify_state(&mut self, _payload: Payload, _now: Instant) -> Result<()> {
        Err(BlockError::Unsupported("state"))
    }

    /// Eviction pass: evaluate queued entries against the current window and
    /// return everything due for emission. Runs after every loop event.
    fn poll_state(&mut self, _now: Instant) -> Result<Vec<Payload>> {
        Ok(Vec::new())
    }

    /// Answer a state query (e.g. a windowed count).
    fn query_state(&mut self, _now: Instant) -> Result<Payload> {
        Err(BlockError::Unsupported("state"))
    }

    /// When the loop should next run the eviction pass, if anything is
    /// queued. `None` lets the runtime fall back to its idle recheck.
    fn next_deadline(&self) -> Option<Instant> {
        None
    }
}
