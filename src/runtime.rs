//! The per-block execution loop.
//!
//! Each block runs on its own named thread and owns its rule, its
//! aggregation state and the loop-side ends of its mailboxes; nothing else
//! ever touches them. The loop is a multi-way wait over the inbound
//! mailbox, the quit signal, the generator bridge and the window-scheduler
//! timer; whichever is ready first wins, and after every event the block's
//! eviction pass runs so a push or a rule change re-times pending entries
//! immediately instead of waiting for the next tick.
//!
//! Shutdown protocol: quit → stop dispatching → stop the generator
//! producer → `tidy_up()` → exactly one exit acknowledgment → thread exit.

use crate::block::{Block, Capabilities, GeneratorControl, GeneratorLink};
use crate::config::RuntimeConfig;
use crate::error::{BlockError, BlockFault, Result};
use crate::mailbox::{BlockHandle, Delivery, Mailboxes};
use crate::message::{Message, Payload, Route};
use crossbeam_channel::{bounded, never, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Instant;

/// Spawn a block under the default runtime configuration.
///
/// `setup()` runs on the caller's thread so a failing block never starts:
/// the error comes back from here, not from the error mailbox.
pub fn spawn(name: impl Into<String>, block: Box<dyn Block>) -> Result<BlockHandle> {
    spawn_with(name, block, RuntimeConfig::default())
}

/// Spawn a block with explicit runtime configuration.
pub fn spawn_with(
    name: impl Into<String>,
    mut block: Box<dyn Block>,
    cfg: RuntimeConfig,
) -> Result<BlockHandle> {
    let name = name.into();
    let caps = block.capabilities();
    block.setup()?;

    let (boxes, mut handle) = Mailboxes::pair(name.clone(), &cfg);

    // Bridge the generator producer in before the loop starts; a failed
    // start is a setup-class error surfaced to the constructor.
    let (bridge, gen_ctrl, gen_thread) = if caps.generator {
        let (bridge_tx, bridge_rx) = bounded(cfg.bridge_capacity);
        let (ctrl_tx, ctrl_rx) = bounded(4);
        let producer = block.start_generator(GeneratorLink {
            emit: bridge_tx,
            control: ctrl_rx,
        })?;
        (bridge_rx, Some(ctrl_tx), Some(producer))
    } else {
        (never(), None, None)
    };

    let runtime = BlockRuntime {
        name: name.clone(),
        block,
        caps,
        boxes,
        bridge,
        gen_ctrl,
        gen_thread,
        idle: cfg.idle_recheck(),
        dropped: 0,
    };

    let thread = std::thread::Builder::new()
        .name(format!("block-{}", name))
        .spawn(move || runtime.run())?;
    handle.attach(thread);
    Ok(handle)
}

/// Loop state for one running block.
struct BlockRuntime {
    name: String,
    block: Box<dyn Block>,
    /// Probed once at spawn; capability support must not change after.
    caps: Capabilities,
    boxes: Mailboxes,
    bridge: Receiver<Payload>,
    gen_ctrl: Option<Sender<GeneratorControl>>,
    gen_thread: Option<JoinHandle<()>>,
    idle: std::time::Duration,
    /// Messages dropped because the outbound or error mailbox was full.
    dropped: u64,
}

impl BlockRuntime {
    fn run(mut self) {
        tracing::info!(block = %self.name, kind = self.block.kind(), "block loop started");

        let inbound = self.boxes.inbound.clone();
        let quit = self.boxes.quit.clone();
        let mut bridge = std::mem::replace(&mut self.bridge, never());

        loop {
            let deadline = self.deadline();
            crossbeam_channel::select! {
                recv(quit) -> _ => {
                    self.shutdown(bridge);
                    return;
                }
                recv(inbound) -> delivery => match delivery {
                    Ok(d) => self.dispatch(d),
                    // Every handle is gone; nobody can quit us, so exit.
                    Err(_) => {
                        self.shutdown(bridge);
                        return;
                    }
                },
                recv(bridge) -> payload => match payload {
                    Ok(p) => self.emit(p),
                    Err(_) => bridge = never(),
                },
                recv(deadline) -> _ => {
                    if self.caps.source {
                        self.poll_source();
                    }
                }
            }
            self.evict_due();
        }
    }

    /// The timer arm of the multi-way wait. State blocks wake when their
    /// earliest entry is due (bounded by the idle recheck when the queue is
    /// empty); polled sources wake every idle interval; everything else
    /// never wakes on time alone.
    fn deadline(&self) -> Receiver<Instant> {
        let now = Instant::now();
        if self.caps.state {
            let at = self.block.next_deadline().unwrap_or(now + self.idle);
            crossbeam_channel::at(at)
        } else if self.caps.source {
            crossbeam_channel::at(now + self.idle)
        } else {
            never()
        }
    }

    fn dispatch(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Message(msg) => self.dispatch_message(msg),
            Delivery::RuleQuery(reply) => {
                // Absent capability: no reply, the caller's timeout fires.
                if self.caps.rule_bound {
                    let _ = reply.try_send(self.block.rule());
                }
            }
            Delivery::StateQuery(reply) => {
                if self.caps.state {
                    match self.block.query_state(Instant::now()) {
                        Ok(answer) => {
                            let _ = reply.try_send(answer);
                        }
                        Err(e) => self.report(e),
                    }
                }
            }
        }
    }

    fn dispatch_message(&mut self, msg: Message) {
        match msg.route {
            Route::Data => {
                if self.caps.transform {
                    match self.block.transform(&msg.payload) {
                        Ok(Some(derived)) => self.emit(derived),
                        Ok(None) => {}
                        Err(e) => self.report(e),
                    }
                }
                if self.caps.sink {
                    if let Err(e) = self.block.write_external(&msg.payload) {
                        self.report(e);
                    }
                }
                if self.caps.state {
                    if let Err(e) = self.block.modify_state(msg.payload, Instant::now()) {
                        self.report(e);
                    }
                }
            }
            Route::SetRule => {
                if self.caps.rule_bound {
                    match self.block.set_rule(&msg.payload) {
                        Ok(()) => {
                            // The producer re-derives its parameters from the
                            // same payload the loop just applied.
                            let full = self.gen_ctrl.as_ref().is_some_and(|ctrl| {
                                ctrl.try_send(GeneratorControl::Reconfigure(msg.payload)).is_err()
                            });
                            if full {
                                self.dropped += 1;
                                tracing::warn!(
                                    block = %self.name,
                                    dropped = self.dropped,
                                    "generator control full, dropping reconfigure"
                                );
                            }
                        }
                        Err(e) => self.report(e),
                    }
                }
            }
            Route::GetRule => {
                // Rule reads travel as RuleQuery deliveries; a bare message
                // has no reply channel to answer on.
                tracing::debug!(block = %self.name, "dropping get-rule message without reply channel");
            }
            Route::Connect => {
                // Topology control is owned by the fabric; the loop no-ops.
            }
            Route::Unknown(tag) => {
                tracing::trace!(block = %self.name, tag = %tag, "dropping message with unknown route");
            }
        }
    }

    /// Run the block's eviction pass and emit whatever came due. Called
    /// after every loop event so pushes and rule changes re-time the queue
    /// without waiting for the scheduled tick.
    fn evict_due(&mut self) {
        if !self.caps.state {
            return;
        }
        match self.block.poll_state(Instant::now()) {
            Ok(due) => {
                for payload in due {
                    self.emit(payload);
                }
            }
            Err(e) => self.report(e),
        }
    }

    fn poll_source(&mut self) {
        match self.block.read_external() {
            Ok(Some(payload)) => self.emit(payload),
            Ok(None) => {}
            Err(e) => self.report(e),
        }
    }

    /// Forward a payload to the outbound mailbox, tagged as data. Drops and
    /// counts when the mailbox is full so a slow consumer can never stall
    /// the loop.
    fn emit(&mut self, payload: Payload) {
        if self.boxes.outbound.try_send(Message::data(payload)).is_err() {
            self.dropped += 1;
            tracing::warn!(
                block = %self.name,
                dropped = self.dropped,
                "outbound mailbox full, dropping message"
            );
        }
    }

    fn report(&mut self, error: BlockError) {
        tracing::debug!(block = %self.name, error = %error, "block fault");
        let fault = BlockFault {
            block: self.name.clone(),
            error,
        };
        if self.boxes.errors.try_send(fault).is_err() {
            self.dropped += 1;
            tracing::warn!(
                block = %self.name,
                dropped = self.dropped,
                "error mailbox full, dropping fault"
            );
        }
    }

    /// Quit path: stop the producer, run `tidy_up`, then acknowledge.
    fn shutdown(&mut self, bridge: Receiver<Payload>) {
        tracing::info!(block = %self.name, "quit signal received");

        // Dropping the bridge first guarantees a producer blocked on a full
        // bridge fails its send and gets back to draining control.
        drop(bridge);
        if let Some(ctrl) = self.gen_ctrl.take() {
            let _ = ctrl.send(GeneratorControl::Stop);
        }
        if let Some(producer) = self.gen_thread.take() {
            if producer.join().is_err() {
                tracing::warn!(block = %self.name, "generator producer panicked");
            }
        }

        if let Err(e) = self.block.tidy_up() {
            self.report(e);
        }

        // Exactly one acknowledgment, sent only after tidy-up completed.
        let _ = self.boxes.exit.send(());
        tracing::info!(block = %self.name, "block loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{merge_rule, Rule};
    use serde_json::json;
    use std::time::Duration;

    fn map(v: serde_json::Value) -> Payload {
        v.as_object().unwrap().clone()
    }

    /// Transform + RuleBound block that uppercases a "word" field.
    struct Upcase {
        rule: Rule,
    }

    impl Upcase {
        fn new() -> Self {
            Self { rule: Rule::new() }
        }
    }

    impl Block for Upcase {
        fn kind(&self) -> &'static str {
            "upcase"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                transform: true,
                rule_bound: true,
                ..Capabilities::default()
            }
        }

        fn setup(&mut self) -> Result<()> {
            self.rule = map(json!({"Suffix": ""}));
            Ok(())
        }

        fn transform(&mut self, payload: &Payload) -> Result<Option<Payload>> {
            let word = payload
                .get("word")
                .and_then(|v| v.as_str())
                .ok_or_else(|| BlockError::Message("missing word".into()))?;
            let suffix = self.rule["Suffix"].as_str().unwrap_or_default();
            Ok(Some(map(json!({
                "word": format!("{}{}", word.to_uppercase(), suffix)
            }))))
        }

        fn set_rule(&mut self, update: &Payload) -> Result<()> {
            merge_rule(&mut self.rule, update);
            Ok(())
        }

        fn rule(&self) -> Rule {
            self.rule.clone()
        }
    }

    /// Generator block whose producer is slow to drain its control channel.
    struct SleepyPulse {
        rule: Rule,
    }

    impl Block for SleepyPulse {
        fn kind(&self) -> &'static str {
            "sleepy-pulse"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                generator: true,
                rule_bound: true,
                ..Capabilities::default()
            }
        }

        fn setup(&mut self) -> Result<()> {
            self.rule = map(json!({"Label": ""}));
            Ok(())
        }

        fn set_rule(&mut self, update: &Payload) -> Result<()> {
            merge_rule(&mut self.rule, update);
            Ok(())
        }

        fn rule(&self) -> Rule {
            self.rule.clone()
        }

        fn start_generator(&mut self, link: GeneratorLink) -> Result<std::thread::JoinHandle<()>> {
            let thread = std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(150));
                loop {
                    match link.control.recv() {
                        Ok(GeneratorControl::Reconfigure(_)) => {}
                        Ok(GeneratorControl::Stop) | Err(_) => break,
                    }
                }
            });
            Ok(thread)
        }
    }

    /// A block with no capabilities at all.
    struct Inert;

    impl Block for Inert {
        fn kind(&self) -> &'static str {
            "inert"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }
    }

    const TICK: Duration = Duration::from_millis(500);

    #[test]
    fn test_transform_dispatch() {
        let handle = spawn("up", Box::new(Upcase::new())).unwrap();
        handle.send(Message::data(map(json!({"word": "hi"})))).unwrap();

        let out = handle.outbound().unwrap().recv_timeout(TICK).unwrap();
        assert_eq!(out.route, Route::Data);
        assert_eq!(out.payload["word"], json!("HI"));
        handle.quit(TICK).unwrap();
    }

    #[test]
    fn test_transform_error_is_recoverable() {
        let handle = spawn("up", Box::new(Upcase::new())).unwrap();
        handle.send(Message::data(map(json!({"nope": 1})))).unwrap();

        let fault = handle.errors().recv_timeout(TICK).unwrap();
        assert!(fault.error.to_string().contains("missing word"));

        // The loop keeps going after the fault.
        handle.send(Message::data(map(json!({"word": "ok"})))).unwrap();
        let out = handle.outbound().unwrap().recv_timeout(TICK).unwrap();
        assert_eq!(out.payload["word"], json!("OK"));
        handle.quit(TICK).unwrap();
    }

    #[test]
    fn test_rule_round_trip_ignores_unknown_keys() {
        let handle = spawn("up", Box::new(Upcase::new())).unwrap();
        handle.set_rule(map(json!({"Suffix": "!", "Bogus": 7}))).unwrap();

        let rule = handle.rule(TICK).unwrap();
        assert_eq!(rule["Suffix"], json!("!"));
        assert!(!rule.contains_key("Bogus"));
        handle.quit(TICK).unwrap();
    }

    #[test]
    fn test_no_capability_block_stays_silent() {
        let handle = spawn("inert", Box::new(Inert)).unwrap();
        handle.send(Message::data(map(json!({"x": 1})))).unwrap();

        assert!(handle.outbound().unwrap().recv_timeout(Duration::from_millis(100)).is_err());
        assert!(handle.errors().try_recv().is_err());

        // Rule queries on a non-RuleBound block time out instead of hanging.
        assert!(matches!(
            handle.rule(Duration::from_millis(100)),
            Err(BlockError::Timeout(_))
        ));
        handle.quit(TICK).unwrap();
    }

    #[test]
    fn test_unknown_route_dropped() {
        let handle = spawn("up", Box::new(Upcase::new())).unwrap();
        handle
            .send(Message {
                payload: map(json!({"word": "x"})),
                route: Route::Unknown("poll-v2".into()),
            })
            .unwrap();
        handle
            .send(Message {
                payload: Payload::new(),
                route: Route::Connect,
            })
            .unwrap();

        assert!(handle.outbound().unwrap().recv_timeout(Duration::from_millis(100)).is_err());
        assert!(handle.errors().try_recv().is_err());
        handle.quit(TICK).unwrap();
    }

    #[test]
    fn test_full_generator_control_does_not_stall_loop() {
        let handle = spawn(
            "pulse",
            Box::new(SleepyPulse { rule: Rule::new() }),
        )
        .unwrap();

        // More updates than the control channel holds, while the producer is
        // still asleep. Overflowing reconfigures are dropped, not blocked on.
        for i in 0..8 {
            handle.set_rule(map(json!({"Label": format!("v{}", i)}))).unwrap();
        }

        // The loop stayed responsive and committed every update.
        let rule = handle.rule(TICK).unwrap();
        assert_eq!(rule["Label"], json!("v7"));
        handle.quit(TICK).unwrap();
    }

    #[test]
    fn test_quit_acknowledged_once() {
        let handle = spawn("up", Box::new(Upcase::new())).unwrap();
        // quit() consumes the handle and verifies the single ack + join.
        handle.quit(TICK).unwrap();
    }
}
