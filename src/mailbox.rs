//! Mailboxes and the host-side block handle.
//!
//! Five logically distinct queues per block — inbound, outbound, error,
//! quit, exit-acknowledgment — all bounded crossbeam channels owned by the
//! runtime, never by the block implementation. The inbound mailbox carries
//! [`Delivery`] so reply-channel queries (get-rule, state queries) travel
//! the same serialized path as routed messages and can never race the loop.

use crate::config::RuntimeConfig;
use crate::error::{BlockError, BlockFault, Result};
use crate::message::{Message, Payload};
use crate::rule::Rule;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

/// One item on a block's inbound mailbox.
pub enum Delivery {
    /// A routed message, dispatched per its route tag.
    Message(Message),
    /// Rule read carrying a one-shot reply channel. The loop answers with
    /// `try_send` and never blocks; callers apply a timeout.
    RuleQuery(Sender<Rule>),
    /// State read (e.g. a windowed count), same reply discipline.
    StateQuery(Sender<Payload>),
}

/// The loop-side ends of a block's mailboxes.
pub(crate) struct Mailboxes {
    pub inbound: Receiver<Delivery>,
    pub outbound: Sender<Message>,
    pub errors: Sender<BlockFault>,
    pub quit: Receiver<()>,
    pub exit: Sender<()>,
}

impl Mailboxes {
    /// Build the mailbox set, returning the loop side and the host handle
    /// (without a thread attached yet).
    pub(crate) fn pair(name: impl Into<String>, cfg: &RuntimeConfig) -> (Self, BlockHandle) {
        let (inbound_tx, inbound_rx) = bounded(cfg.inbound_capacity);
        let (outbound_tx, outbound_rx) = bounded(cfg.outbound_capacity);
        let (error_tx, error_rx) = bounded(cfg.error_capacity);
        let (quit_tx, quit_rx) = bounded(1);
        let (exit_tx, exit_rx) = bounded(1);

        let boxes = Self {
            inbound: inbound_rx,
            outbound: outbound_tx,
            errors: error_tx,
            quit: quit_rx,
            exit: exit_tx,
        };
        let handle = BlockHandle {
            name: name.into(),
            inbound: inbound_tx,
            outbound: Some(outbound_rx),
            errors: error_rx,
            quit: quit_tx,
            exit: exit_rx,
            thread: None,
        };
        (boxes, handle)
    }
}

/// Host-side handle to a running block: send it messages, query its rule or
/// state, drain its output and errors, and shut it down.
pub struct BlockHandle {
    name: String,
    inbound: Sender<Delivery>,
    outbound: Option<Receiver<Message>>,
    errors: Receiver<BlockFault>,
    quit: Sender<()>,
    exit: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl BlockHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver a message to the block's inbound mailbox. Blocks briefly if
    /// the mailbox is full; errors only if the block has exited.
    pub fn send(&self, msg: Message) -> Result<()> {
        self.inbound
            .send(Delivery::Message(msg))
            .map_err(|_| BlockError::Channel(format!("{}: inbound mailbox closed", self.name)))
    }

    /// Apply a rule update (a `set-rule` message).
    pub fn set_rule(&self, update: Payload) -> Result<()> {
        self.send(Message::set_rule(update))
    }

    /// Read the block's current rule, waiting up to `timeout` for the reply.
    /// Blocks without the RuleBound capability never reply; the timeout is
    /// the caller's only signal.
    pub fn rule(&self, timeout: Duration) -> Result<Rule> {
        let (reply_tx, reply_rx) = bounded(1);
        self.inbound
            .send(Delivery::RuleQuery(reply_tx))
            .map_err(|_| BlockError::Channel(format!("{}: inbound mailbox closed", self.name)))?;
        reply_rx
            .recv_timeout(timeout)
            .map_err(|_| BlockError::Timeout("rule reply"))
    }

    /// Query the block's aggregation state (State capability), waiting up to
    /// `timeout` for the reply.
    pub fn query_state(&self, timeout: Duration) -> Result<Payload> {
        let (reply_tx, reply_rx) = bounded(1);
        self.inbound
            .send(Delivery::StateQuery(reply_tx))
            .map_err(|_| BlockError::Channel(format!("{}: inbound mailbox closed", self.name)))?;
        reply_rx
            .recv_timeout(timeout)
            .map_err(|_| BlockError::Timeout("state reply"))
    }

    /// A clone of the inbound sender, for wiring through the fabric.
    pub fn sender(&self) -> Sender<Delivery> {
        self.inbound.clone()
    }

    /// Borrow the outbound mailbox, if it has not been taken by the fabric.
    pub fn outbound(&self) -> Option<&Receiver<Message>> {
        self.outbound.as_ref()
    }

    /// Take ownership of the outbound mailbox (the fabric does this when
    /// tapping a source).
    pub fn take_outbound(&mut self) -> Option<Receiver<Message>> {
        self.outbound.take()
    }

    /// The error mailbox: recoverable per-message and per-rule faults.
    pub fn errors(&self) -> &Receiver<BlockFault> {
        &self.errors
    }

    pub(crate) fn attach(&mut self, thread: JoinHandle<()>) {
        self.thread = Some(thread);
    }

    /// Shut the block down: signal quit, wait up to `timeout` for the exit
    /// acknowledgment (sent only after `tidy_up` has completed), then join
    /// the loop thread.
    pub fn quit(mut self, timeout: Duration) -> Result<()> {
        self.quit
            .try_send(())
            .map_err(|_| BlockError::Channel(format!("{}: block already exited", self.name)))?;
        self.exit
            .recv_timeout(timeout)
            .map_err(|_| BlockError::Timeout("exit acknowledgment"))?;
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| BlockError::Channel(format!("{}: loop thread panicked", self.name)))?;
        }
        Ok(())
    }
}
