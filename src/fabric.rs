//! Wiring blocks together.
//!
//! The fabric owns topology; blocks never know who consumes them. Each
//! connected source gets one tap thread that drains the source's outbound
//! mailbox and clones every message to the inbound mailbox of each
//! subscriber. Subscriptions arrive on the tap's control channel, so fan-out
//! can grow while messages are flowing. Per sender→receiver pair, delivery
//! order is channel FIFO order; nothing is promised across senders.

use crate::error::{BlockError, Result};
use crate::mailbox::{BlockHandle, Delivery};
use crate::message::Message;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::thread::JoinHandle;

enum TapControl {
    Subscribe { name: String, inbound: Sender<Delivery> },
}

struct Tap {
    control: Sender<TapControl>,
    thread: JoinHandle<()>,
}

/// Broadcast fan-out from block outputs to block inputs.
#[derive(Default)]
pub struct Fabric {
    taps: HashMap<String, Tap>,
}

impl Fabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route everything `from` emits into `to`'s inbound mailbox.
    ///
    /// The first connection for a source takes ownership of its outbound
    /// mailbox; connecting a source whose outbound was already taken
    /// elsewhere is an error.
    pub fn connect(&mut self, from: &mut BlockHandle, to: &BlockHandle) -> Result<()> {
        let source = from.name().to_string();
        let tap = match self.taps.entry(source.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let outbound = from.take_outbound().ok_or_else(|| {
                    BlockError::Channel(format!("{}: outbound mailbox already taken", source))
                })?;
                entry.insert(spawn_tap(&source, outbound)?)
            }
        };
        tap.control
            .send(TapControl::Subscribe {
                name: to.name().to_string(),
                inbound: to.sender(),
            })
            .map_err(|_| BlockError::Channel(format!("{}: tap thread gone", source)))?;
        tracing::info!(from = %source, to = %to.name(), "blocks connected");
        Ok(())
    }

    /// Reap all tap threads. Taps exit when their source's outbound mailbox
    /// disconnects, so quit the source blocks first.
    pub fn join(self) {
        for (source, tap) in self.taps {
            drop(tap.control);
            if tap.thread.join().is_err() {
                tracing::warn!(source = %source, "tap thread panicked");
            }
        }
    }
}

fn spawn_tap(source: &str, outbound: Receiver<Message>) -> Result<Tap> {
    let (control_tx, control_rx) = unbounded();
    let name = source.to_string();
    let thread = std::thread::Builder::new()
        .name(format!("tap-{}", source))
        .spawn(move || tap_loop(name, outbound, control_rx))?;
    Ok(Tap {
        control: control_tx,
        thread,
    })
}

fn tap_loop(source: String, outbound: Receiver<Message>, control: Receiver<TapControl>) {
    let mut subscribers: Vec<(String, Sender<Delivery>)> = Vec::new();
    loop {
        crossbeam_channel::select! {
            recv(outbound) -> msg => match msg {
                Ok(msg) => {
                    // Blocking send: a full downstream mailbox slows this
                    // tap, never the source's own loop.
                    subscribers.retain(|(name, inbound)| {
                        let delivered = inbound.send(Delivery::Message(msg.clone())).is_ok();
                        if !delivered {
                            tracing::info!(from = %source, to = %name, "dropping exited subscriber");
                        }
                        delivered
                    });
                }
                // Source loop exited; nothing more will ever arrive.
                Err(_) => break,
            },
            recv(control) -> cmd => match cmd {
                Ok(TapControl::Subscribe { name, inbound }) => {
                    subscribers.push((name, inbound));
                }
                // Fabric dropped; keep draining until the source exits.
                Err(_) => {
                    forward_remaining(&source, &outbound, &mut subscribers);
                    break;
                }
            },
        }
    }
    tracing::debug!(source = %source, "tap thread exited");
}

fn forward_remaining(
    source: &str,
    outbound: &Receiver<Message>,
    subscribers: &mut Vec<(String, Sender<Delivery>)>,
) {
    while let Ok(msg) = outbound.recv() {
        subscribers.retain(|(name, inbound)| {
            let delivered = inbound.send(Delivery::Message(msg.clone())).is_ok();
            if !delivered {
                tracing::info!(from = %source, to = %name, "dropping exited subscriber");
            }
            delivered
        });
    }
}
