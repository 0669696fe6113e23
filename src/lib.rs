//! blockflow — a streaming dataflow runtime built from blocks.
//!
//! A pipeline is a set of blocks, each running its own execution loop on a
//! dedicated thread. Blocks ingest string-keyed messages, may hold a live
//! externally settable rule and time-windowed aggregation state, and emit
//! derived messages. The [`fabric`] wires block outputs to block inputs;
//! blocks themselves never know their consumers.
//!
//! ```no_run
//! use blockflow::{blocks::Ticker, fabric::Fabric, runtime};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # fn main() -> blockflow::Result<()> {
//! let mut ticker = runtime::spawn("ticker", Box::new(Ticker::new()))?;
//! let sink = runtime::spawn("log", Box::new(blockflow::blocks::ToFile::new()))?;
//! sink.set_rule(json!({"Filename": "ticks.jsonl"}).as_object().unwrap().clone())?;
//!
//! let mut fabric = Fabric::new();
//! fabric.connect(&mut ticker, &sink)?;
//!
//! std::thread::sleep(Duration::from_secs(3));
//! ticker.quit(Duration::from_secs(1))?;
//! sink.quit(Duration::from_secs(1))?;
//! fabric.join();
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod blocks;
pub mod config;
pub mod error;
pub mod fabric;
pub mod mailbox;
pub mod message;
pub mod rule;
pub mod runtime;
pub mod schedule;
pub mod telemetry;

pub use block::{Block, Capabilities, GeneratorControl, GeneratorLink};
pub use config::RuntimeConfig;
pub use error::{BlockError, BlockFault, Result};
pub use mailbox::{BlockHandle, Delivery};
pub use message::{Message, Payload, Route};
pub use rule::Rule;
