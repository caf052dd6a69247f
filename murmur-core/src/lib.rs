//! # murmur core
//!
//! Shared building blocks for the murmur replicated pub/sub cluster.
//!
//! Brokers, producers and subscribers all speak the same newline-framed text
//! protocol and stamp every message with a Lamport clock value. This crate
//! holds that common vocabulary:
//!
//! - [`identity`]: the `(host, port)` identity of a broker and its ordering
//! - [`protocol`]: typed commands, client notifications, gossip snapshots and
//!   the line decoder
//! - [`time`]: the Lamport clock
//! - [`message`]: event records handed to publishers
//! - [`discovery`]: leader lookup used by clients
//! - [`telemetry`]: `tracing` subscriber setup
//!
//! ## Example
//!
//! ```rust
//! use murmur_core::prelude::*;
//!
//! let clock = LamportClock::new();
//! let subscribe = Command::Subscribe { topic: "Napa".into(), timestamp: Some(clock.tick()) };
//! assert_eq!(subscribe.to_line(), "SUBSCRIBE*Napa*1\n");
//! assert_eq!(Command::parse("SUBSCRIBE*Napa*1").unwrap(), subscribe);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod discovery;
pub mod error;
pub mod identity;
pub mod message;
pub mod prelude;
pub mod protocol;
pub mod telemetry;
pub mod time;

pub use error::{Error, Result};
pub use identity::BrokerIdentity;
pub use message::{Event, TrafficEvent};
pub use time::LamportClock;
