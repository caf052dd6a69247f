//! # murmur publisher
//!
//! Producer client for the murmur cluster. The publisher asks the
//! configured brokers who the leader is, connects to it and writes
//! `PUBLISH` lines stamped with its own Lamport clock. When the connection
//! drops it re-resolves the leader and retries.
//!
//! ## Example
//!
//! ```rust,no_run
//! use murmur_publisher::{Publisher, PublisherConfig};
//! use murmur_core::{BrokerIdentity, Event};
//!
//! # async fn example() -> murmur_core::Result<()> {
//! let config = PublisherConfig::with_brokers([BrokerIdentity::new("127.0.0.1", 8888)]);
//! let mut publisher = Publisher::new(config)?;
//! publisher.publish(&Event::new("Napa", serde_json::json!({"event_id": "1"}))).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod publisher;

pub use config::PublisherConfig;
pub use murmur_core::{Error, Result};
pub use publisher::{PublishReceipt, Publisher};
