//! # murmur broker
//!
//! A broker node of the murmur replicated pub/sub cluster. Clients connect
//! over newline-framed text, subscribe to topics and publish JSON payloads;
//! brokers elect the highest-ordered live node as leader, gossip their
//! subscription views and heartbeat subscribers while leading.
//!
//! ## Example
//!
//! ```rust,no_run
//! use murmur_broker::{Broker, BrokerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BrokerConfig::from_file("murmur.toml")?;
//! let handle = Broker::new(config)?.start().await?;
//! println!("leader: {:?}", handle.current_leader());
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broker;
pub mod config;
pub mod error;
pub mod network;
pub mod processor;
pub mod registry;

pub use broker::{Broker, BrokerHandle, BrokerStats};
pub use config::BrokerConfig;
pub use error::{Error, Result};
pub use processor::{CommandProcessor, FanOut};
pub use registry::SubscriptionRegistry;
