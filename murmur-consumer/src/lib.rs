//! # murmur consumer
//!
//! Subscriber client for the murmur cluster. It resolves the leader from
//! any configured broker, subscribes to a set of topics and yields
//! deliveries. Heartbeats from the leader keep the session alive; when they
//! stop or the socket drops, the subscriber finds the new leader and
//! subscribes again.
//!
//! ## Example
//!
//! ```rust,no_run
//! use murmur_consumer::{ConsumerConfig, Subscriber};
//! use murmur_core::BrokerIdentity;
//!
//! # async fn example() -> murmur_core::Result<()> {
//! let config = ConsumerConfig::new([BrokerIdentity::new("127.0.0.1", 8888)], ["Napa"]);
//! let mut subscriber = Subscriber::new(config)?;
//! let delivery = subscriber.next_delivery().await?;
//! println!("{} at {}", delivery.payload, delivery.timestamp);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod subscriber;

pub use config::ConsumerConfig;
pub use murmur_core::{Error, Result};
pub use subscriber::{Delivery, Subscriber};
