//! Core subscriber implementation.
//!
//! A [`Subscriber`] holds one connection to the leader. Every line the
//! leader sends counts as a sign of life; if nothing, not even a heartbeat,
//! arrives within the heartbeat timeout, or the connection drops, the
//! subscriber looks the leader up again and re-subscribes.

use crate::config::ConsumerConfig;
use murmur_core::discovery::resolve_leader;
use murmur_core::protocol::{Command, LineDecoder, Notification};
use murmur_core::{BrokerIdentity, Error, LamportClock, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// A payload delivered by the leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Payload as published
    pub payload: String,
    /// Leader clock at send
    pub timestamp: u64,
    /// Broker that delivered it
    pub leader: BrokerIdentity,
}

impl Delivery {
    /// Decode the payload as JSON.
    ///
    /// # Errors
    /// Returns an error if the payload is not valid JSON.
    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

#[derive(Debug)]
struct Session {
    leader: BrokerIdentity,
    stream: TcpStream,
    decoder: LineDecoder,
}

/// Subscriber that follows the leader across failovers.
#[derive(Debug)]
pub struct Subscriber {
    config: ConsumerConfig,
    clock: LamportClock,
    session: Option<Session>,
    heartbeats: u64,
    failovers: u64,
}

impl Subscriber {
    /// Create a subscriber; no connection is made until [`Self::connect`]
    /// or the first [`Self::next_delivery`].
    ///
    /// # Errors
    /// Returns an error if no brokers or no topics are configured.
    pub fn new(config: ConsumerConfig) -> Result<Self> {
        if config.brokers.is_empty() {
            return Err(Error::configuration("subscriber needs at least one broker"));
        }
        if config.topics.is_empty() {
            return Err(Error::configuration("subscriber needs at least one topic"));
        }
        Ok(Self { config, clock: LamportClock::new(), session: None, heartbeats: 0, failovers: 0 })
    }

    /// Leader of the current connection
    #[must_use]
    pub fn leader(&self) -> Option<&BrokerIdentity> {
        self.session.as_ref().map(|session| &session.leader)
    }

    /// Heartbeats seen so far
    #[must_use]
    pub const fn heartbeats(&self) -> u64 {
        self.heartbeats
    }

    /// Times the subscriber had to find a new leader
    #[must_use]
    pub const fn failovers(&self) -> u64 {
        self.failovers
    }

    /// Current Lamport clock value
    #[must_use]
    pub fn clock(&self) -> u64 {
        self.clock.now()
    }

    /// Find the leader, connect and subscribe to every configured topic.
    ///
    /// Lookups are retried up to `max_reconnect_attempts` times.
    ///
    /// # Errors
    /// Returns the last lookup or connect error.
    pub async fn connect(&mut self) -> Result<BrokerIdentity> {
        self.session = None;
        let attempts = self.config.max_reconnect_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                sleep(self.config.reconnect_delay()).await;
            }
            match self.open_session().await {
                Ok(session) => {
                    let leader = session.leader.clone();
                    info!(%leader, topics = ?self.config.topics, "subscribed");
                    self.session = Some(session);
                    return Ok(leader);
                },
                Err(e) => {
                    warn!(attempt, error = %e, "could not reach a leader");
                    last_error = Some(e);
                },
            }
        }
        Err(last_error.unwrap_or(Error::NoLeader { queried: self.config.brokers.len() }))
    }

    async fn open_session(&self) -> Result<Session> {
        let wait = self.config.connect_timeout();
        let leader = resolve_leader(&self.config.brokers, &self.clock, wait).await?;
        let mut stream = timeout(wait, TcpStream::connect(leader.socket_address()))
            .await
            .map_err(|_| Error::timeout(format!("connect to leader {leader}")))??;

        for topic in &self.config.topics {
            let subscribe = Command::Subscribe { topic: topic.clone(), timestamp: Some(self.clock.tick()) };
            stream.write_all(subscribe.to_line().as_bytes()).await?;
        }
        Ok(Session { leader, stream, decoder: LineDecoder::new() })
    }

    /// Wait for the next delivery, failing over to a new leader as needed.
    ///
    /// # Errors
    /// Returns an error once a failover cannot find any leader.
    pub async fn next_delivery(&mut self) -> Result<Delivery> {
        loop {
            if self.session.is_none() {
                self.connect().await?;
            }
            match self.read_notification().await {
                Ok(Some(Notification::Delivery { payload, timestamp })) => {
                    self.clock.observe(timestamp);
                    let leader = self.leader().cloned().ok_or_else(|| Error::network("session lost"))?;
                    return Ok(Delivery { payload, timestamp, leader });
                },
                Ok(Some(Notification::Heartbeat { timestamp })) => {
                    self.clock.observe(timestamp);
                    self.heartbeats += 1;
                    debug!(timestamp, "heartbeat");
                },
                Ok(None) => {},
                Err(e) => {
                    warn!(leader = ?self.leader(), error = %e, "leader lost, failing over");
                    self.session = None;
                    self.failovers += 1;
                },
            }
        }
    }

    /// Read until one notification is decoded. `Ok(None)` means a line was
    /// received but could not be parsed.
    async fn read_notification(&mut self) -> Result<Option<Notification>> {
        let deadline = self.config.heartbeat_timeout();
        let Some(session) = self.session.as_mut() else {
            return Err(Error::network("not connected"));
        };

        loop {
            match session.decoder.next_line() {
                Ok(Some(line)) => {
                    return match Notification::parse(&line) {
                        Ok(notification) => Ok(Some(notification)),
                        Err(e) => {
                            warn!(error = %e, "ignoring unparsable line");
                            Ok(None)
                        },
                    };
                },
                Ok(None) => {},
                Err(e) => {
                    warn!(error = %e, "discarding unreadable line");
                    return Ok(None);
                },
            }

            let read = timeout(deadline, session.stream.read_buf(session.decoder.buffer_mut()))
                .await
                .map_err(|_| Error::timeout("heartbeat"))??;
            if read == 0 {
                return Err(Error::network(format!("{} closed the connection", session.leader)));
            }
            session.decoder.note_read(read);
        }
    }

    /// Close the connection.
    pub async fn close(mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.stream.shutdown().await;
        }
    }
}
