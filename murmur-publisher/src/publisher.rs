//! Core publisher implementation.

use crate::config::PublisherConfig;
use murmur_core::discovery::resolve_leader;
use murmur_core::protocol::Command;
use murmur_core::{BrokerIdentity, Error, Event, LamportClock, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Producer that always writes to the current leader.
#[derive(Debug)]
pub struct Publisher {
    config: PublisherConfig,
    clock: LamportClock,
    session: Option<Session>,
}

#[derive(Debug)]
struct Session {
    leader: BrokerIdentity,
    stream: TcpStream,
}

/// Acknowledgement that an event was written to the leader's socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Topic the event went to
    pub topic: String,
    /// Broker the event was written to
    pub leader: BrokerIdentity,
    /// Lamport timestamp carried by the PUBLISH line
    pub timestamp: u64,
}

impl Publisher {
    /// Create a publisher; no connection is made until the first publish.
    ///
    /// # Errors
    /// Returns an error if no brokers are configured.
    pub fn new(config: PublisherConfig) -> Result<Self> {
        if config.brokers.is_empty() {
            return Err(Error::configuration("publisher needs at least one broker"));
        }
        Ok(Self { config, clock: LamportClock::new(), session: None })
    }

    /// Leader of the current connection, if connected.
    #[must_use]
    pub fn leader(&self) -> Option<&BrokerIdentity> {
        self.session.as_ref().map(|session| &session.leader)
    }

    /// Resolve the leader and connect to it, replacing any existing connection.
    ///
    /// # Errors
    /// Returns an error if no broker names a reachable leader.
    pub async fn connect(&mut self) -> Result<BrokerIdentity> {
        self.session = None;
        let wait = self.config.connect_timeout();
        let leader = resolve_leader(&self.config.brokers, &self.clock, wait).await?;
        let stream = timeout(wait, TcpStream::connect(leader.socket_address()))
            .await
            .map_err(|_| Error::timeout(format!("connect to leader {leader}")))??;
        stream.set_nodelay(true)?;

        info!(%leader, "connected to leader");
        self.session = Some(Session { leader: leader.clone(), stream });
        Ok(leader)
    }

    /// Publish one event to the leader.
    ///
    /// A failed write drops the connection; the leader is re-resolved and
    /// the event retried up to `retry_attempts` times.
    ///
    /// # Errors
    /// Returns the last error once every attempt has failed.
    pub async fn publish(&mut self, event: &Event) -> Result<PublishReceipt> {
        let payload = event.payload_json()?;
        let attempts = self.config.retry_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if self.session.is_none() {
                if let Err(e) = self.connect().await {
                    warn!(attempt, error = %e, "leader unavailable");
                    last_error = Some(e);
                    continue;
                }
            }
            let Some(session) = self.session.as_mut() else { continue };

            let timestamp = self.clock.tick();
            let line = Command::Publish { topic: event.topic.clone(), payload: payload.clone(), timestamp: Some(timestamp) }
                .to_line();
            match session.stream.write_all(line.as_bytes()).await {
                Ok(()) => {
                    debug!(topic = %event.topic, timestamp, "published");
                    return Ok(PublishReceipt { topic: event.topic.clone(), leader: session.leader.clone(), timestamp });
                },
                Err(e) => {
                    warn!(leader = %session.leader, attempt, error = %e, "publish failed, re-resolving leader");
                    self.session = None;
                    last_error = Some(e.into());
                },
            }
        }

        Err(last_error.unwrap_or_else(|| Error::network("publish failed")))
    }

    /// Publish a finite sequence of events with the configured delay between
    /// them. Returns the number published.
    ///
    /// # Errors
    /// Stops at the first event that cannot be published.
    pub async fn publish_all<I>(&mut self, events: I) -> Result<usize>
    where
        I: IntoIterator<Item = Event>,
    {
        let delay = self.config.publish_delay();
        let mut published = 0;
        for event in events {
            if published > 0 && !delay.is_zero() {
                sleep(delay).await;
            }
            self.publish(&event).await?;
            published += 1;
        }
        Ok(published)
    }

    /// Flush and close the connection.
    pub async fn close(mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.stream.shutdown().await {
                debug!(error = %e, "error closing publisher connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Answers one leader query naming itself, then collects PUBLISH lines.
    async fn fake_leader(expected: usize) -> (BrokerIdentity, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let identity = BrokerIdentity::new("127.0.0.1", listener.local_addr().unwrap().port());
        let me = identity.clone();

        let task = tokio::spawn(async move {
            let (query, _) = listener.accept().await.unwrap();
            let mut query = BufReader::new(query);
            let mut line = String::new();
            query.read_line(&mut line).await.unwrap();
            assert!(line.starts_with("GET_LEADER_ADDRESS*"));
            query.get_mut().write_all(format!("{me}*50\n").as_bytes()).await.unwrap();

            let (publisher, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(publisher).lines();
            let mut received = Vec::new();
            while received.len() < expected {
                match lines.next_line().await.unwrap() {
                    Some(line) => received.push(line),
                    None => break,
                }
            }
            received
        });
        (identity, task)
    }

    #[tokio::test]
    async fn test_publish_writes_to_leader() {
        let (leader, server) = fake_leader(2).await;
        let mut config = PublisherConfig::with_brokers([leader.clone()]);
        config.publish_delay_ms = 0;
        let mut publisher = Publisher::new(config).unwrap();

        let events = vec![
            Event::new("Napa", json!({"event_id": "a"})),
            Event::new("Solano", json!({"event_id": "b", "note": "x*y"})),
        ];
        assert_eq!(publisher.publish_all(events).await.unwrap(), 2);
        assert_eq!(publisher.leader(), Some(&leader));
        publisher.close().await;

        let received = server.await.unwrap();
        assert_eq!(received.len(), 2);
        let first = Command::parse(&received[0]).unwrap();
        let second = Command::parse(&received[1]).unwrap();
        match (first, second) {
            (
                Command::Publish { topic: t1, timestamp: Some(ts1), .. },
                Command::Publish { topic: t2, payload, timestamp: Some(ts2) },
            ) => {
                assert_eq!(t1, "Napa");
                assert_eq!(t2, "Solano");
                assert!(ts1 > 50, "clock observed the leader reply");
                assert!(ts2 > ts1);
                assert_eq!(serde_json::from_str::<serde_json::Value>(&payload).unwrap()["note"], "x*y");
            },
            other => panic!("unexpected commands {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_leader_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let broker = BrokerIdentity::new("127.0.0.1", listener.local_addr().unwrap().port());
        drop(listener);

        let mut config = PublisherConfig::with_brokers([broker]);
        config.retry_attempts = 2;
        config.connect_timeout_ms = 200;
        let mut publisher = Publisher::new(config).unwrap();

        let result = publisher.publish(&Event::new("Napa", json!({}))).await;
        assert!(matches!(result, Err(Error::NoLeader { queried: 1 })));
    }

    #[test]
    fn test_requires_brokers() {
        assert!(Publisher::new(PublisherConfig::with_brokers([])).is_err());
    }
}
