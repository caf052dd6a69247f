//! Helpers for spinning up brokers on loopback ports.

#![allow(dead_code)]

use murmur_broker::{Broker, BrokerConfig, BrokerHandle};
use murmur_cluster::ClusterConfig;
use murmur_core::protocol::{Command, LeaderReply, Notification};
use murmur_core::BrokerIdentity;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Instant};

/// Fast timings so elections and failure detection finish within a test.
pub fn cluster_config(peers: &[BrokerIdentity]) -> ClusterConfig {
    ClusterConfig::builder()
        .peers(peers.iter().cloned())
        .election_timeout(Duration::from_millis(300))
        .gossip_interval(Duration::from_millis(50))
        .failure_timeout(Duration::from_millis(1500))
        .failure_check_interval(Duration::from_millis(100))
        .connect_retry(3, Duration::from_millis(50))
        .build()
        .expect("valid cluster config")
}

pub fn broker_config(identity: &BrokerIdentity, cluster: ClusterConfig) -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.node.host = identity.host().to_string();
    config.node.port = identity.port();
    config.cluster = cluster;
    config
}

pub async fn bind_local() -> (TcpListener, BrokerIdentity) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let port = listener.local_addr().expect("local addr").port();
    (listener, BrokerIdentity::new("127.0.0.1", port))
}

/// A set of brokers that all list each other as peers.
pub struct TestCluster {
    pub identities: Vec<BrokerIdentity>,
    pub handles: Vec<Option<BrokerHandle>>,
}

impl TestCluster {
    pub async fn start(size: usize) -> anyhow::Result<Self> {
        let mut listeners = Vec::with_capacity(size);
        for _ in 0..size {
            listeners.push(bind_local().await);
        }
        let identities: Vec<BrokerIdentity> = listeners.iter().map(|(_, identity)| identity.clone()).collect();

        let mut handles = Vec::with_capacity(size);
        for (listener, identity) in listeners {
            let config = broker_config(&identity, cluster_config(&identities));
            handles.push(Some(Broker::new(config)?.start_with_listener(listener).await?));
        }
        Ok(Self { identities, handles })
    }

    /// The identity every broker should elect: the highest live one.
    pub fn expected_leader(&self) -> BrokerIdentity {
        self.live().map(|handle| handle.identity().clone()).max().expect("at least one live broker")
    }

    pub fn live(&self) -> impl Iterator<Item = &BrokerHandle> {
        self.handles.iter().flatten()
    }

    pub fn handle(&self, identity: &BrokerIdentity) -> &BrokerHandle {
        self.live().find(|handle| handle.identity() == identity).expect("broker is running")
    }

    /// True once every live broker agrees on `leader` and only it leads.
    pub fn converged_on(&self, leader: &BrokerIdentity) -> bool {
        self.live().all(|handle| {
            handle.current_leader().as_ref() == Some(leader) && handle.is_leader() == (handle.identity() == leader)
        })
    }

    pub async fn wait_for_leader(&self) -> BrokerIdentity {
        let leader = self.expected_leader();
        assert!(
            wait_until(Duration::from_secs(10), || self.converged_on(&leader)).await,
            "cluster did not converge on {leader}"
        );
        leader
    }

    pub async fn stop(&mut self, identity: &BrokerIdentity) {
        let index = self.identities.iter().position(|candidate| candidate == identity).expect("known broker");
        if let Some(handle) = self.handles[index].take() {
            handle.shutdown().await;
        }
    }

    pub async fn shutdown(mut self) {
        for handle in self.handles.iter_mut().filter_map(Option::take) {
            handle.shutdown().await;
        }
    }
}

pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// A raw protocol client.
pub struct LineClient {
    reader: BufReader<TcpStream>,
}

impl LineClient {
    pub async fn connect(broker: &BrokerIdentity) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(broker.socket_address()).await?;
        Ok(Self { reader: BufReader::new(stream) })
    }

    pub async fn send(&mut self, command: &Command) -> anyhow::Result<()> {
        self.send_raw(&command.to_line()).await
    }

    pub async fn send_raw(&mut self, text: &str) -> anyhow::Result<()> {
        self.reader.get_mut().write_all(text.as_bytes()).await?;
        Ok(())
    }

    pub async fn read_line(&mut self) -> anyhow::Result<String> {
        let mut line = String::new();
        let read = timeout(Duration::from_secs(5), self.reader.read_line(&mut line)).await??;
        anyhow::ensure!(read > 0, "connection closed");
        Ok(line)
    }

    pub async fn query_leader(&mut self, timestamp: u64) -> anyhow::Result<LeaderReply> {
        self.send(&Command::GetLeaderAddress { timestamp: Some(timestamp) }).await?;
        Ok(LeaderReply::parse(&self.read_line().await?)?)
    }

    /// Next notification that is not a heartbeat.
    pub async fn next_delivery(&mut self) -> anyhow::Result<(String, u64)> {
        loop {
            match Notification::parse(&self.read_line().await?)? {
                Notification::Delivery { payload, timestamp } => return Ok((payload, timestamp)),
                Notification::Heartbeat { .. } => {},
            }
        }
    }

    pub async fn next_heartbeat(&mut self) -> anyhow::Result<u64> {
        loop {
            if let Notification::Heartbeat { timestamp } = Notification::parse(&self.read_line().await?)? {
                return Ok(timestamp);
            }
        }
    }
}
