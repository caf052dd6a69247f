//! Leader discovery for producers and subscribers.

use crate::identity::BrokerIdentity;
use crate::protocol::{Command, LeaderReply};
use crate::time::LamportClock;
use crate::{Error, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Ask one broker who the leader is.
///
/// # Errors
/// Returns an error if the broker is unreachable, does not answer within
/// `wait`, or answers with something that is not a leader reply.
pub async fn query_leader(
    broker: &BrokerIdentity,
    clock: &LamportClock,
    wait: Duration,
) -> Result<LeaderReply> {
    let exchange = async {
        let stream = TcpStream::connect(broker.socket_address()).await?;
        let mut reader = BufReader::new(stream);

        let request = Command::GetLeaderAddress { timestamp: Some(clock.tick()) };
        reader.get_mut().write_all(request.to_line().as_bytes()).await?;

        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(Error::network(format!("{broker} closed the connection")));
        }
        let reply = LeaderReply::parse(&line)?;
        clock.observe(reply.timestamp());
        Ok::<_, Error>(reply)
    };

    timeout(wait, exchange)
        .await
        .map_err(|_| Error::timeout(format!("leader query to {broker}")))?
}

/// Query each broker in order and return the first leader reported.
///
/// Unreachable brokers and `NO_LEADER` answers are skipped.
///
/// # Errors
/// Returns [`Error::NoLeader`] if no broker names a leader.
pub async fn resolve_leader(
    brokers: &[BrokerIdentity],
    clock: &LamportClock,
    wait: Duration,
) -> Result<BrokerIdentity> {
    for broker in brokers {
        match query_leader(broker, clock, wait).await {
            Ok(LeaderReply::Leader { leader, .. }) => {
                debug!(%broker, %leader, "resolved leader");
                return Ok(leader);
            },
            Ok(LeaderReply::NoLeader { .. }) => {
                debug!(%broker, "broker has no leader yet");
            },
            Err(e) => {
                warn!(%broker, error = %e, "leader query failed");
            },
        }
    }
    Err(Error::NoLeader { queried: brokers.len() })
}
