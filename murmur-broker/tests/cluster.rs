mod common;

use common::{bind_local, broker_config, cluster_config, wait_until, LineClient, TestCluster};
use murmur_broker::Broker;
use murmur_cluster::ClusterConfig;
use murmur_core::protocol::LeaderReply;
use murmur_core::BrokerIdentity;
use std::time::Duration;

#[tokio::test]
async fn three_brokers_elect_the_highest() -> anyhow::Result<()> {
    let cluster = TestCluster::start(3).await?;
    let leader = cluster.wait_for_leader().await;

    assert_eq!(leader, cluster.identities.iter().max().cloned().unwrap());
    assert_eq!(cluster.live().filter(|handle| handle.is_leader()).count(), 1);
    for handle in cluster.live() {
        assert!(!handle.election_state().election_in_progress);
    }

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn every_broker_answers_leader_queries_consistently() -> anyhow::Result<()> {
    let cluster = TestCluster::start(3).await?;
    let leader = cluster.wait_for_leader().await;

    for identity in &cluster.identities {
        let mut client = LineClient::connect(identity).await?;
        let first = client.query_leader(1).await?;
        let second = client.query_leader(1).await?;

        assert_eq!(first.leader(), Some(&leader));
        assert_eq!(second.leader(), Some(&leader));
        assert!(second.timestamp() > first.timestamp());
    }

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn leader_query_before_election_reports_no_leader() -> anyhow::Result<()> {
    let (listener, identity) = bind_local().await;
    // nothing listens there, and its port outranks any ephemeral one
    let unreachable = BrokerIdentity::new("127.0.0.1", 65535);
    let cluster = ClusterConfig::builder()
        .peers([identity.clone(), unreachable])
        .election_timeout(Duration::from_secs(30))
        .connect_retry(1, Duration::from_millis(10))
        .build()?;
    let handle = Broker::new(broker_config(&identity, cluster))?.start_with_listener(listener).await?;

    let mut client = LineClient::connect(&identity).await?;
    let reply = client.query_leader(40).await?;
    assert!(matches!(reply, LeaderReply::NoLeader { timestamp } if timestamp > 40));

    handle.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn leader_failure_elects_next_highest() -> anyhow::Result<()> {
    let mut cluster = TestCluster::start(3).await?;
    let old_leader = cluster.wait_for_leader().await;

    cluster.stop(&old_leader).await;
    let new_leader = cluster.wait_for_leader().await;
    assert_ne!(new_leader, old_leader);

    let survivor = cluster.live().find(|handle| handle.identity() != &new_leader).unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            survivor.cluster().peer_status(&old_leader) == Some(murmur_core::protocol::PeerStatus::Down)
        })
        .await
    );
    assert!(!survivor.cluster().members().contains(&old_leader));

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn gossip_spreads_subscriptions_to_followers() -> anyhow::Result<()> {
    let cluster = TestCluster::start(2).await?;
    let leader = cluster.wait_for_leader().await;
    let follower = cluster.live().find(|handle| handle.identity() != &leader).unwrap().identity().clone();

    let mut subscriber = LineClient::connect(&leader).await?;
    subscriber.send_raw("SUBSCRIBE*Napa*1\n").await?;

    let follower_handle = cluster.handle(&follower);
    assert!(
        wait_until(Duration::from_secs(5), || {
            use murmur_cluster::SubscriptionDirectory;
            follower_handle.registry().topic_addresses().contains_key("Napa")
        })
        .await,
        "follower never learned the subscription"
    );
    // the address is only a view; the follower has nobody to fan out to
    assert!(follower_handle.registry().subscribers("Napa").is_empty());

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_the_listener() -> anyhow::Result<()> {
    let (listener, identity) = bind_local().await;
    let handle = Broker::new(broker_config(&identity, cluster_config(&[identity.clone()])))?
        .start_with_listener(listener)
        .await?;
    assert!(wait_until(Duration::from_secs(5), || handle.is_leader()).await);

    handle.shutdown().await;
    assert!(tokio::net::TcpStream::connect(identity.socket_address()).await.is_err());
    Ok(())
}
