//! Multi-node scenarios driving the full engine over real sockets.

mod support;

use std::sync::Arc;
use std::time::Duration;

use mesh::{NetError, Payload, RawBytes};
use support::*;

#[tokio::test(flavor = "multi_thread")]
async fn bootstrap_registers_every_peer() {
    let nodes = start_cluster("tcp", 10).await;

    assert_eq!(nodes[0].roster.count(), 9);
    for node in &nodes[1..] {
        assert!(node.roster.count() >= 1, "node should know its bootstrap peer");
        assert!(node.roster.contains(&nodes[0].address()));
    }

    for node in &nodes {
        node.network.close().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_reaches_every_mailbox_over_tcp() {
    broadcast_reaches_every_mailbox("tcp").await;
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_reaches_every_mailbox_over_kcp() {
    broadcast_reaches_every_mailbox("kcp").await;
}

async fn broadcast_reaches_every_mailbox(scheme: &str) {
    let nodes = start_cluster(scheme, 3).await;
    let expected = TestMessage {
        message: "test message".to_string(),
    };

    let payload = Payload::from_message(&expected).expect("encode");
    nodes[0].network.broadcast(payload).await;

    for node in &nodes[1..] {
        let mailbox = node.mailbox.clone();
        wait_until(|| mailbox.count() == 1, "broadcast to arrive").await;
        assert_eq!(node.mailbox.messages(), vec![expected.clone()]);
    }

    for node in &nodes {
        node.network.close().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn targeted_broadcast_hits_only_addressed_nodes() {
    let nodes = start_cluster("tcp", 5).await;
    let payload = Payload::from_message(&TestMessage {
        message: "test message".to_string(),
    })
    .expect("encode");

    let targets = vec![nodes[1].address(), nodes[2].address()];
    nodes[0]
        .network
        .broadcast_by_addresses(payload, &targets)
        .await;

    for node in &nodes[1..3] {
        let mailbox = node.mailbox.clone();
        wait_until(|| mailbox.count() == 1, "targeted broadcast to arrive").await;
    }
    // Give a stray delivery time to show up before checking the others.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(nodes[1].mailbox.count(), 1);
    assert_eq!(nodes[2].mailbox.count(), 1);
    assert_eq!(nodes[3].mailbox.count(), 0);
    assert_eq!(nodes[4].mailbox.count(), 0);

    for node in &nodes {
        node.network.close().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_by_ids_resolves_identities_to_targets() {
    let nodes = start_cluster("tcp", 5).await;

    // Identities are learned from each peer's first authenticated message;
    // wait until the bootstrap node has them for the two targets.
    let net0 = nodes[0].network.clone();
    let targets = [nodes[1].address(), nodes[2].address()];
    wait_until(
        || {
            targets
                .iter()
                .all(|address| net0.peer(address).and_then(|peer| peer.id()).is_some())
        },
        "target identities to be learned",
    )
    .await;
    let ids: Vec<mesh::NodeIdentity> = targets
        .iter()
        .map(|address| {
            net0.peer(address)
                .expect("peer")
                .id()
                .expect("learned identity")
        })
        .collect();

    let payload = Payload::from_message(&TestMessage {
        message: "test message".to_string(),
    })
    .expect("encode");
    nodes[0].network.broadcast_by_ids(payload, &ids).await;

    for node in &nodes[1..3] {
        let mailbox = node.mailbox.clone();
        wait_until(|| mailbox.count() == 1, "identity broadcast to arrive").await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(nodes[1].mailbox.count(), 1);
    assert_eq!(nodes[2].mailbox.count(), 1);
    assert_eq!(nodes[3].mailbox.count(), 0);
    assert_eq!(nodes[4].mailbox.count(), 0);

    for node in &nodes {
        node.network.close().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn random_broadcast_stays_within_bound() {
    let nodes = start_cluster("tcp", 5).await;
    let payload = Payload::from_message(&TestMessage {
        message: "sampled".to_string(),
    })
    .expect("encode");

    nodes[0].network.broadcast_randomly(payload, 2).await;

    // Exactly two of the four peers receive the message.
    wait_until(
        || {
            nodes[1..]
                .iter()
                .map(|node| node.mailbox.count())
                .sum::<usize>()
                == 2
        },
        "random broadcast to reach two peers",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let per_node: Vec<usize> = nodes[1..].iter().map(|node| node.mailbox.count()).collect();
    assert_eq!(per_node.iter().sum::<usize>(), 2);
    assert!(per_node.iter().all(|&count| count <= 1));

    for node in &nodes {
        node.network.close().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn request_reply_correlates_concurrent_requests() {
    let asker = spawn_node("tcp", Vec::new()).await;
    let echoer = spawn_node("tcp", vec![Arc::new(EchoPlugin)]).await;

    let client = asker
        .network
        .client(&echoer.address())
        .await
        .expect("client");

    let first = {
        let client = client.clone();
        tokio::spawn(async move {
            let payload = Payload::from_message(&Question {
                text: "one".to_string(),
            })
            .expect("encode");
            client.request(payload, Duration::from_secs(5)).await
        })
    };
    let second = {
        let client = client.clone();
        tokio::spawn(async move {
            let payload = Payload::from_message(&Question {
                text: "two".to_string(),
            })
            .expect("encode");
            client.request(payload, Duration::from_secs(5)).await
        })
    };

    let first: Answer = first
        .await
        .expect("join")
        .expect("first request")
        .decode()
        .expect("decode");
    let second: Answer = second
        .await
        .expect("join")
        .expect("second request")
        .decode()
        .expect("decode");
    assert_eq!(first.text, "echo:one");
    assert_eq!(second.text, "echo:two");

    asker.network.close().await;
    echoer.network.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn request_times_out_without_a_reply() {
    let asker = spawn_node("tcp", Vec::new()).await;
    // No echo plugin on the far side; nothing will answer.
    let silent = spawn_node("tcp", Vec::new()).await;

    let client = asker
        .network
        .client(&silent.address())
        .await
        .expect("client");
    let payload = Payload::from_message(&Question {
        text: "anyone?".to_string(),
    })
    .expect("encode");
    let outcome = client.request(payload, Duration::from_millis(500)).await;
    assert!(matches!(outcome, Err(NetError::TimedOut)));

    asker.network.close().await;
    silent.network.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn close_resolves_in_flight_requests() {
    let asker = spawn_node("tcp", Vec::new()).await;
    let silent = spawn_node("tcp", Vec::new()).await;

    let client = asker
        .network
        .client(&silent.address())
        .await
        .expect("client");
    let in_flight = {
        let client = client.clone();
        tokio::spawn(async move {
            let payload = Payload::from_message(&Question {
                text: "pending".to_string(),
            })
            .expect("encode");
            client.request(payload, Duration::from_secs(30)).await
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    asker.network.close().await;

    let outcome = in_flight.await.expect("join");
    assert!(matches!(outcome, Err(NetError::Closed)));

    // The client refuses further traffic once closed.
    let payload = Payload::from_message(&TestMessage {
        message: "late".to_string(),
    })
    .expect("encode");
    assert!(matches!(client.tell(payload).await, Err(NetError::Closed)));
    assert!(asker.network.peer_addresses().is_empty());

    silent.network.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn messages_from_one_peer_dispatch_in_order() {
    let sender = spawn_node("tcp", Vec::new()).await;
    let receiver = spawn_node("tcp", Vec::new()).await;

    let client = sender
        .network
        .client(&receiver.address())
        .await
        .expect("client");
    let total = 20usize;
    for index in 0..total {
        let payload = Payload::from_message(&TestMessage {
            message: format!("seq-{index}"),
        })
        .expect("encode");
        client.tell(payload).await.expect("tell");
    }

    let mailbox = receiver.mailbox.clone();
    wait_until(|| mailbox.count() == total, "all messages to arrive").await;
    let received: Vec<String> = receiver
        .mailbox
        .messages()
        .into_iter()
        .map(|message| message.message)
        .collect();
    let expected: Vec<String> = (0..total).map(|index| format!("seq-{index}")).collect();
    assert_eq!(received, expected);

    sender.network.close().await;
    receiver.network.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn raw_bytes_bypass_plugin_dispatch() {
    let sender = spawn_node("tcp", Vec::new()).await;
    let receiver = spawn_node("tcp", Vec::new()).await;

    let client = sender
        .network
        .client(&receiver.address())
        .await
        .expect("client");
    let payload = Payload::from_message(&RawBytes(b"control".to_vec())).expect("encode");
    client.tell(payload).await.expect("tell");

    let receiver_net = receiver.network.clone();
    let sender_addr = sender.address();
    wait_until(
        || receiver_net.peer(&sender_addr).is_some(),
        "receiver to register the sender",
    )
    .await;
    let peer = receiver.network.peer(&sender.address()).expect("peer");
    let mut stream = peer.take_bytes_stream().expect("bytes stream");
    let bytes = tokio::time::timeout(WAIT_TIMEOUT, stream.recv())
        .await
        .expect("bytes in time")
        .expect("bytes present");
    assert_eq!(bytes, b"control".to_vec());
    // Control bytes never reach the plugin fan-out.
    assert_eq!(receiver.mailbox.count(), 0);

    sender.network.close().await;
    receiver.network.close().await;
}
