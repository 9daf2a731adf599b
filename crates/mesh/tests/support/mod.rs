//! Shared harness for the integration tests: test payload types, plugins,
//! in-process cluster helpers, and raw wire access.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mesh::transport::{BoxedConn, Listener, Transport};
use mesh::{
    format_address, NetError, Network, NetworkBuilder, Payload, Ping, Plugin, PluginContext, Pong,
    WirePayload,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(15);
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMessage {
    pub message: String,
}

impl WirePayload for TestMessage {
    const KIND: &'static str = "test.message";
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
}

impl WirePayload for Question {
    const KIND: &'static str = "test.question";
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
}

impl WirePayload for Answer {
    const KIND: &'static str = "test.answer";
}

/// Collects every [`TestMessage`] dispatched to this node.
#[derive(Default)]
pub struct MailboxPlugin {
    messages: Mutex<Vec<TestMessage>>,
}

impl MailboxPlugin {
    pub fn messages(&self) -> Vec<TestMessage> {
        self.messages.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.messages.lock().len()
    }
}

#[async_trait]
impl Plugin for MailboxPlugin {
    fn id(&self) -> &'static str {
        "test.mailbox"
    }

    async fn receive(&self, ctx: &PluginContext) -> Result<(), NetError> {
        if ctx.payload().is::<TestMessage>() {
            self.messages.lock().push(ctx.payload().decode()?);
        }
        Ok(())
    }
}

/// Tracks connected peers by address and answers liveness probes.
#[derive(Default)]
pub struct RosterPlugin {
    peers: Mutex<HashSet<String>>,
}

impl RosterPlugin {
    pub fn count(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.peers.lock().contains(address)
    }
}

#[async_trait]
impl Plugin for RosterPlugin {
    fn id(&self) -> &'static str {
        "test.roster"
    }

    async fn receive(&self, ctx: &PluginContext) -> Result<(), NetError> {
        if ctx.payload().is::<Ping>() {
            let pong = Payload::from_message(&Pong)?;
            let _ = ctx.client().tell(pong).await;
        }
        Ok(())
    }

    async fn peer_connect(&self, client: &Arc<mesh::PeerClient>) {
        self.peers.lock().insert(client.address().to_string());
    }

    async fn peer_disconnect(&self, client: &Arc<mesh::PeerClient>) {
        self.peers.lock().remove(client.address());
    }
}

/// Replies to every [`Question`] with an [`Answer`] echoing its text.
#[derive(Default)]
pub struct EchoPlugin;

#[async_trait]
impl Plugin for EchoPlugin {
    fn id(&self) -> &'static str {
        "test.echo"
    }

    async fn receive(&self, ctx: &PluginContext) -> Result<(), NetError> {
        if ctx.payload().is::<Question>() {
            let question: Question = ctx.payload().decode()?;
            let answer = Payload::from_message(&Answer {
                text: format!("echo:{}", question.text),
            })?;
            ctx.client().reply(ctx.request_nonce(), answer).await?;
        }
        Ok(())
    }
}

pub struct TestNode {
    pub network: Network,
    pub mailbox: Arc<MailboxPlugin>,
    pub roster: Arc<RosterPlugin>,
}

impl TestNode {
    pub fn address(&self) -> String {
        self.network.address().to_string()
    }
}

pub fn unused_port(scheme: &str) -> u16 {
    match scheme {
        "kcp" => std::net::UdpSocket::bind("127.0.0.1:0")
            .expect("bind probe socket")
            .local_addr()
            .expect("local addr")
            .port(),
        _ => std::net::TcpListener::bind("127.0.0.1:0")
            .expect("bind probe socket")
            .local_addr()
            .expect("local addr")
            .port(),
    }
}

/// Build a node with roster + mailbox plugins (plus any extras), spawn its
/// listener, and wait until it accepts peers.
pub async fn spawn_node(scheme: &str, extra: Vec<Arc<dyn Plugin>>) -> TestNode {
    let address = format_address(scheme, "127.0.0.1", unused_port(scheme));
    let mailbox = Arc::new(MailboxPlugin::default());
    let roster = Arc::new(RosterPlugin::default());
    let mut builder = NetworkBuilder::new()
        .address(address)
        .write_timeout(Duration::from_secs(1))
        .plugin(roster.clone())
        .plugin(mailbox.clone());
    for plugin in extra {
        builder = builder.plugin(plugin);
    }
    let network = builder.build().expect("build node");
    let listener = network.clone();
    tokio::spawn(async move {
        let _ = listener.listen().await;
    });
    network.block_until_listening().await;
    TestNode {
        network,
        mailbox,
        roster,
    }
}

/// Start `count` nodes where every node after the first bootstraps against
/// node 0, and wait until node 0 has registered all of them.
pub async fn start_cluster(scheme: &str, count: usize) -> Vec<TestNode> {
    let mut nodes = Vec::new();
    for _ in 0..count {
        nodes.push(spawn_node(scheme, Vec::new()).await);
    }
    let bootstrap = vec![nodes[0].address()];
    for node in &nodes[1..] {
        node.network.bootstrap(&bootstrap).await;
    }
    let expected = count - 1;
    wait_until(
        || nodes[0].roster.count() >= expected,
        "bootstrap node to register every peer",
    )
    .await;
    nodes
}

pub async fn wait_until<F: FnMut() -> bool>(mut condition: F, what: &str) {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    panic!("timed out waiting for {what}");
}

/// Read one length-framed envelope straight off a raw stream.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<mesh::Envelope> {
    let mut prefix = codec::PrefixDecoder::new();
    let len = loop {
        let byte = reader.read_u8().await?;
        if let Some(len) = prefix.push(byte)? {
            break len as usize;
        }
    };
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    codec::decode(&buf)
}

/// Write one length-framed envelope straight onto a raw stream.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    envelope: &mesh::Envelope,
) -> io::Result<()> {
    let frame = codec::encode_framed(envelope)?;
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Transport that records every dial target and hands back one half of an
/// in-memory duplex stream.
#[derive(Default)]
pub struct RecordingTransport {
    dialed: Mutex<Vec<String>>,
    held: Mutex<Vec<DuplexStream>>,
}

impl RecordingTransport {
    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn listen(&self, _port: u16) -> io::Result<Box<dyn Listener>> {
        Ok(Box::new(IdleListener))
    }

    async fn dial(&self, addr: &str) -> io::Result<BoxedConn> {
        self.dialed.lock().push(addr.to_string());
        let (near, far) = tokio::io::duplex(1024);
        self.held.lock().push(far);
        Ok(Box::new(near))
    }
}

struct IdleListener;

#[async_trait]
impl Listener for IdleListener {
    async fn accept(&mut self) -> io::Result<BoxedConn> {
        std::future::pending().await
    }
}
