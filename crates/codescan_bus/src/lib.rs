//! Event bus abstraction for the code similarity scan pipeline.
//!
//! The pipeline's three worker roles coordinate purely by publishing and
//! consuming JSON envelopes on named topics — there is no direct RPC between
//! them. This crate defines that contract ([`EventBus`]/[`EventSubscription`])
//! plus two transports: a ZeroMQ-backed one for real deployments, and an
//! in-memory one for tests.
//!
//! ## ZeroMQ topology
//!
//! `zeromq` gives us PUSH/PULL and PUB/SUB sockets but no broker. We wire
//! them into a small broker ourselves: publishers PUSH envelopes to the
//! bus's ingress address, [`run_broker`] PULLs them and re-publishes them
//! over a PUB socket bound at the egress address, and subscribers SUB from
//! there with a topic-prefix filter. This keeps every worker role a simple
//! connecting client — nothing but the broker ever binds a socket.

use async_trait::async_trait;
use codescan_protocol::Envelope;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use zeromq::{PubSocket, PullSocket, PushSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

pub type Result<T> = std::result::Result<T, BusError>;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("protocol error: {0}")]
    Protocol(#[from] codescan_protocol::ProtocolError),

    #[error("malformed bus frame: {0}")]
    MalformedFrame(String),

    #[error("timed out connecting to the bus after {0:.1}s")]
    ConnectTimeout(f64),

    #[error("subscription channel closed")]
    Closed,
}

/// Publish side of the bus.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<()>;
}

/// Consume side of the bus: one subscription covers one or more topics.
#[async_trait]
pub trait EventSubscription: Send {
    /// Block until the next `(topic, envelope)` pair arrives.
    async fn recv(&mut self) -> Result<(String, Envelope)>;
}

/// Host/port pair the broker listens on, derived from a single configured
/// `bus_endpoint` (ingress) plus ingress port + 1 (egress).
#[derive(Debug, Clone)]
pub struct BusEndpoints {
    pub ingress: String,
    pub egress: String,
}

impl BusEndpoints {
    pub fn derive(bus_endpoint: &str) -> Result<Self> {
        let (scheme, host, port) = split_tcp_endpoint(bus_endpoint)?;
        Ok(Self {
            ingress: format!("{scheme}://{host}:{port}"),
            egress: format!("{scheme}://{host}:{}", port + 1),
        })
    }
}

fn split_tcp_endpoint(endpoint: &str) -> Result<(String, String, u16)> {
    let (scheme, rest) = endpoint
        .split_once("://")
        .ok_or_else(|| BusError::MalformedFrame(format!("bad bus endpoint: {endpoint}")))?;
    let (host, port_str) = rest
        .rsplit_once(':')
        .ok_or_else(|| BusError::MalformedFrame(format!("bad bus endpoint: {endpoint}")))?;
    let port: u16 = port_str
        .parse()
        .map_err(|_| BusError::MalformedFrame(format!("bad bus port: {port_str}")))?;
    Ok((scheme.to_string(), host.to_string(), port))
}

async fn connect_with_retry<F, Fut>(
    label: &str,
    timeout_s: f64,
    initial_delay_s: f64,
    max_delay_s: f64,
    mut attempt: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<(), zeromq::ZmqError>>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs_f64(timeout_s);
    let mut delay = initial_delay_s;

    loop {
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if tokio::time::Instant::now() >= deadline {
                    warn!("{label} failed after retrying for {timeout_s:.1}s: {e}");
                    return Err(BusError::ConnectTimeout(timeout_s));
                }
                warn!("{label} failed ({e}). Retrying in {delay:.1}s...");
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                delay = (delay * 1.5).min(max_delay_s);
            }
        }
    }
}

fn envelope_to_frames(topic: &str, envelope: &Envelope) -> Result<ZmqMessage> {
    let body = envelope.to_json_bytes()?;
    let mut msg = ZmqMessage::from(topic.as_bytes().to_vec());
    msg.push_back(body.into());
    Ok(msg)
}

fn frames_to_envelope(msg: ZmqMessage) -> Result<(String, Envelope)> {
    let frames: Vec<Vec<u8>> = msg.into_vec().into_iter().map(|b| b.to_vec()).collect();
    if frames.len() < 2 {
        return Err(BusError::MalformedFrame(format!(
            "expected 2 frames [topic, body], got {}",
            frames.len()
        )));
    }
    let topic = String::from_utf8(frames[0].clone())
        .map_err(|e| BusError::MalformedFrame(e.to_string()))?;
    let envelope = Envelope::from_json_bytes(&frames[1])?;
    Ok((topic, envelope))
}

/// Run the bus broker: PULL envelopes pushed by publishers, re-PUB them for
/// subscribers. Runs until cancelled; call from a dedicated task.
pub async fn run_broker(endpoints: &BusEndpoints) -> Result<()> {
    let mut pull = PullSocket::new();
    pull.bind(&endpoints.ingress).await?;
    info!("bus broker: pull bound at {}", endpoints.ingress);

    let mut pub_socket = PubSocket::new();
    pub_socket.bind(&endpoints.egress).await?;
    info!("bus broker: pub bound at {}", endpoints.egress);

    loop {
        let msg = pull.recv().await?;
        if let Err(e) = pub_socket.send(msg).await {
            warn!("bus broker: failed to forward message: {e}");
        }
    }
}

/// ZeroMQ-backed [`EventBus`]. Connects a PUSH socket to the broker's
/// ingress address with retry/backoff at construction time.
pub struct ZmqEventBus {
    push: Mutex<PushSocket>,
}

impl ZmqEventBus {
    pub async fn connect(
        endpoints: &BusEndpoints,
        timeout_s: f64,
        initial_delay_s: f64,
        max_delay_s: f64,
    ) -> Result<Self> {
        let mut push = PushSocket::new();
        connect_with_retry(
            &format!("bus publisher connect ({})", endpoints.ingress),
            timeout_s,
            initial_delay_s,
            max_delay_s,
            || push.connect(&endpoints.ingress),
        )
        .await?;
        Ok(Self {
            push: Mutex::new(push),
        })
    }

    /// Open a subscription to one or more topics. Not part of [`EventBus`]
    /// since subscriptions are stateful streams, not request/response calls.
    pub async fn subscribe(
        endpoints: &BusEndpoints,
        topics: &[&str],
        timeout_s: f64,
        initial_delay_s: f64,
        max_delay_s: f64,
    ) -> Result<ZmqSubscription> {
        let mut sub = SubSocket::new();
        connect_with_retry(
            &format!("bus subscriber connect ({})", endpoints.egress),
            timeout_s,
            initial_delay_s,
            max_delay_s,
            || sub.connect(&endpoints.egress),
        )
        .await?;
        for topic in topics {
            sub.subscribe(topic).await?;
        }
        Ok(ZmqSubscription { sub })
    }
}

#[async_trait]
impl EventBus for ZmqEventBus {
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<()> {
        let msg = envelope_to_frames(topic, envelope)?;
        let mut push = self.push.lock().await;
        push.send(msg).await?;
        Ok(())
    }
}

pub struct ZmqSubscription {
    sub: SubSocket,
}

#[async_trait]
impl EventSubscription for ZmqSubscription {
    async fn recv(&mut self) -> Result<(String, Envelope)> {
        let msg = self.sub.recv().await?;
        frames_to_envelope(msg)
    }
}

/// In-process test transport: one `broadcast` channel per topic, fanned out
/// to every open subscription. Never drops a publish for lack of
/// subscribers, but a slow subscriber can still lag and miss messages, same
/// as any broadcast channel.
#[derive(Default, Clone)]
pub struct InMemoryBus {
    channels: std::sync::Arc<Mutex<HashMap<String, broadcast::Sender<(String, Envelope)>>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    async fn channel_for(&self, topic: &str) -> broadcast::Sender<(String, Envelope)> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone()
    }

    pub async fn subscribe(&self, topics: &[&str]) -> InMemorySubscription {
        let mut receivers = Vec::with_capacity(topics.len());
        for topic in topics {
            receivers.push(self.channel_for(topic).await.subscribe());
        }
        InMemorySubscription { receivers }
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<()> {
        let sender = self.channel_for(topic).await;
        // No subscribers yet is not an error — mirrors a fire-and-forget bus.
        let _ = sender.send((topic.to_string(), envelope.clone()));
        Ok(())
    }
}

pub struct InMemorySubscription {
    receivers: Vec<broadcast::Receiver<(String, Envelope)>>,
}

#[async_trait]
impl EventSubscription for InMemorySubscription {
    async fn recv(&mut self) -> Result<(String, Envelope)> {
        use futures_util_lite::select_first_ready;
        select_first_ready(&mut self.receivers)
            .await
            .ok_or(BusError::Closed)
    }
}

/// Minimal "race the first ready receiver" helper so `InMemorySubscription`
/// doesn't need a full `futures` dependency just for `select_all`.
mod futures_util_lite {
    use tokio::sync::broadcast;

    pub async fn select_first_ready<T: Clone + Send + 'static>(
        receivers: &mut [broadcast::Receiver<T>],
    ) -> Option<T> {
        loop {
            for receiver in receivers.iter_mut() {
                match receiver.try_recv() {
                    Ok(value) => return Some(value),
                    Err(broadcast::error::TryRecvError::Empty) => continue,
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(broadcast::error::TryRecvError::Closed) => continue,
                }
            }
            if receivers.is_empty() {
                return None;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescan_protocol::EventType;

    fn sample_envelope() -> Envelope {
        Envelope::new(
            EventType::Submitted,
            "scan-1",
            "corr-1",
            "key-1",
            1_700_000_000_000,
            serde_json::json!({"hello": "world"}),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn in_memory_bus_delivers_published_envelope() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe(&["code.submitted"]).await;

        bus.publish("code.submitted", &sample_envelope())
            .await
            .unwrap();

        let (topic, envelope) = sub.recv().await.unwrap();
        assert_eq!(topic, "code.submitted");
        assert_eq!(envelope.scan_id, "scan-1");
    }

    #[tokio::test]
    async fn in_memory_subscription_ignores_other_topics() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe(&["code.scored"]).await;

        bus.publish("code.submitted", &sample_envelope())
            .await
            .unwrap();
        bus.publish("code.scored", &sample_envelope()).await.unwrap();

        let (topic, _) = sub.recv().await.unwrap();
        assert_eq!(topic, "code.scored");
    }

    #[test]
    fn bus_endpoints_derive_adjacent_ports() {
        let endpoints = BusEndpoints::derive("tcp://127.0.0.1:5560").unwrap();
        assert_eq!(endpoints.ingress, "tcp://127.0.0.1:5560");
        assert_eq!(endpoints.egress, "tcp://127.0.0.1:5561");
    }
}
