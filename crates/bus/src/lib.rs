//! Message-bus session for the PCP manipulator: connection lifecycle,
//! command-topic subscriptions, and the fire-and-forget status publisher.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use pcp::{command_topic, status_topic, ClientIdentity, PcpStatus, PortId, TransferState};
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};


const EVENT_CHANNEL_CAPACITY: usize = 64;
const MQTT_CHANNEL_CAPACITY: usize = 16;
const CLIENT_ID_SUFFIX_LEN: usize = 8;

/// Connection lifecycle of the single bus session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Observable bus activity, broadcast to whoever subscribes.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Connected,
    Disconnected,
    Command { topic: String, payload: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct BusSettings {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id_prefix: String,
    pub ports: Vec<PortId>,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            broker_host: "localhost".into(),
            broker_port: 1883,
            client_id_prefix: "manipulator".into(),
            ports: Vec::new(),
        }
    }
}

/// Outbound seam the status publisher talks through, so callers can run
/// without a live session and tests can record traffic.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// Inert sink used when no bus session has been wired up.
pub struct MissingBus;

#[async_trait]
impl StatusSink for MissingBus {
    async fn publish(&self, topic: &str, _payload: Vec<u8>) -> Result<()> {
        Err(anyhow!("bus session unavailable for topic {topic}"))
    }
}

struct ConnInner {
    state: ConnectionState,
    client: Option<AsyncClient>,
    event_task: Option<JoinHandle<()>>,
    // Bumped on every connect and disconnect; a released event-loop task
    // whose epoch no longer matches must not touch the session state.
    epoch: u64,
}

/// Owner of the single publish-subscribe session.
///
/// `toggle` drives the `Disconnected -> Connecting -> Connected ->
/// Disconnected` lifecycle; on reaching `Connected` the session
/// (re)subscribes to every configured port's command topic under both
/// namespaces. Connection failures are logged and collapse the state back
/// to `Disconnected`; they never surface to the caller.
pub struct BusConnection {
    settings: BusSettings,
    inner: Mutex<ConnInner>,
    events: broadcast::Sender<BusEvent>,
}

impl BusConnection {
    pub fn new(settings: BusSettings) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            settings,
            inner: Mutex::new(ConnInner {
                state: ConnectionState::Disconnected,
                client: None,
                event_task: None,
                epoch: 0,
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    /// Connects when disconnected, disconnects when connected. The inner
    /// lock serializes toggles; one in flight at a time.
    pub async fn toggle(self: &Arc<Self>) {
        let mut guard = self.inner.lock().await;
        match guard.state {
            ConnectionState::Disconnected => self.connect_locked(&mut guard),
            ConnectionState::Connected => Self::disconnect_locked(&mut guard, &self.events).await,
            ConnectionState::Connecting => {
                debug!("bus toggle ignored while a connect is in flight");
            }
        }
    }

    fn connect_locked(self: &Arc<Self>, guard: &mut ConnInner) {
        let client_id = generate_client_id(&self.settings.client_id_prefix);
        let mut options = MqttOptions::new(
            client_id.clone(),
            self.settings.broker_host.clone(),
            self.settings.broker_port,
        );
        options.set_clean_session(true);

        let (client, mut event_loop) = AsyncClient::new(options, MQTT_CHANNEL_CAPACITY);
        guard.state = ConnectionState::Connecting;
        guard.client = Some(client.clone());
        guard.epoch += 1;
        let epoch = guard.epoch;
        info!(
            client_id = %client_id,
            broker = %format!("{}:{}", self.settings.broker_host, self.settings.broker_port),
            "bus connect started"
        );

        let conn = Arc::clone(self);
        let ports = self.settings.ports.clone();
        guard.event_task = Some(tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        {
                            let mut inner = conn.inner.lock().await;
                            if inner.epoch != epoch {
                                break;
                            }
                            inner.state = ConnectionState::Connected;
                        }
                        let _ = conn.events.send(BusEvent::Connected);
                        info!("bus connected");
                        subscribe_command_topics(&client, &ports).await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let _ = conn.events.send(BusEvent::Command {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        });
                    }
                    // A requested disconnect has reached the wire; the
                    // session bookkeeping already happened in toggle().
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("bus event loop stopped after disconnect");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("bus connection error: {err}");
                        let current = {
                            let mut inner = conn.inner.lock().await;
                            if inner.epoch == epoch {
                                inner.state = ConnectionState::Disconnected;
                                inner.client = None;
                                inner.event_task = None;
                            }
                            inner.epoch == epoch
                        };
                        if current {
                            let _ = conn.events.send(BusEvent::Disconnected);
                        }
                        break;
                    }
                }
            }
        }));
    }

    async fn disconnect_locked(guard: &mut ConnInner, events: &broadcast::Sender<BusEvent>) {
        if let Some(client) = guard.client.take() {
            if let Err(err) = client.disconnect().await {
                warn!("bus disconnect error: {err}");
            }
        }
        // The request is only queued here; the event loop still has to
        // poll it onto the wire, so the task is released, not aborted.
        drop(guard.event_task.take());
        guard.epoch += 1;
        guard.state = ConnectionState::Disconnected;
        let _ = events.send(BusEvent::Disconnected);
        info!("bus disconnected");
    }
}

#[async_trait]
impl StatusSink for BusConnection {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let client = {
            let guard = self.inner.lock().await;
            match (&guard.state, &guard.client) {
                (ConnectionState::Connected, Some(client)) => client.clone(),
                _ => return Err(anyhow!("bus not connected")),
            }
        };
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }
}

/// One-shot status emitter: encode, address, publish, forget.
pub struct StatusPublisher {
    sink: Arc<dyn StatusSink>,
}

impl StatusPublisher {
    pub fn new(sink: Arc<dyn StatusSink>) -> Self {
        Self { sink }
    }

    /// Publishes a status record for `port` addressed to `consumer`.
    /// At-most-once: encode or transport failure is logged and dropped.
    pub async fn publish_status(
        &self,
        port: &PortId,
        state: TransferState,
        consumer: ClientIdentity,
    ) {
        let status = PcpStatus::for_port(port, state);
        let payload = match status.encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(port = %port, "failed to encode status: {err}");
                return;
            }
        };
        let topic = status_topic(port, consumer);
        if let Err(err) = self.sink.publish(&topic, payload).await {
            warn!(topic = %topic, "status publish dropped: {err}");
        }
    }
}

/// Fixed prefix plus the first 8 characters of a v4 uuid.
fn generate_client_id(prefix: &str) -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(CLIENT_ID_SUFFIX_LEN)
        .collect();
    format!("{prefix}{suffix}")
}

/// Every configured port's command topic under both namespaces.
/// Failures are logged once each, never retried.
async fn subscribe_command_topics(client: &AsyncClient, ports: &[PortId]) {
    for topic in command_subscription_topics(ports) {
        if let Err(err) = client.subscribe(&topic, QoS::AtMostOnce).await {
            warn!(topic = %topic, "command topic subscription failed: {err}");
        }
    }
}

fn command_subscription_topics(ports: &[PortId]) -> Vec<String> {
    let mut topics = Vec::with_capacity(ports.len() * 2);
    for port in ports {
        topics.push(command_topic(port, ClientIdentity::Xms));
        topics.push(command_topic(port, ClientIdentity::Aas));
    }
    topics
}
