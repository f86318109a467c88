//! rumqttc client and poll loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshtree_core::{ControlMessage, MqttSettings, QueueHandle, RawMessage};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, TransportError};

const REQUEST_CAPACITY: usize = 64;
const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;
const MAX_BACKOFF_SECS: u64 = 30;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Connection to the broker the gateway publishes on.
pub struct MqttTransport {
    client: AsyncClient,
    base_topic: String,
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl MqttTransport {
    /// Connect and start polling.
    ///
    /// Every publish below the base topic is submitted to `queue` with the
    /// base topic stripped. Each (re)connect subscribes again and asks the
    /// gateway for a full node dump.
    pub fn connect(
        settings: &MqttSettings,
        gateway_name: &str,
        queue: Option<QueueHandle>,
    ) -> Result<Self> {
        if settings.host.trim().is_empty() {
            return Err(TransportError::Configuration("MQTT host is empty".to_string()));
        }

        let client_id = client_id(&settings.client_id_prefix);
        let mut options = MqttOptions::new(&client_id, &settings.host, settings.port);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let base_topic = settings.base_topic.trim_end_matches('/').to_string();
        let running = Arc::new(AtomicBool::new(true));

        let poller = Poller {
            client: client.clone(),
            base_topic: base_topic.clone(),
            snapshot_request: ControlMessage::snapshot_request(gateway_name),
            queue,
            running: running.clone(),
        };
        let task = tokio::spawn(poller.run(eventloop));

        info!(
            client_id = %client_id,
            host = %settings.host,
            port = settings.port,
            base_topic = %base_topic,
            "MQTT transport started"
        );
        Ok(Self {
            client,
            base_topic,
            running,
            task,
        })
    }

    pub fn base_topic(&self) -> &str {
        &self.base_topic
    }

    /// Publish a control message below the base topic.
    pub async fn publish(&self, message: &ControlMessage) -> Result<()> {
        let topic = full_topic(&self.base_topic, &message.topic);
        let payload = serde_json::to_vec(&message.payload)?;
        self.client
            .publish(topic.clone(), QoS::AtLeastOnce, false, payload)
            .await?;
        debug!(topic = %topic, "Published control message");
        Ok(())
    }

    /// Disconnect after pending publishes and wait briefly for the poll
    /// loop to stop.
    pub async fn disconnect(self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        let result = self.client.disconnect().await;

        let abort = self.task.abort_handle();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.task).await.is_err() {
            warn!("MQTT poll loop did not stop in time, aborting");
            abort.abort();
        }
        info!("MQTT transport stopped");
        result.map_err(TransportError::from)
    }
}

struct Poller {
    client: AsyncClient,
    base_topic: String,
    snapshot_request: ControlMessage,
    queue: Option<QueueHandle>,
    running: Arc<AtomicBool>,
}

impl Poller {
    async fn run(self, mut eventloop: EventLoop) {
        let mut error_count: u64 = 0;

        loop {
            match eventloop.poll().await {
                Ok(event) => {
                    error_count = 0;
                    if !self.on_event(event).await {
                        break;
                    }
                }
                Err(e) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    error_count += 1;
                    if error_count == 1 {
                        self.notify_connected(false).await;
                    }
                    let backoff = Duration::from_secs(error_count.min(MAX_BACKOFF_SECS));
                    warn!(error = %e, attempt = error_count, "MQTT connection error, retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
        info!("MQTT poll loop stopped");
    }

    /// Returns `false` when the poll loop should stop.
    async fn on_event(&self, event: Event) -> bool {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => {
                info!("MQTT connection acknowledged");
                self.on_connected();
                self.notify_connected(true).await;
                true
            }
            Event::Incoming(Packet::Publish(publish)) => {
                let topic = publish.topic.to_string();
                let Some(relative) = strip_base_topic(&self.base_topic, &topic) else {
                    debug!(topic = %topic, "Ignoring publish outside base topic");
                    return true;
                };
                let Some(queue) = &self.queue else {
                    return true;
                };
                let message = RawMessage::new(relative, publish.payload.to_vec());
                if queue.submit(message).await.is_err() {
                    warn!("Message queue closed, stopping MQTT poll loop");
                    return false;
                }
                true
            }
            Event::Incoming(Packet::Disconnect) => {
                self.notify_connected(false).await;
                true
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                debug!("MQTT disconnect sent");
                false
            }
            _ => true,
        }
    }

    fn on_connected(&self) {
        // The poll loop drives the request channel, so never await on it here.
        let filter = full_topic(&self.base_topic, "#");
        if let Err(e) = self.client.try_subscribe(filter.clone(), QoS::AtLeastOnce) {
            warn!(topic = %filter, error = %e, "Failed to subscribe");
        }

        let topic = full_topic(&self.base_topic, &self.snapshot_request.topic);
        match self.snapshot_request.payload_bytes() {
            Ok(payload) => {
                if let Err(e) = self
                    .client
                    .try_publish(topic.clone(), QoS::AtLeastOnce, false, payload)
                {
                    warn!(topic = %topic, error = %e, "Failed to request node snapshot");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode snapshot request"),
        }
    }

    async fn notify_connected(&self, connected: bool) {
        if let Some(queue) = &self.queue {
            if queue.set_connected(connected).await.is_err() {
                debug!(connected, "Queue closed before connection change");
            }
        }
    }
}

/// Topic relative to `base`, or `None` when it lies outside it.
pub fn strip_base_topic<'a>(base: &str, topic: &'a str) -> Option<&'a str> {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        return Some(topic);
    }
    topic
        .strip_prefix(base)?
        .strip_prefix('/')
        .filter(|rest| !rest.is_empty())
}

fn full_topic(base: &str, relative: &str) -> String {
    if base.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{}", base, relative)
    }
}

fn client_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &suffix[..6])
}
