//! Messaging collaborator – MQTT publish/subscribe.
//!
//! [`MqttConnector`] opens one persistent broker session per process.  The
//! connection is driven by a background task that polls the `rumqttc` event
//! loop; polling again after an error is what makes the client reconnect, so
//! reconnection is entirely delegated to the client library.
//!
//! * **Inbound** – every message is routed through a static
//!   [`TopicRouter`] (topic → handler) and mirrored on the [`EventBus`] as an
//!   [`EventPayload::InboundMessage`].
//! * **Outbound** – [`MessagingClient::publish`] is fire-and-forget.  While
//!   the session is down the message is logged and dropped, never queued.
//! * **Subscriptions** – the configured topic list is (re)subscribed with
//!   QoS 1 after every connection acknowledgement.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rafa_types::{Event, EventPayload, RafaError};
use rumqttc::{AsyncClient, Event as MqttEvent, EventLoop, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::bus::EventBus;

/// Port used when the broker address does not carry one.
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Topics subscribed when the configuration does not name any.
pub const DEFAULT_TOPICS: &[&str] = &["test/pedro", "test/intec"];

/// Capacity of the request channel between [`AsyncClient`] and its event loop.
const REQUEST_CAPACITY: usize = 32;

/// Back-off between event-loop polls after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Broker username/password.  Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything needed to open a broker session.
#[derive(Debug, Clone)]
pub struct MessagingConfig {
    /// e.g. `"tcp://10.14.0.182:1883"`
    pub broker_address: String,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub topics: Vec<String>,
    pub keep_alive: Duration,
}

impl MessagingConfig {
    pub fn new(broker_address: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            broker_address: broker_address.into(),
            client_id: client_id.into(),
            credentials: None,
            topics: DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect(),
            keep_alive: Duration::from_secs(30),
        }
    }

    /// Attach credentials.  Blank usernames are treated as "no credentials".
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = if username.trim().is_empty() {
            None
        } else {
            Some(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            })
        };
        self
    }

    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        if !topics.is_empty() {
            self.topics = topics;
        }
        self
    }
}

/// Split a `tcp://host:port` broker address into host and port.
///
/// Accepts the `tcp://` and `mqtt://` schemes or a bare `host[:port]`.
pub fn parse_broker_address(address: &str) -> Result<(String, u16), RafaError> {
    let trimmed = address.trim();
    let rest = if let Some(rest) = trimmed.strip_prefix("tcp://") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("mqtt://") {
        rest
    } else if trimmed.contains("://") {
        return Err(RafaError::Config(format!(
            "unsupported broker scheme in '{trimmed}' (expected tcp:// or mqtt://)"
        )));
    } else {
        trimmed
    };
    let rest = rest.trim_end_matches('/');

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|e| RafaError::Config(format!("invalid broker port '{port}': {e}")))?;
            (host, port)
        }
        None => (rest, DEFAULT_BROKER_PORT),
    };
    if host.is_empty() {
        return Err(RafaError::Config(format!("broker address '{trimmed}' has no host")));
    }
    Ok((host.to_string(), port))
}

type TopicHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Static mapping from topic to inbound-message handler.
#[derive(Clone, Default)]
pub struct TopicRouter {
    handlers: HashMap<String, TopicHandler>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`, replacing any previous handler.
    pub fn with_handler(
        mut self,
        topic: impl Into<String>,
        handler: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(topic.into(), Arc::new(handler));
        self
    }

    /// Run the handler registered for `topic`.  Returns `false` when none is.
    pub fn route(&self, topic: &str, payload: &str) -> bool {
        match self.handlers.get(topic) {
            Some(handler) => {
                handler(payload);
                true
            }
            None => false,
        }
    }

    /// Routed topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.handlers.keys().cloned().collect();
        topics.sort();
        topics
    }
}

/// A live broker session.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Publish `payload` on `topic`.  Logged and dropped when disconnected.
    async fn publish(&self, topic: &str, payload: &str);

    fn is_connected(&self) -> bool;

    async fn disconnect(&self);
}

/// Opens broker sessions.  The presentation layer owns one connector and
/// asks it for at most one session per process.
pub trait MessagingConnector: Send + Sync {
    fn connect(&self, config: MessagingConfig) -> Result<Arc<dyn MessagingClient>, RafaError>;
}

/// [`MessagingConnector`] backed by `rumqttc`.
pub struct MqttConnector {
    router: TopicRouter,
    bus: Option<EventBus>,
}

impl MqttConnector {
    pub fn new(router: TopicRouter) -> Self {
        Self { router, bus: None }
    }

    /// Mirror inbound messages onto `bus`.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }
}

impl MessagingConnector for MqttConnector {
    /// Must be called from within a Tokio runtime: the event loop is spawned
    /// onto the current runtime.
    fn connect(&self, config: MessagingConfig) -> Result<Arc<dyn MessagingClient>, RafaError> {
        let (host, port) = parse_broker_address(&config.broker_address)?;
        if config.client_id.trim().is_empty() {
            return Err(RafaError::Config("messaging client id must not be empty".into()));
        }

        let mut options = MqttOptions::new(config.client_id.clone(), host.clone(), port);
        options.set_keep_alive(config.keep_alive);
        // Persistent session: the broker keeps our subscriptions across drops.
        options.set_clean_session(false);
        if let Some(credentials) = &config.credentials {
            options.set_credentials(credentials.username.clone(), credentials.password.clone());
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        info!(%host, port, client_id = %config.client_id, "opening messaging session");
        let task = tokio::spawn(drive_event_loop(
            event_loop,
            client.clone(),
            Arc::clone(&connected),
            config.topics.clone(),
            self.router.clone(),
            self.bus.clone(),
        ));

        Ok(Arc::new(MqttMessaging {
            client,
            connected,
            task,
        }))
    }
}

/// A `rumqttc` session plus the task polling its event loop.
pub struct MqttMessaging {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

#[async_trait]
impl MessagingClient for MqttMessaging {
    async fn publish(&self, topic: &str, payload: &str) {
        if !self.is_connected() {
            warn!(topic, "not connected to broker; dropping outbound message");
            return;
        }
        if let Err(e) = self
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .await
        {
            warn!(topic, error = %e, "publish failed");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        if self.is_connected()
            && let Err(e) = self.client.disconnect().await
        {
            warn!(error = %e, "broker disconnect failed");
        }
        self.connected.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}

async fn drive_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    topics: Vec<String>,
    router: TopicRouter,
    bus: Option<EventBus>,
) {
    loop {
        match event_loop.poll().await {
            Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::SeqCst);
                info!("messaging session established");
                for topic in &topics {
                    // try_subscribe: awaiting here would stall the loop that
                    // drains the request channel.
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        warn!(%topic, error = %e, "subscribe failed");
                    }
                }
            }
            Ok(MqttEvent::Incoming(Packet::Publish(message))) => {
                let payload = String::from_utf8_lossy(&message.payload).into_owned();
                debug!(topic = %message.topic, %payload, "inbound message");
                if !router.route(&message.topic, &payload) {
                    debug!(topic = %message.topic, "no handler for topic");
                }
                if let Some(bus) = &bus {
                    let _ = bus.publish(Event::new(
                        "rafa-middleware::messaging",
                        EventPayload::InboundMessage {
                            topic: message.topic.clone(),
                            payload,
                        },
                    ));
                }
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::SeqCst) {
                    warn!(error = %e, "messaging connection lost");
                } else {
                    debug!(error = %e, "messaging connection attempt failed");
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn parse_tcp_address_with_port() {
        let (host, port) = parse_broker_address("tcp://10.14.0.182:1883").unwrap();
        assert_eq!(host, "10.14.0.182");
        assert_eq!(port, 1883);
    }

    #[test]
    fn parse_bare_host_uses_default_port() {
        let (host, port) = parse_broker_address("broker.local").unwrap();
        assert_eq!(host, "broker.local");
        assert_eq!(port, DEFAULT_BROKER_PORT);
    }

    #[test]
    fn parse_rejects_unsupported_scheme_and_bad_port() {
        assert!(matches!(
            parse_broker_address("ssl://broker:8883"),
            Err(RafaError::Config(_))
        ));
        assert!(matches!(
            parse_broker_address("tcp://broker:notaport"),
            Err(RafaError::Config(_))
        ));
        assert!(matches!(parse_broker_address("tcp://:1883"), Err(RafaError::Config(_))));
    }

    #[test]
    fn router_invokes_only_matching_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pedro = Arc::clone(&seen);
        let intec = Arc::clone(&seen);
        let router = TopicRouter::new()
            .with_handler("test/pedro", move |m| pedro.lock().unwrap().push(format!("pedro:{m}")))
            .with_handler("test/intec", move |m| intec.lock().unwrap().push(format!("intec:{m}")));

        assert!(router.route("test/intec", "hola"));
        assert!(!router.route("test/otro", "nadie"));
        assert_eq!(*seen.lock().unwrap(), vec!["intec:hola"]);
        assert_eq!(router.topics(), vec!["test/intec", "test/pedro"]);
    }

    #[test]
    fn blank_username_means_anonymous() {
        let cfg = MessagingConfig::new("tcp://host:1883", "Robot").with_credentials("  ", "pw");
        assert!(cfg.credentials.is_none());
        let cfg = cfg.with_credentials("intecfull", "secret");
        assert_eq!(cfg.credentials.as_ref().map(|c| c.username.as_str()), Some("intecfull"));
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "intecfull".into(),
            password: "intecfullpassword".into(),
        };
        let debug = format!("{creds:?}");
        assert!(!debug.contains("intecfullpassword"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn default_topics_used_when_none_given() {
        let cfg = MessagingConfig::new("tcp://host", "Robot").with_topics(Vec::new());
        assert_eq!(cfg.topics, vec!["test/pedro", "test/intec"]);
    }

    #[tokio::test]
    async fn connector_rejects_empty_client_id() {
        let connector = MqttConnector::new(TopicRouter::new());
        let result = connector.connect(MessagingConfig::new("tcp://127.0.0.1:1883", " "));
        assert!(matches!(result, Err(RafaError::Config(_))));
    }
}
