//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  The orchestrator mirrors every translated robot event here,
//! the presentation layer publishes its notifications, and the messaging
//! client publishes inbound broker traffic.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Navigation`] | Route blocked / obstacle cleared / navigation started |
//! | [`Topic::Perception`] | Person list changes |
//! | [`Topic::Speech`] | ASR partial and final results |
//! | [`Topic::System`] | Connection state, place lists, command acknowledgements |
//! | [`Topic::Messaging`] | Messages received from the broker |
//! | [`Topic::Notifications`] | User-facing notifications (routine failures, …) |

use rafa_types::{Event, EventPayload, RafaError, RobotEvent};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Navigation,
    Perception,
    Speech,
    System,
    Messaging,
    Notifications,
}

impl Topic {
    /// The lane a payload belongs on.
    pub fn for_payload(payload: &EventPayload) -> Topic {
        match payload {
            EventPayload::Robot(RobotEvent::Navigation(_)) => Topic::Navigation,
            EventPayload::Robot(RobotEvent::PersonsChanged(_)) => Topic::Perception,
            EventPayload::Robot(RobotEvent::Speech(_)) => Topic::Speech,
            EventPayload::Robot(_) => Topic::System,
            EventPayload::InboundMessage { .. } => Topic::Messaging,
            EventPayload::Notification { .. } => Topic::Notifications,
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    navigation: broadcast::Sender<Event>,
    perception: broadcast::Sender<Event>,
    speech: broadcast::Sender<Event>,
    system: broadcast::Sender<Event>,
    messaging: broadcast::Sender<Event>,
    notifications: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (navigation, _) = broadcast::channel(capacity);
        let (perception, _) = broadcast::channel(capacity);
        let (speech, _) = broadcast::channel(capacity);
        let (system, _) = broadcast::channel(capacity);
        let (messaging, _) = broadcast::channel(capacity);
        let (notifications, _) = broadcast::channel(capacity);
        Self {
            navigation,
            perception,
            speech,
            system,
            messaging,
            notifications,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`RafaError::Channel`] when nobody is listening on the topic.  Callers
    /// that only mirror traffic for observability ignore that error.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, RafaError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| RafaError::Channel(format!("No subscribers for topic {:?}", topic)))
    }

    /// Publish `event` on the lane derived from its payload.
    pub fn publish(&self, event: Event) -> Result<usize, RafaError> {
        let topic = Topic::for_payload(&event.payload);
        self.publish_to(topic, event)
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Navigation => &self.navigation,
            Topic::Perception => &self.perception,
            Topic::Speech => &self.speech,
            Topic::System => &self.system,
            Topic::Messaging => &self.messaging,
            Topic::Notifications => &self.notifications,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant used by the REPL between prompts.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rafa_types::{NavigationEvent, NotificationLevel, SpeechEvent};

    fn navigation_event() -> Event {
        Event::new(
            "rafa-middleware::test",
            EventPayload::Robot(RobotEvent::Navigation(NavigationEvent::RouteBlocked)),
        )
    }

    #[test]
    fn payloads_route_to_their_lane() {
        let speech = EventPayload::Robot(RobotEvent::Speech(SpeechEvent::Final("hola".into())));
        assert_eq!(Topic::for_payload(&speech), Topic::Speech);

        let note = EventPayload::Notification {
            level: NotificationLevel::Failure,
            message: "x".into(),
        };
        assert_eq!(Topic::for_payload(&note), Topic::Notifications);

        let inbound = EventPayload::InboundMessage {
            topic: "test/intec".into(),
            payload: "hi".into(),
        };
        assert_eq!(Topic::for_payload(&inbound), Topic::Messaging);
    }

    #[test]
    fn publish_without_subscribers_returns_error() {
        let bus = EventBus::default();
        assert!(bus.publish(navigation_event()).is_err());
    }

    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut first = bus.subscribe_to(Topic::Navigation);
        let mut second = bus.subscribe_to(Topic::Navigation);

        let event = navigation_event();
        bus.publish(event.clone())?;

        assert_eq!(first.recv().await?.id, event.id);
        assert_eq!(second.recv().await?.id, event.id);
        Ok(())
    }

    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut notifications = bus.subscribe_to(Topic::Notifications);
        let _navigation = bus.subscribe_to(Topic::Navigation);

        bus.publish(navigation_event())?;

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            notifications.recv(),
        )
        .await;
        assert!(result.is_err(), "Notifications subscriber must not see navigation traffic");
        assert_eq!(notifications.topic(), Topic::Notifications);
        Ok(())
    }

    #[tokio::test]
    async fn slow_subscriber_reports_lag() {
        let bus = EventBus::new(16);
        let mut slow = bus.subscribe_to(Topic::Navigation);
        for _ in 0..200 {
            let _ = bus.publish(navigation_event());
        }
        let result = slow.recv().await;
        assert!(matches!(result, Err(broadcast::error::RecvError::Lagged(_))));
    }
}
