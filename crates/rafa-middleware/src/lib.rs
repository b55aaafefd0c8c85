//! `rafa-middleware` – Event plumbing
//!
//! Moves events between the robot platform callbacks, the orchestrator, the
//! presentation layer and the outside world without caring about their
//! meaning.
//!
//! # Modules
//!
//! - [`fanout`] – ordered, synchronous subscriber sets used by the
//!   orchestrator to notify observers on the callback thread.
//! - [`bus`] – topic-based publish/subscribe bus built on Tokio broadcast
//!   channels; carries notifications and robot events to the UI surface.
//! - [`messaging`] – MQTT messaging collaborator: static topic routing,
//!   fire-and-forget publish, reconnect delegated to the client event loop.

pub mod bus;
pub mod fanout;
pub mod messaging;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use fanout::{SubscriberSet, SubscriptionId};
pub use messaging::{
    Credentials, MessagingClient, MessagingConfig, MessagingConnector, MqttConnector,
    TopicRouter,
};
