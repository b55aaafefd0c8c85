use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A named navigation target stored in the robot's map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub x: f64,
    pub y: f64,
    /// Heading in the platform's angular unit.
    pub theta: f64,
}

/// A person reported by the platform's person-detection API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: i32,
    pub distance: f32,
    pub angle: f32,
}

/// Speaker of a [`ChatTurn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One entry of the in-memory conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// The fixed command vocabulary the robot platform understands.
///
/// Every command is fire-and-forget at the platform level: the platform
/// acknowledges motion and head commands through a shared callback that is
/// not correlated back to the issuing call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload")]
pub enum RobotCommand {
    MoveForward { speed: f32, distance: Option<f32> },
    MoveBackward { speed: f32 },
    TurnLeft { speed: f32 },
    TurnRight { speed: f32 },
    StopMove,
    /// Absolute head position: `pan` is horizontal, `tilt` vertical.
    MoveHead { pan: i32, tilt: i32 },
    ResetHead,
    StartNavigation { destination: String, timeout_ms: u64 },
    StartFocusFollow { person_id: i32 },
    StopFocusFollow,
    Speak { text: String },
    RequestPlaces,
    StartRecognition,
    StopRecognition,
}

impl RobotCommand {
    /// Short, stable name used in logs and error reports.
    pub fn name(&self) -> &'static str {
        match self {
            RobotCommand::MoveForward { .. } => "move_forward",
            RobotCommand::MoveBackward { .. } => "move_backward",
            RobotCommand::TurnLeft { .. } => "turn_left",
            RobotCommand::TurnRight { .. } => "turn_right",
            RobotCommand::StopMove => "stop_move",
            RobotCommand::MoveHead { .. } => "move_head",
            RobotCommand::ResetHead => "reset_head",
            RobotCommand::StartNavigation { .. } => "start_navigation",
            RobotCommand::StartFocusFollow { .. } => "start_focus_follow",
            RobotCommand::StopFocusFollow => "stop_focus_follow",
            RobotCommand::Speak { .. } => "speak",
            RobotCommand::RequestPlaces => "request_places",
            RobotCommand::StartRecognition => "start_recognition",
            RobotCommand::StopRecognition => "stop_recognition",
        }
    }
}

/// Lifecycle of the connection to the robot platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    /// The platform refused the connection (API disabled on this device).
    Disabled,
    Disconnected,
}

/// Which acknowledgement callback a command result arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandFamily {
    Motion,
    Head,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationEvent {
    RouteBlocked,
    ObstacleCleared,
    NavigationStarted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeechEvent {
    Partial(String),
    Final(String),
}

/// Internal event vocabulary produced by the listener registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RobotEvent {
    Connection(ConnectionState),
    Navigation(NavigationEvent),
    PersonsChanged(Vec<Person>),
    Speech(SpeechEvent),
    PlacesLoaded(Vec<Place>),
    /// A place-list reply arrived but its payload could not be parsed.
    PlaceListRejected,
    CommandAcknowledged { family: CommandFamily, succeeded: bool },
}

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationLevel {
    Info,
    Failure,
}

/// Unified event wrapper for the topic bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "rafa-runtime::orchestrator"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Robot(RobotEvent),
    Notification {
        level: NotificationLevel,
        message: String,
    },
    /// A message received from the messaging broker.
    InboundMessage { topic: String, payload: String },
}

/// Error type shared by the gateway, messaging and configuration layers.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RafaError {
    #[error("Platform call {command} failed: {details}")]
    Platform { command: String, details: String },

    #[error("Robot platform is not connected")]
    NotConnected,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Messaging error: {0}")]
    Messaging(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Routine '{routine}' aborted at step {step}: {reason}")]
    RoutineAborted {
        routine: String,
        step: usize,
        reason: String,
    },

    #[error("Channel error: {0}")]
    Channel(String),
}
