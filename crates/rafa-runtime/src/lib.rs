//! `rafa-runtime` – robot orchestration and UI-facing state.
//!
//! # Modules
//!
//! - [`orchestrator`] – [`RobotOrchestrator`][orchestrator::RobotOrchestrator]:
//!   owns the platform connection, the place cache and the navigation /
//!   person / speech fan-out, and exposes the one-shot command surface.
//! - [`routine`] – [`Routine`][routine::Routine] scripts (timed sequences of
//!   robot commands) and the single-flight
//!   [`RoutineRunner`][routine::RoutineRunner].
//! - [`triggers`] – wake-phrase matching on final speech results.
//! - [`presentation`] – [`PresentationState`][presentation::PresentationState]
//!   and the UI loop that is its only writer.
//! - [`chat`] – [`ConversationClient`][chat::ConversationClient] and the
//!   OpenAI chat-completions implementation.
//! - [`preferences`] – [`PreferenceStore`][preferences::PreferenceStore]
//!   keys, defaults and an in-memory store.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP span exporter.

pub mod chat;
pub mod orchestrator;
pub mod preferences;
pub mod presentation;
pub mod routine;
pub mod telemetry;
pub mod triggers;

pub use chat::{ChatError, ConversationClient, GENERIC_ERROR_REPLY, OpenAiChatClient};
pub use orchestrator::RobotOrchestrator;
pub use preferences::{MemoryPreferences, PrefKey, PreferenceStore};
pub use presentation::{
    MessagingSettings, PresentationDeps, PresentationState, ScreenState, UiMessage, UserAction,
    run_ui_loop,
};
pub use routine::{Routine, RoutineOutcome, RoutineRunner, RoutineStep, RoutineTarget};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use triggers::TriggerTable;
