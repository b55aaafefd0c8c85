//! Robot platform abstraction for Rafa.
//!
//! | Module | Role |
//! |---|---|
//! | [`platform`] | The callback-based platform API ([`RobotPlatform`]) and its raw event vocabulary |
//! | [`gateway`] | [`HardwareGateway`] – robot commands → platform calls |
//! | [`listeners`] | [`ListenerRegistry`] – platform events → [`RobotEvent`](rafa_types::RobotEvent)s |
//! | [`sim`] | [`SimPlatform`] – in-process platform for tests and the CLI |

pub mod gateway;
pub mod listeners;
pub mod platform;
pub mod sim;

pub use gateway::HardwareGateway;
pub use listeners::{ListenerKind, ListenerRegistry, ListenerState, RobotEventSink};
pub use platform::{PlatformEvent, PlatformListener, RobotPlatform};
pub use sim::{SimCall, SimPlatform};
