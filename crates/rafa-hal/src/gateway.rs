//! [`HardwareGateway`] – robot command dispatcher.
//!
//! The gateway owns the platform handle and translates the fixed
//! [`RobotCommand`] vocabulary into [`RobotPlatform`] calls.
//!
//! Two surfaces share one implementation:
//!
//! * [`HardwareGateway::dispatch`] returns the platform error to callers that
//!   need to observe it (scripted routines).
//! * The named fire-and-forget methods (`move_forward`, `speak`, …) log a
//!   failed call and carry on.
//!
//! Outcomes arrive later as platform events; nothing here waits for them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rafa_types::{RafaError, RobotCommand};
use tracing::{debug, info, warn};

use crate::listeners::{ListenerKind, ListenerRegistry};
use crate::platform::{PlatformListener, RobotPlatform};

// ────────────────────────────────────────────────────────────────────────────
// Motion profile
// ────────────────────────────────────────────────────────────────────────────

pub const LINEAR_SPEED: f32 = 0.3;
pub const FORWARD_DISTANCE: f32 = 2.0;
pub const HEAD_PAN: i32 = 50;
pub const HEAD_TILT_UP: i32 = 10;
pub const HEAD_TILT_DOWN: i32 = 80;
pub const NAVIGATION_COORDINATE_DEVIATION: f64 = 0.12345;
pub const NAVIGATION_TIMEOUT_MS: u64 = 100_000;
pub const FOLLOW_LOST_TIMEOUT_SECS: u64 = 10;
pub const FOLLOW_MAX_DISTANCE: f32 = 100.0;

pub fn forward() -> RobotCommand {
    RobotCommand::MoveForward {
        speed: LINEAR_SPEED,
        distance: Some(FORWARD_DISTANCE),
    }
}

pub fn backward() -> RobotCommand {
    RobotCommand::MoveBackward { speed: LINEAR_SPEED }
}

pub fn left() -> RobotCommand {
    RobotCommand::TurnLeft { speed: LINEAR_SPEED }
}

pub fn right() -> RobotCommand {
    RobotCommand::TurnRight { speed: LINEAR_SPEED }
}

pub fn head_up() -> RobotCommand {
    RobotCommand::MoveHead {
        pan: HEAD_PAN,
        tilt: HEAD_TILT_UP,
    }
}

pub fn head_down() -> RobotCommand {
    RobotCommand::MoveHead {
        pan: HEAD_PAN,
        tilt: HEAD_TILT_DOWN,
    }
}

pub fn navigate_to(destination: impl Into<String>) -> RobotCommand {
    RobotCommand::StartNavigation {
        destination: destination.into(),
        timeout_ms: NAVIGATION_TIMEOUT_MS,
    }
}

pub fn speak(text: impl Into<String>) -> RobotCommand {
    RobotCommand::Speak { text: text.into() }
}

// ────────────────────────────────────────────────────────────────────────────
// Gateway
// ────────────────────────────────────────────────────────────────────────────

/// Created once per process and shared by reference.
pub struct HardwareGateway {
    platform: Arc<dyn RobotPlatform>,
    initiated: AtomicBool,
}

impl HardwareGateway {
    pub fn new(platform: Arc<dyn RobotPlatform>) -> Self {
        Self {
            platform,
            initiated: AtomicBool::new(false),
        }
    }

    /// Install `registry` on the platform and start the handshake.
    ///
    /// Idempotent: once initiated, later calls return `Ok(())` without
    /// touching the platform.  A failed attempt resets the flag so a later
    /// explicit call may try again.  The connection outcome arrives as a
    /// [`RobotEvent::Connection`](rafa_types::RobotEvent::Connection) event.
    pub fn connect(&self, registry: Arc<ListenerRegistry>) -> Result<(), RafaError> {
        if self.initiated.swap(true, Ordering::SeqCst) {
            debug!("platform connection already initiated");
            return Ok(());
        }
        registry.register(ListenerKind::Navigation);
        registry.register(ListenerKind::CommandAck);

        let listener: Arc<dyn PlatformListener> = registry.clone();
        match self.platform.connect(listener) {
            Ok(()) => {
                info!("platform connection initiated");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "platform connection failed");
                registry.unregister(ListenerKind::Navigation);
                registry.unregister(ListenerKind::CommandAck);
                self.initiated.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    pub fn is_initiated(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    /// Forward `command` to the platform, returning its error.
    pub fn dispatch(&self, command: &RobotCommand) -> Result<(), RafaError> {
        debug!(command = command.name(), "dispatching");
        let p = &self.platform;
        match command {
            RobotCommand::MoveForward { speed, distance } => p.go_forward(*speed, *distance),
            RobotCommand::MoveBackward { speed } => p.go_backward(*speed),
            RobotCommand::TurnLeft { speed } => p.turn_left(*speed),
            RobotCommand::TurnRight { speed } => p.turn_right(*speed),
            RobotCommand::StopMove => p.stop_move(),
            RobotCommand::MoveHead { pan, tilt } => p.move_head(*pan, *tilt),
            RobotCommand::ResetHead => p.reset_head(),
            RobotCommand::StartNavigation {
                destination,
                timeout_ms,
            } => p.start_navigation(destination, NAVIGATION_COORDINATE_DEVIATION, *timeout_ms),
            RobotCommand::StartFocusFollow { person_id } => {
                p.start_focus_follow(*person_id, FOLLOW_LOST_TIMEOUT_SECS, FOLLOW_MAX_DISTANCE)
            }
            RobotCommand::StopFocusFollow => p.stop_focus_follow(),
            RobotCommand::Speak { text } => p.play_text(text),
            RobotCommand::RequestPlaces => p.request_place_list(),
            RobotCommand::StartRecognition => {
                p.set_recognize_mode(true)?;
                p.set_recognizable(true)
            }
            RobotCommand::StopRecognition => p.set_recognizable(false),
        }
    }

    // ── fire-and-forget surface ──────────────────────────────────────────

    pub fn move_forward(&self) {
        self.fire(forward());
    }

    pub fn move_backward(&self) {
        self.fire(backward());
    }

    pub fn turn_left(&self) {
        self.fire(left());
    }

    pub fn turn_right(&self) {
        self.fire(right());
    }

    pub fn stop_move(&self) {
        self.fire(RobotCommand::StopMove);
    }

    pub fn head_up(&self) {
        self.fire(head_up());
    }

    pub fn head_down(&self) {
        self.fire(head_down());
    }

    pub fn reset_head(&self) {
        self.fire(RobotCommand::ResetHead);
    }

    pub fn start_navigation(&self, destination: &str) {
        self.fire(navigate_to(destination));
    }

    pub fn start_focus_follow(&self, person_id: i32) {
        self.fire(RobotCommand::StartFocusFollow { person_id });
    }

    pub fn stop_focus_follow(&self) {
        self.fire(RobotCommand::StopFocusFollow);
    }

    pub fn speak(&self, text: &str) {
        self.fire(speak(text));
    }

    pub fn request_places(&self) {
        self.fire(RobotCommand::RequestPlaces);
    }

    pub fn start_recognition(&self) {
        self.fire(RobotCommand::StartRecognition);
    }

    pub fn stop_recognition(&self) {
        self.fire(RobotCommand::StopRecognition);
    }

    pub fn register_person_listener(&self) {
        if let Err(e) = self.platform.register_person_listener() {
            warn!(error = %e, "person listener registration failed");
        }
    }

    pub fn unregister_person_listener(&self) {
        if let Err(e) = self.platform.unregister_person_listener() {
            warn!(error = %e, "person listener removal failed");
        }
    }

    fn fire(&self, command: RobotCommand) {
        if let Err(e) = self.dispatch(&command) {
            warn!(command = command.name(), error = %e, "platform command failed");
        }
    }
}
