//! The robot platform API as seen by Rafa.
//!
//! The vendor platform is asynchronous and callback based: every call returns
//! immediately and its outcome (if any) arrives later through the single
//! [`PlatformListener`] installed by [`RobotPlatform::connect`].  Listener
//! callbacks run on threads owned by the platform.

use std::sync::Arc;

use rafa_types::{CommandFamily, ConnectionState, Person, RafaError};

/// Numeric status codes reported through [`PlatformEvent::ActionStatus`].
pub mod status {
    pub const NAVIGATION_AVOID_START: i32 = 1018;
    pub const NAVIGATION_AVOID_END: i32 = 1019;
    pub const NAVIGATION_START: i32 = 1014;
    pub const TRACK_TARGET_SUCCEEDED: i32 = 1006;
    pub const GUEST_APPEAR: i32 = 1004;
    pub const GUEST_LOST: i32 = 1002;
    pub const GUEST_FAR_AWAY: i32 = 1003;

    /// `status` value of a successful head command acknowledgement.
    pub const HEAD_STATUS_OK: &str = "ok";

    /// `message` of a successful motion command acknowledgement.
    pub const MOTION_RESULT_SUCCEED: &str = "succeed";
}

/// Raw events delivered by the platform.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    /// Outcome of the connection handshake, or a later connection change.
    Api(ConnectionState),
    /// Status update of a long-running action (navigation, focus follow).
    ActionStatus { code: i32, data: String },
    /// Error reported by a long-running action.
    ActionError { code: i32, message: String },
    /// Shared acknowledgement of a motion or head command.
    CommandResult {
        family: CommandFamily,
        result: i32,
        message: String,
    },
    /// Bulk reply to a place-list request: a JSON array of places.
    PlaceList { payload: String },
    PersonChanged(Vec<Person>),
    SpeechPartial(String),
    SpeechFinal(String),
}

/// Receiver of every [`PlatformEvent`].  Must not block.
pub trait PlatformListener: Send + Sync {
    fn on_event(&self, event: PlatformEvent);
}

/// Calls accepted by the robot platform.
///
/// All calls are fire-and-forget: `Ok(())` means the platform accepted the
/// request, not that it was carried out.
pub trait RobotPlatform: Send + Sync {
    /// Install `listener` and begin the connection handshake.
    fn connect(&self, listener: Arc<dyn PlatformListener>) -> Result<(), RafaError>;

    fn go_forward(&self, speed: f32, distance: Option<f32>) -> Result<(), RafaError>;
    fn go_backward(&self, speed: f32) -> Result<(), RafaError>;
    fn turn_left(&self, speed: f32) -> Result<(), RafaError>;
    fn turn_right(&self, speed: f32) -> Result<(), RafaError>;
    fn stop_move(&self) -> Result<(), RafaError>;

    /// Absolute head position.
    fn move_head(&self, pan: i32, tilt: i32) -> Result<(), RafaError>;
    fn reset_head(&self) -> Result<(), RafaError>;

    fn start_navigation(
        &self,
        destination: &str,
        coordinate_deviation: f64,
        timeout_ms: u64,
    ) -> Result<(), RafaError>;

    fn start_focus_follow(
        &self,
        person_id: i32,
        lost_timeout_secs: u64,
        max_distance: f32,
    ) -> Result<(), RafaError>;
    fn stop_focus_follow(&self) -> Result<(), RafaError>;

    fn request_place_list(&self) -> Result<(), RafaError>;

    fn play_text(&self, text: &str) -> Result<(), RafaError>;

    fn set_recognize_mode(&self, continuous: bool) -> Result<(), RafaError>;
    fn set_recognizable(&self, enabled: bool) -> Result<(), RafaError>;

    fn register_person_listener(&self) -> Result<(), RafaError>;
    fn unregister_person_listener(&self) -> Result<(), RafaError>;
}
