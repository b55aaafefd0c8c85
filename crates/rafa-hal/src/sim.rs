//! In-process robot platform for tests and headless runs.
//!
//! [`SimPlatform`] records every call it receives and answers the way the
//! real platform does: connection acknowledgements, motion/head results,
//! navigation status and place lists are delivered synchronously to the
//! installed [`PlatformListener`], on the calling thread.  No lock is held
//! while the listener runs, so the listener may call straight back into the
//! platform.
//!
//! Test helpers inject the events a person or the environment would cause:
//! [`SimPlatform::hear`], [`SimPlatform::set_persons`],
//! [`SimPlatform::status`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rafa_hal::sim::{SimCall, SimPlatform};
//! use rafa_hal::platform::RobotPlatform;
//!
//! let sim = Arc::new(SimPlatform::new());
//! sim.stop_move().unwrap();
//! assert_eq!(sim.calls(), vec![SimCall::StopMove]);
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rafa_types::{CommandFamily, ConnectionState, Person, Place, RafaError};
use tracing::debug;

use crate::platform::{PlatformEvent, PlatformListener, RobotPlatform, status};

/// One call received by the simulated platform.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    Connect,
    GoForward { speed: f32, distance: Option<f32> },
    GoBackward { speed: f32 },
    TurnLeft { speed: f32 },
    TurnRight { speed: f32 },
    StopMove,
    MoveHead { pan: i32, tilt: i32 },
    ResetHead,
    StartNavigation {
        destination: String,
        coordinate_deviation: f64,
        timeout_ms: u64,
    },
    StartFocusFollow {
        person_id: i32,
        lost_timeout_secs: u64,
        max_distance: f32,
    },
    StopFocusFollow,
    RequestPlaceList,
    PlayText(String),
    SetRecognizeMode(bool),
    SetRecognizable(bool),
    RegisterPersonListener,
    UnregisterPersonListener,
}

impl SimCall {
    /// The platform method name, as accepted by [`SimPlatform::fail_on`].
    pub fn name(&self) -> &'static str {
        match self {
            SimCall::Connect => "connect",
            SimCall::GoForward { .. } => "go_forward",
            SimCall::GoBackward { .. } => "go_backward",
            SimCall::TurnLeft { .. } => "turn_left",
            SimCall::TurnRight { .. } => "turn_right",
            SimCall::StopMove => "stop_move",
            SimCall::MoveHead { .. } => "move_head",
            SimCall::ResetHead => "reset_head",
            SimCall::StartNavigation { .. } => "start_navigation",
            SimCall::StartFocusFollow { .. } => "start_focus_follow",
            SimCall::StopFocusFollow => "stop_focus_follow",
            SimCall::RequestPlaceList => "request_place_list",
            SimCall::PlayText(_) => "play_text",
            SimCall::SetRecognizeMode(_) => "set_recognize_mode",
            SimCall::SetRecognizable(_) => "set_recognizable",
            SimCall::RegisterPersonListener => "register_person_listener",
            SimCall::UnregisterPersonListener => "unregister_person_listener",
        }
    }
}

pub struct SimPlatform {
    listener: Mutex<Option<Arc<dyn PlatformListener>>>,
    calls: Mutex<Vec<SimCall>>,
    failures: Mutex<HashSet<String>>,
    places: Mutex<Vec<Place>>,
    persons: Mutex<Vec<Person>>,
    person_listener: AtomicBool,
    hold_place_replies: AtomicBool,
    pending_place_replies: Mutex<VecDeque<String>>,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self {
            listener: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashSet::new()),
            places: Mutex::new(Vec::new()),
            persons: Mutex::new(Vec::new()),
            person_listener: AtomicBool::new(false),
            hold_place_replies: AtomicBool::new(false),
            pending_place_replies: Mutex::new(VecDeque::new()),
        }
    }

    /// Places returned by the next place-list requests.
    pub fn with_places(self, places: Vec<Place>) -> Self {
        *lock(&self.places) = places;
        self
    }

    pub fn set_places(&self, places: Vec<Place>) {
        *lock(&self.places) = places;
    }

    // ── inspection ───────────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<SimCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Texts passed to `play_text`, oldest first.
    pub fn spoken(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                SimCall::PlayText(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// People currently in view of the simulated camera.
    pub fn persons(&self) -> Vec<Person> {
        lock(&self.persons).clone()
    }

    pub fn person_listener_registered(&self) -> bool {
        self.person_listener.load(Ordering::SeqCst)
    }

    // ── failure injection ────────────────────────────────────────────────

    /// Make every later call to the platform method `name` fail.
    pub fn fail_on(&self, name: &str) {
        lock(&self.failures).insert(name.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    // ── place replies ────────────────────────────────────────────────────

    /// While held, place-list replies are queued instead of delivered.
    pub fn hold_place_replies(&self, hold: bool) {
        self.hold_place_replies.store(hold, Ordering::SeqCst);
    }

    /// Deliver the oldest queued place-list reply.  Returns `false` if none.
    pub fn release_place_reply(&self) -> bool {
        let next = lock(&self.pending_place_replies).pop_front();
        match next {
            Some(payload) => {
                self.emit(PlatformEvent::PlaceList { payload });
                true
            }
            None => false,
        }
    }

    /// Discard the oldest queued place-list reply, as a lossy link would.
    pub fn drop_place_reply(&self) -> bool {
        lock(&self.pending_place_replies).pop_front().is_some()
    }

    // ── event injection ──────────────────────────────────────────────────

    /// Deliver `event` to the installed listener, if any.
    pub fn emit(&self, event: PlatformEvent) {
        let listener = lock(&self.listener).clone();
        match listener {
            Some(listener) => listener.on_event(event),
            None => debug!(?event, "no listener installed; event lost"),
        }
    }

    pub fn hear_partial(&self, text: &str) {
        self.emit(PlatformEvent::SpeechPartial(text.to_string()));
    }

    /// A final recognition result.
    pub fn hear(&self, text: &str) {
        self.emit(PlatformEvent::SpeechFinal(text.to_string()));
    }

    /// Update the people in view.  Reported only while the person listener
    /// is registered on the platform.
    pub fn set_persons(&self, persons: Vec<Person>) {
        *lock(&self.persons) = persons.clone();
        if self.person_listener_registered() {
            self.emit(PlatformEvent::PersonChanged(persons));
        }
    }

    /// An action status update (see [`status`]).
    pub fn status(&self, code: i32, data: &str) {
        self.emit(PlatformEvent::ActionStatus {
            code,
            data: data.to_string(),
        });
    }

    pub fn set_connection(&self, state: ConnectionState) {
        self.emit(PlatformEvent::Api(state));
    }

    fn record(&self, call: SimCall) -> Result<(), RafaError> {
        let name = call.name();
        let failing = lock(&self.failures).contains(name);
        lock(&self.calls).push(call);
        if failing {
            return Err(RafaError::Platform {
                command: name.to_string(),
                details: "simulated failure".to_string(),
            });
        }
        Ok(())
    }

    fn acknowledge(&self, family: CommandFamily) {
        let message = match family {
            CommandFamily::Motion => status::MOTION_RESULT_SUCCEED.to_string(),
            CommandFamily::Head => format!("{{\"status\":\"{}\"}}", status::HEAD_STATUS_OK),
        };
        self.emit(PlatformEvent::CommandResult {
            family,
            result: 1,
            message,
        });
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl RobotPlatform for SimPlatform {
    fn connect(&self, listener: Arc<dyn PlatformListener>) -> Result<(), RafaError> {
        self.record(SimCall::Connect)?;
        *lock(&self.listener) = Some(listener);
        self.emit(PlatformEvent::Api(ConnectionState::Connected));
        Ok(())
    }

    fn go_forward(&self, speed: f32, distance: Option<f32>) -> Result<(), RafaError> {
        self.record(SimCall::GoForward { speed, distance })?;
        self.acknowledge(CommandFamily::Motion);
        Ok(())
    }

    fn go_backward(&self, speed: f32) -> Result<(), RafaError> {
        self.record(SimCall::GoBackward { speed })?;
        self.acknowledge(CommandFamily::Motion);
        Ok(())
    }

    fn turn_left(&self, speed: f32) -> Result<(), RafaError> {
        self.record(SimCall::TurnLeft { speed })?;
        self.acknowledge(CommandFamily::Motion);
        Ok(())
    }

    fn turn_right(&self, speed: f32) -> Result<(), RafaError> {
        self.record(SimCall::TurnRight { speed })?;
        self.acknowledge(CommandFamily::Motion);
        Ok(())
    }

    fn stop_move(&self) -> Result<(), RafaError> {
        self.record(SimCall::StopMove)?;
        self.acknowledge(CommandFamily::Motion);
        Ok(())
    }

    fn move_head(&self, pan: i32, tilt: i32) -> Result<(), RafaError> {
        self.record(SimCall::MoveHead { pan, tilt })?;
        self.acknowledge(CommandFamily::Head);
        Ok(())
    }

    fn reset_head(&self) -> Result<(), RafaError> {
        self.record(SimCall::ResetHead)?;
        self.acknowledge(CommandFamily::Head);
        Ok(())
    }

    fn start_navigation(
        &self,
        destination: &str,
        coordinate_deviation: f64,
        timeout_ms: u64,
    ) -> Result<(), RafaError> {
        self.record(SimCall::StartNavigation {
            destination: destination.to_string(),
            coordinate_deviation,
            timeout_ms,
        })?;
        self.status(status::NAVIGATION_START, destination);
        Ok(())
    }

    fn start_focus_follow(
        &self,
        person_id: i32,
        lost_timeout_secs: u64,
        max_distance: f32,
    ) -> Result<(), RafaError> {
        self.record(SimCall::StartFocusFollow {
            person_id,
            lost_timeout_secs,
            max_distance,
        })?;
        let visible = lock(&self.persons).iter().any(|p| p.id == person_id);
        let code = if visible {
            status::TRACK_TARGET_SUCCEEDED
        } else {
            status::GUEST_LOST
        };
        self.status(code, &person_id.to_string());
        Ok(())
    }

    fn stop_focus_follow(&self) -> Result<(), RafaError> {
        self.record(SimCall::StopFocusFollow)
    }

    fn request_place_list(&self) -> Result<(), RafaError> {
        self.record(SimCall::RequestPlaceList)?;
        let payload = serde_json::to_string(&*lock(&self.places)).map_err(|e| {
            RafaError::MalformedPayload(format!("place list serialisation: {e}"))
        })?;
        if self.hold_place_replies.load(Ordering::SeqCst) {
            lock(&self.pending_place_replies).push_back(payload);
        } else {
            self.emit(PlatformEvent::PlaceList { payload });
        }
        Ok(())
    }

    fn play_text(&self, text: &str) -> Result<(), RafaError> {
        self.record(SimCall::PlayText(text.to_string()))
    }

    fn set_recognize_mode(&self, continuous: bool) -> Result<(), RafaError> {
        self.record(SimCall::SetRecognizeMode(continuous))
    }

    fn set_recognizable(&self, enabled: bool) -> Result<(), RafaError> {
        self.record(SimCall::SetRecognizable(enabled))
    }

    fn register_person_listener(&self) -> Result<(), RafaError> {
        self.record(SimCall::RegisterPersonListener)?;
        self.person_listener.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unregister_person_listener(&self) -> Result<(), RafaError> {
        self.record(SimCall::UnregisterPersonListener)?;
        self.person_listener.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture {
        events: Mutex<Vec<PlatformEvent>>,
    }

    impl PlatformListener for Capture {
        fn on_event(&self, event: PlatformEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn connected() -> (SimPlatform, Arc<Capture>) {
        let sim = SimPlatform::new();
        let capture = Arc::new(Capture::default());
        sim.connect(capture.clone()).unwrap();
        capture.events.lock().unwrap().clear();
        (sim, capture)
    }

    #[test]
    fn connect_reports_connected() {
        let sim = SimPlatform::new();
        let capture = Arc::new(Capture::default());
        sim.connect(capture.clone()).unwrap();
        assert_eq!(
            *capture.events.lock().unwrap(),
            vec![PlatformEvent::Api(ConnectionState::Connected)]
        );
    }

    #[test]
    fn place_list_reply_carries_configured_places() {
        let (sim, capture) = connected();
        sim.set_places(vec![Place {
            name: "Biblioteca".into(),
            x: 1.0,
            y: 2.0,
            theta: 0.5,
        }]);
        sim.request_place_list().unwrap();

        let events = capture.events.lock().unwrap();
        let PlatformEvent::PlaceList { payload } = &events[0] else {
            panic!("expected a place list, got {events:?}");
        };
        assert!(payload.contains("Biblioteca"));
    }

    #[test]
    fn held_place_replies_are_released_in_order() {
        let (sim, capture) = connected();
        sim.hold_place_replies(true);
        sim.request_place_list().unwrap();
        sim.request_place_list().unwrap();
        assert!(capture.events.lock().unwrap().is_empty());

        assert!(sim.release_place_reply());
        assert!(sim.release_place_reply());
        assert!(!sim.release_place_reply());
        assert_eq!(capture.events.lock().unwrap().len(), 2);
    }

    #[test]
    fn dropped_place_reply_is_never_delivered() {
        let (sim, capture) = connected();
        sim.hold_place_replies(true);
        sim.request_place_list().unwrap();
        assert!(sim.drop_place_reply());
        assert!(!sim.drop_place_reply());
        assert!(!sim.release_place_reply());
        assert!(capture.events.lock().unwrap().is_empty());
    }

    #[test]
    fn persons_reported_only_while_listener_registered() {
        let (sim, capture) = connected();
        let people = vec![Person {
            id: 1,
            distance: 0.8,
            angle: 0.0,
        }];
        sim.set_persons(people.clone());
        assert!(capture.events.lock().unwrap().is_empty());

        sim.register_person_listener().unwrap();
        sim.set_persons(people.clone());
        assert_eq!(
            *capture.events.lock().unwrap(),
            vec![PlatformEvent::PersonChanged(people)]
        );
    }

    #[test]
    fn injected_failure_is_recorded_and_returned() {
        let sim = SimPlatform::new();
        sim.fail_on("move_head");
        assert!(sim.move_head(50, 10).is_err());
        assert_eq!(sim.calls(), vec![SimCall::MoveHead { pan: 50, tilt: 10 }]);
        assert!(sim.reset_head().is_ok());
    }

    #[test]
    fn spoken_lists_texts_in_order() {
        let sim = SimPlatform::new();
        sim.play_text("uno").unwrap();
        sim.stop_move().unwrap();
        sim.play_text("dos").unwrap();
        assert_eq!(sim.spoken(), vec!["uno", "dos"]);
    }
}
