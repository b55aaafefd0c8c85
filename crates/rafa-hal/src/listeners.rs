//! [`ListenerRegistry`] – platform event translation.
//!
//! The registry is the single [`PlatformListener`] installed on the
//! platform.  It keeps one logical listener per [`ListenerKind`], each with
//! the state machine `Unregistered → Registered → Unregistered`, translates
//! raw [`PlatformEvent`]s into [`RobotEvent`]s and forwards them to its
//! [`RobotEventSink`].
//!
//! # Translation
//!
//! | Platform event | Kind | Robot event |
//! |---|---|---|
//! | status `NAVIGATION_AVOID_START` | Navigation | `RouteBlocked` |
//! | status `NAVIGATION_AVOID_END` | Navigation | `ObstacleCleared` |
//! | status `NAVIGATION_START` | Navigation | `NavigationStarted` |
//! | person list changed | Person | `PersonsChanged` |
//! | speech partial / final | Speech | `Speech` |
//! | motion / head result | CommandAck | `CommandAcknowledged` |
//! | api connected / disabled / disconnected | – | `Connection` |
//! | place list | – | `PlacesLoaded` |
//! | malformed place list | – | `PlaceListRejected` |
//!
//! Events of a kind that is currently unregistered are dropped.  Diagnostic
//! statuses, unknown codes and other malformed payloads are logged and
//! dropped.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, Weak};

use rafa_types::{CommandFamily, NavigationEvent, Place, RobotEvent, SpeechEvent};
use tracing::{debug, error, warn};

use crate::platform::{PlatformEvent, PlatformListener, status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Navigation,
    Person,
    Speech,
    CommandAck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerState {
    #[default]
    Unregistered,
    Registered,
}

/// Consumer of translated events.  Called on the platform's thread.
pub trait RobotEventSink: Send + Sync {
    fn on_robot_event(&self, event: RobotEvent);
}

/// A translated event and the listener kind gating it (`None`: always delivered).
#[derive(Debug, Clone, PartialEq)]
pub struct Translated {
    pub kind: Option<ListenerKind>,
    pub event: RobotEvent,
}

impl Translated {
    fn gated(kind: ListenerKind, event: RobotEvent) -> Option<Self> {
        Some(Self {
            kind: Some(kind),
            event,
        })
    }

    fn always(event: RobotEvent) -> Option<Self> {
        Some(Self { kind: None, event })
    }
}

pub struct ListenerRegistry {
    // Weak: the sink (orchestrator) owns the registry.
    sink: Weak<dyn RobotEventSink>,
    states: Mutex<HashMap<ListenerKind, ListenerState>>,
}

impl ListenerRegistry {
    pub fn new(sink: Weak<dyn RobotEventSink>) -> Self {
        Self {
            sink,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Mark `kind` registered.  Returns `false` if it already was.
    pub fn register(&self, kind: ListenerKind) -> bool {
        let previous = self.lock().insert(kind, ListenerState::Registered);
        previous != Some(ListenerState::Registered)
    }

    /// Mark `kind` unregistered.  Returns `false` if it already was.
    pub fn unregister(&self, kind: ListenerKind) -> bool {
        let previous = self.lock().insert(kind, ListenerState::Unregistered);
        previous == Some(ListenerState::Registered)
    }

    pub fn state(&self, kind: ListenerKind) -> ListenerState {
        self.lock().get(&kind).copied().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ListenerKind, ListenerState>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PlatformListener for ListenerRegistry {
    fn on_event(&self, event: PlatformEvent) {
        let Some(translated) = translate(event) else {
            return;
        };
        if let Some(kind) = translated.kind
            && self.state(kind) != ListenerState::Registered
        {
            debug!(?kind, "listener not registered; dropping event");
            return;
        }
        match self.sink.upgrade() {
            Some(sink) => sink.on_robot_event(translated.event),
            None => debug!("event sink gone; dropping event"),
        }
    }
}

/// Translate one platform event.  `None` means logged and dropped.
pub fn translate(event: PlatformEvent) -> Option<Translated> {
    match event {
        PlatformEvent::Api(state) => Translated::always(RobotEvent::Connection(state)),

        PlatformEvent::ActionStatus { code, data } => {
            let navigation = match code {
                status::NAVIGATION_AVOID_START => NavigationEvent::RouteBlocked,
                status::NAVIGATION_AVOID_END => NavigationEvent::ObstacleCleared,
                status::NAVIGATION_START => NavigationEvent::NavigationStarted,
                status::TRACK_TARGET_SUCCEEDED => {
                    debug!(%data, "target tracking succeeded");
                    return None;
                }
                status::GUEST_APPEAR => {
                    debug!(%data, "guest appeared");
                    return None;
                }
                status::GUEST_LOST => {
                    debug!(%data, "guest lost");
                    return None;
                }
                status::GUEST_FAR_AWAY => {
                    debug!(%data, "guest far away");
                    return None;
                }
                other => {
                    debug!(code = other, %data, "unhandled action status");
                    return None;
                }
            };
            Translated::gated(ListenerKind::Navigation, RobotEvent::Navigation(navigation))
        }

        PlatformEvent::ActionError { code, message } => {
            warn!(code, %message, "platform action error");
            None
        }

        PlatformEvent::CommandResult {
            family,
            result,
            message,
        } => {
            let succeeded = match family {
                CommandFamily::Motion => message == status::MOTION_RESULT_SUCCEED,
                CommandFamily::Head => match head_status(&message) {
                    Some(s) => s == status::HEAD_STATUS_OK,
                    None => {
                        error!(result, %message, "unparseable head acknowledgement");
                        return None;
                    }
                },
            };
            debug!(?family, result, succeeded, "command acknowledged");
            Translated::gated(
                ListenerKind::CommandAck,
                RobotEvent::CommandAcknowledged { family, succeeded },
            )
        }

        PlatformEvent::PlaceList { payload } => match parse_places(&payload) {
            Ok(places) => Translated::always(RobotEvent::PlacesLoaded(places)),
            Err(e) => {
                error!(error = %e, "unparseable place list");
                Translated::always(RobotEvent::PlaceListRejected)
            }
        },

        PlatformEvent::PersonChanged(persons) => {
            Translated::gated(ListenerKind::Person, RobotEvent::PersonsChanged(persons))
        }

        PlatformEvent::SpeechPartial(text) => Translated::gated(
            ListenerKind::Speech,
            RobotEvent::Speech(SpeechEvent::Partial(text)),
        ),

        PlatformEvent::SpeechFinal(text) => Translated::gated(
            ListenerKind::Speech,
            RobotEvent::Speech(SpeechEvent::Final(text)),
        ),
    }
}

/// Parse the place-list payload: a JSON array of `{name, x, y, theta}`.
pub fn parse_places(payload: &str) -> Result<Vec<Place>, serde_json::Error> {
    serde_json::from_str(payload)
}

fn head_status(message: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(message).ok()?;
    value.get("status")?.as_str().map(str::to_string)
}
