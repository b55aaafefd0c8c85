//! [`RobotOrchestrator`] – the robot connection and everything hanging off it.
//!
//! One orchestrator exists per process.  It owns the [`HardwareGateway`] and
//! the [`ListenerRegistry`], receives every translated [`RobotEvent`] (on the
//! platform's callback thread) and:
//!
//! | Event | Handling |
//! |---|---|
//! | connection | record state; on `Connected` request places and run the on-connected hook |
//! | navigation | fan out to navigation subscribers, in subscription order |
//! | persons | fan out to person subscribers, in subscription order |
//! | speech | hand to the single speech listener, if installed |
//! | place list | replace the place cache and publish destination names |
//! | command ack | log only |
//!
//! Every event is also mirrored on the [`EventBus`].
//!
//! # Place cache
//!
//! Place-list replies are not correlated with requests; the platform answers
//! in request order.  The cache keeps the issue time of every request still
//! waiting for a reply.  A reply (or a rejected payload) answers the oldest
//! one, and a reply is applied only when no newer request is still waiting,
//! so a late reply to a superseded request never overwrites fresher data.
//! An applied reply replaces the cache wholesale.
//!
//! Replies can be lost.  A request expires after the reply timeout, and a
//! connection change forgets every waiting request, so a lost reply never
//! blocks later ones.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use rafa_hal::{
    HardwareGateway, ListenerKind, ListenerRegistry, ListenerState, RobotEventSink, RobotPlatform,
};
use rafa_middleware::{EventBus, SubscriberSet, SubscriptionId};
use rafa_types::{
    ConnectionState, Event, EventPayload, NavigationEvent, Person, Place, RafaError, RobotCommand,
    RobotEvent, SpeechEvent,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::routine::RoutineTarget;

const SOURCE: &str = "rafa-runtime::orchestrator";

pub type SpeechListener = Arc<dyn Fn(&SpeechEvent) + Send + Sync>;
type ConnectedHook = Arc<dyn Fn() + Send + Sync>;

/// How long a place-list request waits for its reply before it is
/// considered lost.
pub const PLACE_REPLY_TIMEOUT: Duration = Duration::from_secs(3);

struct PlaceCache {
    places: Vec<Place>,
    /// Issue times of requests still waiting for a reply, oldest first.
    waiting: VecDeque<Instant>,
    reply_timeout: Duration,
}

impl PlaceCache {
    fn new() -> Self {
        Self {
            places: Vec::new(),
            waiting: VecDeque::new(),
            reply_timeout: PLACE_REPLY_TIMEOUT,
        }
    }

    /// Consume the request a reply answers.  `true` when no newer request is
    /// still waiting, i.e. the reply is the freshest data on its way.
    fn answer(&mut self, now: Instant) -> bool {
        let timeout = self.reply_timeout;
        while let Some(issued) = self.waiting.front()
            && now.duration_since(*issued) >= timeout
        {
            self.waiting.pop_front();
        }
        self.waiting.pop_front();
        self.waiting.is_empty()
    }
}

pub struct RobotOrchestrator {
    gateway: HardwareGateway,
    registry: Arc<ListenerRegistry>,
    navigation: SubscriberSet<NavigationEvent>,
    persons: SubscriberSet<Vec<Person>>,
    speech: Mutex<Option<SpeechListener>>,
    places: Mutex<PlaceCache>,
    destinations: watch::Sender<Vec<String>>,
    connection: watch::Sender<ConnectionState>,
    tracking: AtomicBool,
    on_connected: Mutex<Option<ConnectedHook>>,
    bus: EventBus,
}

impl RobotOrchestrator {
    pub fn new(platform: Arc<dyn RobotPlatform>, bus: EventBus) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let sink: Weak<dyn RobotEventSink> = this.clone();
            Self {
                gateway: HardwareGateway::new(platform),
                registry: Arc::new(ListenerRegistry::new(sink)),
                navigation: SubscriberSet::new(),
                persons: SubscriberSet::new(),
                speech: Mutex::new(None),
                places: Mutex::new(PlaceCache::new()),
                destinations: watch::Sender::new(Vec::new()),
                connection: watch::Sender::new(ConnectionState::Disconnected),
                tracking: AtomicBool::new(false),
                on_connected: Mutex::new(None),
                bus,
            }
        })
    }

    /// Connect the gateway.  Idempotent.  A failed handshake leaves the
    /// connection state `Disabled`; nothing is retried here.
    pub fn start(&self) -> Result<(), RafaError> {
        self.gateway
            .connect(Arc::clone(&self.registry))
            .inspect_err(|_| {
                self.connection.send_replace(ConnectionState::Disabled);
            })
    }

    /// Run `hook` every time the platform reports `Connected`, after the
    /// place list has been requested.
    pub fn set_on_connected(&self, hook: impl Fn() + Send + Sync + 'static) {
        *lock(&self.on_connected) = Some(Arc::new(hook));
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    // ── subscribers ──────────────────────────────────────────────────────

    /// Handlers run on the platform's callback thread and must not block.
    pub fn subscribe_navigation(
        &self,
        handler: impl Fn(&NavigationEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.navigation.subscribe(handler)
    }

    pub fn unsubscribe_navigation(&self, id: SubscriptionId) -> bool {
        self.navigation.unsubscribe(id)
    }

    pub fn subscribe_persons(
        &self,
        handler: impl Fn(&Vec<Person>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.persons.subscribe(handler)
    }

    pub fn unsubscribe_persons(&self, id: SubscriptionId) -> bool {
        self.persons.unsubscribe(id)
    }

    /// Install (`Some`) or clear (`None`) the single speech listener.
    pub fn set_speech_listener(&self, listener: Option<SpeechListener>) {
        let installing = listener.is_some();
        *lock(&self.speech) = listener;
        if installing {
            self.registry.register(ListenerKind::Speech);
        } else {
            self.registry.unregister(ListenerKind::Speech);
        }
    }

    pub fn has_speech_listener(&self) -> bool {
        lock(&self.speech).is_some()
    }

    pub fn listener_state(&self, kind: ListenerKind) -> ListenerState {
        self.registry.state(kind)
    }

    // ── person tracking ──────────────────────────────────────────────────

    pub fn start_tracking(&self, person_id: i32) {
        if self.tracking.swap(true, Ordering::SeqCst) {
            info!(person_id, "already tracking; re-registering person listener");
        }
        self.registry.register(ListenerKind::Person);
        self.gateway.register_person_listener();
        self.gateway.start_focus_follow(person_id);
    }

    /// Not guarded: forwarded to the platform even when idle.
    pub fn stop_tracking(&self) {
        self.gateway.stop_focus_follow();
        self.registry.unregister(ListenerKind::Person);
        self.gateway.unregister_person_listener();
        self.tracking.store(false, Ordering::SeqCst);
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::SeqCst)
    }

    // ── places ───────────────────────────────────────────────────────────

    pub fn request_places(&self) {
        lock(&self.places).waiting.push_back(Instant::now());
        if let Err(e) = self.gateway.dispatch(&RobotCommand::RequestPlaces) {
            warn!(error = %e, "place list request failed");
            lock(&self.places).waiting.pop_back();
        }
    }

    /// Override [`PLACE_REPLY_TIMEOUT`].
    pub fn set_place_reply_timeout(&self, timeout: Duration) {
        lock(&self.places).reply_timeout = timeout;
    }

    pub fn places(&self) -> Vec<Place> {
        lock(&self.places).places.clone()
    }

    pub fn destination_names(&self) -> Vec<String> {
        self.destinations.borrow().clone()
    }

    pub fn watch_destinations(&self) -> watch::Receiver<Vec<String>> {
        self.destinations.subscribe()
    }

    /// Returns `false` when the reply was superseded and discarded.
    fn apply_places(&self, places: Vec<Place>) -> bool {
        let names: Vec<String> = {
            let mut cache = lock(&self.places);
            if !cache.answer(Instant::now()) {
                debug!(
                    waiting = cache.waiting.len(),
                    "discarding superseded place list"
                );
                return false;
            }
            cache.places = places;
            cache.places.iter().map(|p| p.name.clone()).collect()
        };
        info!(count = names.len(), "place cache updated");
        self.destinations.send_replace(names);
        true
    }

    // ── one-shot commands ────────────────────────────────────────────────

    pub fn go_to(&self, destination: &str) {
        self.gateway.start_navigation(destination);
    }

    pub fn speak(&self, text: &str) {
        self.gateway.speak(text);
    }

    pub fn move_forward(&self) {
        self.gateway.move_forward();
    }

    pub fn move_backward(&self) {
        self.gateway.move_backward();
    }

    pub fn turn_left(&self) {
        self.gateway.turn_left();
    }

    pub fn turn_right(&self) {
        self.gateway.turn_right();
    }

    pub fn stop_moving(&self) {
        self.gateway.stop_move();
    }

    pub fn head_up(&self) {
        self.gateway.head_up();
    }

    pub fn head_down(&self) {
        self.gateway.head_down();
    }

    pub fn reset_head(&self) {
        self.gateway.reset_head();
    }

    pub fn start_recognition(&self) {
        self.gateway.start_recognition();
    }

    pub fn stop_recognition(&self) {
        self.gateway.stop_recognition();
    }

    /// Typed path for callers that must observe a platform failure.
    pub fn execute(&self, command: &RobotCommand) -> Result<(), RafaError> {
        self.gateway.dispatch(command)
    }

    fn mirror(&self, event: RobotEvent) {
        // No subscriber on the lane is not an error here.
        let _ = self
            .bus
            .publish(Event::new(SOURCE, EventPayload::Robot(event)));
    }
}

impl RobotEventSink for RobotOrchestrator {
    fn on_robot_event(&self, event: RobotEvent) {
        match &event {
            RobotEvent::Connection(state) => {
                self.connection.send_replace(*state);
                // Requests sent before a connection change are never answered.
                lock(&self.places).waiting.clear();
                match state {
                    ConnectionState::Connected => {
                        info!("robot platform connected");
                        self.request_places();
                        let hook = lock(&self.on_connected).clone();
                        if let Some(hook) = hook {
                            hook();
                        }
                    }
                    ConnectionState::Disabled => warn!("robot platform API disabled"),
                    ConnectionState::Disconnected => warn!("robot platform disconnected"),
                }
            }
            RobotEvent::Navigation(nav) => {
                let delivered = self.navigation.dispatch(nav);
                debug!(?nav, delivered, "navigation event");
            }
            RobotEvent::PersonsChanged(persons) => {
                let delivered = self.persons.dispatch(persons);
                debug!(count = persons.len(), delivered, "persons changed");
            }
            RobotEvent::Speech(speech) => {
                let listener = lock(&self.speech).clone();
                match listener {
                    Some(listener) => listener(speech),
                    None => debug!("no speech listener installed"),
                }
            }
            RobotEvent::PlacesLoaded(places) => {
                if !self.apply_places(places.clone()) {
                    return;
                }
            }
            RobotEvent::PlaceListRejected => {
                let mut cache = lock(&self.places);
                cache.answer(Instant::now());
                warn!(waiting = cache.waiting.len(), "place list reply rejected");
            }
            RobotEvent::CommandAcknowledged { family, succeeded } => {
                debug!(?family, succeeded, "command acknowledged");
            }
        }
        self.mirror(event);
    }
}

impl RoutineTarget for RobotOrchestrator {
    fn execute(&self, command: &RobotCommand) -> Result<(), RafaError> {
        self.gateway.dispatch(command)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
