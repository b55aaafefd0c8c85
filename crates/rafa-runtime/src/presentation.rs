//! [`PresentationState`] – the UI-facing state and its single writer.
//!
//! All state mutation happens on the UI loop ([`run_ui_loop`]), a Tokio task
//! that owns the `PresentationState` by value.  Anything running elsewhere
//! (platform callbacks, chat requests, routine tasks) only posts a
//! [`UiMessage`] into the loop's channel.  Screens read the latest
//! [`ScreenState`] from a `watch` channel and send [`UserAction`]s.
//!
//! ```text
//!  UserAction ──► ┌──────────────────┐ ──► RobotOrchestrator ──► platform
//!                 │ PresentationState │                             │
//!  UiMessage  ──► └──────────────────┘ ◄── callbacks (mpsc) ◄───────┘
//!                          │
//!                          └──► watch<ScreenState>, bus notifications
//! ```
//!
//! # Chat sessions
//!
//! Every chat request remembers the session it was sent in.  Clearing the
//! transcript starts a new session, and replies from an older session are
//! dropped on arrival.

use std::fmt;
use std::sync::Arc;

use rafa_middleware::messaging::{MessagingClient, MessagingConfig, MessagingConnector};
use rafa_middleware::{EventBus, SubscriptionId};
use rafa_types::{
    ChatTurn, Event, EventPayload, NavigationEvent, NotificationLevel, Person, SpeechEvent,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::chat::{ConversationClient, GENERIC_ERROR_REPLY};
use crate::orchestrator::RobotOrchestrator;
use crate::preferences::{PrefKey, PreferenceStore};
use crate::routine::{Routine, RoutineOutcome, RoutineRunner};
use crate::triggers::TriggerTable;

const SOURCE: &str = "rafa-runtime::presentation";

pub const ROUTINE_FAILED_MESSAGE: &str = "No se pudo completar la rutina";
pub const ROUTINE_CANCELLED_MESSAGE: &str = "Rutina cancelada";
pub const SETTINGS_NOT_SAVED_MESSAGE: &str = "No se pudo guardar la configuración";

// ─────────────────────────────────────────────────────────────────────────────
// Observable state
// ─────────────────────────────────────────────────────────────────────────────

/// Broker connection settings as shown on the messaging screen.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MessagingSettings {
    pub broker_address: String,
    pub user: String,
    pub password: String,
    pub client_id: String,
}

impl MessagingSettings {
    pub fn load(prefs: &dyn PreferenceStore) -> Self {
        Self {
            broker_address: prefs.get(PrefKey::BrokerAddress),
            user: prefs.get(PrefKey::MqttUser),
            password: prefs.get(PrefKey::MqttPassword),
            client_id: prefs.get(PrefKey::MqttClientId),
        }
    }

    fn save(&self, prefs: &dyn PreferenceStore) -> Result<(), rafa_types::RafaError> {
        prefs.set(PrefKey::BrokerAddress, &self.broker_address)?;
        prefs.set(PrefKey::MqttUser, &self.user)?;
        prefs.set(PrefKey::MqttPassword, &self.password)?;
        prefs.set(PrefKey::MqttClientId, &self.client_id)
    }

    /// Broker address and client id are both required.
    pub fn is_complete(&self) -> bool {
        !self.broker_address.trim().is_empty() && !self.client_id.trim().is_empty()
    }
}

impl fmt::Debug for MessagingSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingSettings")
            .field("broker_address", &self.broker_address)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// Snapshot published to screens after every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScreenState {
    pub listening: bool,
    /// Latest speech text, partial or final.
    pub speech_text: String,
    /// Text recognised since listening started.
    pub recognized_text: String,
    pub transcript: Vec<ChatTurn>,
    pub destinations: Vec<String>,
    pub routine_running: bool,
    pub last_navigation: Option<NavigationEvent>,
    pub persons: Vec<Person>,
    pub following: bool,
    /// Outcome of the last action, cleared by the next user action.
    pub notification: Option<(NotificationLevel, String)>,
    pub messaging: MessagingSettings,
    pub messaging_started: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Inputs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    MoveForward,
    MoveBackward,
    TurnLeft,
    TurnRight,
    Stop,
    HeadUp,
    HeadDown,
    ResetHead,
    GoTo(String),
    StartFollowing(i32),
    StopFollowing,
    Speak(String),
    SendMessage(String),
    ClearMessages,
    StartListening,
    StopListening,
    ToggleListening,
    Greeting,
    GoToClass(String),
    StepBack,
    CancelRoutine,
    RefreshPlaces,
    SetChatToken(String),
    SetMessagingSettings(MessagingSettings),
    ConnectMessaging,
    PublishMessage { topic: String, payload: String },
}

/// Results marshaled onto the UI loop from other threads and tasks.
#[derive(Debug)]
pub enum UiMessage {
    Speech(SpeechEvent),
    Navigation(NavigationEvent),
    Persons(Vec<Person>),
    ChatReply { session: u64, reply: String },
    RoutineFinished { routine: String, outcome: RoutineOutcome },
    Destinations(Vec<String>),
}

// ─────────────────────────────────────────────────────────────────────────────
// PresentationState
// ─────────────────────────────────────────────────────────────────────────────

/// Collaborators injected at startup.
pub struct PresentationDeps {
    pub orchestrator: Arc<RobotOrchestrator>,
    pub chat: Arc<dyn ConversationClient>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub connector: Arc<dyn MessagingConnector>,
    pub bus: EventBus,
    pub triggers: TriggerTable,
    /// Broker topics subscribed when messaging starts.
    pub topics: Vec<String>,
}

pub struct PresentationState {
    orchestrator: Arc<RobotOrchestrator>,
    chat: Arc<dyn ConversationClient>,
    preferences: Arc<dyn PreferenceStore>,
    connector: Arc<dyn MessagingConnector>,
    messaging: Option<Arc<dyn MessagingClient>>,
    topics: Vec<String>,
    bus: EventBus,
    triggers: TriggerTable,
    routines: RoutineRunner,
    ui_tx: mpsc::UnboundedSender<UiMessage>,
    snapshot: watch::Sender<ScreenState>,
    state: ScreenState,
    session: u64,
    navigation_sub: SubscriptionId,
    persons_sub: SubscriptionId,
}

impl PresentationState {
    /// Subscribes to navigation and person events; the subscriptions are
    /// released when the state is dropped.
    pub fn new(deps: PresentationDeps) -> (Self, mpsc::UnboundedReceiver<UiMessage>) {
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();

        let tx = ui_tx.clone();
        let navigation_sub = deps.orchestrator.subscribe_navigation(move |event| {
            let _ = tx.send(UiMessage::Navigation(*event));
        });
        let tx = ui_tx.clone();
        let persons_sub = deps.orchestrator.subscribe_persons(move |persons| {
            let _ = tx.send(UiMessage::Persons(persons.clone()));
        });

        let state = ScreenState {
            destinations: deps.orchestrator.destination_names(),
            messaging: MessagingSettings::load(deps.preferences.as_ref()),
            ..ScreenState::default()
        };

        let presentation = Self {
            routines: RoutineRunner::new(deps.orchestrator.clone()),
            orchestrator: deps.orchestrator,
            chat: deps.chat,
            preferences: deps.preferences,
            connector: deps.connector,
            messaging: None,
            topics: deps.topics,
            bus: deps.bus,
            triggers: deps.triggers,
            ui_tx,
            snapshot: watch::Sender::new(state.clone()),
            state,
            session: 0,
            navigation_sub,
            persons_sub,
        };
        (presentation, ui_rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<ScreenState> {
        self.snapshot.subscribe()
    }

    pub fn state(&self) -> &ScreenState {
        &self.state
    }

    pub fn handle_action(&mut self, action: UserAction) {
        debug!(?action, "user action");
        self.state.notification = None;
        match action {
            UserAction::MoveForward => self.orchestrator.move_forward(),
            UserAction::MoveBackward => self.orchestrator.move_backward(),
            UserAction::TurnLeft => self.orchestrator.turn_left(),
            UserAction::TurnRight => self.orchestrator.turn_right(),
            UserAction::Stop => self.orchestrator.stop_moving(),
            UserAction::HeadUp => self.orchestrator.head_up(),
            UserAction::HeadDown => self.orchestrator.head_down(),
            UserAction::ResetHead => self.orchestrator.reset_head(),
            UserAction::GoTo(destination) => self.orchestrator.go_to(&destination),
            UserAction::StartFollowing(person_id) => {
                self.orchestrator.start_tracking(person_id);
                self.state.following = true;
            }
            UserAction::StopFollowing => {
                self.orchestrator.stop_tracking();
                self.state.following = false;
                self.state.persons.clear();
            }
            UserAction::Speak(text) => self.orchestrator.speak(&text),
            UserAction::SendMessage(text) => self.send_message(text),
            UserAction::ClearMessages => self.clear_messages(),
            UserAction::StartListening => self.start_listening(),
            UserAction::StopListening => self.stop_listening(),
            UserAction::ToggleListening => {
                if self.state.listening {
                    self.stop_listening();
                } else {
                    self.start_listening();
                }
            }
            UserAction::Greeting => self.start_routine(Routine::greeting()),
            UserAction::GoToClass(class) => self.start_routine(Routine::go_to_class(&class)),
            UserAction::StepBack => self.start_routine(Routine::step_back()),
            UserAction::CancelRoutine => {
                if !self.routines.cancel() {
                    debug!("no routine to cancel");
                }
            }
            UserAction::RefreshPlaces => self.orchestrator.request_places(),
            UserAction::SetChatToken(token) => self.set_chat_token(&token),
            UserAction::SetMessagingSettings(settings) => self.set_messaging_settings(settings),
            UserAction::ConnectMessaging => self.connect_messaging_if_configured(),
            UserAction::PublishMessage { topic, payload } => self.publish_message(topic, payload),
        }
        self.publish();
    }

    pub fn apply(&mut self, message: UiMessage) {
        match message {
            UiMessage::Speech(speech) => self.on_speech(speech),
            UiMessage::Navigation(event) => self.state.last_navigation = Some(event),
            UiMessage::Persons(persons) => self.state.persons = persons,
            UiMessage::ChatReply { session, reply } => self.on_chat_reply(session, reply),
            UiMessage::RoutineFinished { routine, outcome } => {
                self.on_routine_finished(&routine, outcome)
            }
            UiMessage::Destinations(names) => self.state.destinations = names,
        }
        self.publish();
    }

    // ── speech ───────────────────────────────────────────────────────────

    fn start_listening(&mut self) {
        if self.state.listening {
            return;
        }
        self.state.listening = true;
        self.state.recognized_text.clear();
        let tx = self.ui_tx.clone();
        self.orchestrator
            .set_speech_listener(Some(Arc::new(move |event: &SpeechEvent| {
                let _ = tx.send(UiMessage::Speech(event.clone()));
            })));
        self.orchestrator.start_recognition();
    }

    fn stop_listening(&mut self) {
        if !self.state.listening {
            return;
        }
        self.state.listening = false;
        self.state.recognized_text.clear();
        self.orchestrator.stop_recognition();
        self.orchestrator.set_speech_listener(None);
    }

    fn on_speech(&mut self, speech: SpeechEvent) {
        if !self.state.listening {
            debug!(?speech, "speech result after listening stopped; ignored");
            return;
        }
        match speech {
            SpeechEvent::Partial(text) => {
                self.state.recognized_text = text.clone();
                self.state.speech_text = text;
            }
            SpeechEvent::Final(text) => {
                self.state.recognized_text = text.clone();
                self.state.speech_text = text.clone();
                match self.triggers.extract_prompt(&text) {
                    Some(prompt) => {
                        info!(%prompt, "trigger phrase heard");
                        self.send_message(prompt);
                    }
                    None => debug!(%text, "no trigger phrase"),
                }
            }
        }
    }

    // ── chat ─────────────────────────────────────────────────────────────

    fn send_message(&mut self, text: String) {
        self.state.transcript.push(ChatTurn::user(text));

        let transcript = self.state.transcript.clone();
        let language = self.preferences.get(PrefKey::Language);
        let session = self.session;
        let chat = Arc::clone(&self.chat);
        let tx = self.ui_tx.clone();
        tokio::spawn(async move {
            let reply = match chat.reply(&transcript, &language).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(error = %e, "chat request failed");
                    GENERIC_ERROR_REPLY.to_string()
                }
            };
            let _ = tx.send(UiMessage::ChatReply { session, reply });
        });
    }

    fn on_chat_reply(&mut self, session: u64, reply: String) {
        if session != self.session {
            debug!(session, current = self.session, "reply for a cleared conversation; dropped");
            return;
        }
        self.orchestrator.speak(&reply);
        self.state.transcript.push(ChatTurn::assistant(reply));
    }

    fn clear_messages(&mut self) {
        self.state.transcript.clear();
        self.session += 1;
    }

    fn set_chat_token(&mut self, token: &str) {
        if let Err(e) = self.preferences.set(PrefKey::ChatToken, token) {
            warn!(error = %e, "could not store chat token");
            self.notify(NotificationLevel::Failure, SETTINGS_NOT_SAVED_MESSAGE);
        }
        self.chat.set_api_key(token);
    }

    // ── routines ─────────────────────────────────────────────────────────

    fn start_routine(&mut self, routine: Routine) {
        let tx = self.ui_tx.clone();
        let name = routine.name.clone();
        let started = self.routines.start(routine, move |outcome| {
            let _ = tx.send(UiMessage::RoutineFinished {
                routine: name,
                outcome,
            });
        });
        if started.is_some() {
            self.state.routine_running = true;
        }
    }

    fn on_routine_finished(&mut self, routine: &str, outcome: RoutineOutcome) {
        self.state.routine_running = self.routines.is_running();
        match outcome {
            RoutineOutcome::Completed => debug!(routine, "routine completed"),
            RoutineOutcome::Cancelled { .. } => {
                self.notify(NotificationLevel::Info, ROUTINE_CANCELLED_MESSAGE)
            }
            RoutineOutcome::Failed { error, .. } => {
                warn!(routine, error = %error, "routine failed");
                self.notify(NotificationLevel::Failure, ROUTINE_FAILED_MESSAGE);
            }
            RoutineOutcome::Interrupted => {
                warn!(routine, "routine interrupted");
                self.notify(NotificationLevel::Failure, ROUTINE_FAILED_MESSAGE);
            }
        }
    }

    // ── messaging ────────────────────────────────────────────────────────

    fn set_messaging_settings(&mut self, settings: MessagingSettings) {
        if let Err(e) = settings.save(self.preferences.as_ref()) {
            warn!(error = %e, "could not store messaging settings");
            self.notify(NotificationLevel::Failure, SETTINGS_NOT_SAVED_MESSAGE);
        }
        self.state.messaging = settings;
    }

    /// Start the broker session if settings are complete.  Ignored while a
    /// session is connected; a session that never reached the broker is
    /// replaced with one using the current settings.
    fn connect_messaging_if_configured(&mut self) {
        if let Some(client) = &self.messaging
            && client.is_connected()
        {
            info!("messaging already connected; ignoring");
            return;
        }
        let settings = MessagingSettings::load(self.preferences.as_ref());
        if !settings.is_complete() {
            warn!("incomplete messaging configuration");
            return;
        }
        if let Some(stale) = self.messaging.take() {
            info!("replacing unconnected messaging session");
            self.state.messaging_started = false;
            tokio::spawn(async move {
                stale.disconnect().await;
            });
        }
        let config = MessagingConfig::new(&settings.broker_address, &settings.client_id)
            .with_credentials(&settings.user, &settings.password)
            .with_topics(self.topics.clone());
        match self.connector.connect(config) {
            Ok(client) => {
                info!(broker = %settings.broker_address, "messaging started");
                self.messaging = Some(client);
                self.state.messaging_started = true;
            }
            Err(e) => {
                warn!(error = %e, "messaging start failed");
                self.notify(NotificationLevel::Failure, &e.to_string());
            }
        }
    }

    fn publish_message(&mut self, topic: String, payload: String) {
        let Some(client) = self.messaging.clone() else {
            warn!(%topic, "messaging not started; message dropped");
            return;
        };
        tokio::spawn(async move {
            client.publish(&topic, &payload).await;
        });
    }

    // ── output ───────────────────────────────────────────────────────────

    fn notify(&mut self, level: NotificationLevel, message: &str) {
        self.state.notification = Some((level, message.to_string()));
        let _ = self.bus.publish(Event::new(
            SOURCE,
            EventPayload::Notification {
                level,
                message: message.to_string(),
            },
        ));
    }

    fn publish(&self) {
        self.snapshot.send_if_modified(|current| {
            if *current == self.state {
                return false;
            }
            *current = self.state.clone();
            true
        });
    }
}

impl Drop for PresentationState {
    fn drop(&mut self) {
        self.orchestrator.unsubscribe_navigation(self.navigation_sub);
        self.orchestrator.unsubscribe_persons(self.persons_sub);
        if self.state.listening {
            self.orchestrator.stop_recognition();
            self.orchestrator.set_speech_listener(None);
        }
        self.routines.cancel();
    }
}

/// Drive `state` until the action channel closes.
///
/// Destination-name changes published by the orchestrator are folded in as
/// [`UiMessage::Destinations`].
pub async fn run_ui_loop(
    mut state: PresentationState,
    mut messages: mpsc::UnboundedReceiver<UiMessage>,
    mut actions: mpsc::Receiver<UserAction>,
) {
    let mut destinations = state.orchestrator.watch_destinations();
    let current = destinations.borrow_and_update().clone();
    state.apply(UiMessage::Destinations(current));

    loop {
        tokio::select! {
            action = actions.recv() => match action {
                Some(action) => state.handle_action(action),
                None => break,
            },
            Some(message) = messages.recv() => state.apply(message),
            Ok(()) = destinations.changed() => {
                let names = destinations.borrow_and_update().clone();
                state.apply(UiMessage::Destinations(names));
            }
        }
    }
    info!("UI loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use rafa_hal::{ListenerKind, ListenerState, SimPlatform};
    use rafa_middleware::Topic;
    use rafa_types::{Place, RafaError};
    use tokio::sync::Notify;

    use crate::chat::ChatError;
    use crate::preferences::MemoryPreferences;

    // ── fakes ────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeChat {
        calls: AtomicUsize,
        fail: bool,
        gate: Option<Arc<Notify>>,
        key: Mutex<String>,
    }

    #[async_trait]
    impl ConversationClient for FakeChat {
        async fn reply(&self, transcript: &[ChatTurn], _language: &str) -> Result<String, ChatError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(ChatError::BadResponse("nope".into()));
            }
            let last = transcript.last().map(|t| t.content.clone()).unwrap_or_default();
            Ok(format!("re: {last}"))
        }

        fn set_api_key(&self, key: &str) {
            *self.key.lock().unwrap() = key.to_string();
        }
    }

    #[derive(Default)]
    struct FakeClient {
        published: Mutex<Vec<(String, String)>>,
        unreachable: bool,
        disconnects: AtomicUsize,
    }

    #[async_trait]
    impl MessagingClient for FakeClient {
        async fn publish(&self, topic: &str, payload: &str) {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_string()));
        }

        fn is_connected(&self) -> bool {
            !self.unreachable
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        configs: Mutex<Vec<MessagingConfig>>,
        client: Arc<FakeClient>,
    }

    impl MessagingConnector for FakeConnector {
        fn connect(&self, config: MessagingConfig) -> Result<Arc<dyn MessagingClient>, RafaError> {
            self.configs.lock().unwrap().push(config);
            Ok(self.client.clone())
        }
    }

    struct Fixture {
        sim: Arc<SimPlatform>,
        orchestrator: Arc<RobotOrchestrator>,
        chat: Arc<FakeChat>,
        connector: Arc<FakeConnector>,
        preferences: Arc<MemoryPreferences>,
        bus: EventBus,
    }

    impl Fixture {
        fn new(chat: FakeChat) -> Self {
            let sim = Arc::new(SimPlatform::new());
            let bus = EventBus::default();
            let orchestrator = RobotOrchestrator::new(sim.clone(), bus.clone());
            orchestrator.start().unwrap();
            Self {
                sim,
                orchestrator,
                chat: Arc::new(chat),
                connector: Arc::new(FakeConnector::default()),
                preferences: Arc::new(MemoryPreferences::new()),
                bus,
            }
        }

        fn presentation(&self) -> (PresentationState, mpsc::UnboundedReceiver<UiMessage>) {
            PresentationState::new(PresentationDeps {
                orchestrator: self.orchestrator.clone(),
                chat: self.chat.clone(),
                preferences: self.preferences.clone(),
                connector: self.connector.clone(),
                bus: self.bus.clone(),
                triggers: TriggerTable::default(),
                topics: vec!["test/pedro".into()],
            })
        }
    }

    fn drain(state: &mut PresentationState, rx: &mut mpsc::UnboundedReceiver<UiMessage>) {
        while let Ok(message) = rx.try_recv() {
            state.apply(message);
        }
    }

    async fn pump_one(state: &mut PresentationState, rx: &mut mpsc::UnboundedReceiver<UiMessage>) {
        let message = rx.recv().await.unwrap();
        state.apply(message);
    }

    // ── chat ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn send_message_appends_user_then_assistant_and_speaks() {
        let fx = Fixture::new(FakeChat::default());
        let (mut state, mut rx) = fx.presentation();

        state.handle_action(UserAction::SendMessage("hi".into()));
        assert_eq!(state.state().transcript, vec![ChatTurn::user("hi")]);

        pump_one(&mut state, &mut rx).await;
        assert_eq!(
            state.state().transcript,
            vec![ChatTurn::user("hi"), ChatTurn::assistant("re: hi")]
        );
        assert_eq!(fx.sim.spoken(), vec!["re: hi"]);
    }

    #[tokio::test]
    async fn chat_failure_yields_generic_reply() {
        let fx = Fixture::new(FakeChat {
            fail: true,
            ..FakeChat::default()
        });
        let (mut state, mut rx) = fx.presentation();

        state.handle_action(UserAction::SendMessage("hola".into()));
        pump_one(&mut state, &mut rx).await;

        assert_eq!(
            state.state().transcript.last(),
            Some(&ChatTurn::assistant(GENERIC_ERROR_REPLY))
        );
        assert_eq!(fx.sim.spoken(), vec![GENERIC_ERROR_REPLY]);
    }

    #[tokio::test]
    async fn reply_after_clear_is_discarded() {
        let gate = Arc::new(Notify::new());
        let fx = Fixture::new(FakeChat {
            gate: Some(gate.clone()),
            ..FakeChat::default()
        });
        let (mut state, mut rx) = fx.presentation();

        state.handle_action(UserAction::SendMessage("primera".into()));
        state.handle_action(UserAction::ClearMessages);
        gate.notify_one();
        pump_one(&mut state, &mut rx).await;

        assert!(state.state().transcript.is_empty());
        assert!(fx.sim.spoken().is_empty());
    }

    #[tokio::test]
    async fn set_chat_token_updates_client_and_preferences() {
        let fx = Fixture::new(FakeChat::default());
        let (mut state, _rx) = fx.presentation();
        state.handle_action(UserAction::SetChatToken("sk-nuevo".into()));
        assert_eq!(*fx.chat.key.lock().unwrap(), "sk-nuevo");
        assert_eq!(fx.preferences.get(PrefKey::ChatToken), "sk-nuevo");
    }

    // ── speech ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn speech_without_trigger_makes_no_chat_call() {
        let fx = Fixture::new(FakeChat::default());
        let (mut state, mut rx) = fx.presentation();
        state.handle_action(UserAction::StartListening);

        fx.sim.hear("hola");
        drain(&mut state, &mut rx);
        tokio::task::yield_now().await;

        assert_eq!(state.state().recognized_text, "hola");
        assert!(state.state().transcript.is_empty());
        assert_eq!(fx.chat.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn trigger_phrase_forwards_remainder_to_chat() {
        let fx = Fixture::new(FakeChat::default());
        let (mut state, mut rx) = fx.presentation();
        state.handle_action(UserAction::StartListening);

        fx.sim.hear_partial("oye paco");
        fx.sim.hear("oye paco qué hora es");
        drain(&mut state, &mut rx);

        assert_eq!(state.state().speech_text, "oye paco qué hora es");
        assert_eq!(state.state().transcript, vec![ChatTurn::user(" qué hora es")]);

        pump_one(&mut state, &mut rx).await;
        assert_eq!(state.state().transcript.len(), 2);
        assert_eq!(fx.chat.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn listening_installs_exactly_one_listener() {
        let fx = Fixture::new(FakeChat::default());
        let (mut state, _rx) = fx.presentation();

        state.handle_action(UserAction::StartListening);
        state.handle_action(UserAction::StartListening);
        assert!(state.state().listening);
        assert!(fx.orchestrator.has_speech_listener());
        assert_eq!(
            fx.orchestrator.listener_state(ListenerKind::Speech),
            ListenerState::Registered
        );
        let recognition_starts = fx
            .sim
            .calls()
            .into_iter()
            .filter(|c| *c == rafa_hal::SimCall::SetRecognizable(true))
            .count();
        assert_eq!(recognition_starts, 1);

        state.handle_action(UserAction::ToggleListening);
        assert!(!state.state().listening);
        assert!(!fx.orchestrator.has_speech_listener());
        assert_eq!(
            fx.orchestrator.listener_state(ListenerKind::Speech),
            ListenerState::Unregistered
        );
    }

    // ── routines ─────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn greeting_runs_once_and_clears_flag() {
        let fx = Fixture::new(FakeChat::default());
        let (mut state, mut rx) = fx.presentation();

        state.handle_action(UserAction::Greeting);
        assert!(state.state().routine_running);
        state.handle_action(UserAction::Greeting);

        pump_one(&mut state, &mut rx).await;
        assert!(!state.state().routine_running);
        assert_eq!(
            fx.sim.spoken(),
            vec![
                crate::routine::WELCOME_MESSAGE,
                crate::routine::INTRODUCTION_MESSAGE
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_routine_notifies_and_clears_flag() {
        let fx = Fixture::new(FakeChat::default());
        let mut notifications = fx.bus.subscribe_to(Topic::Notifications);
        fx.sim.fail_on("go_forward");
        let (mut state, mut rx) = fx.presentation();

        state.handle_action(UserAction::GoToClass("2 ESO A".into()));
        pump_one(&mut state, &mut rx).await;

        assert!(!state.state().routine_running);
        assert_eq!(
            state.state().notification,
            Some((NotificationLevel::Failure, ROUTINE_FAILED_MESSAGE.to_string()))
        );
        let event = notifications.recv().await.unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::Notification {
                level: NotificationLevel::Failure,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_routine_reports_cancellation() {
        let fx = Fixture::new(FakeChat::default());
        let (mut state, mut rx) = fx.presentation();

        state.handle_action(UserAction::GoToClass("1 ESO B".into()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        state.handle_action(UserAction::CancelRoutine);
        pump_one(&mut state, &mut rx).await;

        assert!(!state.state().routine_running);
        assert_eq!(
            state.state().notification,
            Some((NotificationLevel::Info, ROUTINE_CANCELLED_MESSAGE.to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn next_action_clears_notification() {
        let fx = Fixture::new(FakeChat::default());
        let (mut state, mut rx) = fx.presentation();
        let screen = state.subscribe();

        state.handle_action(UserAction::GoToClass("1 ESO B".into()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        state.handle_action(UserAction::CancelRoutine);
        pump_one(&mut state, &mut rx).await;
        assert!(state.state().notification.is_some());

        state.handle_action(UserAction::StepBack);
        assert_eq!(state.state().notification, None);
        assert_eq!(screen.borrow().notification, None);
    }

    // ── messaging ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn messaging_starts_once_with_stored_settings() {
        let fx = Fixture::new(FakeChat::default());
        let (mut state, _rx) = fx.presentation();

        state.handle_action(UserAction::ConnectMessaging);
        state.handle_action(UserAction::ConnectMessaging);

        let configs = fx.connector.configs.lock().unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].broker_address, "tcp://10.14.0.182:1883");
        assert_eq!(configs[0].client_id, "Robot");
        assert_eq!(configs[0].topics, vec!["test/pedro"]);
        assert!(state.state().messaging_started);
    }

    #[tokio::test]
    async fn unreachable_broker_can_be_retried_with_new_settings() {
        let mut fx = Fixture::new(FakeChat::default());
        fx.connector = Arc::new(FakeConnector {
            client: Arc::new(FakeClient {
                unreachable: true,
                ..FakeClient::default()
            }),
            ..FakeConnector::default()
        });
        let (mut state, _rx) = fx.presentation();

        state.handle_action(UserAction::ConnectMessaging);
        state.handle_action(UserAction::SetMessagingSettings(MessagingSettings {
            broker_address: "tcp://10.14.0.200:1883".into(),
            user: "intec".into(),
            password: "secreto".into(),
            client_id: "Robot".into(),
        }));
        state.handle_action(UserAction::ConnectMessaging);
        tokio::task::yield_now().await;

        let configs = fx.connector.configs.lock().unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[1].broker_address, "tcp://10.14.0.200:1883");
        assert_eq!(fx.connector.client.disconnects.load(Ordering::SeqCst), 1);
        assert!(state.state().messaging_started);
    }

    #[tokio::test]
    async fn incomplete_settings_do_not_connect() {
        let fx = Fixture::new(FakeChat::default());
        let (mut state, _rx) = fx.presentation();
        state.handle_action(UserAction::SetMessagingSettings(MessagingSettings {
            broker_address: "tcp://broker:1883".into(),
            user: String::new(),
            password: String::new(),
            client_id: " ".into(),
        }));
        state.handle_action(UserAction::ConnectMessaging);

        assert!(fx.connector.configs.lock().unwrap().is_empty());
        assert!(!state.state().messaging_started);
        assert_eq!(fx.preferences.get(PrefKey::BrokerAddress), "tcp://broker:1883");
    }

    #[tokio::test]
    async fn publish_goes_through_started_client() {
        let fx = Fixture::new(FakeChat::default());
        let (mut state, _rx) = fx.presentation();

        state.handle_action(UserAction::PublishMessage {
            topic: "test/intec".into(),
            payload: "antes".into(),
        });
        state.handle_action(UserAction::ConnectMessaging);
        state.handle_action(UserAction::PublishMessage {
            topic: "test/intec".into(),
            payload: "hola".into(),
        });
        tokio::task::yield_now().await;

        assert_eq!(
            *fx.connector.client.published.lock().unwrap(),
            vec![("test/intec".to_string(), "hola".to_string())]
        );
    }

    #[test]
    fn settings_debug_redacts_password() {
        let settings = MessagingSettings::load(&MemoryPreferences::new());
        assert!(!format!("{settings:?}").contains("intecfullpassword"));
    }

    // ── events & loop ────────────────────────────────────────────────────

    #[tokio::test]
    async fn navigation_and_person_events_reach_state() {
        let fx = Fixture::new(FakeChat::default());
        let (mut state, mut rx) = fx.presentation();

        state.handle_action(UserAction::GoTo("Biblioteca".into()));
        state.handle_action(UserAction::StartFollowing(2));
        fx.sim.set_persons(vec![Person {
            id: 2,
            distance: 1.5,
            angle: 0.2,
        }]);
        drain(&mut state, &mut rx);

        assert_eq!(
            state.state().last_navigation,
            Some(NavigationEvent::NavigationStarted)
        );
        assert_eq!(state.state().persons.len(), 1);
        assert!(state.state().following);

        state.handle_action(UserAction::StopFollowing);
        assert!(!state.state().following);
        assert!(state.state().persons.is_empty());
    }

    #[tokio::test]
    async fn dropped_state_stops_receiving_events() {
        let fx = Fixture::new(FakeChat::default());
        let (mut state, mut rx) = fx.presentation();
        state.handle_action(UserAction::StartListening);
        drop(state);

        assert!(!fx.orchestrator.has_speech_listener());
        fx.sim.status(rafa_hal::platform::status::NAVIGATION_START, "x");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ui_loop_publishes_destinations() {
        let sim = Arc::new(SimPlatform::new().with_places(vec![Place {
            name: "Cafetería".into(),
            x: 1.0,
            y: 1.0,
            theta: 0.0,
        }]));
        let bus = EventBus::default();
        let orchestrator = RobotOrchestrator::new(sim.clone(), bus.clone());
        let (state, messages) = PresentationState::new(PresentationDeps {
            orchestrator: orchestrator.clone(),
            chat: Arc::new(FakeChat::default()),
            preferences: Arc::new(MemoryPreferences::new()),
            connector: Arc::new(FakeConnector::default()),
            bus,
            triggers: TriggerTable::default(),
            topics: Vec::new(),
        });
        let mut screen = state.subscribe();
        let (actions_tx, actions_rx) = mpsc::channel(8);
        let ui = tokio::spawn(run_ui_loop(state, messages, actions_rx));

        orchestrator.start().unwrap();
        let destinations = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let names = screen.borrow_and_update().destinations.clone();
                if !names.is_empty() {
                    return names;
                }
                screen.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert_eq!(destinations, vec!["Cafetería"]);

        actions_tx.send(UserAction::HeadUp).await.unwrap();
        drop(actions_tx);
        ui.await.unwrap();
        assert!(sim.calls().contains(&rafa_hal::SimCall::MoveHead { pan: 50, tilt: 10 }));
    }
}
