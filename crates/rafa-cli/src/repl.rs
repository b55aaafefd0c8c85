//! REPL – the operator's screens, one slash-command at a time.
//!
//! Screens are named routes on a stack: `/open <route>` pushes, `/back` pops,
//! and popping the last route leaves the shell.  Commands work from any
//! screen; the current route only decides what `/show` prints.
//!
//! Plain text (no leading `/`) is sent to the assistant as a chat message.
//!
//! `/hear`, `/person` and `/status` inject platform events into the
//! simulated robot, standing in for the microphone, the camera and the
//! navigation stack.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use rafa_hal::SimPlatform;
use rafa_runtime::routine::CLASSES;
use rafa_runtime::{MessagingSettings, ScreenState, UserAction};
use rafa_types::{ChatRole, NotificationLevel, Person};
use tokio::sync::{mpsc, watch};
use tracing::warn;

// ─────────────────────────────────────────────────────────────────────────────
// Screens
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Main,
    Movement,
    Mqtt,
    ChatGpt,
    Tts,
    TextChat,
    Points,
    Classes,
}

impl Screen {
    pub const ALL: [Screen; 8] = [
        Screen::Main,
        Screen::Movement,
        Screen::Mqtt,
        Screen::ChatGpt,
        Screen::Tts,
        Screen::TextChat,
        Screen::Points,
        Screen::Classes,
    ];

    pub fn route(self) -> &'static str {
        match self {
            Screen::Main => "main_screen",
            Screen::Movement => "movement_screen",
            Screen::Mqtt => "mqtt_screen",
            Screen::ChatGpt => "chatgpt_screen",
            Screen::Tts => "tts_screen",
            Screen::TextChat => "text_chat_screen",
            Screen::Points => "points_screen",
            Screen::Classes => "clases_screen",
        }
    }

    /// Accepts the full route name or its prefix (`"movement"`).
    pub fn from_route(name: &str) -> Option<Screen> {
        let name = name.trim();
        Screen::ALL.into_iter().find(|s| {
            let route = s.route();
            route == name || route.strip_suffix("_screen") == Some(name)
        })
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.route())
    }
}

/// Route stack.  Starts on [`Screen::Main`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Router {
    stack: Vec<Screen>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            stack: vec![Screen::Main],
        }
    }

    pub fn current(&self) -> Option<Screen> {
        self.stack.last().copied()
    }

    /// Opening the screen already on top is a no-op.
    pub fn open(&mut self, screen: Screen) {
        if self.current() != Some(screen) {
            self.stack.push(screen);
        }
    }

    /// Returns `false` once the stack is empty and the app should exit.
    pub fn back(&mut self) -> bool {
        self.stack.pop();
        !self.stack.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Action(UserAction),
    Open(Screen),
    Back,
    Show,
    Help,
    Quit,
    Hear(String),
    Person(Person),
    ClearPersons,
    Status { code: i32, data: String },
}

/// Parse one input line.  `Ok(None)` for blank lines.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(body) = line.strip_prefix('/') else {
        return Ok(Some(Command::Action(UserAction::SendMessage(line.to_string()))));
    };
    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };

    let command = match name {
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "show" => Command::Show,
        "back" => Command::Back,
        "open" => Command::Open(
            Screen::from_route(rest).ok_or_else(|| format!("unknown screen '{rest}'"))?,
        ),

        "forward" => Command::Action(UserAction::MoveForward),
        "backward" => Command::Action(UserAction::MoveBackward),
        "left" => Command::Action(UserAction::TurnLeft),
        "right" => Command::Action(UserAction::TurnRight),
        "stop" => Command::Action(UserAction::Stop),
        "head" => Command::Action(match rest {
            "up" => UserAction::HeadUp,
            "down" => UserAction::HeadDown,
            "reset" | "" => UserAction::ResetHead,
            other => return Err(format!("head takes up|down|reset, not '{other}'")),
        }),
        "goto" => Command::Action(UserAction::GoTo(required(rest, "destination")?)),
        "places" => Command::Action(UserAction::RefreshPlaces),
        "follow" => Command::Action(UserAction::StartFollowing(number(rest, "person id")?)),
        "unfollow" => Command::Action(UserAction::StopFollowing),

        "say" => Command::Action(UserAction::Speak(required(rest, "text")?)),
        "chat" => Command::Action(UserAction::SendMessage(required(rest, "message")?)),
        "clear" => Command::Action(UserAction::ClearMessages),
        "listen" => Command::Action(match rest {
            "on" => UserAction::StartListening,
            "off" => UserAction::StopListening,
            "" => UserAction::ToggleListening,
            other => return Err(format!("listen takes on|off, not '{other}'")),
        }),

        "greet" => Command::Action(UserAction::Greeting),
        "class" => Command::Action(UserAction::GoToClass(required(rest, "class name")?)),
        "stepback" => Command::Action(UserAction::StepBack),
        "cancel" => Command::Action(UserAction::CancelRoutine),

        "token" => Command::Action(UserAction::SetChatToken(required(rest, "token")?)),
        "mqtt" => parse_mqtt(rest)?,
        "publish" => {
            let (topic, payload) = rest
                .split_once(char::is_whitespace)
                .ok_or("usage: /publish <topic> <payload>")?;
            Command::Action(UserAction::PublishMessage {
                topic: topic.to_string(),
                payload: payload.trim().to_string(),
            })
        }

        "hear" => Command::Hear(required(rest, "utterance")?),
        "person" => parse_person(rest)?,
        "status" => {
            let (code, data) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            Command::Status {
                code: number(code, "status code")?,
                data: data.trim().to_string(),
            }
        }

        other => return Err(format!("unknown command '/{other}'")),
    };
    Ok(Some(command))
}

fn parse_mqtt(rest: &str) -> Result<Command, String> {
    let mut words = rest.split_whitespace();
    match words.next() {
        None => Ok(Command::Open(Screen::Mqtt)),
        Some("connect") => Ok(Command::Action(UserAction::ConnectMessaging)),
        Some("set") => {
            let fields: Vec<&str> = words.collect();
            let [broker, user, password, client_id] = fields[..] else {
                return Err("usage: /mqtt set <broker> <user> <password> <client-id>".into());
            };
            Ok(Command::Action(UserAction::SetMessagingSettings(
                MessagingSettings {
                    broker_address: broker.to_string(),
                    user: user.to_string(),
                    password: password.to_string(),
                    client_id: client_id.to_string(),
                },
            )))
        }
        Some(other) => Err(format!("mqtt takes connect|set, not '{other}'")),
    }
}

fn parse_person(rest: &str) -> Result<Command, String> {
    if rest == "clear" {
        return Ok(Command::ClearPersons);
    }
    let mut words = rest.split_whitespace();
    let id = number(words.next().unwrap_or(""), "person id")?;
    let distance = match words.next() {
        Some(w) => number(w, "distance")?,
        None => 1.0,
    };
    let angle = match words.next() {
        Some(w) => number(w, "angle")?,
        None => 0.0,
    };
    Ok(Command::Person(Person {
        id,
        distance,
        angle,
    }))
}

fn required(rest: &str, what: &str) -> Result<String, String> {
    if rest.is_empty() {
        Err(format!("missing {what}"))
    } else {
        Ok(rest.to_string())
    }
}

fn number<T: std::str::FromStr>(word: &str, what: &str) -> Result<T, String> {
    word.trim()
        .parse()
        .map_err(|_| format!("'{word}' is not a valid {what}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Shell
// ─────────────────────────────────────────────────────────────────────────────

pub struct Shell {
    actions: mpsc::Sender<UserAction>,
    screen: watch::Receiver<ScreenState>,
    sim: Arc<SimPlatform>,
    router: Router,
    shutdown: Arc<AtomicBool>,
}

impl Shell {
    pub fn new(
        actions: mpsc::Sender<UserAction>,
        screen: watch::Receiver<ScreenState>,
        sim: Arc<SimPlatform>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            actions,
            screen,
            sim,
            router: Router::new(),
            shutdown,
        }
    }

    /// Blocking read-eval loop.  Must run off the async runtime.
    pub fn run(mut self) {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        while !self.shutdown.load(Ordering::SeqCst) {
            let route = self.router.current().map_or("", Screen::route);
            print!("{} ", format!("rafa:{route}>").bold().cyan());
            stdout.flush().ok();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    eprintln!("{}: {e}", "Read error".red());
                    break;
                }
            }

            match parse(&line) {
                Ok(None) => {}
                Ok(Some(command)) => {
                    if !self.execute(command) {
                        break;
                    }
                }
                Err(e) => println!(
                    "{} {e}. Type {} for available commands.",
                    "Error:".red(),
                    "/help".bold()
                ),
            }
        }
        self.shutdown.store(true, Ordering::SeqCst);
        println!("{}", "Adiós.".green());
    }

    /// Returns `false` when the shell should exit.
    fn execute(&mut self, command: Command) -> bool {
        match command {
            Command::Action(action) => {
                if let Err(e) = self.actions.blocking_send(action) {
                    warn!(error = %e, "UI loop gone");
                    return false;
                }
            }
            Command::Open(screen) => {
                self.router.open(screen);
                self.show();
            }
            Command::Back => {
                if !self.router.back() {
                    return false;
                }
                self.show();
            }
            Command::Show => self.show(),
            Command::Help => print_help(),
            Command::Quit => return false,
            Command::Hear(text) => {
                if !self.screen.borrow().listening {
                    println!("  {}", "(not listening; try /listen on)".dimmed());
                }
                self.sim.hear(&text);
            }
            Command::Person(person) => {
                let mut persons = self.sim.persons();
                persons.retain(|p| p.id != person.id);
                persons.push(person);
                self.sim.set_persons(persons);
            }
            Command::ClearPersons => self.sim.set_persons(Vec::new()),
            Command::Status { code, data } => self.sim.status(code, &data),
        }
        true
    }

    fn show(&self) {
        let state = self.screen.borrow().clone();
        let Some(screen) = self.router.current() else {
            return;
        };
        println!();
        println!("{}", screen.route().bold().underline());
        match screen {
            Screen::Main => show_main(&state),
            Screen::Movement => show_movement(&state),
            Screen::Mqtt => show_mqtt(&state),
            Screen::ChatGpt | Screen::TextChat => show_chat(&state),
            Screen::Tts => show_speech(&state),
            Screen::Points => show_points(&state),
            Screen::Classes => show_classes(&state),
        }
        if let Some((level, message)) = &state.notification {
            let line = match level {
                NotificationLevel::Info => message.yellow(),
                NotificationLevel::Failure => message.red(),
            };
            println!("  {} {line}", "!".bold());
        }
        println!();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Screen renderers
// ─────────────────────────────────────────────────────────────────────────────

fn on_off(flag: bool) -> colored::ColoredString {
    if flag { "on".green() } else { "off".dimmed() }
}

fn show_main(state: &ScreenState) {
    for screen in &Screen::ALL[1..] {
        println!("  /open {}", screen.route().cyan());
    }
    println!("  listening: {}  routine: {}", on_off(state.listening), on_off(state.routine_running));
}

fn show_movement(state: &ScreenState) {
    println!("  /forward /backward /left /right /stop   /head up|down|reset");
    println!("  /follow <id>  /unfollow   following: {}", on_off(state.following));
    match &state.last_navigation {
        Some(event) => println!("  last navigation: {}", format!("{event:?}").yellow()),
        None => println!("  last navigation: {}", "none".dimmed()),
    }
    if state.persons.is_empty() {
        println!("  nobody in view");
    }
    for p in &state.persons {
        println!("  person {} at {:.2} m, {:.2} rad", p.id.to_string().bold(), p.distance, p.angle);
    }
}

fn show_mqtt(state: &ScreenState) {
    let s = &state.messaging;
    println!("  broker    : {}", s.broker_address.yellow());
    println!("  user      : {}", s.user);
    println!("  password  : {}", if s.password.is_empty() { "<not set>" } else { "<redacted>" });
    println!("  client id : {}", s.client_id);
    println!("  started   : {}", on_off(state.messaging_started));
    println!("  /mqtt set <broker> <user> <password> <client-id>   /mqtt connect");
    println!("  /publish <topic> <payload>");
}

fn show_chat(state: &ScreenState) {
    if state.transcript.is_empty() {
        println!("  {}", "(no messages)".dimmed());
    }
    for turn in &state.transcript {
        match turn.role {
            ChatRole::User => println!("  {} {}", "tú  >".bold(), turn.content),
            ChatRole::Assistant => println!("  {} {}", "rafa>".bold().cyan(), turn.content),
        }
    }
    println!("  type to chat, /clear to start over, /token <key> to set the API key");
}

fn show_speech(state: &ScreenState) {
    println!("  listening : {}", on_off(state.listening));
    println!("  heard     : {}", state.speech_text);
    println!("  recognised: {}", state.recognized_text);
    println!("  /listen [on|off]  /say <text>  /hear <utterance>");
}

fn show_points(state: &ScreenState) {
    if state.destinations.is_empty() {
        println!("  {}", "(no destinations; /places to refresh)".dimmed());
    }
    for name in &state.destinations {
        println!("  • {}", name.bold());
    }
    println!("  /goto <destination>");
}

fn show_classes(state: &ScreenState) {
    for class in CLASSES {
        println!("  • {}", class.bold());
    }
    println!("  /class <name>  /greet  /cancel   routine: {}", on_off(state.routine_running));
}

fn print_help() {
    println!();
    println!("{}", "Rafa Commands".bold().underline());
    println!("  {}  – open a screen, go back, redraw", "/open <screen>  /back  /show".bold().cyan());
    println!("  {}  – drive the base", "/forward /backward /left /right /stop".bold().cyan());
    println!("  {}  – move the head", "/head up|down|reset".bold().cyan());
    println!("  {}  – navigation", "/goto <dest>  /places".bold().cyan());
    println!("  {}  – person following", "/follow <id>  /unfollow".bold().cyan());
    println!("  {}  – speech", "/say <text>  /listen [on|off]".bold().cyan());
    println!("  {}  – assistant chat (or just type)", "/chat <text>  /clear  /token <key>".bold().cyan());
    println!("  {}  – routines", "/greet  /class <name>  /stepback  /cancel".bold().cyan());
    println!("  {}  – messaging", "/mqtt [set ...|connect]  /publish <topic> <payload>".bold().cyan());
    println!("  {}  – simulate the robot", "/hear <text>  /person <id> [dist] [angle]|clear  /status <code> [data]".bold().cyan());
    println!("  {}  – exit", "/quit".bold().cyan());
    println!();
}
