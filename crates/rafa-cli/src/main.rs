//! `rafa-cli` – operator console for the Rafa school robot.
//!
//! 1. Loads `~/.rafa/config.toml`, writing the defaults on first run.
//! 2. Connects the orchestrator to the in-process simulated platform.
//! 3. Starts the UI loop and, once the robot reports connected, the MQTT
//!    session if the broker settings are complete.
//! 4. Drops the operator into the REPL (`/help` lists the screens).
//! 5. On **Ctrl-C** stops the base and any person following, then exits.

mod config;
mod repl;

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use rafa_hal::SimPlatform;
use rafa_middleware::{EventBus, MqttConnector, Topic, TopicReceiver, TopicRouter};
use rafa_runtime::chat::DEFAULT_ENDPOINT;
use rafa_runtime::{
    OpenAiChatClient, PresentationDeps, PresentationState, RobotOrchestrator, TriggerTable,
    UserAction, init_tracing, run_ui_loop,
};
use rafa_types::{EventPayload, NotificationLevel, Place};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{Config, FilePreferences};

const ACTION_CAPACITY: usize = 64;

fn main() {
    let _guard = init_tracing("rafa");
    print_banner();

    let cfg = load_config();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}: {e}", "Failed to start async runtime".red());
            return;
        }
    };
    runtime.block_on(run(cfg));
}

async fn run(cfg: Config) {
    let bus = EventBus::default();
    let sim = Arc::new(SimPlatform::new().with_places(demo_places()));
    let orchestrator = RobotOrchestrator::new(sim.clone(), bus.clone());
    let (actions_tx, actions_rx) = mpsc::channel(ACTION_CAPACITY);

    let connect_on_ready = actions_tx.downgrade();
    orchestrator.set_on_connected(move || {
        if let Some(tx) = connect_on_ready.upgrade() {
            let _ = tx.try_send(UserAction::ConnectMessaging);
        }
    });

    print!("  Connecting to robot platform … ");
    std::io::stdout().flush().ok();
    match orchestrator.start() {
        Ok(()) => println!("{}", "OK".green()),
        Err(e) => println!("{}: {e}", "FAILED".red()),
    }

    let preferences = Arc::new(FilePreferences::new(config::config_path(), cfg.clone()));
    let chat = Arc::new(OpenAiChatClient::with_endpoint(
        DEFAULT_ENDPOINT,
        cfg.chat_model.clone(),
        cfg.chat_token.clone(),
    ));
    let connector = Arc::new(MqttConnector::new(topic_router(&cfg.topics)).with_bus(bus.clone()));

    let (state, messages) = PresentationState::new(PresentationDeps {
        orchestrator: orchestrator.clone(),
        chat,
        preferences,
        connector,
        bus: bus.clone(),
        triggers: TriggerTable::new(cfg.triggers.iter().cloned()),
        topics: cfg.topics.clone(),
    });
    let screen = state.subscribe();

    let printer = tokio::spawn(print_bus_events(
        bus.subscribe_to(Topic::Notifications),
        bus.subscribe_to(Topic::Messaging),
    ));
    let ui = tokio::spawn(run_ui_loop(state, messages, actions_rx));

    let shutdown = Arc::new(AtomicBool::new(false));
    install_ctrlc(orchestrator.clone(), shutdown.clone());

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    let shell = repl::Shell::new(actions_tx, screen, sim, shutdown);
    if let Err(e) = tokio::task::spawn_blocking(move || shell.run()).await {
        warn!(error = %e, "REPL thread panicked");
    }

    orchestrator.stop_moving();
    orchestrator.stop_tracking();
    if let Err(e) = ui.await {
        warn!(error = %e, "UI loop panicked");
    }
    printer.abort();
    info!("rafa stopped");
}

// ─────────────────────────────────────────────────────────────────────────────
// Startup helpers
// ─────────────────────────────────────────────────────────────────────────────

fn load_config() -> Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {e}", "Error saving config".red()),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {e}", "Config error".red());
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

fn install_ctrlc(orchestrator: Arc<RobotOrchestrator>, shutdown: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the robot …".yellow().bold());
        orchestrator.stop_moving();
        orchestrator.stop_tracking();
        shutdown.store(true, Ordering::SeqCst);
        println!("{}", "  ✓ Motion and following stopped.".green());
        std::process::exit(130);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }
}

/// Logs every inbound message on the configured topics.
fn topic_router(topics: &[String]) -> TopicRouter {
    topics.iter().fold(TopicRouter::new(), |router, topic| {
        let name = topic.clone();
        router.with_handler(topic.clone(), move |payload| {
            info!(topic = %name, %payload, "broker message");
        })
    })
}

/// Places served by the simulated platform.
fn demo_places() -> Vec<Place> {
    [
        ("Recepción", 0.0, 0.0),
        ("Biblioteca", 12.5, 3.0),
        ("Cafetería", -4.0, 8.5),
        ("Sala de profesores", 6.0, -2.5),
    ]
    .into_iter()
    .map(|(name, x, y)| Place {
        name: name.to_string(),
        x,
        y,
        theta: 0.0,
    })
    .collect()
}

async fn print_bus_events(mut notifications: TopicReceiver, mut inbound: TopicReceiver) {
    loop {
        let received = tokio::select! {
            r = notifications.recv() => r,
            r = inbound.recv() => r,
        };
        let event = match received {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "console fell behind the event bus");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event.payload {
            EventPayload::Notification { level, message } => match level {
                NotificationLevel::Info => println!("\n  {} {}", "ℹ".cyan(), message.yellow()),
                NotificationLevel::Failure => println!("\n  {} {}", "✗".red().bold(), message.red()),
            },
            EventPayload::InboundMessage { topic, payload } => {
                println!("\n  {} {payload}", format!("[{topic}]").magenta())
            }
            EventPayload::Robot(_) => {}
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"   ____         __       "#.bold().cyan());
    println!("{}", r#"  / __ \ ___ _ / _|___ _ "#.bold().cyan());
    println!("{}", r#" / /_/ // _ `// _// _ `/ "#.bold().cyan());
    println!("{}", r#"/_/ |_| \_,_//_/  \_,_/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Rafa".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  School assistant robot console");
    println!();
}
