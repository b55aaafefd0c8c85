//! Scripted routines.
//!
//! A [`Routine`] is a named, linear list of [`RoutineStep`]s.  Each step
//! issues one [`RobotCommand`] and then waits a fixed, estimated time for the
//! command to have a visible effect; the platform reports no completion for
//! speech or timed motion, so the delay is the only synchronisation.
//!
//! [`RoutineRunner`] runs at most one routine at a time on a Tokio task:
//!
//! | Situation | Result |
//! |-----------|--------|
//! | every step issued | [`RoutineOutcome::Completed`] |
//! | a command failed | [`RoutineOutcome::Failed`]; later steps are skipped, nothing is rolled back |
//! | [`RoutineRunner::cancel`] | [`RoutineOutcome::Cancelled`]; the current delay is cut short |
//! | task aborted or panicked | [`RoutineOutcome::Interrupted`] |
//!
//! The running flag is cleared by a drop guard, so every one of these paths
//! releases it before the completion callback runs.
//!
//! # Example
//!
//! ```rust
//! use rafa_runtime::routine::Routine;
//!
//! let routine = Routine::go_to_class("2 ESO B");
//! assert_eq!(routine.name, "go_to_class");
//! assert!(routine.total_duration().as_millis() >= 11_000);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rafa_hal::gateway::{backward, forward, head_down, head_up, left, right, speak};
use rafa_types::{RafaError, RobotCommand};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const WELCOME_MESSAGE: &str =
    "¡Hola! Bienvenidos al Instituto Fernando tercero, centro de excelencia.";
pub const INTRODUCTION_MESSAGE: &str = "Soy un asistente educativo entrenado para ayudarte";

/// Classrooms offered by the go-to-class screen.
pub const CLASSES: [&str; 9] = [
    "1 ESO A", "1 ESO B", "1 ESO C", "2 ESO A", "2 ESO B", "2 ESO C", "3 ESO A", "3 ESO B",
    "3 ESO C",
];

const SPEECH_BASE_MS: u64 = 500;
const SPEECH_MS_PER_WORD: u64 = 400;
const ANNOUNCE_MIN_MS: u64 = 3_000;

/// Rough time the platform needs to say `text` aloud.
pub fn estimate_speech_duration(text: &str) -> Duration {
    let words = text.split_whitespace().count() as u64;
    Duration::from_millis(SPEECH_BASE_MS + words * SPEECH_MS_PER_WORD)
}

// ─────────────────────────────────────────────────────────────────────────────
// Routine
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RoutineStep {
    pub command: RobotCommand,
    pub delay_after: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Routine {
    pub name: String,
    pub steps: Vec<RoutineStep>,
}

impl Routine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step that waits `delay_ms` after issuing `command`.
    pub fn then(mut self, command: RobotCommand, delay_ms: u64) -> Self {
        self.steps.push(RoutineStep {
            command,
            delay_after: Duration::from_millis(delay_ms),
        });
        self
    }

    /// Append a speech step whose delay is estimated from the text.
    pub fn then_say(self, text: &str, min_ms: u64) -> Self {
        let estimate = estimate_speech_duration(text).as_millis() as u64;
        self.then(speak(text), estimate.max(min_ms))
    }

    pub fn total_duration(&self) -> Duration {
        self.steps.iter().map(|s| s.delay_after).sum()
    }

    /// Look around, then introduce the robot.
    pub fn greeting() -> Self {
        Routine::new("greeting")
            .then(left(), 500)
            .then(right(), 500)
            .then(head_up(), 500)
            .then(head_down(), 500)
            .then(speak(WELCOME_MESSAGE), 5_000)
            .then(speak(INTRODUCTION_MESSAGE), 0)
    }

    /// Announce the route, drive three timed legs, then report that the
    /// classroom is not mapped in this environment.
    pub fn go_to_class(class: &str) -> Self {
        Routine::new("go_to_class")
            .then_say(&format!("Iniciando ruta hacia {class}"), ANNOUNCE_MIN_MS)
            .then(forward(), 2_000)
            .then(RobotCommand::StopMove, 0)
            .then(forward(), 1_000)
            .then(RobotCommand::StopMove, 0)
            .then(forward(), 1_000)
            .then(RobotCommand::StopMove, 0)
            .then(
                speak(format!("No encuentro la clase {class} en este entorno.")),
                4_000,
            )
    }

    /// Back away briefly and stop.
    pub fn step_back() -> Self {
        Routine::new("step_back")
            .then(backward(), 1_000)
            .then(RobotCommand::StopMove, 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Execution
// ─────────────────────────────────────────────────────────────────────────────

/// Receiver of routine commands.
pub trait RoutineTarget: Send + Sync {
    fn execute(&self, command: &RobotCommand) -> Result<(), RafaError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoutineOutcome {
    Completed,
    /// `error` is a [`RafaError::RoutineAborted`] naming the failed step.
    Failed { step: usize, error: RafaError },
    /// Stopped before issuing `step`.
    Cancelled { step: usize },
    Interrupted,
}

type FinishCallback = Box<dyn FnOnce(RoutineOutcome) + Send>;

pub struct RoutineRunner {
    target: Arc<dyn RoutineTarget>,
    running: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl RoutineRunner {
    pub fn new(target: Arc<dyn RoutineTarget>) -> Self {
        Self {
            target,
            running: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn `routine` unless one is already running, in which case the
    /// request is ignored and `None` returned.
    ///
    /// `on_finish` runs exactly once, after the running flag is cleared.
    /// Must be called from within a Tokio runtime.
    pub fn start(
        &self,
        routine: Routine,
        on_finish: impl FnOnce(RoutineOutcome) + Send + 'static,
    ) -> Option<JoinHandle<()>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!(routine = %routine.name, "routine already running; request ignored");
            return None;
        }

        let token = CancellationToken::new();
        *self.lock_cancel() = Some(token.clone());

        let target = Arc::clone(&self.target);
        let mut guard = RunningGuard {
            running: Arc::clone(&self.running),
            outcome: None,
            on_finish: Some(Box::new(on_finish)),
        };
        info!(routine = %routine.name, steps = routine.steps.len(), "routine started");
        Some(tokio::spawn(async move {
            let outcome = run(&routine, target.as_ref(), &token).await;
            info!(routine = %routine.name, ?outcome, "routine finished");
            guard.outcome = Some(outcome);
        }))
    }

    /// Cancel the running routine.  Returns `false` when none is running.
    pub fn cancel(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        if let Some(token) = self.lock_cancel().as_ref() {
            token.cancel();
        }
        true
    }

    fn lock_cancel(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clears the running flag, then reports the outcome, however the task ends.
struct RunningGuard {
    running: Arc<AtomicBool>,
    outcome: Option<RoutineOutcome>,
    on_finish: Option<FinishCallback>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let outcome = self.outcome.take().unwrap_or(RoutineOutcome::Interrupted);
        if let Some(on_finish) = self.on_finish.take() {
            on_finish(outcome);
        }
    }
}

async fn run(routine: &Routine, target: &dyn RoutineTarget, token: &CancellationToken) -> RoutineOutcome {
    for (index, step) in routine.steps.iter().enumerate() {
        if token.is_cancelled() {
            return RoutineOutcome::Cancelled { step: index };
        }
        debug!(routine = %routine.name, step = index, command = step.command.name(), "routine step");
        if let Err(e) = target.execute(&step.command) {
            warn!(routine = %routine.name, step = index, error = %e, "routine step failed");
            return RoutineOutcome::Failed {
                step: index,
                error: RafaError::RoutineAborted {
                    routine: routine.name.clone(),
                    step: index,
                    reason: e.to_string(),
                },
            };
        }
        if step.delay_after.is_zero() {
            continue;
        }
        tokio::select! {
            _ = token.cancelled() => return RoutineOutcome::Cancelled { step: index + 1 },
            _ = tokio::time::sleep(step.delay_after) => {}
        }
    }
    RoutineOutcome::Completed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct Recorder {
        commands: Mutex<Vec<RobotCommand>>,
        fail_on: Option<&'static str>,
    }

    impl RoutineTarget for Recorder {
        fn execute(&self, command: &RobotCommand) -> Result<(), RafaError> {
            self.commands.lock().unwrap().push(command.clone());
            if self.fail_on == Some(command.name()) {
                return Err(RafaError::Platform {
                    command: command.name().into(),
                    details: "boom".into(),
                });
            }
            Ok(())
        }
    }

    fn finish_channel() -> (
        impl FnOnce(RoutineOutcome) + Send + 'static,
        oneshot::Receiver<RoutineOutcome>,
    ) {
        let (tx, rx) = oneshot::channel();
        (
            move |outcome| {
                let _ = tx.send(outcome);
            },
            rx,
        )
    }

    #[test]
    fn greeting_script_matches_expected_sequence() {
        let routine = Routine::greeting();
        let names: Vec<_> = routine.steps.iter().map(|s| s.command.name()).collect();
        assert_eq!(
            names,
            vec!["turn_left", "turn_right", "move_head", "move_head", "speak", "speak"]
        );
        assert_eq!(routine.total_duration(), Duration::from_millis(7_000));
        assert_eq!(routine.steps[4].command, speak(WELCOME_MESSAGE));
    }

    #[test]
    fn go_to_class_announces_and_reports() {
        let routine = Routine::go_to_class("1 ESO A");
        assert_eq!(routine.steps[0].command, speak("Iniciando ruta hacia 1 ESO A"));
        assert!(routine.steps[0].delay_after >= Duration::from_millis(3_000));
        assert_eq!(
            routine.steps.last().map(|s| &s.command),
            Some(&speak("No encuentro la clase 1 ESO A en este entorno."))
        );
        let stops = routine
            .steps
            .iter()
            .filter(|s| s.command == RobotCommand::StopMove)
            .count();
        assert_eq!(stops, 3);
    }

    #[test]
    fn speech_estimate_grows_with_length() {
        assert!(estimate_speech_duration("hola") < estimate_speech_duration(WELCOME_MESSAGE));
        assert_eq!(estimate_speech_duration(""), Duration::from_millis(SPEECH_BASE_MS));
    }

    #[tokio::test(start_paused = true)]
    async fn steps_run_in_order_and_flag_clears() {
        let target = Arc::new(Recorder::default());
        let runner = RoutineRunner::new(target.clone());
        let (on_finish, done) = finish_channel();

        runner.start(Routine::greeting(), on_finish).unwrap();
        assert!(runner.is_running());

        assert_eq!(done.await.unwrap(), RoutineOutcome::Completed);
        assert!(!runner.is_running());
        assert_eq!(target.commands.lock().unwrap().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn second_trigger_while_running_is_ignored() {
        let target = Arc::new(Recorder::default());
        let runner = RoutineRunner::new(target.clone());
        let (on_finish, done) = finish_channel();

        assert!(runner.start(Routine::greeting(), on_finish).is_some());
        assert!(runner.start(Routine::greeting(), |_| {}).is_none());

        done.await.unwrap();
        assert_eq!(target.commands.lock().unwrap().len(), 6);

        // Free again once finished.
        let (on_finish, done) = finish_channel();
        assert!(runner.start(Routine::step_back(), on_finish).is_some());
        assert_eq!(done.await.unwrap(), RoutineOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_step_aborts_and_clears_flag() {
        let target = Arc::new(Recorder {
            fail_on: Some("move_head"),
            ..Recorder::default()
        });
        let runner = RoutineRunner::new(target.clone());
        let (on_finish, done) = finish_channel();

        runner.start(Routine::greeting(), on_finish).unwrap();
        let outcome = done.await.unwrap();

        let RoutineOutcome::Failed { step, error } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(step, 2);
        assert!(matches!(error, RafaError::RoutineAborted { step: 2, .. }));
        assert!(!runner.is_running());
        // Nothing after the failed step was issued.
        assert_eq!(target.commands.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_cuts_the_current_delay() {
        let target = Arc::new(Recorder::default());
        let runner = RoutineRunner::new(target.clone());
        let (on_finish, done) = finish_channel();

        runner.start(Routine::go_to_class("3 ESO C"), on_finish).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(runner.cancel());

        assert_eq!(done.await.unwrap(), RoutineOutcome::Cancelled { step: 1 });
        assert!(!runner.is_running());
        assert_eq!(target.commands.lock().unwrap().len(), 1);
        assert!(!runner.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_task_reports_interrupted() {
        let target = Arc::new(Recorder::default());
        let runner = RoutineRunner::new(target);
        let (on_finish, done) = finish_channel();

        let handle = runner.start(Routine::greeting(), on_finish).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.abort();

        assert_eq!(done.await.unwrap(), RoutineOutcome::Interrupted);
        assert!(!runner.is_running());
    }
}
