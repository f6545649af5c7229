//! Isolated execution host.
//!
//! Every run gets a fresh context from a [`LiveEngine`]. The host injects the
//! override script synthesized from the current policy, relays what the
//! context sends back, and races completion against a wall-clock deadline
//! measured from context creation. The context is released on every exit
//! path: [`engine::IsolatedContext`] tears itself down when dropped.
//!
//! Run lifecycle, per host:
//!
//! ```text
//! Idle → Initializing → Running → {Completed, Failed, TimedOut} → Idle
//! ```
//!
//! Only one run may be active at a time; a second `start` is rejected with
//! [`HostError::Busy`].

pub mod engine;
pub mod message;
pub mod python;
pub mod script;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant as Deadline;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{HostError, RunFault};
use crate::inject;
use crate::intercept::InterceptEvent;
use crate::policy::{self, SharedPolicy};
use engine::{IsolatedContext, LaunchRequest, LiveEngine};
use message::{ContextMessage, RelayedKind, RelayedLine};

/// Wall-clock limit of a run when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Prefix a context puts on the error line of an uncaught failure.
pub const UNCAUGHT_PREFIX: &str = "Uncaught ";

// ── Run output ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    /// Produced by the host or the dispatcher, never by user code.
    Sys,
    Out,
    Err,
    Warn,
}

impl LineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineKind::Sys => "sys",
            LineKind::Out => "out",
            LineKind::Err => "err",
            LineKind::Warn => "warn",
        }
    }
}

impl From<RelayedKind> for LineKind {
    fn from(kind: RelayedKind) -> Self {
        match kind {
            RelayedKind::Out => LineKind::Out,
            RelayedKind::Err => LineKind::Err,
            RelayedKind::Warn => LineKind::Warn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLine {
    pub kind: LineKind,
    pub text: String,
}

impl OutputLine {
    pub fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn sys(text: impl Into<String>) -> Self {
        Self::new(LineKind::Sys, text)
    }

    pub fn out(text: impl Into<String>) -> Self {
        Self::new(LineKind::Out, text)
    }

    pub fn err(text: impl Into<String>) -> Self {
        Self::new(LineKind::Err, text)
    }
}

impl From<RelayedLine> for OutputLine {
    fn from(line: RelayedLine) -> Self {
        Self::new(line.kind.into(), line.text)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalState {
    Completed,
    Failed,
    TimedOut,
}

/// Outcome of one run. Partial output is kept whatever the terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub language: String,
    pub started_at: DateTime<Utc>,
    pub lines: Vec<OutputLine>,
    pub elapsed_ms: u64,
    pub terminal: TerminalState,
    pub fault: Option<RunFault>,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.terminal == TerminalState::Completed
    }

    pub fn texts(&self) -> Vec<&str> {
        self.lines.iter().map(|l| l.text.as_str()).collect()
    }
}

/// Streamed while a run progresses. `Finished` is always the last update.
#[derive(Debug, Clone)]
pub enum RunUpdate {
    Line(OutputLine),
    Intercept(InterceptEvent),
    Finished(RunResult),
}

/// Caller side of a run.
pub struct RunHandle {
    run_id: Uuid,
    language: String,
    updates: mpsc::UnboundedReceiver<RunUpdate>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub async fn next_update(&mut self) -> Option<RunUpdate> {
        self.updates.recv().await
    }

    /// Skips intermediate updates and returns the terminal result.
    pub async fn wait(mut self) -> RunResult {
        while let Some(update) = self.updates.recv().await {
            if let RunUpdate::Finished(result) = update {
                return result;
            }
        }
        // The run task went away without finishing, which only happens when
        // the runtime is shutting down.
        warn!("Run {} ended without a result", self.run_id);
        RunResult {
            language: self.language,
            started_at: Utc::now(),
            lines: Vec::new(),
            elapsed_ms: 0,
            terminal: TerminalState::Failed,
            fault: Some(RunFault::RuntimeFault("run aborted".to_string())),
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = RunUpdate> {
        futures::stream::unfold(self.updates, |mut updates| async move {
            updates.recv().await.map(|update| (update, updates))
        })
    }
}

type FinishHook = Box<dyn FnOnce(&RunResult) + Send>;

/// Producer side of a run: accumulates output and streams every step to the
/// [`RunHandle`].
pub struct RunRecorder {
    language: String,
    started_at: DateTime<Utc>,
    clock: Instant,
    lines: Vec<OutputLine>,
    updates: mpsc::UnboundedSender<RunUpdate>,
    on_finish: Option<FinishHook>,
}

impl RunRecorder {
    pub fn new(language: &str) -> (Self, RunHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Self {
            language: language.to_string(),
            started_at: Utc::now(),
            clock: Instant::now(),
            lines: Vec::new(),
            updates: tx,
            on_finish: None,
        };
        let handle = RunHandle {
            run_id: Uuid::new_v4(),
            language: language.to_string(),
            updates: rx,
        };
        (recorder, handle)
    }

    /// Runs `hook` with the terminal result, before the caller sees it.
    pub fn on_finish(&mut self, hook: impl FnOnce(&RunResult) + Send + 'static) {
        self.on_finish = Some(Box::new(hook));
    }

    pub fn line(&mut self, line: OutputLine) {
        // A caller that dropped its handle still gets a complete RunResult
        // recorded, so send failures are ignored.
        let _ = self.updates.send(RunUpdate::Line(line.clone()));
        self.lines.push(line);
    }

    pub fn intercept(&self, event: InterceptEvent) {
        let _ = self.updates.send(RunUpdate::Intercept(event));
    }

    pub fn lines(&self) -> &[OutputLine] {
        &self.lines
    }

    pub fn finish(mut self, terminal: TerminalState, fault: Option<RunFault>) -> RunResult {
        let result = RunResult {
            language: self.language,
            started_at: self.started_at,
            lines: self.lines,
            elapsed_ms: self.clock.elapsed().as_millis() as u64,
            terminal,
            fault,
        };
        if let Some(hook) = self.on_finish.take() {
            hook(&result);
        }
        let _ = self.updates.send(RunUpdate::Finished(result.clone()));
        result
    }
}

// ── Host ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPhase {
    Idle,
    Initializing,
    Running,
}

pub struct IsolatedExecutionHost {
    engines: HashMap<String, Arc<dyn LiveEngine>>,
    timeout: Duration,
    phase: Arc<Mutex<HostPhase>>,
}

impl IsolatedExecutionHost {
    pub fn new(timeout: Duration) -> Self {
        Self {
            engines: HashMap::new(),
            timeout,
            phase: Arc::new(Mutex::new(HostPhase::Idle)),
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn LiveEngine>) -> Self {
        self.register(engine);
        self
    }

    pub fn register(&mut self, engine: Arc<dyn LiveEngine>) {
        info!("Registered live engine: {}", engine.label());
        self.engines.insert(engine.language().to_string(), engine);
    }

    pub fn has_engine(&self, language: &str) -> bool {
        self.engines.contains_key(language)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn phase(&self) -> HostPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the host for one run. The claim is released when the returned
    /// slot is dropped.
    pub fn reserve(&self, language: &str) -> Result<HostSlot, HostError> {
        let engine = self
            .engines
            .get(language)
            .cloned()
            .ok_or_else(|| HostError::NoEngine(language.to_string()))?;

        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase != HostPhase::Idle {
            warn!("Rejecting {language} run: host is {:?}", *phase);
            return Err(HostError::Busy);
        }
        *phase = HostPhase::Initializing;
        debug!("Host: Idle -> Initializing ({language})");

        Ok(HostSlot {
            engine,
            timeout: self.timeout,
            phase: self.phase.clone(),
        })
    }

    /// Starts `source` in a fresh context. Interceptions are logged against
    /// `policy` and attributed to `origin`.
    pub fn start(
        &self,
        language: &str,
        source: impl Into<String>,
        origin: impl Into<String>,
        policy: SharedPolicy,
    ) -> Result<RunHandle, HostError> {
        let slot = self.reserve(language)?;
        let (recorder, handle) = RunRecorder::new(language);
        slot.launch(recorder, source.into(), origin.into(), policy);
        Ok(handle)
    }
}

/// Exclusive claim on the host for one run.
pub struct HostSlot {
    engine: Arc<dyn LiveEngine>,
    timeout: Duration,
    phase: Arc<Mutex<HostPhase>>,
}

impl HostSlot {
    /// Spawns the run. Must be called from within a Tokio runtime.
    pub fn launch(self, recorder: RunRecorder, source: String, origin: String, policy: SharedPolicy) {
        tokio::spawn(self.drive(recorder, source, origin, policy));
    }

    fn set_phase(&self, next: HostPhase) {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("Host: {:?} -> {next:?}", *phase);
        *phase = next;
    }

    async fn drive(
        self,
        mut recorder: RunRecorder,
        source: String,
        origin: String,
        policy: SharedPolicy,
    ) -> RunResult {
        let label = self.engine.label().to_string();
        let overrides = self.engine.accepts_overrides().then(|| {
            let script = inject::synthesize(policy::lock(&policy).store());
            debug!(
                "Injecting {} override fragments ({} blocked, {} monitored)",
                script.fragment_count(),
                script.blocked.len(),
                script.monitored.len()
            );
            script.source
        });

        let deadline = Deadline::now() + self.timeout;
        let launched = self
            .engine
            .launch(LaunchRequest { source, overrides })
            .await;
        let mut context = match launched {
            Ok(context) => context,
            Err(fault) => {
                warn!("{label} runtime failed to start: {fault}");
                let detail = match &fault {
                    RunFault::EngineUnavailable(detail) => detail.clone(),
                    other => other.to_string(),
                };
                recorder.line(OutputLine::err(format!("Failed to load {label} runtime: {detail}")));
                drop(self);
                return recorder.finish(TerminalState::Failed, Some(fault));
            }
        };
        self.set_phase(HostPhase::Running);

        let outcome = relay(&mut context, &mut recorder, &origin, &policy, deadline).await;

        // Teardown first, then release the host, then report.
        drop(context);
        let timeout = self.timeout;
        drop(self);

        match outcome {
            Outcome::Completed { fault: None, elapsed_ms } => {
                recorder.line(OutputLine::sys(format!(
                    "[process] exited with code 0  ({}ms)",
                    elapsed_ms.round() as u64
                )));
                info!("{label} run completed");
                recorder.finish(TerminalState::Completed, None)
            }
            Outcome::Completed {
                fault: Some(message),
                elapsed_ms,
            } => {
                recorder.line(OutputLine::sys(format!(
                    "[process] exited with code 1  ({}ms)",
                    elapsed_ms.round() as u64
                )));
                info!("{label} run failed: {message}");
                recorder.finish(TerminalState::Failed, Some(RunFault::RuntimeFault(message)))
            }
            Outcome::TimedOut => {
                recorder.line(OutputLine::err(format!(
                    "Execution timed out ({}s limit)",
                    timeout.as_secs_f64()
                )));
                warn!("{label} run timed out after {}ms", timeout.as_millis());
                recorder.finish(
                    TerminalState::TimedOut,
                    Some(RunFault::TimedOut(timeout.as_millis() as u64)),
                )
            }
            Outcome::Vanished => {
                recorder.line(OutputLine::err("Context exited without completing"));
                warn!("{label} context closed without a completion message");
                recorder.finish(
                    TerminalState::Failed,
                    Some(RunFault::RuntimeFault("context exited without completing".to_string())),
                )
            }
        }
    }
}

impl Drop for HostSlot {
    fn drop(&mut self) {
        self.set_phase(HostPhase::Idle);
    }
}

enum Outcome {
    Completed { fault: Option<String>, elapsed_ms: f64 },
    TimedOut,
    Vanished,
}

/// Relays context messages until completion, deadline or disconnect. The
/// deadline is polled first so it wins over a completion arriving at the
/// same instant.
async fn relay(
    context: &mut IsolatedContext,
    recorder: &mut RunRecorder,
    origin: &str,
    policy: &SharedPolicy,
    deadline: Deadline,
) -> Outcome {
    loop {
        tokio::select! {
            biased;
            _ = tokio::time::sleep_until(deadline) => return Outcome::TimedOut,
            raw = context.recv() => {
                let Some(raw) = raw else {
                    return Outcome::Vanished;
                };
                match ContextMessage::parse(&raw) {
                    Some(ContextMessage::CapabilityIntercept { capability_id, timestamp }) => {
                        let at = DateTime::from_timestamp_millis(timestamp as i64).unwrap_or_else(Utc::now);
                        let event = policy::lock(policy).record_intercept(&capability_id, origin, at, false);
                        if let Some(event) = event {
                            recorder.intercept(event);
                        }
                    }
                    Some(ContextMessage::RunComplete { output_lines, elapsed_ms }) => {
                        let fault = output_lines
                            .iter()
                            .find(|l| l.kind == RelayedKind::Err && l.text.starts_with(UNCAUGHT_PREFIX))
                            .map(|l| l.text.clone());
                        for line in output_lines {
                            recorder.line(line.into());
                        }
                        return Outcome::Completed { fault, elapsed_ms };
                    }
                    None => {}
                }
            }
        }
    }
}
