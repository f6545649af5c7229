//! Code runner: routes a run to a live engine or to scripted playback.
//!
//! The dispatcher owns the externally visible run state
//! (`Idle → Running → Terminal`). Languages with a real engine go through
//! the [`IsolatedExecutionHost`], all others through the
//! [`PlaybackEngine`]. Like the host, it rejects a run while another one is
//! in progress.

pub mod language;
pub mod playback;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Local;
use tracing::{info, warn};

use crate::error::{HostError, RunFault};
use crate::policy::SharedPolicy;
use crate::sandbox::{IsolatedExecutionHost, OutputLine, RunHandle, RunRecorder, TerminalState};
use playback::PlaybackEngine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Running(String),
    Terminal(TerminalState),
}

pub struct ExecutionDispatcher {
    host: IsolatedExecutionHost,
    playback: Arc<PlaybackEngine>,
    state: Arc<Mutex<DispatchState>>,
}

impl ExecutionDispatcher {
    pub fn new(host: IsolatedExecutionHost, playback: PlaybackEngine) -> Self {
        Self {
            host,
            playback: Arc::new(playback),
            state: Arc::new(Mutex::new(DispatchState::Idle)),
        }
    }

    pub fn host(&self) -> &IsolatedExecutionHost {
        &self.host
    }

    pub fn state(&self) -> DispatchState {
        lock_state(&self.state).clone()
    }

    /// Runs `source` as `language`. Interceptions are attributed to
    /// `run:<language>`.
    pub fn run(
        &self,
        language: &str,
        source: &str,
        policy: SharedPolicy,
    ) -> Result<RunHandle, HostError> {
        self.run_with_origin(language, source, &format!("run:{language}"), policy)
    }

    pub fn run_with_origin(
        &self,
        language: &str,
        source: &str,
        origin: &str,
        policy: SharedPolicy,
    ) -> Result<RunHandle, HostError> {
        let mut state = lock_state(&self.state);
        if let DispatchState::Running(active) = &*state {
            warn!("Rejecting {language} run: {active} run in progress");
            return Err(HostError::Busy);
        }

        let descriptor = language::find(language);
        let label = descriptor.map(|d| d.label).unwrap_or(language);
        let real_engine = descriptor.is_some_and(|d| d.has_real_engine);

        // Claim the host before touching the dispatcher state so a busy
        // host leaves it unchanged.
        let slot = if real_engine {
            match self.host.reserve(language) {
                Ok(slot) => Some(slot),
                Err(HostError::NoEngine(_)) => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        *state = DispatchState::Running(language.to_string());
        drop(state);
        info!("Running {label}");

        let (mut recorder, handle) = RunRecorder::new(language);
        let finished = self.state.clone();
        recorder.on_finish(move |result| {
            *lock_state(&finished) = DispatchState::Terminal(result.terminal);
        });
        recorder.line(OutputLine::sys(format!("[runner] Running {label}...")));
        recorder.line(OutputLine::sys(format!(
            "[runner] {}",
            Local::now().format("%H:%M:%S")
        )));

        match slot {
            Some(slot) => slot.launch(recorder, source.to_string(), origin.to_string(), policy),
            None if real_engine => {
                warn!("No live engine registered for {language}");
                recorder.line(OutputLine::err(format!(
                    "Failed to load {label} runtime: no engine registered"
                )));
                recorder.finish(
                    TerminalState::Failed,
                    Some(RunFault::EngineUnavailable(format!("no engine registered for {language}"))),
                );
            }
            None => {
                let playback = self.playback.clone();
                let language = language.to_string();
                tokio::spawn(async move {
                    match playback.play(&language, &mut recorder).await {
                        Ok(()) => recorder.finish(TerminalState::Completed, None),
                        Err(fault) => {
                            recorder.line(OutputLine::err(format!(
                                "Language '{language}' not yet supported in sandbox."
                            )));
                            recorder.finish(TerminalState::Failed, Some(fault))
                        }
                    }
                });
            }
        }
        Ok(handle)
    }
}

fn lock_state(state: &Mutex<DispatchState>) -> MutexGuard<'_, DispatchState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
