//! The session: one policy engine, one dispatcher, and the operations the
//! presentation layer calls.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info};

use crate::capability::{CapabilityDescriptor, Category};
use crate::classifier::{self, Classification, Navigation};
use crate::config::Config;
use crate::error::{HostError, PolicyError};
use crate::intercept::InterceptEvent;
use crate::policy::{self, PolicyEngine, PolicyStatus, PolicySummary, SharedPolicy, ShieldProfile};
use crate::runner::playback::PlaybackEngine;
use crate::runner::{DispatchState, ExecutionDispatcher};
use crate::sandbox::engine::LiveEngine;
use crate::sandbox::python::PythonEngine;
use crate::sandbox::script::ScriptEngine;
use crate::sandbox::{IsolatedExecutionHost, RunHandle};

/// Pacing of the simulated telemetry that follows a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationPacing {
    pub delay: Duration,
    pub stagger: Duration,
    pub max_events: usize,
}

impl NavigationPacing {
    fn from_config(config: &Config) -> Self {
        Self {
            delay: Duration::from_millis(config.shield.navigation_delay_ms),
            stagger: Duration::from_millis(config.shield.navigation_stagger_ms),
            max_events: config.shield.simulated_events_per_navigation,
        }
    }
}

/// Result of an address-bar navigation. `telemetry` resolves to the number
/// of simulated events logged, or to a cancellation error once the session
/// navigates elsewhere first.
pub struct NavigationOutcome {
    pub navigation: Navigation,
    pub classification: Classification,
    pub telemetry: JoinHandle<usize>,
}

pub struct Session {
    policy: SharedPolicy,
    dispatcher: ExecutionDispatcher,
    pacing: NavigationPacing,
    /// Telemetry of the page currently shown.
    telemetry: Mutex<Option<AbortHandle>>,
}

impl Session {
    /// Builds a session with the JavaScript and Python engines configured in
    /// `config`.
    pub fn new(config: &Config) -> Self {
        let engines: Vec<Arc<dyn LiveEngine>> = vec![
            Arc::new(ScriptEngine::new(config.engines.script_limits())),
            Arc::new(
                PythonEngine::new(config.engines.python.clone())
                    .with_sandbox(config.engines.python_sandbox.clone()),
            ),
        ];
        Self::with_engines(config, engines)
    }

    pub fn with_engines(config: &Config, engines: Vec<Arc<dyn LiveEngine>>) -> Self {
        let mut host = IsolatedExecutionHost::new(config.runner.timeout());
        for engine in engines {
            host.register(engine);
        }
        let (min_delay, max_delay) = config.runner.playback_delays();
        let dispatcher = ExecutionDispatcher::new(host, PlaybackEngine::new(min_delay, max_delay));
        info!("Session started with the {:?} profile", config.shield.profile);

        Self {
            policy: PolicyEngine::new(config.shield.profile).shared(),
            dispatcher,
            pacing: NavigationPacing::from_config(config),
            telemetry: Mutex::new(None),
        }
    }

    pub fn profile(&self) -> ShieldProfile {
        policy::lock(&self.policy).profile()
    }

    pub fn policy(&self) -> &SharedPolicy {
        &self.policy
    }

    pub fn run_state(&self) -> DispatchState {
        self.dispatcher.state()
    }

    // ── runs ──────────────────────────────────────

    pub fn run_code(&self, language: &str, source: &str) -> Result<RunHandle, HostError> {
        self.dispatcher.run(language, source, self.policy.clone())
    }

    /// Runs a page script directly in the JavaScript host, with
    /// interceptions attributed to `origin`.
    pub fn run_page_script(&self, origin: &str, script: &str) -> Result<RunHandle, HostError> {
        self.dispatcher
            .host()
            .start("javascript", script, origin, self.policy.clone())
    }

    // ── policy ──────────────────────────────────────

    pub fn capabilities(&self) -> Vec<(CapabilityDescriptor, PolicyStatus)> {
        policy::lock(&self.policy).store().entries()
    }

    pub fn capability_status(&self, id: &str) -> Result<PolicyStatus, PolicyError> {
        policy::lock(&self.policy).store().get(id)
    }

    pub fn toggle_capability(&self, id: &str) -> Result<PolicyStatus, PolicyError> {
        policy::lock(&self.policy).toggle(id)
    }

    pub fn set_capability(&self, id: &str, status: PolicyStatus) -> Result<(), PolicyError> {
        policy::lock(&self.policy).store_mut().set(id, status)
    }

    pub fn set_category_policy(&self, category: Category) -> PolicyStatus {
        policy::lock(&self.policy).store_mut().toggle_category(category)
    }

    pub fn block_all(&self) {
        policy::lock(&self.policy).store_mut().set_all(PolicyStatus::Blocked);
    }

    pub fn allow_all(&self) {
        policy::lock(&self.policy).store_mut().set_all(PolicyStatus::Allowed);
    }

    pub fn reset_policy(&self) {
        policy::lock(&self.policy).store_mut().reset_to_defaults();
    }

    pub fn policy_summary(&self) -> PolicySummary {
        policy::lock(&self.policy).store().summary()
    }

    /// Capabilities matching `query`, optionally narrowed to one status.
    pub fn search(
        &self,
        query: &str,
        status: Option<PolicyStatus>,
    ) -> Vec<(CapabilityDescriptor, PolicyStatus)> {
        let engine = policy::lock(&self.policy);
        let store = engine.store();
        store
            .registry()
            .search(query)
            .into_iter()
            .filter_map(|d| {
                let current = store.get(d.id).ok()?;
                status
                    .map_or(true, |wanted| wanted == current)
                    .then_some((*d, current))
            })
            .collect()
    }

    // ── log ──────────────────────────────────────

    pub fn intercept_log(&self) -> Vec<InterceptEvent> {
        policy::lock(&self.policy).log().snapshot()
    }

    pub fn clear_log(&self) {
        policy::lock(&self.policy).clear_log();
    }

    // ── navigation ──────────────────────────────────────

    pub fn classify_target(&self, url: &str) -> Classification {
        classifier::classify(url)
    }

    /// Normalizes address-bar input, classifies the destination and
    /// schedules its simulated telemetry. Blank input yields `None`.
    pub fn navigate(&self, input: &str) -> Option<NavigationOutcome> {
        let navigation = classifier::normalize_target(input)?;
        let classification = classifier::classify(&navigation.url);
        info!(
            "Navigating to {} ({:?}, {} presumed capabilities)",
            navigation.url,
            classification.level,
            classification.capability_set.len()
        );

        let ids: Vec<&'static str> = classification
            .capability_set
            .iter()
            .copied()
            .take(self.pacing.max_events)
            .collect();
        let telemetry = tokio::spawn(simulate_telemetry(
            self.policy.clone(),
            navigation.url.clone(),
            ids,
            self.pacing,
        ));
        // Only the current page's events land in the log.
        let previous = self
            .telemetry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(telemetry.abort_handle());
        if let Some(previous) = previous {
            previous.abort();
        }

        Some(NavigationOutcome {
            navigation,
            classification,
            telemetry,
        })
    }
}

async fn simulate_telemetry(
    policy: SharedPolicy,
    origin: String,
    ids: Vec<&'static str>,
    pacing: NavigationPacing,
) -> usize {
    if ids.is_empty() {
        return 0;
    }
    tokio::time::sleep(pacing.delay).await;

    let mut recorded = 0;
    for (i, id) in ids.into_iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(pacing.stagger).await;
        }
        let event = policy::lock(&policy).record_intercept(id, &origin, Utc::now(), true);
        if event.is_some() {
            recorded += 1;
        }
    }
    debug!("Simulated {recorded} events for {origin}");
    recorded
}
