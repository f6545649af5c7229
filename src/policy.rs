//! Per-capability enforcement state.
//!
//! The store is read by the injection synthesizer once, when a context is
//! created. Changing a status never affects a context that is already
//! running.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capability::{catalog, CapabilityDescriptor, CapabilityRegistry, Category};
use crate::error::PolicyError;
use crate::intercept::{InterceptEvent, InterceptEventLog, BLOCKER_LOG_CAPACITY, BROWSER_LOG_CAPACITY};

/// Enforcement status of a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStatus {
    Blocked,
    Allowed,
    /// Not enforced, but invocations are still logged.
    Monitor,
}

impl PolicyStatus {
    /// Next status in the `blocked → allowed → monitor → blocked` cycle.
    pub fn next(self) -> Self {
        match self {
            PolicyStatus::Blocked => PolicyStatus::Allowed,
            PolicyStatus::Allowed => PolicyStatus::Monitor,
            PolicyStatus::Monitor => PolicyStatus::Blocked,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyStatus::Blocked => "blocked",
            PolicyStatus::Allowed => "allowed",
            PolicyStatus::Monitor => "monitor",
        }
    }
}

impl fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-category enforcement counts, backing a category ON/OFF control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySummary {
    pub category: Category,
    pub blocked: usize,
    pub total: usize,
}

impl CategorySummary {
    /// A category control reads ON only when every member is blocked.
    pub fn enforced(&self) -> bool {
        self.total > 0 && self.blocked == self.total
    }
}

/// Aggregate counts for the policy panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicySummary {
    pub total: usize,
    pub blocked: usize,
    pub allowed: usize,
    pub monitor: usize,
    /// `blocked / total`, as a rounded percentage.
    pub percent_protected: u8,
    pub categories: Vec<CategorySummary>,
}

/// Mutable mapping from capability id to its current status.
#[derive(Debug, Clone)]
pub struct PolicyStore {
    registry: Arc<CapabilityRegistry>,
    statuses: HashMap<&'static str, PolicyStatus>,
}

impl PolicyStore {
    /// Creates a store with every capability at its default status.
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        let statuses = registry
            .list()
            .iter()
            .map(|d| (d.id, d.default_status))
            .collect();
        Self { registry, statuses }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn get(&self, id: &str) -> Result<PolicyStatus, PolicyError> {
        self.statuses
            .get(id)
            .copied()
            .ok_or_else(|| PolicyError::UnknownCapability(id.to_string()))
    }

    pub fn set(&mut self, id: &str, status: PolicyStatus) -> Result<(), PolicyError> {
        let slot = self
            .statuses
            .get_mut(id)
            .ok_or_else(|| PolicyError::UnknownCapability(id.to_string()))?;
        *slot = status;
        debug!("Policy: {id} -> {status}");
        Ok(())
    }

    /// Advances a capability one step through the status cycle and returns
    /// the new status.
    pub fn cycle(&mut self, id: &str) -> Result<PolicyStatus, PolicyError> {
        let next = self.get(id)?.next();
        self.set(id, next)?;
        Ok(next)
    }

    /// Two-state toggle: `blocked` becomes `allowed`, anything else becomes
    /// `blocked`.
    pub fn flip(&mut self, id: &str) -> Result<PolicyStatus, PolicyError> {
        let next = match self.get(id)? {
            PolicyStatus::Blocked => PolicyStatus::Allowed,
            PolicyStatus::Allowed | PolicyStatus::Monitor => PolicyStatus::Blocked,
        };
        self.set(id, next)?;
        Ok(next)
    }

    pub fn set_all(&mut self, status: PolicyStatus) {
        for slot in self.statuses.values_mut() {
            *slot = status;
        }
        info!("Policy: all {} capabilities set to {status}", self.statuses.len());
    }

    pub fn reset_to_defaults(&mut self) {
        for descriptor in self.registry.list() {
            self.statuses.insert(descriptor.id, descriptor.default_status);
        }
        info!("Policy: reset to defaults");
    }

    /// Category ON/OFF control. When every member is blocked the whole
    /// category becomes allowed, otherwise the whole category becomes
    /// blocked. Monitor members collapse like any other non-blocked member.
    ///
    /// Returns the status applied to the members.
    pub fn toggle_category(&mut self, category: Category) -> PolicyStatus {
        let members: Vec<&'static str> = self
            .registry
            .by_category(category)
            .iter()
            .map(|d| d.id)
            .collect();
        let all_blocked = members
            .iter()
            .all(|id| self.statuses.get(id) == Some(&PolicyStatus::Blocked));
        let target = if all_blocked {
            PolicyStatus::Allowed
        } else {
            PolicyStatus::Blocked
        };
        for id in &members {
            self.statuses.insert(*id, target);
        }
        info!(
            "Policy: category {category} ({} members) set to {target}",
            members.len()
        );
        target
    }

    /// Descriptors paired with their current status, in catalog order.
    pub fn entries(&self) -> Vec<(CapabilityDescriptor, PolicyStatus)> {
        self.registry
            .list()
            .iter()
            .map(|d| (*d, self.status_of(d)))
            .collect()
    }

    /// Descriptors whose current status is `status`, in catalog order.
    pub fn with_status(&self, status: PolicyStatus) -> Vec<&CapabilityDescriptor> {
        self.registry
            .list()
            .iter()
            .filter(|d| self.status_of(d) == status)
            .collect()
    }

    pub fn summary(&self) -> PolicySummary {
        let count = |status: PolicyStatus| self.statuses.values().filter(|s| **s == status).count();
        let total = self.statuses.len();
        let blocked = count(PolicyStatus::Blocked);
        let percent_protected = if total == 0 {
            0
        } else {
            ((blocked as f64 / total as f64) * 100.0).round() as u8
        };
        let categories = self
            .registry
            .categories()
            .into_iter()
            .map(|category| {
                let members = self.registry.by_category(category);
                CategorySummary {
                    category,
                    blocked: members
                        .iter()
                        .filter(|d| self.status_of(d) == PolicyStatus::Blocked)
                        .count(),
                    total: members.len(),
                }
            })
            .collect();

        PolicySummary {
            total,
            blocked,
            allowed: count(PolicyStatus::Allowed),
            monitor: count(PolicyStatus::Monitor),
            percent_protected,
            categories,
        }
    }

    // Every registry id is seeded in `new`, so the fallback never triggers.
    fn status_of(&self, descriptor: &CapabilityDescriptor) -> PolicyStatus {
        self.statuses
            .get(descriptor.id)
            .copied()
            .unwrap_or(descriptor.default_status)
    }
}

/// Which shield a session runs: the privacy-browser shield or the
/// code-runner API blocker. They differ in catalog, log capacity and the
/// single-capability toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShieldProfile {
    #[default]
    Browser,
    Blocker,
}

impl ShieldProfile {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "browser" => Some(ShieldProfile::Browser),
            "blocker" => Some(ShieldProfile::Blocker),
            _ => None,
        }
    }

    pub fn registry(&self) -> CapabilityRegistry {
        match self {
            ShieldProfile::Browser => catalog::browser_shield(),
            ShieldProfile::Blocker => catalog::api_blocker(),
        }
    }

    pub fn log_capacity(&self) -> usize {
        match self {
            ShieldProfile::Browser => BROWSER_LOG_CAPACITY,
            ShieldProfile::Blocker => BLOCKER_LOG_CAPACITY,
        }
    }
}

/// The session-owned policy state: the store and the intercept log, always
/// mutated together behind one lock.
#[derive(Debug)]
pub struct PolicyEngine {
    profile: ShieldProfile,
    store: PolicyStore,
    log: InterceptEventLog,
}

/// Handle passed to the dispatcher, the host and navigation tasks.
pub type SharedPolicy = Arc<Mutex<PolicyEngine>>;

impl PolicyEngine {
    pub fn new(profile: ShieldProfile) -> Self {
        Self {
            profile,
            store: PolicyStore::new(Arc::new(profile.registry())),
            log: InterceptEventLog::with_capacity(profile.log_capacity()),
        }
    }

    pub fn shared(self) -> SharedPolicy {
        Arc::new(Mutex::new(self))
    }

    pub fn profile(&self) -> ShieldProfile {
        self.profile
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut PolicyStore {
        &mut self.store
    }

    pub fn log(&self) -> &InterceptEventLog {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
        info!("Intercept log cleared");
    }

    /// Single-capability toggle: the browser shield cycles through all three
    /// statuses, the API blocker flips between blocked and allowed.
    pub fn toggle(&mut self, id: &str) -> Result<PolicyStatus, PolicyError> {
        match self.profile {
            ShieldProfile::Browser => self.store.cycle(id),
            ShieldProfile::Blocker => self.store.flip(id),
        }
    }

    /// Logs one interception of `id`, stamped with the status the store holds
    /// right now. Ids outside the catalog are dropped.
    pub fn record_intercept(
        &mut self,
        id: &str,
        origin: &str,
        timestamp: DateTime<Utc>,
        simulated: bool,
    ) -> Option<InterceptEvent> {
        let Some(descriptor) = self.store.registry().by_id(id).copied() else {
            warn!("Dropping intercept for unknown capability '{id}'");
            return None;
        };
        let status = self.store.status_of(&descriptor);
        let event = InterceptEvent::new(&descriptor, status, origin, timestamp, simulated);
        debug!("Intercept: {id} ({status}) from {origin}");
        self.log.append(event.clone());
        Some(event)
    }
}

/// Locks the shared policy. A panic while holding the lock cannot leave the
/// store or the log half-written, so a poisoned lock is taken over as is.
pub fn lock(policy: &SharedPolicy) -> MutexGuard<'_, PolicyEngine> {
    policy.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::catalog;

    fn browser_store() -> PolicyStore {
        PolicyStore::new(Arc::new(catalog::browser_shield()))
    }

    #[test]
    fn test_store_starts_at_defaults() {
        let store = browser_store();
        for d in store.registry().list() {
            assert_eq!(store.get(d.id).unwrap(), d.default_status);
        }
    }

    #[test]
    fn test_unknown_capability_fails() {
        let mut store = browser_store();
        assert_eq!(
            store.get("teleport").unwrap_err(),
            PolicyError::UnknownCapability("teleport".to_string())
        );
        assert!(store.set("teleport", PolicyStatus::Allowed).is_err());
        assert!(store.cycle("teleport").is_err());
    }

    #[test]
    fn test_cycle_order() {
        let mut store = browser_store();
        assert_eq!(store.get("geolocation").unwrap(), PolicyStatus::Blocked);
        assert_eq!(store.cycle("geolocation").unwrap(), PolicyStatus::Allowed);
        assert_eq!(store.cycle("geolocation").unwrap(), PolicyStatus::Monitor);
        assert_eq!(store.cycle("geolocation").unwrap(), PolicyStatus::Blocked);
    }

    #[test]
    fn test_cycle_three_times_is_identity_for_every_status() {
        let mut store = browser_store();
        for start in [PolicyStatus::Blocked, PolicyStatus::Allowed, PolicyStatus::Monitor] {
            store.set("fetch", start).unwrap();
            for _ in 0..3 {
                store.cycle("fetch").unwrap();
            }
            assert_eq!(store.get("fetch").unwrap(), start);
        }
    }

    #[test]
    fn test_flip_is_two_state() {
        let mut store = browser_store();
        store.set("cookieAccess", PolicyStatus::Monitor).unwrap();
        assert_eq!(store.flip("cookieAccess").unwrap(), PolicyStatus::Blocked);
        assert_eq!(store.flip("cookieAccess").unwrap(), PolicyStatus::Allowed);
        assert_eq!(store.flip("cookieAccess").unwrap(), PolicyStatus::Blocked);
    }

    #[test]
    fn test_toggle_category_collapses_monitor() {
        let mut store = browser_store();
        // Tracking holds both blocked and monitor members by default.
        let members: Vec<_> = store
            .registry()
            .by_category(Category::Tracking)
            .iter()
            .map(|d| d.id)
            .collect();
        assert!(members
            .iter()
            .any(|id| store.get(id).unwrap() == PolicyStatus::Monitor));

        assert_eq!(store.toggle_category(Category::Tracking), PolicyStatus::Blocked);
        assert!(members
            .iter()
            .all(|id| store.get(id).unwrap() == PolicyStatus::Blocked));

        assert_eq!(store.toggle_category(Category::Tracking), PolicyStatus::Allowed);
        assert!(members
            .iter()
            .all(|id| store.get(id).unwrap() == PolicyStatus::Allowed));
    }

    #[test]
    fn test_toggle_category_leaves_other_categories_alone() {
        let mut store = browser_store();
        store.toggle_category(Category::Sensors);
        assert_eq!(store.get("fetch").unwrap(), PolicyStatus::Allowed);
        assert_eq!(store.get("cookieAccess").unwrap(), PolicyStatus::Monitor);
    }

    #[test]
    fn test_set_all_and_reset() {
        let mut store = browser_store();
        store.set_all(PolicyStatus::Allowed);
        assert!(store.with_status(PolicyStatus::Blocked).is_empty());
        store.cycle("geolocation").unwrap();
        store.toggle_category(Category::Media);

        store.reset_to_defaults();
        for d in store.registry().list() {
            assert_eq!(store.get(d.id).unwrap(), d.default_status, "{}", d.id);
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut store = browser_store();
        let summary = store.summary();
        assert_eq!(summary.total, store.registry().len());
        assert_eq!(
            summary.blocked + summary.allowed + summary.monitor,
            summary.total
        );
        assert_eq!(summary.percent_protected, 50);

        store.set_all(PolicyStatus::Blocked);
        let summary = store.summary();
        assert_eq!(summary.percent_protected, 100);
        assert!(summary.categories.iter().all(|c| c.enforced()));
    }

    #[test]
    fn test_category_summary_enforced_only_when_all_blocked() {
        let mut store = browser_store();
        store.set("usb", PolicyStatus::Allowed).unwrap();
        let hardware = store
            .summary()
            .categories
            .into_iter()
            .find(|c| c.category == Category::Hardware)
            .unwrap();
        assert_eq!(hardware.blocked, hardware.total - 1);
        assert!(!hardware.enforced());
    }

    #[test]
    fn test_entries_follow_catalog_order() {
        let store = browser_store();
        let entries = store.entries();
        assert_eq!(entries.len(), store.registry().len());
        assert_eq!(entries[0].0.id, store.registry().list()[0].id);
    }

    #[test]
    fn test_status_serde() {
        assert_eq!(serde_json::to_string(&PolicyStatus::Monitor).unwrap(), "\"monitor\"");
        let status: PolicyStatus = serde_json::from_str("\"blocked\"").unwrap();
        assert_eq!(status, PolicyStatus::Blocked);
    }

    #[test]
    fn test_profile_toggle_semantics() {
        let mut browser = PolicyEngine::new(ShieldProfile::Browser);
        browser.toggle("geolocation").unwrap();
        assert_eq!(browser.toggle("geolocation").unwrap(), PolicyStatus::Monitor);

        let mut blocker = PolicyEngine::new(ShieldProfile::Blocker);
        assert_eq!(blocker.log().capacity(), BLOCKER_LOG_CAPACITY);
        let first = blocker.toggle("fetch").unwrap();
        let second = blocker.toggle("fetch").unwrap();
        assert_ne!(first, second);
        assert_ne!(second, PolicyStatus::Monitor);
    }

    #[test]
    fn test_record_intercept_stamps_current_status() {
        let mut engine = PolicyEngine::new(ShieldProfile::Browser);
        let event = engine
            .record_intercept("geolocation", "run:javascript", Utc::now(), false)
            .unwrap();
        assert_eq!(event.status_at_emission, PolicyStatus::Blocked);
        assert_eq!(event.origin, "run:javascript");
        assert!(!event.simulated);

        engine.store_mut().set("geolocation", PolicyStatus::Monitor).unwrap();
        engine.record_intercept("geolocation", "run:javascript", Utc::now(), false);
        let log = engine.log().snapshot();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].status_at_emission, PolicyStatus::Monitor);
        assert_eq!(log[1].status_at_emission, PolicyStatus::Blocked);
    }

    #[test]
    fn test_record_intercept_ignores_unknown_ids() {
        let mut engine = PolicyEngine::new(ShieldProfile::Browser);
        assert!(engine.record_intercept("teleport", "x", Utc::now(), false).is_none());
        assert!(engine.log().is_empty());
    }

    #[test]
    fn test_lock_recovers_from_poison() {
        let shared = PolicyEngine::new(ShieldProfile::Browser).shared();
        let poisoner = shared.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(shared.is_poisoned());
        assert_eq!(lock(&shared).profile(), ShieldProfile::Browser);
    }
}
