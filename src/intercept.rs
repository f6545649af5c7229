//! Bounded, newest-first log of capability interceptions.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::capability::{CapabilityDescriptor, RiskTier};
use crate::policy::PolicyStatus;

/// Log capacity of the privacy-browser shield.
pub const BROWSER_LOG_CAPACITY: usize = 100;

/// Log capacity of the code-runner API blocker.
pub const BLOCKER_LOG_CAPACITY: usize = 50;

/// A single recorded interception. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub capability_id: String,
    pub display_name: String,
    pub risk_tier: RiskTier,
    pub status_at_emission: PolicyStatus,
    /// Navigation target or run context the event belongs to.
    pub origin: String,
    /// True for classifier telemetry, false for interceptions relayed from
    /// a running context.
    pub simulated: bool,
}

impl InterceptEvent {
    pub fn new(
        descriptor: &CapabilityDescriptor,
        status_at_emission: PolicyStatus,
        origin: impl Into<String>,
        timestamp: DateTime<Utc>,
        simulated: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            capability_id: descriptor.id.to_string(),
            display_name: descriptor.display_name.to_string(),
            risk_tier: descriptor.risk_tier,
            status_at_emission,
            origin: origin.into(),
            simulated,
        }
    }
}

/// Fixed-capacity ring buffer, most recent event first.
#[derive(Debug, Clone)]
pub struct InterceptEventLog {
    events: VecDeque<InterceptEvent>,
    capacity: usize,
}

impl InterceptEventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Inserts at the front, silently evicting the oldest entry on overflow.
    pub fn append(&mut self, event: InterceptEvent) {
        self.events.push_front(event);
        self.events.truncate(self.capacity);
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Copy of the log, newest first.
    pub fn snapshot(&self) -> Vec<InterceptEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::catalog;

    fn event(n: usize) -> InterceptEvent {
        let registry = catalog::browser_shield();
        let descriptor = registry.by_id("sendBeacon").unwrap();
        InterceptEvent::new(
            descriptor,
            PolicyStatus::Blocked,
            format!("https://site{n}.example"),
            Utc::now(),
            true,
        )
    }

    #[test]
    fn test_append_is_newest_first() {
        let mut log = InterceptEventLog::with_capacity(10);
        log.append(event(1));
        log.append(event(2));
        let snapshot = log.snapshot();
        assert_eq!(snapshot[0].origin, "https://site2.example");
        assert_eq!(snapshot[1].origin, "https://site1.example");
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut log = InterceptEventLog::with_capacity(BLOCKER_LOG_CAPACITY);
        for n in 0..BLOCKER_LOG_CAPACITY + 7 {
            log.append(event(n));
        }
        assert_eq!(log.len(), BLOCKER_LOG_CAPACITY);
        let snapshot = log.snapshot();
        assert_eq!(
            snapshot[0].origin,
            format!("https://site{}.example", BLOCKER_LOG_CAPACITY + 6)
        );
        // Events 0..7 were evicted.
        assert_eq!(snapshot.last().unwrap().origin, "https://site7.example");
    }

    #[test]
    fn test_clear_and_snapshot_independence() {
        let mut log = InterceptEventLog::with_capacity(BROWSER_LOG_CAPACITY);
        log.append(event(1));
        let snapshot = log.snapshot();
        log.clear();
        assert!(log.is_empty());
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_event_copies_descriptor_fields() {
        let e = event(0);
        assert_eq!(e.capability_id, "sendBeacon");
        assert_eq!(e.risk_tier, RiskTier::High);
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["capabilityId"], "sendBeacon");
        assert_eq!(json["statusAtEmission"], "blocked");
    }

    #[test]
    fn test_event_ids_are_unique() {
        assert_ne!(event(0).id, event(0).id);
    }
}
