//! Capability catalog: static descriptors of privileged operations.
//!
//! A capability is a named browser/runtime entry point (camera access,
//! clipboard read, GPS...) that the shield can block, allow or monitor.
//! Descriptors are immutable process-wide constants; all mutable state
//! lives in [`crate::policy::PolicyStore`].

pub mod catalog;

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::error::PolicyError;
use crate::policy::PolicyStatus;

/// Functional grouping used by the category ON/OFF controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Tracking,
    Sensors,
    Location,
    Media,
    Network,
    Clipboard,
    Notifications,
    Hardware,
    Fingerprint,
    Storage,
    Security,
    Standard,
}

impl Category {
    pub const ALL: [Category; 12] = [
        Category::Tracking,
        Category::Sensors,
        Category::Location,
        Category::Media,
        Category::Network,
        Category::Clipboard,
        Category::Notifications,
        Category::Hardware,
        Category::Fingerprint,
        Category::Storage,
        Category::Security,
        Category::Standard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Tracking => "tracking",
            Category::Sensors => "sensors",
            Category::Location => "location",
            Category::Media => "media",
            Category::Network => "network",
            Category::Clipboard => "clipboard",
            Category::Notifications => "notifications",
            Category::Hardware => "hardware",
            Category::Fingerprint => "fingerprint",
            Category::Storage => "storage",
            Category::Security => "security",
            Category::Standard => "standard",
        }
    }

    /// Parses the snake_case name used in config files and the CLI.
    pub fn parse(name: &str) -> Option<Category> {
        let name = name.trim().to_ascii_lowercase();
        Category::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How dangerous a capability is when left unrestricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum RiskTier {
    #[serde(rename = "critical")]
    Critical,
    #[serde(rename = "high")]
    High,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "low")]
    Low,
    /// Standard API with no privacy implication.
    #[serde(rename = "none")]
    Safe,
}

impl RiskTier {
    /// Badge label shown next to a capability.
    pub fn label(&self) -> &'static str {
        match self {
            RiskTier::Critical => "CRITICAL",
            RiskTier::High => "HIGH",
            RiskTier::Medium => "MEDIUM",
            RiskTier::Low => "LOW",
            RiskTier::Safe => "SAFE",
        }
    }
}

/// Immutable description of one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    /// Unique key, also the id carried by intercept notifications.
    pub id: &'static str,
    pub display_name: &'static str,
    pub category: Category,
    pub risk_tier: RiskTier,
    /// Human-readable justification for the default status.
    pub rationale: &'static str,
    pub default_status: PolicyStatus,
    /// Dotted JavaScript path of the entry point (`navigator.geolocation`,
    /// `HTMLCanvasElement.prototype.toDataURL`...). Used by the generic
    /// override and by monitor wrappers.
    pub entry_point: &'static str,
}

/// Read-only catalog of capability descriptors, keyed uniquely by id.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    descriptors: Vec<CapabilityDescriptor>,
    index: HashMap<&'static str, usize>,
}

impl CapabilityRegistry {
    /// Builds a registry, rejecting duplicate ids.
    pub fn new(descriptors: Vec<CapabilityDescriptor>) -> Result<Self, PolicyError> {
        let mut index = HashMap::with_capacity(descriptors.len());
        for (position, descriptor) in descriptors.iter().enumerate() {
            if index.insert(descriptor.id, position).is_some() {
                return Err(PolicyError::DuplicateCapability(descriptor.id.to_string()));
            }
        }
        Ok(Self { descriptors, index })
    }

    /// All descriptors, in catalog order.
    pub fn list(&self) -> &[CapabilityDescriptor] {
        &self.descriptors
    }

    pub fn by_id(&self, id: &str) -> Option<&CapabilityDescriptor> {
        self.index.get(id).and_then(|&i| self.descriptors.get(i))
    }

    /// Like [`by_id`](Self::by_id) but reports a miss as `UnknownCapability`.
    pub fn require(&self, id: &str) -> Result<&CapabilityDescriptor, PolicyError> {
        self.by_id(id)
            .ok_or_else(|| PolicyError::UnknownCapability(id.to_string()))
    }

    pub fn by_category(&self, category: Category) -> Vec<&CapabilityDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.category == category)
            .collect()
    }

    /// Categories that have at least one member, in declaration order.
    pub fn categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| self.descriptors.iter().any(|d| d.category == *c))
            .collect()
    }

    /// Case-insensitive substring search over name, category and rationale.
    pub fn search(&self, query: &str) -> Vec<&CapabilityDescriptor> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.descriptors.iter().collect();
        }
        self.descriptors
            .iter()
            .filter(|d| {
                d.display_name.to_lowercase().contains(&needle)
                    || d.category.as_str().contains(&needle)
                    || d.rationale.to_lowercase().contains(&needle)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
