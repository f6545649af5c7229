//! Navigation target classification.
//!
//! This is simulated telemetry, not detection: every destination maps to a
//! fixed, repeatable set of capability ids that a site of that kind is
//! presumed to invoke. Nothing is fetched or scanned.

use serde::Serialize;
use url::Url;

/// Internal placeholder for an empty tab.
pub const NEW_TAB: &str = "shield://newtab";

const INTERNAL_SCHEME: &str = "shield://";

const SEARCH_URL: &str = "https://www.google.com/search?q=";

/// Domains known to track or fingerprint aggressively, with the
/// capabilities attributed to them. Matched in order, by substring.
const THREAT_DB: &[(&str, &[&str])] = &[
    ("facebook.com", &["sendBeacon", "canvasFingerprint", "cookieAccess", "PushManager", "RTCPeerConnection"]),
    ("instagram.com", &["sendBeacon", "canvasFingerprint", "cookieAccess", "PushManager"]),
    ("google.com", &["sendBeacon", "canvasFingerprint", "performanceTiming", "cookieAccess"]),
    ("doubleclick.net", &["sendBeacon", "canvasFingerprint", "webglFingerprint", "audioFingerprint", "RTCPeerConnection", "plugins"]),
    ("tiktok.com", &["sendBeacon", "canvasFingerprint", "DeviceMotionEvent", "Accelerometer", "hardwareConcurrency", "deviceMemory", "networkInfo"]),
    ("twitter.com", &["sendBeacon", "cookieAccess", "canvasFingerprint", "PushManager"]),
    ("amazon.com", &["sendBeacon", "cookieAccess", "performanceTiming", "canvasFingerprint"]),
    ("reddit.com", &["sendBeacon", "canvasFingerprint", "cookieAccess"]),
    ("youtube.com", &["sendBeacon", "canvasFingerprint", "performanceTiming", "cookieAccess"]),
];

const DEFAULT_THREATS: &[&str] = &["sendBeacon", "canvasFingerprint", "cookieAccess"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Safe,
    Medium,
    High,
}

impl ThreatLevel {
    /// Badge text for the address bar.
    pub fn badge(&self) -> &'static str {
        match self {
            ThreatLevel::Safe => "✓ Safe",
            ThreatLevel::Medium => "◈ Monitor",
            ThreatLevel::High => "⚠ High Risk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub level: ThreatLevel,
    /// Capability ids presumed invoked by the target, in attribution order.
    pub capability_set: Vec<&'static str>,
    /// Matched entry of the tracking table, if any.
    pub matched_domain: Option<&'static str>,
}

/// Classifies a navigation target. Deterministic: the same target always
/// yields the same classification.
pub fn classify(target: &str) -> Classification {
    let target = target.trim();
    if is_internal(target) {
        return Classification {
            level: ThreatLevel::Safe,
            capability_set: Vec::new(),
            matched_domain: None,
        };
    }

    let matched = host_of(target)
        .and_then(|host| THREAT_DB.iter().find(|(domain, _)| host.contains(domain)));

    match matched {
        Some(&(domain, threats)) => Classification {
            level: ThreatLevel::High,
            capability_set: threats.to_vec(),
            matched_domain: Some(domain),
        },
        None => Classification {
            level: ThreatLevel::Medium,
            capability_set: DEFAULT_THREATS.to_vec(),
            matched_domain: None,
        },
    }
}

fn is_internal(target: &str) -> bool {
    target.is_empty() || target == "about:blank" || target.starts_with(INTERNAL_SCHEME)
}

/// Bare hostname of a target, with a leading `www.` removed.
fn host_of(target: &str) -> Option<String> {
    let parsed = if target.starts_with("http") {
        Url::parse(target)
    } else {
        Url::parse(&format!("https://{target}"))
    };
    let url = parsed.ok()?;
    let host = url.host_str()?;
    Some(host.replacen("www.", "", 1))
}

/// A normalized address-bar destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Navigation {
    pub url: String,
    pub title: String,
    pub secure: bool,
}

impl Navigation {
    pub fn is_new_tab(&self) -> bool {
        self.url == NEW_TAB
    }
}

/// Turns raw address-bar input into a destination. Bare words become a
/// search, dotted input gets an `https://` scheme. Blank input yields `None`.
pub fn normalize_target(raw: &str) -> Option<Navigation> {
    let input = raw.trim();
    if input.is_empty() {
        return None;
    }

    let url = if input == NEW_TAB || input == "newtab" {
        NEW_TAB.to_string()
    } else if input.starts_with("http://")
        || input.starts_with("https://")
        || input.starts_with(INTERNAL_SCHEME)
    {
        input.to_string()
    } else if input.contains('.') {
        format!("https://{input}")
    } else {
        let query: String = url::form_urlencoded::byte_serialize(input.as_bytes()).collect();
        format!("{SEARCH_URL}{query}")
    };

    let title = if url == NEW_TAB {
        "New Tab".to_string()
    } else {
        Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| url.clone())
    };
    let secure = url.starts_with("https") || url.starts_with(INTERNAL_SCHEME);

    Some(Navigation { url, title, secure })
}
