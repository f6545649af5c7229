//! Built-in capability catalogs.
//!
//! Two catalogs ship with the crate:
//!
//! - [`browser_shield`]: the privacy-browser shield. Tri-state defaults:
//!   critical/high vectors blocked, medium vectors monitored, standard web
//!   APIs allowed.
//! - [`api_blocker`]: the code-runner API blocker. Defaults are decided
//!   per category (every member of a default-blocked category starts
//!   blocked, everything else allowed).

use super::{CapabilityDescriptor, CapabilityRegistry, Category, RiskTier};
use crate::policy::PolicyStatus;

use Category::*;
use PolicyStatus::{Allowed, Blocked, Monitor};
use RiskTier::{Critical, High, Low, Medium, Safe};

const fn cap(
    id: &'static str,
    display_name: &'static str,
    category: Category,
    risk_tier: RiskTier,
    default_status: PolicyStatus,
    entry_point: &'static str,
    rationale: &'static str,
) -> CapabilityDescriptor {
    CapabilityDescriptor {
        id,
        display_name,
        category,
        risk_tier,
        rationale,
        default_status,
        entry_point,
    }
}

// ── Browser shield ───────────────────────────────────

pub(crate) const BROWSER_SHIELD: &[CapabilityDescriptor] = &[
    // Critical: blocked
    cap("RTCPeerConnection", "RTCPeerConnection", Network, Critical, Blocked, "RTCPeerConnection",
        "Leaks real IP addresses behind a VPN or proxy through STUN requests"),
    cap("getUserMedia", "getUserMedia", Media, Critical, Blocked, "navigator.mediaDevices.getUserMedia",
        "Camera and microphone capture without an obvious indicator"),
    cap("getDisplayMedia", "getDisplayMedia", Media, Critical, Blocked, "navigator.mediaDevices.getDisplayMedia",
        "Screen capture and visual spying"),
    cap("geolocation", "navigator.geolocation", Location, Critical, Blocked, "navigator.geolocation",
        "Precise GPS coordinates disclose the physical location"),
    cap("bluetooth", "navigator.bluetooth", Hardware, Critical, Blocked, "navigator.bluetooth",
        "Bluetooth enumeration maps nearby devices and widens the attack surface"),
    cap("usb", "navigator.usb", Hardware, Critical, Blocked, "navigator.usb",
        "USB access enables data exfiltration and firmware injection"),
    cap("serial", "navigator.serial", Hardware, Critical, Blocked, "navigator.serial",
        "Serial ports give direct hardware control"),
    cap("hid", "navigator.hid", Hardware, Critical, Blocked, "navigator.hid",
        "HID access allows keyboard and mouse emulation attacks"),
    cap("DeviceMotionEvent", "DeviceMotionEvent", Sensors, Critical, Blocked, "DeviceMotionEvent",
        "Accelerometer events enable motion fingerprinting and location inference"),
    cap("DeviceOrientation", "DeviceOrientationEvent", Sensors, Critical, Blocked, "DeviceOrientationEvent",
        "Gyroscope orientation maps the physical environment"),
    cap("Gyroscope", "Gyroscope", Sensors, Critical, Blocked, "Gyroscope",
        "Raw gyroscope data supports gait analysis and precise fingerprinting"),
    cap("Accelerometer", "Accelerometer", Sensors, Critical, Blocked, "Accelerometer",
        "Raw accelerometer data profiles device motion"),
    // High: blocked
    cap("sendBeacon", "navigator.sendBeacon", Tracking, High, Blocked, "navigator.sendBeacon",
        "Silent analytics beacon that fires even on page unload"),
    cap("clipboardRead", "clipboard.readText", Clipboard, High, Blocked, "navigator.clipboard.readText",
        "Reads the clipboard without obvious UI, harvesting secrets"),
    cap("clipboardReadRaw", "clipboard.read", Clipboard, High, Blocked, "navigator.clipboard.read",
        "Rich clipboard read captures images and formatted data"),
    cap("windowName", "window.name", Tracking, High, Blocked, "name",
        "Persists a string across navigations, a silent cross-site tracking token"),
    cap("canvasFingerprint", "canvas.toDataURL", Fingerprint, High, Blocked, "HTMLCanvasElement.prototype.toDataURL",
        "Canvas rendering identifies the GPU driver and font stack"),
    cap("webglFingerprint", "WebGL.getParameter", Fingerprint, High, Blocked, "WebGLRenderingContext.prototype.getParameter",
        "GPU vendor and renderer strings form a highly unique fingerprint"),
    cap("audioFingerprint", "AudioContext (fingerprint)", Fingerprint, High, Blocked, "AudioContext",
        "Audio processing characteristics are unique per device"),
    cap("batteryStatus", "navigator.getBattery", Fingerprint, High, Blocked, "navigator.getBattery",
        "Battery level and rate act as a passive tracking token"),
    cap("PushManager", "PushManager", Tracking, High, Blocked, "PushManager",
        "Background push keeps tracking across sessions after the page closes"),
    cap("Magnetometer", "Magnetometer", Sensors, High, Blocked, "Magnetometer",
        "Compass data contributes to a location fingerprint"),
    cap("enumerateDevices", "MediaDevices.enumerateDevices", Fingerprint, High, Blocked, "navigator.mediaDevices.enumerateDevices",
        "The set of connected cameras and microphones is a device fingerprint"),
    cap("hardwareConcurrency", "navigator.hardwareConcurrency", Fingerprint, High, Blocked, "navigator.hardwareConcurrency",
        "CPU core count strengthens a combined fingerprint"),
    cap("deviceMemory", "navigator.deviceMemory", Fingerprint, High, Blocked, "navigator.deviceMemory",
        "RAM bucket reveals the device class"),
    cap("plugins", "navigator.plugins", Fingerprint, High, Blocked, "navigator.plugins",
        "Plugin list is a classic fingerprinting method"),
    // Medium: monitored
    cap("Notification", "Notification", Notifications, Medium, Monitor, "Notification",
        "Notification prompts drive phishing and permission fatigue"),
    cap("alertConfirm", "window.alert / confirm", Notifications, Medium, Monitor, "alert",
        "Blocking dialogs support UI redress and clickjacking"),
    cap("AmbientLight", "AmbientLightSensor", Sensors, Medium, Monitor, "AmbientLightSensor",
        "Light level reveals time of day and screen-on patterns"),
    cap("performanceTiming", "Performance.timing", Fingerprint, Medium, Monitor, "performance.timing",
        "Precise timing enables side channels and cache probing"),
    cap("screenDetails", "window.screen.colorDepth", Fingerprint, Medium, Monitor, "screen.colorDepth",
        "Display characteristics are a minor fingerprint signal"),
    cap("cookieAccess", "document.cookie", Tracking, Medium, Monitor, "document.cookie",
        "Cookie reads and writes reveal third-party tracking patterns"),
    cap("indexedDB", "indexedDB", Storage, Medium, Monitor, "indexedDB.open",
        "Large persistent storage can cache tracking identifiers"),
    cap("networkInfo", "navigator.connection", Fingerprint, Medium, Monitor, "navigator.connection",
        "Network type and speed form a partial location fingerprint"),
    // Standard: allowed
    cap("AbortController", "AbortController", Standard, Safe, Allowed, "AbortController",
        "Request cancellation, no privacy implication"),
    cap("fetch", "fetch", Network, Safe, Allowed, "fetch",
        "Standard HTTP requests needed by all web functionality"),
    cap("XMLHttpRequest", "XMLHttpRequest", Network, Safe, Allowed, "XMLHttpRequest",
        "Classic HTTP requests"),
    cap("Promise", "Promise / async-await", Standard, Safe, Allowed, "Promise",
        "Fundamental async primitives"),
    cap("WebSocket", "WebSocket", Network, Safe, Allowed, "WebSocket",
        "Real-time connections to known origins"),
    cap("localStorage", "localStorage", Storage, Safe, Allowed, "localStorage",
        "First-party persistent storage of the user's own data"),
    cap("sessionStorage", "sessionStorage", Storage, Safe, Allowed, "sessionStorage",
        "Session-scoped storage cleared on tab close"),
    cap("SubtleCrypto", "SubtleCrypto (Web Crypto)", Security, Safe, Allowed, "crypto.subtle",
        "Cryptographic operations needed by secure apps"),
    cap("IntersectionObserver", "IntersectionObserver", Standard, Safe, Allowed, "IntersectionObserver",
        "Visibility detection, a standard layout API"),
    cap("MutationObserver", "MutationObserver", Standard, Safe, Allowed, "MutationObserver",
        "DOM observation"),
    cap("ResizeObserver", "ResizeObserver", Standard, Safe, Allowed, "ResizeObserver",
        "Layout observation"),
    cap("EventSource", "EventSource (SSE)", Network, Safe, Allowed, "EventSource",
        "One-way server push"),
    cap("URL", "URL / URLSearchParams", Standard, Safe, Allowed, "URL",
        "URL parsing utilities"),
    cap("FormData", "FormData", Standard, Safe, Allowed, "FormData",
        "Form submission"),
    cap("Array", "Array / TypedArray", Standard, Safe, Allowed, "Array",
        "Core data structures"),
    cap("structuredClone", "structuredClone", Standard, Safe, Allowed, "structuredClone",
        "Deep object cloning"),
    cap("requestAnimationFrame", "requestAnimationFrame", Standard, Safe, Allowed, "requestAnimationFrame",
        "Animation frame scheduling"),
    cap("clipboardWrite", "clipboard.writeText", Clipboard, Safe, Allowed, "navigator.clipboard.writeText",
        "Write-only clipboard access in the safe direction"),
];

// ── API blocker ──────────────────────────────────────

/// Categories whose members start blocked in the API blocker.
pub(crate) const BLOCKER_DEFAULT_BLOCKED: &[Category] = &[
    Tracking,
    Sensors,
    Location,
    Media,
    Clipboard,
    Notifications,
    Hardware,
    Fingerprint,
];

const fn blocker(
    id: &'static str,
    display_name: &'static str,
    category: Category,
    risk_tier: RiskTier,
    entry_point: &'static str,
    rationale: &'static str,
) -> CapabilityDescriptor {
    let default_status = match category {
        Network => Allowed,
        _ => Blocked,
    };
    cap(id, display_name, category, risk_tier, default_status, entry_point, rationale)
}

pub(crate) const API_BLOCKER: &[CapabilityDescriptor] = &[
    // Tracking & fingerprinting storage
    blocker("navigator.sendBeacon", "navigator.sendBeacon", Tracking, High, "navigator.sendBeacon",
        "Sends analytics data asynchronously, the primary tracking vector"),
    blocker("document.cookie", "document.cookie", Tracking, High, "document.cookie",
        "Cookie reads and writes used for cross-site tracking"),
    blocker("localStorage", "localStorage", Tracking, Medium, "localStorage",
        "Persistent local storage can hold tracking ids"),
    blocker("sessionStorage", "sessionStorage", Tracking, Low, "sessionStorage",
        "Session-scoped storage"),
    blocker("indexedDB", "indexedDB", Tracking, Medium, "indexedDB.open",
        "Client-side database can cache tracking data"),
    blocker("Performance.timing", "Performance.timing", Tracking, Medium, "performance.timing",
        "Precise timing used for fingerprinting"),
    blocker("window.name", "window.name", Tracking, High, "window.name",
        "Persists across navigation and carries tracking tokens"),
    blocker("history.pushState", "history.pushState", Tracking, Low, "history.pushState",
        "URL manipulation can leak navigation patterns"),
    // Sensors
    blocker("DeviceMotionEvent", "DeviceMotionEvent", Sensors, High, "DeviceMotionEvent",
        "Accelerometer events fingerprint the device and infer location"),
    blocker("DeviceOrientationEvent", "DeviceOrientationEvent", Sensors, High, "DeviceOrientationEvent",
        "Gyroscope events infer physical activity and environment"),
    blocker("AbsoluteOrientationSensor", "AbsoluteOrientationSensor", Sensors, High, "AbsoluteOrientationSensor",
        "Compass orientation reveals geographic direction"),
    blocker("Gyroscope", "Gyroscope", Sensors, High, "Gyroscope",
        "Raw gyroscope access"),
    blocker("Accelerometer", "Accelerometer", Sensors, High, "Accelerometer",
        "Raw accelerometer access"),
    blocker("Magnetometer", "Magnetometer", Sensors, Medium, "Magnetometer",
        "Magnetic field sensor"),
    blocker("AmbientLightSensor", "AmbientLightSensor", Sensors, Medium, "AmbientLightSensor",
        "Light level infers environment and time of day"),
    // Location
    blocker("navigator.geolocation", "navigator.geolocation", Location, Critical, "navigator.geolocation",
        "GPS coordinates give the precise physical location"),
    blocker("navigator.connection", "navigator.connection", Location, Medium, "navigator.connection",
        "Network type and speed are a partial location fingerprint"),
    blocker("NetworkInformation", "NetworkInformation", Location, Medium, "NetworkInformation",
        "ISP and network details"),
    // Camera & microphone
    blocker("getUserMedia", "getUserMedia", Media, Critical, "navigator.mediaDevices.getUserMedia",
        "Camera and microphone access"),
    blocker("getDisplayMedia", "getDisplayMedia", Media, Critical, "navigator.mediaDevices.getDisplayMedia",
        "Screen capture"),
    blocker("MediaDevices.enumerateDevices", "MediaDevices.enumerateDevices", Media, High, "navigator.mediaDevices.enumerateDevices",
        "Listing connected media devices fingerprints the machine"),
    blocker("HTMLMediaElement.captureStream", "captureStream", Media, Medium, "HTMLMediaElement.prototype.captureStream",
        "Captures a media element stream"),
    // Network & fetch
    blocker("fetch", "fetch", Network, Low, "fetch",
        "Modern HTTP requests"),
    blocker("XMLHttpRequest", "XMLHttpRequest", Network, Low, "XMLHttpRequest",
        "Classic HTTP requests"),
    blocker("WebSocket", "WebSocket", Network, Medium, "WebSocket",
        "Real-time bidirectional communication"),
    blocker("EventSource", "EventSource", Network, Low, "EventSource",
        "Server-sent events"),
    blocker("RTCPeerConnection", "RTCPeerConnection", Network, High, "RTCPeerConnection",
        "WebRTC can leak local IP addresses"),
    blocker("navigator.onLine", "navigator.onLine", Network, Low, "navigator.onLine",
        "Network status"),
    // Clipboard
    blocker("navigator.clipboard.readText", "clipboard.readText", Clipboard, High, "navigator.clipboard.readText",
        "Reads clipboard contents without a user gesture"),
    blocker("navigator.clipboard.read", "clipboard.read", Clipboard, High, "navigator.clipboard.read",
        "Reads rich clipboard data"),
    blocker("navigator.clipboard.writeText", "clipboard.writeText", Clipboard, Low, "navigator.clipboard.writeText",
        "Writes text to the clipboard"),
    blocker("document.execCommand.copy", "execCommand(copy)", Clipboard, Low, "document.execCommand",
        "Legacy clipboard write"),
    // Notifications & alerts
    blocker("Notification", "Notification", Notifications, Medium, "Notification",
        "Push notifications can be used for spam"),
    blocker("window.alert", "window.alert", Notifications, Medium, "alert",
        "Blocking alert dialogs are a denial of service vector"),
    blocker("window.confirm", "window.confirm", Notifications, Medium, "confirm",
        "Blocking confirm dialogs"),
    blocker("window.prompt", "window.prompt", Notifications, Medium, "prompt",
        "Blocking input dialogs"),
    blocker("PushManager", "PushManager", Notifications, High, "PushManager",
        "Background push notifications"),
    // Hardware
    blocker("navigator.bluetooth", "navigator.bluetooth", Hardware, Critical, "navigator.bluetooth",
        "Bluetooth device access"),
    blocker("navigator.usb", "navigator.usb", Hardware, Critical, "navigator.usb",
        "USB device access"),
    blocker("navigator.serial", "navigator.serial", Hardware, Critical, "navigator.serial",
        "Serial port access"),
    blocker("navigator.hid", "navigator.hid", Hardware, High, "navigator.hid",
        "HID device access (keyboards, gamepads)"),
    blocker("navigator.gpu", "navigator.gpu", Hardware, Medium, "navigator.gpu",
        "WebGPU can be used for fingerprinting"),
    blocker("BatteryManager", "BatteryManager", Hardware, High, "navigator.getBattery",
        "Battery status fingerprints the device"),
    // Fingerprinting vectors
    blocker("HTMLCanvasElement.toDataURL", "canvas.toDataURL", Fingerprint, High, "HTMLCanvasElement.prototype.toDataURL",
        "Canvas rendering fingerprint"),
    blocker("WebGLRenderingContext", "WebGL", Fingerprint, High, "WebGLRenderingContext.prototype.getParameter",
        "GPU fingerprinting through WebGL renderer info"),
    blocker("AudioContext", "AudioContext", Fingerprint, High, "AudioContext",
        "Audio processing fingerprint"),
    blocker("screen.colorDepth", "screen.colorDepth", Fingerprint, Medium, "screen.colorDepth",
        "Display color depth"),
    blocker("navigator.hardwareConcurrency", "hardwareConcurrency", Fingerprint, Medium, "navigator.hardwareConcurrency",
        "CPU core count fingerprints the device"),
    blocker("navigator.deviceMemory", "deviceMemory", Fingerprint, Medium, "navigator.deviceMemory",
        "Approximate RAM amount"),
    blocker("navigator.plugins", "navigator.plugins", Fingerprint, Medium, "navigator.plugins",
        "Browser plugin list, classic fingerprinting"),
    blocker("navigator.languages", "navigator.languages", Fingerprint, Low, "navigator.languages",
        "Language list, a minor fingerprint signal"),
];

/// Registry for the privacy-browser shield.
pub fn browser_shield() -> CapabilityRegistry {
    CapabilityRegistry::from_static(BROWSER_SHIELD)
}

/// Registry for the code-runner API blocker.
pub fn api_blocker() -> CapabilityRegistry {
    CapabilityRegistry::from_static(API_BLOCKER)
}

impl CapabilityRegistry {
    /// Builds a registry from a built-in table. Tables are checked for
    /// duplicate ids by the tests below, so the first occurrence wins here.
    fn from_static(table: &'static [CapabilityDescriptor]) -> Self {
        let mut index = std::collections::HashMap::with_capacity(table.len());
        for (position, descriptor) in table.iter().enumerate() {
            index.entry(descriptor.id).or_insert(position);
        }
        Self {
            descriptors: table.to_vec(),
            index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_catalog_ids_are_unique() {
        assert!(CapabilityRegistry::new(BROWSER_SHIELD.to_vec()).is_ok());
    }

    #[test]
    fn test_blocker_catalog_ids_are_unique() {
        assert!(CapabilityRegistry::new(API_BLOCKER.to_vec()).is_ok());
    }

    #[test]
    fn test_browser_defaults_follow_risk_tiers() {
        let registry = browser_shield();
        for d in registry.list() {
            let expected = match d.risk_tier {
                RiskTier::Critical | RiskTier::High => PolicyStatus::Blocked,
                RiskTier::Medium => PolicyStatus::Monitor,
                RiskTier::Low | RiskTier::Safe => PolicyStatus::Allowed,
            };
            assert_eq!(d.default_status, expected, "{}", d.id);
        }
    }

    #[test]
    fn test_browser_default_counts() {
        let registry = browser_shield();
        let count = |status: PolicyStatus| {
            registry
                .list()
                .iter()
                .filter(|d| d.default_status == status)
                .count()
        };
        assert_eq!(count(PolicyStatus::Blocked), 26);
        assert_eq!(count(PolicyStatus::Monitor), 8);
        assert_eq!(count(PolicyStatus::Allowed), 18);
    }

    #[test]
    fn test_blocker_defaults_follow_category() {
        let registry = api_blocker();
        for d in registry.list() {
            let expected = if BLOCKER_DEFAULT_BLOCKED.contains(&d.category) {
                PolicyStatus::Blocked
            } else {
                PolicyStatus::Allowed
            };
            assert_eq!(d.default_status, expected, "{}", d.id);
        }
        assert!(registry
            .by_category(Category::Network)
            .iter()
            .all(|d| d.default_status == PolicyStatus::Allowed));
    }

    #[test]
    fn test_geolocation_is_critical_and_blocked() {
        let registry = browser_shield();
        let geo = registry.by_id("geolocation").unwrap();
        assert_eq!(geo.risk_tier, RiskTier::Critical);
        assert_eq!(geo.default_status, PolicyStatus::Blocked);
        assert_eq!(geo.category, Category::Location);
    }

    #[test]
    fn test_entry_points_are_dotted_identifiers() {
        for d in BROWSER_SHIELD.iter().chain(API_BLOCKER.iter()) {
            assert!(!d.entry_point.is_empty(), "{}", d.id);
            assert!(
                d.entry_point
                    .split('.')
                    .all(|part| !part.is_empty()
                        && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')),
                "{} has entry point {}",
                d.id,
                d.entry_point
            );
        }
    }
}
