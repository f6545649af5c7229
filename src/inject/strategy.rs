//! Override strategies: how a blocked capability is neutralized.
//!
//! Every fragment is self-contained. It resolves its own target, checks
//! whether its override is already installed (the `__shieldId` marker) and
//! swallows any error, so fragments can be applied in any order and any
//! number of times.

use std::fmt::Write as _;

use crate::capability::CapabilityDescriptor;

/// A closed set of ways to neutralize one entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideStrategy {
    /// Replace a callable with a stub returning `substitute`, a JavaScript
    /// expression evaluated on every call.
    Stub {
        path: &'static str,
        substitute: &'static str,
    },
    /// Replace a value with the result of `factory(original, intercept)`.
    /// The factory decides when to report an interception, which allows
    /// partial filters (one WebGL parameter, one event type).
    PropertyRedefine {
        path: &'static str,
        factory: &'static str,
    },
    /// Install a getter returning `value` and a setter that discards writes.
    ValueSpoof {
        path: &'static str,
        value: &'static str,
    },
    /// No bespoke override exists: turn the descriptor's entry point into
    /// a logging no-op that yields `undefined`.
    GenericNoop,
}

impl OverrideStrategy {
    pub fn kind(&self) -> &'static str {
        match self {
            OverrideStrategy::Stub { .. } => "stub",
            OverrideStrategy::PropertyRedefine { .. } => "property-redefine",
            OverrideStrategy::ValueSpoof { .. } => "value-spoof",
            OverrideStrategy::GenericNoop => "generic-noop",
        }
    }

    /// Path this strategy installs on, falling back to the descriptor's
    /// entry point.
    pub fn path<'a>(&self, descriptor: &'a CapabilityDescriptor) -> &'a str {
        match self {
            OverrideStrategy::Stub { path, .. }
            | OverrideStrategy::PropertyRedefine { path, .. }
            | OverrideStrategy::ValueSpoof { path, .. } => *path,
            OverrideStrategy::GenericNoop => descriptor.entry_point,
        }
    }

    /// Emits the override fragment for `descriptor`.
    pub fn emit(&self, descriptor: &CapabilityDescriptor) -> String {
        let id = js_string(descriptor.id);
        let path = js_string(self.path(descriptor));
        let body = match self {
            OverrideStrategy::Stub { substitute, .. } => format!(
                "S.define(t, S.mark(function () {{ S.intercept({id}); return ({substitute}); }}, {id}));"
            ),
            OverrideStrategy::PropertyRedefine { factory, .. } => format!(
                "var make = ({factory});\n    \
                 S.define(t, S.mark(make(t.owner[t.key], function () {{ S.intercept({id}); }}), {id}));"
            ),
            OverrideStrategy::ValueSpoof { value, .. } => format!(
                "S.spoof(t, S.mark(function () {{ S.intercept({id}); return ({value}); }}, {id}));"
            ),
            OverrideStrategy::GenericNoop => format!("S.noop(t, {id});"),
        };

        let mut fragment = String::new();
        let _ = writeln!(fragment, "// {}: {} {}", descriptor.id, self.kind(), self.path(descriptor));
        let _ = write!(
            fragment,
            "(function (g, S) {{\n  try {{\n    var t = S.resolve({path});\n    \
             if (!t || S.installed(t, {id})) return;\n    {body}\n  }} catch (e) {{}}\n}})(globalThis, globalThis.__shield);\n"
        );
        fragment
    }
}

/// Fragment that wraps a monitored capability for logging only. The real
/// entry point keeps running; object namespaces are left unobserved.
pub fn emit_monitor(descriptor: &CapabilityDescriptor) -> String {
    let id = js_string(descriptor.id);
    let path = js_string(descriptor.entry_point);
    format!(
        "// {}: monitor {}\n(function (g, S) {{\n  try {{\n    var t = S.resolve({path});\n    \
         if (!t || S.installed(t, {id})) return;\n    S.monitor(t, {id});\n  }} catch (e) {{}}\n}})(globalThis, globalThis.__shield);\n",
        descriptor.id, descriptor.entry_point
    )
}

/// JSON string literal, which is also a valid JavaScript string literal.
pub(crate) fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

// ── Substitutes ──────────────────────────────────────

const REJECT: &str = "S.reject()";

const PEER_CONNECTION: &str = "{ close: function () {}, createOffer: S.reject, createAnswer: S.reject, \
    addIceCandidate: S.reject, setLocalDescription: S.reject, setRemoteDescription: S.reject, \
    createDataChannel: function () { return {}; } }";

const INERT_SENSOR: &str = "{ activated: false, start: function () {}, stop: function () {}, \
    addEventListener: function () {}, removeEventListener: function () {} }";

const INERT_AUDIO: &str = "{ destination: {}, sampleRate: 44100, \
    createOscillator: function () { return { connect: function () {}, start: function () {}, stop: function () {}, frequency: { value: 0 } }; }, \
    createDynamicsCompressor: function () { return { connect: function () {}, threshold: { value: 0 }, knee: { value: 0 }, ratio: { value: 0 }, attack: { value: 0 }, release: { value: 0 } }; }, \
    createAnalyser: function () { return { connect: function () {}, getFloatFrequencyData: function () {} }; }, \
    startRendering: function () { return Promise.resolve({}); }, close: function () { return Promise.resolve(); } }";

const INERT_BATTERY: &str = "Promise.resolve({ level: 1, charging: true, chargingTime: 0, \
    dischargingTime: Infinity, addEventListener: function () {} })";

const INERT_XHR: &str = "{ readyState: 0, status: 0, responseText: '', open: function () {}, \
    send: function () {}, abort: function () {}, setRequestHeader: function () {}, addEventListener: function () {} }";

const INERT_EVENT_SOURCE: &str = "{ readyState: 2, close: function () {}, addEventListener: function () {} }";

const INERT_STORAGE: &str = "{ length: 0, getItem: function () { return null; }, setItem: function () {}, \
    removeItem: function () {}, clear: function () {}, key: function () { return null; } }";

const INERT_IDB_REQUEST: &str = "{ result: null, error: new DOMException(S.denial, 'SecurityError'), \
    onsuccess: null, onerror: null, onupgradeneeded: null }";

// ── Factories ────────────────────────────────────────

const GEOLOCATION: &str = "function (original, intercept) { return { \
    getCurrentPosition: function (ok, fail) { intercept(); if (typeof fail === 'function') fail({ code: 1, message: S.denial }); }, \
    watchPosition: function (ok, fail) { intercept(); if (typeof fail === 'function') fail({ code: 1, message: S.denial }); return -1; }, \
    clearWatch: function () {} }; }";

const BLUETOOTH: &str = "function (original, intercept) { return { \
    requestDevice: function () { intercept(); return S.reject(); }, \
    getAvailability: function () { intercept(); return Promise.resolve(false); } }; }";

const USB: &str = "function (original, intercept) { return { \
    requestDevice: function () { intercept(); return S.reject(); }, \
    getDevices: function () { intercept(); return Promise.resolve([]); } }; }";

const SERIAL: &str = "function (original, intercept) { return { \
    requestPort: function () { intercept(); return S.reject(); }, \
    getPorts: function () { intercept(); return Promise.resolve([]); } }; }";

const HID: &str = "function (original, intercept) { return { \
    requestDevice: function () { intercept(); return S.reject(); }, \
    getDevices: function () { intercept(); return Promise.resolve([]); } }; }";

const MOTION_LISTENER: &str = "function (original, intercept) { return function (type) { \
    if (type === 'devicemotion') { intercept(); return; } \
    return original.apply(this, arguments); }; }";

const ORIENTATION_LISTENER: &str = "function (original, intercept) { return function (type) { \
    if (type === 'deviceorientation' || type === 'deviceorientationabsolute') { intercept(); return; } \
    return original.apply(this, arguments); }; }";

const WEBGL_PARAMETER: &str = "function (original, intercept) { return function (p) { \
    if (p === 37445 || p === 37446) { intercept(); return ''; } \
    return original.apply(this, arguments); }; }";

const NOTIFICATION: &str = "function (original, intercept) { \
    var N = function () { intercept(); return { close: function () {} }; }; \
    N.permission = 'denied'; \
    N.requestPermission = function () { intercept(); return Promise.resolve('denied'); }; \
    return N; }";

const WEBSOCKET: &str = "function (original, intercept) { return function () { \
    intercept(); throw new DOMException(S.denial, 'SecurityError'); }; }";

const EXEC_COMMAND: &str = "function (original, intercept) { return function (command) { \
    if (command === 'copy' || command === 'cut') { intercept(); return false; } \
    return original.apply(this, arguments); }; }";

// ── Strategy table ───────────────────────────────────

use OverrideStrategy::{GenericNoop, PropertyRedefine, Stub, ValueSpoof};

/// Strategies for a capability id. Ids of both built-in catalogs are
/// covered; anything else gets the generic no-op.
pub fn strategies_for(id: &str) -> &'static [OverrideStrategy] {
    match id {
        "RTCPeerConnection" => &[
            Stub { path: "RTCPeerConnection", substitute: PEER_CONNECTION },
            Stub { path: "webkitRTCPeerConnection", substitute: PEER_CONNECTION },
        ],
        "geolocation" | "navigator.geolocation" => &[PropertyRedefine { path: "navigator.geolocation", factory: GEOLOCATION }],
        "getUserMedia" => &[Stub { path: "navigator.mediaDevices.getUserMedia", substitute: REJECT }],
        "getDisplayMedia" => &[Stub { path: "navigator.mediaDevices.getDisplayMedia", substitute: REJECT }],
        "enumerateDevices" | "MediaDevices.enumerateDevices" => {
            &[Stub { path: "navigator.mediaDevices.enumerateDevices", substitute: "Promise.resolve([])" }]
        }
        "HTMLMediaElement.captureStream" => &[Stub { path: "HTMLMediaElement.prototype.captureStream", substitute: "null" }],
        "sendBeacon" | "navigator.sendBeacon" => &[Stub { path: "navigator.sendBeacon", substitute: "false" }],
        "bluetooth" | "navigator.bluetooth" => &[PropertyRedefine { path: "navigator.bluetooth", factory: BLUETOOTH }],
        "usb" | "navigator.usb" => &[PropertyRedefine { path: "navigator.usb", factory: USB }],
        "serial" | "navigator.serial" => &[PropertyRedefine { path: "navigator.serial", factory: SERIAL }],
        "hid" | "navigator.hid" => &[PropertyRedefine { path: "navigator.hid", factory: HID }],
        "navigator.gpu" => &[ValueSpoof { path: "navigator.gpu", value: "undefined" }],
        "DeviceMotionEvent" => &[
            Stub { path: "DeviceMotionEvent", substitute: "{}" },
            PropertyRedefine { path: "addEventListener", factory: MOTION_LISTENER },
        ],
        "DeviceOrientation" | "DeviceOrientationEvent" => &[
            Stub { path: "DeviceOrientationEvent", substitute: "{}" },
            PropertyRedefine { path: "addEventListener", factory: ORIENTATION_LISTENER },
        ],
        "Gyroscope" => &[Stub { path: "Gyroscope", substitute: INERT_SENSOR }],
        "Accelerometer" => &[Stub { path: "Accelerometer", substitute: INERT_SENSOR }],
        "Magnetometer" => &[Stub { path: "Magnetometer", substitute: INERT_SENSOR }],
        "AbsoluteOrientationSensor" => &[Stub { path: "AbsoluteOrientationSensor", substitute: INERT_SENSOR }],
        "AmbientLight" | "AmbientLightSensor" => &[Stub { path: "AmbientLightSensor", substitute: INERT_SENSOR }],
        "clipboardRead" | "navigator.clipboard.readText" => &[Stub { path: "navigator.clipboard.readText", substitute: REJECT }],
        "clipboardReadRaw" | "navigator.clipboard.read" => &[Stub { path: "navigator.clipboard.read", substitute: REJECT }],
        "clipboardWrite" | "navigator.clipboard.writeText" => &[Stub { path: "navigator.clipboard.writeText", substitute: REJECT }],
        "document.execCommand.copy" => &[PropertyRedefine { path: "document.execCommand", factory: EXEC_COMMAND }],
        "windowName" | "window.name" => &[ValueSpoof { path: "name", value: "''" }],
        "cookieAccess" | "document.cookie" => &[ValueSpoof { path: "document.cookie", value: "''" }],
        "history.pushState" => &[Stub { path: "history.pushState", substitute: "undefined" }],
        "localStorage" => &[ValueSpoof { path: "localStorage", value: INERT_STORAGE }],
        "sessionStorage" => &[ValueSpoof { path: "sessionStorage", value: INERT_STORAGE }],
        "indexedDB" => &[Stub { path: "indexedDB.open", substitute: INERT_IDB_REQUEST }],
        "performanceTiming" | "Performance.timing" => &[ValueSpoof { path: "performance.timing", value: "{}" }],
        "canvasFingerprint" | "HTMLCanvasElement.toDataURL" => {
            &[Stub { path: "HTMLCanvasElement.prototype.toDataURL", substitute: "''" }]
        }
        "webglFingerprint" | "WebGLRenderingContext" => {
            &[PropertyRedefine { path: "WebGLRenderingContext.prototype.getParameter", factory: WEBGL_PARAMETER }]
        }
        "audioFingerprint" | "AudioContext" => &[
            Stub { path: "AudioContext", substitute: INERT_AUDIO },
            Stub { path: "webkitAudioContext", substitute: INERT_AUDIO },
        ],
        "batteryStatus" | "BatteryManager" => &[Stub { path: "navigator.getBattery", substitute: INERT_BATTERY }],
        "hardwareConcurrency" | "navigator.hardwareConcurrency" => {
            &[ValueSpoof { path: "navigator.hardwareConcurrency", value: "4" }]
        }
        "deviceMemory" | "navigator.deviceMemory" => &[ValueSpoof { path: "navigator.deviceMemory", value: "4" }],
        "plugins" | "navigator.plugins" => &[ValueSpoof { path: "navigator.plugins", value: "[]" }],
        "screenDetails" | "screen.colorDepth" => &[ValueSpoof { path: "screen.colorDepth", value: "24" }],
        "navigator.languages" => &[ValueSpoof { path: "navigator.languages", value: "['en-US']" }],
        "networkInfo" | "navigator.connection" => &[ValueSpoof { path: "navigator.connection", value: "undefined" }],
        "NetworkInformation" => &[ValueSpoof { path: "NetworkInformation", value: "undefined" }],
        "navigator.onLine" => &[ValueSpoof { path: "navigator.onLine", value: "true" }],
        "PushManager" => &[ValueSpoof { path: "PushManager", value: "undefined" }],
        "Notification" => &[PropertyRedefine { path: "Notification", factory: NOTIFICATION }],
        "alertConfirm" => &[
            Stub { path: "alert", substitute: "undefined" },
            Stub { path: "confirm", substitute: "false" },
            Stub { path: "prompt", substitute: "null" },
        ],
        "window.alert" => &[Stub { path: "alert", substitute: "undefined" }],
        "window.confirm" => &[Stub { path: "confirm", substitute: "false" }],
        "window.prompt" => &[Stub { path: "prompt", substitute: "null" }],
        "fetch" => &[Stub { path: "fetch", substitute: "Promise.reject(new TypeError(S.denial))" }],
        "XMLHttpRequest" => &[Stub { path: "XMLHttpRequest", substitute: INERT_XHR }],
        "WebSocket" => &[PropertyRedefine { path: "WebSocket", factory: WEBSOCKET }],
        "EventSource" => &[Stub { path: "EventSource", substitute: INERT_EVENT_SOURCE }],
        _ => &[GenericNoop],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::catalog;

    #[test]
    fn test_aliases_share_strategies() {
        assert_eq!(strategies_for("geolocation"), strategies_for("navigator.geolocation"));
        assert_eq!(strategies_for("canvasFingerprint"), strategies_for("HTMLCanvasElement.toDataURL"));
    }

    #[test]
    fn test_unknown_id_falls_back_to_generic_noop() {
        assert_eq!(strategies_for("SubtleCrypto"), &[GenericNoop]);
        assert_eq!(strategies_for("somethingNew"), &[GenericNoop]);
    }

    #[test]
    fn test_alert_confirm_stubs_three_dialogs() {
        let paths: Vec<_> = strategies_for("alertConfirm")
            .iter()
            .map(|s| match s {
                Stub { path, .. } => *path,
                _ => "",
            })
            .collect();
        assert_eq!(paths, vec!["alert", "confirm", "prompt"]);
    }

    #[test]
    fn test_emit_quotes_id_and_path() {
        let registry = catalog::browser_shield();
        let geo = registry.by_id("geolocation").unwrap();
        let fragment = strategies_for(geo.id)[0].emit(geo);
        assert!(fragment.starts_with("// geolocation: property-redefine navigator.geolocation\n"));
        assert!(fragment.contains("S.resolve(\"navigator.geolocation\")"));
        assert!(fragment.contains("S.intercept(\"geolocation\")"));
        assert!(fragment.contains("S.installed(t, \"geolocation\")"));
    }

    #[test]
    fn test_generic_noop_uses_entry_point() {
        let registry = catalog::browser_shield();
        let crypto = registry.by_id("SubtleCrypto").unwrap();
        let fragment = GenericNoop.emit(crypto);
        assert!(fragment.contains("S.resolve(\"crypto.subtle\")"));
        assert!(fragment.contains("S.noop(t, \"SubtleCrypto\")"));
    }

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn test_every_fragment_is_wrapped_in_try() {
        let registry = catalog::api_blocker();
        for d in registry.list() {
            for strategy in strategies_for(d.id) {
                let fragment = strategy.emit(d);
                assert!(fragment.contains("try {"), "{}", d.id);
                assert!(fragment.contains("catch (e) {}"), "{}", d.id);
            }
        }
    }
}
