//! Injection synthesizer.
//!
//! Turns the current policy into JavaScript that must run in a fresh
//! context before any untrusted code. The output is a fixed runtime header
//! followed by one fragment per overridden entry point:
//!
//! - blocked capabilities get their [`OverrideStrategy`] fragments,
//! - monitored capabilities get a pass-through logging wrapper,
//! - allowed capabilities get nothing.
//!
//! Synthesis reads the store once; later policy changes only affect the
//! next context.

pub mod strategy;

use tracing::debug;

use crate::policy::{PolicyStatus, PolicyStore};

pub use strategy::{strategies_for, OverrideStrategy};

/// Message carried by every policy rejection raised inside a context.
pub const DENIAL_MESSAGE: &str = "Blocked by capability policy";

/// Shared helpers, installed once per context as a non-enumerable,
/// non-writable `__shield` global. Re-running the header is a no-op.
/// Fragments receive the helpers as an argument, so the global can be
/// deleted once the overrides are in place.
const HEADER: &str = r#"(function (g) {
  if (g.__shield) return;
  var post = g.__hostPost;
  var stringify = JSON.stringify;
  var now = Date.now;
  var defineProperty = Object.defineProperty;
  var ownDescriptor = Object.getOwnPropertyDescriptor;
  var hasOwn = Object.prototype.hasOwnProperty;
  var isArray = Array.isArray;
  var S = {};
  S.denial = __DENIAL__;
  S.intercept = function (id) {
    if (typeof post !== "function") return;
    try {
      post(stringify({ type: "capability-intercept", capabilityId: id, timestamp: now() }));
    } catch (e) {}
  };
  S.resolve = function (path) {
    var parts = path.split(".");
    var owner = g;
    for (var i = 0; i < parts.length - 1; i++) {
      if (owner === null || owner === undefined) return null;
      owner = owner[parts[i]];
    }
    if (owner === null || (typeof owner !== "object" && typeof owner !== "function")) return null;
    return { owner: owner, key: parts[parts.length - 1] };
  };
  S.mark = function (value, id) {
    try { defineProperty(value, "__shieldId", { value: id }); } catch (e) {}
    return value;
  };
  S.marked = function (value, id) {
    return value !== null && (typeof value === "object" || typeof value === "function")
      && hasOwn.call(value, "__shieldId") && value.__shieldId === id;
  };
  S.installed = function (t, id) {
    var d = ownDescriptor(t.owner, t.key);
    return !!d && (S.marked(d.value, id) || S.marked(d.get, id));
  };
  S.define = function (t, value) {
    defineProperty(t.owner, t.key, { value: value, writable: true, configurable: true, enumerable: false });
  };
  S.spoof = function (t, getter) {
    defineProperty(t.owner, t.key, { get: getter, set: function () {}, configurable: true, enumerable: true });
  };
  S.reject = function () {
    var error = typeof DOMException === "function"
      ? new DOMException(S.denial, "NotAllowedError")
      : new Error(S.denial);
    return Promise.reject(error);
  };
  S.noop = function (t, id) {
    var quiet = S.mark(function () { S.intercept(id); return undefined; }, id);
    if (typeof t.owner[t.key] === "function") S.define(t, quiet);
    else S.spoof(t, quiet);
  };
  S.monitor = function (t, id) {
    var d = ownDescriptor(t.owner, t.key);
    if (!d || !d.configurable) return false;
    var log = function () { S.intercept(id); };
    if (d.get) {
      var get = d.get;
      defineProperty(t.owner, t.key, {
        get: S.mark(function () { log(); return get.call(this); }, id),
        set: d.set, configurable: true, enumerable: d.enumerable
      });
      return true;
    }
    var v = d.value;
    if (typeof v === "function") {
      var w = function () {
        log();
        return new.target ? Reflect.construct(v, arguments, new.target) : v.apply(this, arguments);
      };
      Object.setPrototypeOf(w, v);
      w.prototype = v.prototype;
      S.define(t, S.mark(w, id));
      return true;
    }
    if (v === null || typeof v !== "object" || isArray(v)) {
      var current = v;
      defineProperty(t.owner, t.key, {
        get: S.mark(function () { log(); return current; }, id),
        set: function (next) { current = next; },
        configurable: true, enumerable: d.enumerable
      });
      return true;
    }
    return false;
  };
  defineProperty(g, "__shield", { value: S, writable: false, enumerable: false, configurable: true });
})(globalThis);
"#;

/// Synthesized override source plus the ids it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideScript {
    pub source: String,
    pub blocked: Vec<&'static str>,
    pub monitored: Vec<&'static str>,
}

impl OverrideScript {
    pub fn fragment_count(&self) -> usize {
        self.source.matches("})(globalThis, globalThis.__shield);").count()
    }
}

/// The runtime header on its own, with the denial message filled in.
pub fn header() -> String {
    HEADER.replace("__DENIAL__", &strategy::js_string(DENIAL_MESSAGE))
}

/// Builds the override script for the store's current state.
pub fn synthesize(store: &PolicyStore) -> OverrideScript {
    let mut source = header();
    let mut blocked = Vec::new();
    let mut monitored = Vec::new();

    for (descriptor, status) in store.entries() {
        match status {
            PolicyStatus::Allowed => {}
            PolicyStatus::Blocked => {
                for strategy in strategies_for(descriptor.id) {
                    source.push_str(&strategy.emit(&descriptor));
                }
                blocked.push(descriptor.id);
            }
            PolicyStatus::Monitor => {
                source.push_str(&strategy::emit_monitor(&descriptor));
                monitored.push(descriptor.id);
            }
        }
    }

    debug!(
        "Synthesized overrides: {} blocked, {} monitored, {} bytes",
        blocked.len(),
        monitored.len(),
        source.len()
    );
    OverrideScript {
        source,
        blocked,
        monitored,
    }
}
