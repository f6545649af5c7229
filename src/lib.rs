//! Capability policy engine and sandboxed execution host.
//!
//! A [`session::Session`] owns the policy state (per-capability status plus
//! the intercept log) and a dispatcher that runs untrusted code either in a
//! fresh isolated context with capability overrides injected, or through
//! scripted playback for languages without a live engine.

pub mod capability;
pub mod classifier;
pub mod config;
pub mod error;
pub mod inject;
pub mod intercept;
pub mod policy;
pub mod runner;
pub mod sandbox;
pub mod session;
