//! Error taxonomy for the policy engine and the execution host.
//!
//! Policy errors indicate a registry/store mismatch and are programming
//! bugs. Host errors reject a run before it starts. Run faults are terminal
//! states of a single run: they are reported inside `RunResult` and never
//! tear down the host.

use thiserror::Error;

/// Lookup and registration failures on the capability catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("duplicate capability id in catalog: {0}")]
    DuplicateCapability(String),
}

/// Reasons a run is refused before any context is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// A run is already active on this host or dispatcher.
    #[error("a run is already in progress")]
    Busy,

    /// The host has no live engine registered for the language.
    #[error("no live engine registered for '{0}'")]
    NoEngine(String),
}

/// Terminal failure of a single run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunFault {
    /// The real engine for the language could not be initialized.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Uncaught error inside the submitted code.
    #[error("runtime fault: {0}")]
    RuntimeFault(String),

    /// The context did not complete before the wall-clock deadline.
    #[error("execution timed out after {0}ms")]
    TimedOut(u64),

    /// Neither a live engine nor a playback script exists for the language.
    #[error("language '{0}' not yet supported in sandbox")]
    UnsupportedLanguage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_capability_message() {
        let err = PolicyError::UnknownCapability("teleport".to_string());
        assert_eq!(err.to_string(), "unknown capability: teleport");
    }

    #[test]
    fn test_timed_out_message_includes_threshold() {
        assert_eq!(
            RunFault::TimedOut(5000).to_string(),
            "execution timed out after 5000ms"
        );
    }

    #[test]
    fn test_unsupported_language_message() {
        assert_eq!(
            RunFault::UnsupportedLanguage("cobol".to_string()).to_string(),
            "language 'cobol' not yet supported in sandbox"
        );
    }
}
