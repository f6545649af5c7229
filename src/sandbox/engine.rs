//! Live engines and the isolated contexts they create.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::RunFault;

/// What a live engine needs to start a context.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Untrusted source, run after the overrides.
    pub source: String,
    /// Synthesized override script, if the engine accepts one.
    pub overrides: Option<String>,
}

/// A real execution backend for one language.
///
/// `launch` creates a fresh context that runs independently of the host and
/// reports through [`IsolatedContext::recv`] only. Contexts are never
/// reused: each launch gets its own.
#[async_trait]
pub trait LiveEngine: Send + Sync {
    /// Language id this engine serves (`"javascript"`, `"python"`).
    fn language(&self) -> &str;

    /// Display label used in user-facing messages.
    fn label(&self) -> &str;

    /// Whether capability overrides can be injected into this engine.
    fn accepts_overrides(&self) -> bool;

    /// Creates and starts a context. Failing to bring the runtime up is
    /// reported as [`RunFault::EngineUnavailable`].
    async fn launch(&self, request: LaunchRequest) -> Result<IsolatedContext, RunFault>;
}

type Teardown = Box<dyn FnOnce() + Send>;

/// Host side of a running context: the message outbox plus a teardown
/// action. Dropping the value releases the context, whatever the exit path.
pub struct IsolatedContext {
    outbox: mpsc::UnboundedReceiver<String>,
    teardown: Option<Teardown>,
}

impl IsolatedContext {
    pub fn new(
        outbox: mpsc::UnboundedReceiver<String>,
        teardown: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            outbox,
            teardown: Some(Box::new(teardown)),
        }
    }

    /// Next raw message from the context, or `None` once the context has
    /// gone away.
    pub async fn recv(&mut self) -> Option<String> {
        self.outbox.recv().await
    }
}

impl Drop for IsolatedContext {
    fn drop(&mut self) {
        // Late messages from the context are refused from here on.
        self.outbox.close();
        if let Some(teardown) = self.teardown.take() {
            teardown();
            debug!("Isolated context torn down");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_drop_runs_teardown_and_closes_outbox() {
        let (tx, rx) = mpsc::unbounded_channel();
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let mut context = IsolatedContext::new(rx, move || flag.store(true, Ordering::SeqCst));

        tx.send("first".to_string()).unwrap();
        assert_eq!(context.recv().await.as_deref(), Some("first"));

        drop(context);
        assert!(released.load(Ordering::SeqCst));
        assert!(tx.send("late".to_string()).is_err());
    }
}
