//! Lifetime extension for event handlers.
//!
//! The host must not tear the agent down while work started by a handler is still in
//! flight. Handlers register that work with [`ExtendableEvent::wait_until`]; the host
//! awaits [`ExtendableEvent::settled`] before recycling the agent.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::trace;

use crate::AgentError;

/// Handle that keeps an event alive until all registered work completes.
#[derive(Debug, Default)]
pub struct ExtendableEvent {
    pending: Vec<JoinHandle<Result<(), AgentError>>>,
}

impl ExtendableEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `future` on the runtime and extend the event's lifetime until it finishes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn wait_until<F>(&mut self, future: F)
    where
        F: Future<Output = Result<(), AgentError>> + Send + 'static,
    {
        self.pending.push(tokio::spawn(future));
        trace!(pending = self.pending.len(), "Event lifetime extended");
    }

    /// Number of registered futures that have not finished yet.
    pub fn pending(&self) -> usize {
        self.pending.iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every registered future. Returns the first error, after all have finished.
    pub async fn settled(self) -> Result<(), AgentError> {
        let mut first_error = None;
        for handle in self.pending {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(join) => Err(AgentError::TaskFailed(join.to_string())),
            };
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
