//! Notifications sent from the agent to its embedder.

use url::Url;

use crate::{AgentState, ClientId, NotificationId};

/// Something observable the agent did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// Lifecycle state changed for the agent version owning `cache_name`.
    StateChange { cache_name: String, state: AgentState },
    /// A stale cache generation was deleted during activation.
    CacheDeleted { name: String },
    /// The agent took control of open clients.
    ClientsClaimed { count: usize },
    NotificationShown { id: NotificationId, title: String },
    NotificationClosed { id: NotificationId },
    ClientFocused { id: ClientId },
    WindowOpened { id: ClientId, url: Url },
}
