//! Agent error type.

use thiserror::Error;
use wxalert_cache::CacheError;
use wxalert_net::NetError;

use crate::AgentState;

/// Errors that can occur in agent operations.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Install failed fetching {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("Cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: AgentState,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Client error: {0}")]
    Client(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
