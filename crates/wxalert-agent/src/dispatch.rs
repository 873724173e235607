//! Notification click handling.

use tokio::sync::RwLock;
use tracing::{info, warn};
use url::Url;

use crate::clients::{ClientId, ClientMatchOptions, ClientType, Clients};
use crate::notifications::{Notification, NotificationCenter};
use crate::{AgentConfig, AgentError};

/// Target used when a notification carries no URL.
pub const DEFAULT_TARGET: &str = "/";

/// What a click ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// An open client already showed the target and was focused.
    Focused(ClientId),
    /// A new window was opened at the target.
    Opened { id: ClientId, url: Url },
}

/// Navigation target carried by `notification`, resolved against the origin.
pub fn resolve_target(config: &AgentConfig, notification: &Notification) -> Result<Url, AgentError> {
    let target = notification
        .options
        .data
        .url
        .as_deref()
        .filter(|u| !u.is_empty())
        .unwrap_or(DEFAULT_TARGET);
    config.resolve(target)
}

/// Close `notification`, then focus a client showing its target or open a new window.
pub async fn dispatch(
    config: &AgentConfig,
    clients: &RwLock<Clients>,
    center: &RwLock<NotificationCenter>,
    notification: &Notification,
) -> Result<DispatchOutcome, AgentError> {
    center.write().await.close(notification.id);

    let target = resolve_target(config, notification)?;
    let mut clients = clients.write().await;

    let existing = clients
        .match_all(ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        })
        .into_iter()
        .find(|c| c.url == target && c.can_focus())
        .map(|c| c.id);

    if let Some(id) = existing {
        match clients.focus(id) {
            Ok(_) => {
                info!(client = ?id, url = %target, "Focused existing client for notification");
                return Ok(DispatchOutcome::Focused(id));
            }
            Err(e) => warn!(client = ?id, error = %e, "Focus failed, opening a new window"),
        }
    }

    let id = clients.open_window(target.clone()).id;
    info!(client = ?id, url = %target, "Opened window for notification");
    Ok(DispatchOutcome::Opened { id, url: target })
}
