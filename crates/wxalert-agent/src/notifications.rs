//! Platform notifications shown by the agent.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Unique identifier for a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Auxiliary data carried by a notification until it is clicked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: Option<String>,
}

/// Display options, mirroring what the platform accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub sound: Option<String>,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
}

/// A notification handed to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub options: NotificationOptions,
}

impl Notification {
    /// A notification that was never shown, e.g. one restored by the host after a restart.
    pub fn new(title: impl Into<String>, options: NotificationOptions) -> Self {
        Self {
            id: NotificationId::new(),
            title: title.into(),
            options,
        }
    }
}

/// Notifications currently on screen.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    displayed: Vec<Notification>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display a notification.
    pub fn show(&mut self, title: &str, options: NotificationOptions) -> Notification {
        let notification = Notification::new(title, options);
        debug!(id = ?notification.id, title = %title, "Notification displayed");
        self.displayed.push(notification.clone());
        notification
    }

    /// Close a notification. Returns whether it was on screen.
    pub fn close(&mut self, id: NotificationId) -> bool {
        let before = self.displayed.len();
        self.displayed.retain(|n| n.id != id);
        before != self.displayed.len()
    }

    /// Notifications on screen, oldest first.
    pub fn displayed(&self) -> &[Notification] {
        &self.displayed
    }
}
