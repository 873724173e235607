//! # WxAlert Agent
//!
//! Offline caching and push-delivery agent for the WxAlert weather application.
//!
//! ## Features
//!
//! - **Lifecycle**: install precaches the app shell all-or-nothing; activate deletes
//!   stale cache generations and claims open windows
//! - **Fetch interception**: network-first for page navigations, cache-first for assets
//! - **Push delivery**: JSON or `|||`-delimited payloads become notifications
//! - **Notification clicks**: focus a window already showing the target, or open one
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerAgent
//!     ├── CacheLifecycle ──────┐
//!     ├── InterceptPolicy ─────┼── CacheStorage (shared, versioned generations)
//!     │        └── Fetcher ────┘
//!     ├── push::deliver ──────── NotificationCenter
//!     └── dispatch::dispatch ─── Clients
//!
//! Every handler extends its event's lifetime through ExtendableEvent.
//! ```

mod agent;
pub mod clients;
pub mod config;
pub mod dispatch;
mod error;
mod events;
mod extendable;
pub mod intercept;
pub mod lifecycle;
pub mod notifications;
pub mod push;

pub use agent::{AgentBuilder, ServiceWorkerAgent};
pub use clients::{Client, ClientId, ClientMatchOptions, ClientType, Clients, VisibilityState};
pub use config::{AgentConfig, NotificationDefaults};
pub use dispatch::DispatchOutcome;
pub use error::AgentError;
pub use events::AgentEvent;
pub use extendable::ExtendableEvent;
pub use intercept::{classify, FetchOutcome, RequestClass, ResponseSource};
pub use lifecycle::{ActivationReport, AgentState};
pub use notifications::{Notification, NotificationCenter, NotificationId, NotificationOptions};
pub use push::{NotificationDescriptor, PayloadFormat};

pub use wxalert_common::{init_logging, LogConfig, LogFormat};
