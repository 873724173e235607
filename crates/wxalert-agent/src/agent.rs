//! The agent: one installed version of the offline caching and push-delivery worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use wxalert_cache::{CacheStorage, SharedCacheStorage};
use wxalert_net::{Fetcher, Request};

use crate::clients::Clients;
use crate::dispatch::{self, DispatchOutcome};
use crate::intercept::{FetchOutcome, InterceptPolicy};
use crate::lifecycle::{ActivationReport, AgentState, CacheLifecycle};
use crate::notifications::{Notification, NotificationCenter};
use crate::{push, AgentConfig, AgentError, AgentEvent, ExtendableEvent};

/// Builder for [`ServiceWorkerAgent`].
pub struct AgentBuilder {
    config: AgentConfig,
    fetcher: Arc<dyn Fetcher>,
    caches: Option<SharedCacheStorage>,
    clients: Option<Arc<RwLock<Clients>>>,
    notifications: Option<Arc<RwLock<NotificationCenter>>>,
}

impl AgentBuilder {
    /// Share an existing cache storage, e.g. one left behind by a previous version.
    pub fn caches(mut self, caches: SharedCacheStorage) -> Self {
        self.caches = Some(caches);
        self
    }

    /// Share the host's client list.
    pub fn clients(mut self, clients: Arc<RwLock<Clients>>) -> Self {
        self.clients = Some(clients);
        self
    }

    /// Share the host's notification center.
    pub fn notifications(mut self, notifications: Arc<RwLock<NotificationCenter>>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    /// Validate the configuration and create the agent.
    pub fn build(self) -> Result<(ServiceWorkerAgent, mpsc::UnboundedReceiver<AgentEvent>), AgentError> {
        self.config.validate()?;

        let (events, event_rx) = mpsc::unbounded_channel();
        let config = Arc::new(self.config);
        let caches = self
            .caches
            .unwrap_or_else(|| CacheStorage::in_memory().shared());

        let agent = ServiceWorkerAgent {
            lifecycle: CacheLifecycle::new(Arc::clone(&config), Arc::clone(&caches), Arc::clone(&self.fetcher)),
            policy: InterceptPolicy::new(Arc::clone(&config), Arc::clone(&caches), self.fetcher),
            config,
            caches,
            clients: self.clients.unwrap_or_default(),
            notifications: self.notifications.unwrap_or_default(),
            state: Arc::new(RwLock::new(AgentState::Parsed)),
            skip_waiting: Arc::new(AtomicBool::new(false)),
            events,
        };
        info!(cache = %agent.config.cache_name(), "Agent loaded");
        Ok((agent, event_rx))
    }
}

/// Offline caching and push-delivery agent.
///
/// Cloning is cheap and every clone drives the same agent.
#[derive(Clone)]
pub struct ServiceWorkerAgent {
    config: Arc<AgentConfig>,
    caches: SharedCacheStorage,
    clients: Arc<RwLock<Clients>>,
    notifications: Arc<RwLock<NotificationCenter>>,
    lifecycle: CacheLifecycle,
    policy: InterceptPolicy,
    state: Arc<RwLock<AgentState>>,
    skip_waiting: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<AgentEvent>,
}

impl ServiceWorkerAgent {
    /// Create an agent with fresh in-memory caches, clients and notifications.
    pub fn new(
        config: AgentConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<AgentEvent>), AgentError> {
        Self::builder(config, fetcher).build()
    }

    pub fn builder(config: AgentConfig, fetcher: Arc<dyn Fetcher>) -> AgentBuilder {
        AgentBuilder {
            config,
            fetcher,
            caches: None,
            clients: None,
            notifications: None,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn caches(&self) -> &SharedCacheStorage {
        &self.caches
    }

    pub fn clients(&self) -> &Arc<RwLock<Clients>> {
        &self.clients
    }

    pub fn notifications(&self) -> &Arc<RwLock<NotificationCenter>> {
        &self.notifications
    }

    pub async fn state(&self) -> AgentState {
        *self.state.read().await
    }

    /// Whether a successful install asked to activate without waiting for old clients.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    // ==================== Lifecycle ====================

    /// Install: precache the manifest into the current generation.
    ///
    /// On failure the agent becomes redundant and the error is returned; a previously
    /// active version keeps serving.
    pub async fn install(&self) -> Result<usize, AgentError> {
        self.transition("install", AgentState::Parsed, AgentState::Installing)
            .await?;

        match self.lifecycle.precache().await {
            Ok(stored) => {
                self.skip_waiting.store(true, Ordering::SeqCst);
                self.set_state(AgentState::Installed).await;
                Ok(stored)
            }
            Err(e) => {
                self.set_state(AgentState::Redundant).await;
                Err(e)
            }
        }
    }

    /// Activate: purge stale generations, then claim every open window.
    ///
    /// Activating an already active agent repeats the purge, which finds nothing.
    pub async fn activate(&self) -> Result<ActivationReport, AgentError> {
        if self.state().await != AgentState::Activated {
            self.transition("activate", AgentState::Installed, AgentState::Activating)
                .await?;
        }

        let deleted = self.lifecycle.purge_stale().await;
        for name in &deleted {
            let _ = self.events.send(AgentEvent::CacheDeleted { name: name.clone() });
        }

        let claimed = self.clients.write().await.claim();
        info!(claimed, "Clients claimed");
        let _ = self.events.send(AgentEvent::ClientsClaimed { count: claimed });

        if self.state().await != AgentState::Activated {
            self.set_state(AgentState::Activated).await;
        }
        Ok(ActivationReport { deleted, claimed })
    }

    /// Install event entry point. The install's outcome settles `event`.
    pub fn on_install(&self, event: &mut ExtendableEvent) {
        let agent = self.clone();
        event.wait_until(async move { agent.install().await.map(|_| ()) });
    }

    /// Activate event entry point.
    pub fn on_activate(&self, event: &mut ExtendableEvent) {
        let agent = self.clone();
        event.wait_until(async move { agent.activate().await.map(|_| ()) });
    }

    // ==================== Fetch ====================

    /// Fetch event entry point. Requests pass through until the agent is active.
    pub async fn on_fetch(&self, request: &Request, event: &mut ExtendableEvent) -> FetchOutcome {
        if !self.state().await.is_active() {
            debug!(url = %request.url, "Agent not active, passing through");
            return FetchOutcome::Passthrough;
        }
        self.policy.handle(request, event).await
    }

    // ==================== Push ====================

    /// Show the notification for a push message.
    pub async fn show_push(&self, payload: Option<&[u8]>) -> Notification {
        let notification = push::deliver(&self.notifications, &self.config.notification, payload).await;
        let _ = self.events.send(AgentEvent::NotificationShown {
            id: notification.id,
            title: notification.title.clone(),
        });
        notification
    }

    /// Push event entry point. Display completes before `event` settles.
    pub fn on_push(&self, payload: Option<Bytes>, event: &mut ExtendableEvent) {
        let agent = self.clone();
        event.wait_until(async move {
            agent.show_push(payload.as_deref()).await;
            Ok(())
        });
    }

    // ==================== Notification click ====================

    /// Close `notification` and focus or open a window at its target.
    pub async fn dispatch_click(&self, notification: &Notification) -> Result<DispatchOutcome, AgentError> {
        let result = dispatch::dispatch(&self.config, &self.clients, &self.notifications, notification).await;
        let _ = self.events.send(AgentEvent::NotificationClosed { id: notification.id });

        match &result {
            Ok(DispatchOutcome::Focused(id)) => {
                let _ = self.events.send(AgentEvent::ClientFocused { id: *id });
            }
            Ok(DispatchOutcome::Opened { id, url }) => {
                let _ = self.events.send(AgentEvent::WindowOpened {
                    id: *id,
                    url: url.clone(),
                });
            }
            Err(e) => warn!(error = %e, "Notification click could not be dispatched"),
        }
        result
    }

    /// Notification click entry point.
    pub fn on_notification_click(&self, notification: Notification, event: &mut ExtendableEvent) {
        let agent = self.clone();
        event.wait_until(async move { agent.dispatch_click(&notification).await.map(|_| ()) });
    }

    // ==================== State ====================

    async fn transition(
        &self,
        action: &'static str,
        from: AgentState,
        to: AgentState,
    ) -> Result<(), AgentError> {
        {
            let mut state = self.state.write().await;
            if *state != from {
                return Err(AgentError::InvalidState {
                    action,
                    state: *state,
                });
            }
            *state = to;
        }
        self.announce(to);
        Ok(())
    }

    async fn set_state(&self, to: AgentState) {
        *self.state.write().await = to;
        self.announce(to);
    }

    fn announce(&self, state: AgentState) {
        debug!(cache = %self.config.cache_name(), state = ?state, "Agent state changed");
        let _ = self.events.send(AgentEvent::StateChange {
            cache_name: self.config.cache_name(),
            state,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;
    use wxalert_net::StaticFetcher;

    fn config() -> AgentConfig {
        AgentConfig {
            manifest: vec!["/".into(), "/offline/".into()],
            ..AgentConfig::for_origin(Url::parse("https://wx.example.com/").unwrap())
        }
    }

    fn fetcher() -> Arc<StaticFetcher> {
        Arc::new(
            StaticFetcher::new()
                .with_route("https://wx.example.com/", "text/html", "home")
                .with_route("https://wx.example.com/offline/", "text/html", "offline"),
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = AgentConfig {
            cache_prefix: String::new(),
            ..config()
        };
        assert!(matches!(
            ServiceWorkerAgent::new(config, fetcher()),
            Err(AgentError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_full_lifecycle_emits_state_changes() {
        let (agent, mut rx) = ServiceWorkerAgent::new(config(), fetcher()).unwrap();
        assert_eq!(agent.state().await, AgentState::Parsed);

        assert_eq!(agent.install().await.unwrap(), 2);
        assert!(agent.skip_waiting_requested());
        agent.activate().await.unwrap();
        assert_eq!(agent.state().await, AgentState::Activated);

        let states: Vec<AgentState> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                AgentEvent::StateChange { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                AgentState::Installing,
                AgentState::Installed,
                AgentState::Activating,
                AgentState::Activated,
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_install_is_redundant_and_final() {
        let fetcher = Arc::new(StaticFetcher::new().with_route("https://wx.example.com/", "text/html", "home"));
        let (agent, _rx) = ServiceWorkerAgent::new(config(), fetcher).unwrap();

        assert!(matches!(agent.install().await, Err(AgentError::InstallFailed { .. })));
        assert_eq!(agent.state().await, AgentState::Redundant);
        assert!(!agent.skip_waiting_requested());

        assert!(matches!(
            agent.install().await,
            Err(AgentError::InvalidState { action: "install", state: AgentState::Redundant })
        ));
        assert!(matches!(agent.activate().await, Err(AgentError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_activate_before_install_is_rejected() {
        let (agent, _rx) = ServiceWorkerAgent::new(config(), fetcher()).unwrap();
        assert!(matches!(
            agent.activate().await,
            Err(AgentError::InvalidState { action: "activate", state: AgentState::Parsed })
        ));
    }

    #[tokio::test]
    async fn test_requests_pass_through_until_active() {
        let (agent, _rx) = ServiceWorkerAgent::new(config(), fetcher()).unwrap();
        let request = Request::navigate(Url::parse("https://wx.example.com/").unwrap());

        let mut event = ExtendableEvent::new();
        assert!(matches!(agent.on_fetch(&request, &mut event).await, FetchOutcome::Passthrough));

        agent.install().await.unwrap();
        agent.activate().await.unwrap();
        let outcome = agent.on_fetch(&request, &mut event).await;
        assert!(outcome.response().is_some());
        event.settled().await.unwrap();
    }

    #[tokio::test]
    async fn test_event_entry_points_settle() {
        let (agent, mut rx) = ServiceWorkerAgent::new(config(), fetcher()).unwrap();

        let mut install = ExtendableEvent::new();
        agent.on_install(&mut install);
        install.settled().await.unwrap();

        let mut activate = ExtendableEvent::new();
        agent.on_activate(&mut activate);
        activate.settled().await.unwrap();

        let mut push = ExtendableEvent::new();
        agent.on_push(Some(Bytes::from_static(b"Hail|||Quarter-size hail")), &mut push);
        push.settled().await.unwrap();

        let shown = agent.notifications().read().await.displayed().to_vec();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].title, "Hail");

        let mut click = ExtendableEvent::new();
        agent.on_notification_click(shown[0].clone(), &mut click);
        click.settled().await.unwrap();

        assert!(agent.notifications().read().await.displayed().is_empty());
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, AgentEvent::NotificationShown { title, .. } if title == "Hail")));
        assert!(events.iter().any(|e| matches!(e, AgentEvent::WindowOpened { url, .. } if url.as_str() == "https://wx.example.com/")));
    }
}
