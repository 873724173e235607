//! Page clients (tabs, windows) visible to the agent.
//!
//! Clients are owned by the host; the agent only looks them up, focuses them, opens new
//! windows and takes control of them.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use tracing::debug;
use url::Url;

use crate::AgentError;

/// Unique identifier for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Hidden,
    Visible,
}

/// A client (page or worker) of the agent's origin.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,

    /// Current URL.
    pub url: Url,

    pub client_type: ClientType,

    pub visibility_state: VisibilityState,

    /// Whether focused.
    pub focused: bool,

    /// Whether this agent controls the client.
    pub controlled: bool,
}

impl Client {
    /// A window client at `url`, not yet controlled by the agent.
    pub fn window(url: Url) -> Self {
        Self {
            id: ClientId::new(),
            url,
            client_type: ClientType::Window,
            visibility_state: VisibilityState::Visible,
            focused: false,
            controlled: false,
        }
    }

    /// A dedicated worker client at `url`.
    pub fn worker(url: Url) -> Self {
        Self {
            client_type: ClientType::Worker,
            visibility_state: VisibilityState::Hidden,
            ..Self::window(url)
        }
    }

    /// Mark as hidden (e.g. a background tab).
    pub fn hidden(mut self) -> Self {
        self.visibility_state = VisibilityState::Hidden;
        self
    }

    /// Only window clients can take focus.
    pub fn can_focus(&self) -> bool {
        self.client_type == ClientType::Window
    }
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<ClientId, Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    /// Matching clients, oldest first.
    pub fn match_all(&self, options: ClientMatchOptions) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controlled)
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect();
        matched.sort_by_key(|c| c.id);
        matched
    }

    /// Focus a window client, unfocusing every other one.
    pub fn focus(&mut self, id: ClientId) -> Result<&Client, AgentError> {
        match self.clients.get(&id) {
            None => return Err(AgentError::Client(format!("no client {id:?}"))),
            Some(c) if !c.can_focus() => {
                return Err(AgentError::Client(
                    "can only focus window clients".to_string(),
                ))
            }
            Some(_) => {}
        }

        for client in self.clients.values_mut() {
            client.focused = client.id == id;
            if client.focused {
                client.visibility_state = VisibilityState::Visible;
            }
        }
        debug!(client = ?id, "Client focused");
        self.clients
            .get(&id)
            .ok_or_else(|| AgentError::Client(format!("no client {id:?}")))
    }

    /// Open a new focused window at `url`.
    pub fn open_window(&mut self, url: Url) -> &Client {
        let mut client = Client::window(url);
        client.focused = true;
        let id = client.id;

        for other in self.clients.values_mut() {
            other.focused = false;
        }
        debug!(client = ?id, url = %client.url, "Window opened");
        self.clients.entry(id).or_insert(client)
    }

    /// Take control of every window client. Returns how many were newly claimed.
    pub fn claim(&mut self) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.client_type == ClientType::Window && !client.controlled {
                client.controlled = true;
                claimed += 1;
            }
        }
        claimed
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) -> ClientId {
        let id = client.id;
        self.clients.insert(id, client);
        id
    }

    /// Remove a client.
    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        self.clients.remove(&id)
    }

    /// The focused client, if any.
    pub fn focused(&self) -> Option<&Client> {
        self.clients.values().find(|c| c.focused)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_open_window_focuses_it() {
        let mut clients = Clients::new();
        let first = clients.add(Client::window(url("https://example.com/")));
        clients.focus(first).unwrap();

        let opened = clients.open_window(url("https://example.com/alerts/1")).id;
        assert_eq!(clients.focused().unwrap().id, opened);
        assert!(!clients.get(first).unwrap().focused);
    }

    #[test]
    fn test_match_all_respects_control_and_type() {
        let mut clients = Clients::new();
        clients.add(Client::window(url("https://example.com/a")));
        clients.add(Client::worker(url("https://example.com/worker.js")));

        let controlled_only = ClientMatchOptions::default();
        assert!(clients.match_all(controlled_only).is_empty());

        let all_windows = ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        };
        assert_eq!(clients.match_all(all_windows).len(), 1);

        let everything = ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::All,
        };
        assert_eq!(clients.match_all(everything).len(), 2);
    }

    #[test]
    fn test_claim_controls_windows_once() {
        let mut clients = Clients::new();
        clients.add(Client::window(url("https://example.com/a")));
        clients.add(Client::window(url("https://example.com/b")).hidden());
        clients.add(Client::worker(url("https://example.com/w.js")));

        assert_eq!(clients.claim(), 2);
        assert_eq!(clients.claim(), 0);
        assert_eq!(clients.match_all(ClientMatchOptions::default()).len(), 2);
    }

    #[test]
    fn test_focus_rejects_workers_and_unknown_ids() {
        let mut clients = Clients::new();
        let worker = clients.add(Client::worker(url("https://example.com/w.js")));
        assert!(matches!(clients.focus(worker), Err(AgentError::Client(_))));

        clients.remove(worker);
        assert!(clients.focus(worker).is_err());
        assert!(clients.is_empty());
    }

    #[test]
    fn test_focus_makes_hidden_client_visible() {
        let mut clients = Clients::new();
        let id = clients.add(Client::window(url("https://example.com/")).hidden());
        let client = clients.focus(id).unwrap();
        assert!(client.focused);
        assert_eq!(client.visibility_state, VisibilityState::Visible);
    }
}
