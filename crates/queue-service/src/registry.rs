//! Client registry: the authoritative map of live connections.
//!
//! Owned by the coordinator actor. Other components refer to clients only by
//! [`ClientId`].

use crate::protocol::ServerMessage;

use chrono::{DateTime, Utc};
use common::types::ClientId;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Client state relative to the exclusive resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Connected, neither waiting nor holding.
    Connected,
    /// Waiting in the admission queue.
    Queued,
    /// Holding the exclusive resource.
    Active,
}

/// Outbound half of a client's connection.
pub type Outbound = mpsc::Sender<ServerMessage>;

/// One registered connection.
#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    pub state: ClientState,
    /// Used for rate limiting and logs only.
    pub source_address: String,
    /// Set when the client asks to join.
    pub joined_at: Option<DateTime<Utc>>,
    /// Set once by the first accepted join; never replaced.
    invite_token: Option<String>,
    pub outbound: Outbound,
}

impl Client {
    #[must_use]
    pub fn new(id: ClientId, source_address: String, outbound: Outbound) -> Self {
        Self {
            id,
            state: ClientState::Connected,
            source_address,
            joined_at: None,
            invite_token: None,
            outbound,
        }
    }

    #[must_use]
    pub fn invite_token(&self) -> Option<&str> {
        self.invite_token.as_deref()
    }

    /// Record the invite token. A token that is already set is kept.
    pub fn set_invite_token(&mut self, token: &str) {
        if self.invite_token.is_none() {
            self.invite_token = Some(token.to_string());
        }
    }
}

/// Map of live clients by id.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, Client>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client. Returns `false` if the id was already registered.
    pub fn register(&mut self, client: Client) -> bool {
        if self.clients.contains_key(&client.id) {
            return false;
        }
        self.clients.insert(client.id, client);
        true
    }

    pub fn remove(&mut self, id: &ClientId) -> Option<Client> {
        self.clients.remove(id)
    }

    #[must_use]
    pub fn get(&self, id: &ClientId) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn get_mut(&mut self, id: &ClientId) -> Option<&mut Client> {
        self.clients.get_mut(id)
    }

    #[must_use]
    pub fn state_of(&self, id: &ClientId) -> Option<ClientState> {
        self.clients.get(id).map(|c| c.state)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    /// Number of clients currently in `state`.
    #[must_use]
    pub fn count_in_state(&self, state: ClientState) -> usize {
        self.clients.values().filter(|c| c.state == state).count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn client(addr: &str) -> (Client, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (Client::new(ClientId::new(), addr.to_string(), tx), rx)
    }

    #[test]
    fn test_register_and_remove() {
        let mut registry = ClientRegistry::new();
        let (c, _rx) = client("10.0.0.1");
        let id = c.id;

        assert!(registry.register(c));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.state_of(&id), Some(ClientState::Connected));

        let removed = registry.remove(&id).unwrap();
        assert_eq!(removed.source_address, "10.0.0.1");
        assert!(registry.is_empty());
        assert!(registry.remove(&id).is_none());
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let mut registry = ClientRegistry::new();
        let (c, _rx) = client("10.0.0.1");
        let id = c.id;
        let (tx, _rx2) = mpsc::channel(8);

        assert!(registry.register(c));
        assert!(!registry.register(Client::new(id, "10.0.0.2".to_string(), tx)));
        assert_eq!(registry.get(&id).unwrap().source_address, "10.0.0.1");
    }

    #[test]
    fn test_invite_token_set_once() {
        let (mut c, _rx) = client("10.0.0.1");
        assert!(c.invite_token().is_none());

        c.set_invite_token("first");
        c.set_invite_token("second");
        assert_eq!(c.invite_token(), Some("first"));
    }

    #[test]
    fn test_count_in_state() {
        let mut registry = ClientRegistry::new();
        let (a, _ra) = client("a");
        let (b, _rb) = client("b");
        let b_id = b.id;
        registry.register(a);
        registry.register(b);

        registry.get_mut(&b_id).unwrap().state = ClientState::Queued;

        assert_eq!(registry.count_in_state(ClientState::Connected), 1);
        assert_eq!(registry.count_in_state(ClientState::Queued), 1);
        assert_eq!(registry.count_in_state(ClientState::Active), 0);
    }
}
