//! One shared client per endpoint.
//!
//! Replaces a process-wide singleton: the application owns a registry and
//! asks it for the client of a URL, so every consumer of an endpoint shares
//! one socket.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::client::RealtimeClient;
use crate::types::RealtimeConfig;

/// Registry of transport clients keyed by URL.
pub struct ClientRegistry {
    /// Settings applied to new clients; its `url` is replaced per entry.
    template: RealtimeConfig,
    clients: RwLock<HashMap<String, RealtimeClient>>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(RealtimeConfig::new(String::new()))
    }
}

impl ClientRegistry {
    pub fn new(template: RealtimeConfig) -> Self {
        Self {
            template,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the client for `url`, creating it on first use.
    ///
    /// The client is not connected here; callers decide when to `connect()`.
    pub fn get_or_create(&self, url: &str) -> RealtimeClient {
        if let Some(client) = self.get(url) {
            return client;
        }
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        clients
            .entry(url.to_string())
            .or_insert_with(|| {
                debug!(url, "creating realtime client");
                let mut config = self.template.clone();
                config.url = url.to_string();
                RealtimeClient::new(config)
            })
            .clone()
    }

    pub fn get(&self, url: &str) -> Option<RealtimeClient> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
    }

    /// Disconnects and forgets the client for `url`.
    pub fn remove(&self, url: &str) -> Option<RealtimeClient> {
        let removed = self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
        if let Some(client) = &removed {
            client.disconnect();
        }
        removed
    }

    pub fn urls(&self) -> Vec<String> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Disconnects every client and empties the registry.
    pub fn disconnect_all(&self) {
        let clients: Vec<RealtimeClient> = self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, c)| c)
            .collect();
        for client in clients {
            client.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::types::ConnectionState;

    #[test]
    fn same_url_shares_one_client() {
        let registry = ClientRegistry::default();
        let a = registry.get_or_create("ws://host/a");
        let b = registry.get_or_create("ws://host/a");
        let _other = registry.get_or_create("ws://host/b");

        a.subscribe("ticks", |_| {});
        assert_eq!(b.handler_count("ticks"), 1);
        assert_eq!(registry.len(), 2);

        let mut urls = registry.urls();
        urls.sort();
        assert_eq!(urls, vec!["ws://host/a", "ws://host/b"]);
    }

    #[test]
    fn template_settings_apply_to_new_clients() {
        let mut template = RealtimeConfig::new("ignored");
        template.heartbeat_interval = Duration::from_secs(5);
        template.reconnect.max_attempts = 9;
        let registry = ClientRegistry::new(template);

        let client = registry.get_or_create("ws://host/feed");
        assert_eq!(client.url(), "ws://host/feed");
        assert_eq!(client.config().heartbeat_interval, Duration::from_secs(5));
        assert_eq!(client.config().reconnect.max_attempts, 9);
    }

    #[test]
    fn remove_forgets_client() {
        let registry = ClientRegistry::default();
        registry.get_or_create("ws://host/a");

        let removed = registry.remove("ws://host/a").expect("present");
        assert_eq!(removed.status(), ConnectionState::Disconnected);
        assert!(registry.get("ws://host/a").is_none());
        assert!(registry.remove("ws://host/a").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn disconnect_all_empties_registry() {
        let registry = ClientRegistry::default();
        registry.get_or_create("ws://host/a");
        registry.get_or_create("ws://host/b");

        registry.disconnect_all();
        assert!(registry.is_empty());
    }
}
