//! Registry of connected clients.
//!
//! The hub loop is the only writer; send callers iterate concurrently through
//! the same methods. Filters run while a shard is read-locked and must not
//! call back into the registry.

use crate::client::Client;
use crate::filter::Filter;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use switchboard_transport::ClientId;

/// The authoritative map from client ID to client.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<dyn Client>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a client.
    ///
    /// Returns `false` and leaves the map untouched if the ID is taken.
    pub fn insert(&self, client: Arc<dyn Client>) -> bool {
        match self.clients.entry(client.id().clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(client);
                true
            }
        }
    }

    /// Remove a client. Only one concurrent caller gets `Some`.
    pub fn remove(&self, id: &ClientId) -> Option<Arc<dyn Client>> {
        self.clients.remove(id).map(|(_, client)| client)
    }

    /// Whether a client is registered.
    #[must_use]
    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    /// Number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// All registered clients.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn Client>> {
        self.clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Call `f` for every client matching `filter`, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `f`.
    pub fn for_each_matching<E, F>(&self, filter: &Filter, mut f: F) -> Result<(), E>
    where
        F: FnMut(&Arc<dyn Client>) -> Result<(), E>,
    {
        for entry in self.clients.iter() {
            let client = entry.value();
            if filter.matches(client.id(), client.attributes()) {
                f(client)?;
            }
        }
        Ok(())
    }

    /// Count clients matching `filter`.
    #[must_use]
    pub fn count_matching(&self, filter: &Filter) -> usize {
        self.clients
            .iter()
            .filter(|entry| filter.matches(entry.key(), entry.value().attributes()))
            .count()
    }

    /// Remove and return every client.
    pub fn drain(&self) -> Vec<Arc<dyn Client>> {
        let ids: Vec<ClientId> = self.clients.iter().map(|entry| entry.key().clone()).collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }
}
