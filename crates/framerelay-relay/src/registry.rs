//! In-memory registry of connected clients with an explicit active slot.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::events::ClientId;

/// Thread-safe registry of connected clients.
///
/// Worker responses go to the *active* client. The first client to connect
/// claims the slot; when the active client leaves, the earliest-connected
/// remaining client is promoted. The lock is only held while inspecting or
/// mutating the map, never across I/O.
pub struct ConnectionRegistry<C> {
    inner: Mutex<RegistryInner<C>>,
}

struct RegistryInner<C> {
    clients: BTreeMap<ClientId, Arc<C>>,
    active: Option<ClientId>,
}

impl<C> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                clients: BTreeMap::new(),
                active: None,
            }),
        }
    }
}

impl<C> ConnectionRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client. Returns `true` if it became the active client.
    pub fn insert(&self, id: ClientId, conn: Arc<C>) -> bool {
        let mut inner = self.lock();
        inner.clients.insert(id, conn);
        if inner.active.is_none() {
            inner.active = Some(id);
            info!(client = %id, "client is now active");
            true
        } else {
            debug!(client = %id, "client registered as standby");
            false
        }
    }

    /// Remove a client, promoting a successor if it was active.
    pub fn remove(&self, id: ClientId) -> Option<Arc<C>> {
        let mut inner = self.lock();
        let conn = inner.clients.remove(&id)?;
        if inner.active == Some(id) {
            // ClientIds are handed out in accept order, so the first key is
            // the earliest-connected client.
            inner.active = inner.clients.keys().next().copied();
            match inner.active {
                Some(next) => info!(previous = %id, client = %next, "promoted active client"),
                None => info!(previous = %id, "no active client"),
            }
        }
        Some(conn)
    }

    pub fn get(&self, id: ClientId) -> Option<Arc<C>> {
        self.lock().clients.get(&id).cloned()
    }

    /// The active client and its connection.
    pub fn active(&self) -> Option<(ClientId, Arc<C>)> {
        let inner = self.lock();
        let id = inner.active?;
        inner.clients.get(&id).map(|conn| (id, Arc::clone(conn)))
    }

    pub fn active_id(&self) -> Option<ClientId> {
        self.lock().active
    }

    /// Connected client ids in accept order.
    pub fn ids(&self) -> Vec<ClientId> {
        self.lock().clients.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().clients.is_empty()
    }

    /// Remove every client and clear the active slot.
    pub fn drain(&self) -> Vec<(ClientId, Arc<C>)> {
        let mut inner = self.lock();
        inner.active = None;
        std::mem::take(&mut inner.clients).into_iter().collect()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner<C>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
