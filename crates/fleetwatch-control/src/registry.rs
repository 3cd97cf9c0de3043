//! Live connection tracking.
//!
//! One entry per transport session, keyed by [`ConnectionId`]. Entries live in
//! a sharded map so that churn on one connection never blocks another.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fleetwatch_core::{paginate_sorted, ConnectionId, InstanceUid, Page, PageRequest};
use fleetwatch_store::keys::time_bytes;
use tracing::{debug, info};

use crate::error::{ControlError, Result};
use crate::types::ConnectionInfo;

/// Bookkeeping for live transport sessions.
pub trait ConnectionRegistry: Send + Sync {
    /// Start tracking a connection.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::AlreadyExists` if the id is already live.
    fn register(&self, connection_id: ConnectionId, now: DateTime<Utc>) -> Result<()>;

    /// Record which agent is on the other end of a connection.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NotFound` if the connection is not registered.
    fn bind_instance(&self, connection_id: &ConnectionId, instance_uid: InstanceUid)
        -> Result<()>;

    /// Record inbound traffic. Unknown ids are ignored.
    fn touch(&self, connection_id: &ConnectionId, now: DateTime<Utc>);

    /// Stop tracking a connection. Returns false if it was not registered.
    fn unregister(&self, connection_id: &ConnectionId) -> bool;

    /// Snapshot of one connection.
    fn get(&self, connection_id: &ConnectionId, now: DateTime<Utc>) -> Option<ConnectionInfo>;

    /// Whether the connection is registered and has spoken recently enough.
    fn is_alive(&self, connection_id: &ConnectionId, now: DateTime<Utc>) -> bool {
        self.get(connection_id, now).is_some_and(|c| c.alive)
    }

    /// Page through connections ordered by registration time, then id.
    fn list(&self, request: &PageRequest, now: DateTime<Utc>) -> Page<ConnectionInfo>;

    /// Number of registered connections.
    fn len(&self) -> usize;

    /// Returns true if nothing is registered.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct ConnectionEntry {
    instance_uid: Option<InstanceUid>,
    registered_at: DateTime<Utc>,
    last_communicated_at: DateTime<Utc>,
}

/// [`ConnectionRegistry`] backed by a [`DashMap`].
#[derive(Debug)]
pub struct ShardedConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    liveness_threshold: chrono::Duration,
}

impl ShardedConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(liveness_threshold: chrono::Duration) -> Self {
        Self {
            connections: DashMap::new(),
            liveness_threshold,
        }
    }

    /// The configured liveness threshold.
    #[must_use]
    pub const fn liveness_threshold(&self) -> chrono::Duration {
        self.liveness_threshold
    }

    fn snapshot(
        &self,
        connection_id: ConnectionId,
        entry: &ConnectionEntry,
        now: DateTime<Utc>,
    ) -> ConnectionInfo {
        ConnectionInfo {
            connection_id,
            instance_uid: entry.instance_uid,
            registered_at: entry.registered_at,
            last_communicated_at: entry.last_communicated_at,
            alive: now - entry.last_communicated_at < self.liveness_threshold,
        }
    }
}

impl ConnectionRegistry for ShardedConnectionRegistry {
    fn register(&self, connection_id: ConnectionId, now: DateTime<Utc>) -> Result<()> {
        match self.connections.entry(connection_id) {
            Entry::Occupied(_) => Err(ControlError::already_exists("connection", connection_id)),
            Entry::Vacant(slot) => {
                slot.insert(ConnectionEntry {
                    instance_uid: None,
                    registered_at: now,
                    last_communicated_at: now,
                });
                info!(connection_id = %connection_id, "Connection registered");
                Ok(())
            }
        }
    }

    fn bind_instance(
        &self,
        connection_id: &ConnectionId,
        instance_uid: InstanceUid,
    ) -> Result<()> {
        let mut entry = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| ControlError::not_found("connection", connection_id))?;
        entry.instance_uid = Some(instance_uid);
        debug!(
            connection_id = %connection_id,
            instance_uid = %instance_uid,
            "Connection bound to agent"
        );
        Ok(())
    }

    fn touch(&self, connection_id: &ConnectionId, now: DateTime<Utc>) {
        if let Some(mut entry) = self.connections.get_mut(connection_id) {
            entry.last_communicated_at = now;
        }
    }

    fn unregister(&self, connection_id: &ConnectionId) -> bool {
        let removed = self.connections.remove(connection_id).is_some();
        if removed {
            info!(connection_id = %connection_id, "Connection unregistered");
        }
        removed
    }

    fn get(&self, connection_id: &ConnectionId, now: DateTime<Utc>) -> Option<ConnectionInfo> {
        self.connections
            .get(connection_id)
            .map(|entry| self.snapshot(*connection_id, &entry, now))
    }

    fn list(&self, request: &PageRequest, now: DateTime<Utc>) -> Page<ConnectionInfo> {
        let mut entries: Vec<(Vec<u8>, ConnectionInfo)> = self
            .connections
            .iter()
            .map(|item| {
                let info = self.snapshot(*item.key(), item.value(), now);
                let mut key = time_bytes(info.registered_at).to_vec();
                key.extend_from_slice(info.connection_id.as_bytes());
                (key, info)
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        paginate_sorted(entries, request)
    }

    fn len(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    fn registry() -> ShardedConnectionRegistry {
        ShardedConnectionRegistry::new(Duration::seconds(30))
    }

    #[test]
    fn liveness_follows_threshold() {
        let registry = registry();
        let c1 = ConnectionId::generate();
        registry.register(c1, epoch()).unwrap();

        assert!(registry.is_alive(&c1, epoch() + Duration::seconds(29)));
        assert!(!registry.is_alive(&c1, epoch() + Duration::seconds(30)));
        assert!(!registry.is_alive(&c1, epoch() + Duration::seconds(31)));
    }

    #[test]
    fn touch_extends_liveness() {
        let registry = registry();
        let c1 = ConnectionId::generate();
        registry.register(c1, epoch()).unwrap();
        registry.touch(&c1, epoch() + Duration::seconds(20));

        assert!(registry.is_alive(&c1, epoch() + Duration::seconds(45)));
        assert!(!registry.is_alive(&c1, epoch() + Duration::seconds(51)));
    }

    #[test]
    fn register_rejects_live_duplicate() {
        let registry = registry();
        let c1 = ConnectionId::generate();
        registry.register(c1, epoch()).unwrap();
        assert!(matches!(
            registry.register(c1, epoch()),
            Err(ControlError::AlreadyExists { .. })
        ));

        // Reusable once the first session is gone.
        assert!(registry.unregister(&c1));
        registry.register(c1, epoch()).unwrap();
    }

    #[test]
    fn unknown_ids_are_benign_for_touch_and_unregister() {
        let registry = registry();
        let ghost = ConnectionId::generate();
        registry.touch(&ghost, epoch());
        assert!(!registry.unregister(&ghost));
        assert!(!registry.is_alive(&ghost, epoch()));
        assert!(registry.is_empty());
    }

    #[test]
    fn bind_requires_registration() {
        let registry = registry();
        let c1 = ConnectionId::generate();
        let uid = InstanceUid::generate();
        assert!(matches!(
            registry.bind_instance(&c1, uid),
            Err(ControlError::NotFound { .. })
        ));

        registry.register(c1, epoch()).unwrap();
        registry.bind_instance(&c1, uid).unwrap();
        assert_eq!(registry.get(&c1, epoch()).unwrap().instance_uid, Some(uid));
    }

    #[test]
    fn list_orders_by_registration_and_pages() {
        let registry = registry();
        let ids: Vec<_> = (0..5)
            .map(|i| {
                let id = ConnectionId::generate();
                registry
                    .register(id, epoch() + Duration::seconds(4 - i))
                    .unwrap();
                id
            })
            .collect();

        let now = epoch() + Duration::seconds(30);
        let first = registry.list(&PageRequest::first(2), now);
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.remaining, 3);
        assert_eq!(first.items[0].connection_id, ids[4]);

        // Alive is computed against the caller's clock.
        assert!(!first.items[0].alive);
        assert!(first.items[1].alive);

        let rest = registry.list(
            &PageRequest {
                after: first.last_key,
                limit: 10,
            },
            now,
        );
        let listed: Vec<_> = first
            .items
            .iter()
            .chain(rest.items.iter())
            .map(|c| c.connection_id)
            .collect();
        let expected: Vec<_> = ids.iter().rev().copied().collect();
        assert_eq!(listed, expected);
    }

    #[test]
    fn concurrent_churn() {
        let registry = std::sync::Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = std::sync::Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let id = ConnectionId::generate();
                        registry.register(id, epoch()).unwrap();
                        registry.touch(&id, epoch());
                        assert!(registry.unregister(&id));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
