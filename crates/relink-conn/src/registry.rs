use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use relink_transport::RemoteAddress;
use tracing::debug;

use crate::error::Result;
use crate::manager::ConnectionManager;
use crate::options::ConnectionOptions;

/// One [`ConnectionManager`] per remote address.
///
/// Entries are only removed explicitly. Addresses compare by primary
/// `host:port`, so registering a backup does not create a second entry.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<RemoteAddress, ConnectionManager>>,
}

static GLOBAL: OnceLock<Arc<ConnectionRegistry>> = OnceLock::new();

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry, created on first use.
    pub fn global() -> Arc<ConnectionRegistry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ConnectionRegistry::new())))
    }

    /// Existing manager for `address`, or a new idle one built with `options`.
    ///
    /// `options` are ignored when an entry already exists.
    pub fn get_or_create(
        &self,
        address: RemoteAddress,
        options: ConnectionOptions,
    ) -> Result<ConnectionManager> {
        let mut connections = self.lock();
        if let Some(existing) = connections.get(&address) {
            return Ok(existing.clone());
        }
        let manager = ConnectionManager::new(address.clone(), options)?;
        debug!(address = %address, "registered connection");
        connections.insert(address, manager.clone());
        Ok(manager)
    }

    pub fn get(&self, address: &RemoteAddress) -> Option<ConnectionManager> {
        self.lock().get(address).cloned()
    }

    /// Drop the entry without touching the connection.
    pub fn remove(&self, address: &RemoteAddress) -> Option<ConnectionManager> {
        self.lock().remove(address)
    }

    /// Disconnect without reconnecting, then drop the entry.
    pub fn destroy(&self, address: &RemoteAddress) -> bool {
        let Some(manager) = self.remove(address) else {
            return false;
        };
        manager.disconnect(false);
        debug!(address = %address, "destroyed connection");
        true
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn addresses(&self) -> Vec<RemoteAddress> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RemoteAddress, ConnectionManager>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnError;
    use crate::state::ConnectionState;

    #[test]
    fn get_or_create_returns_same_manager() {
        let registry = ConnectionRegistry::new();
        let a = registry
            .get_or_create(
                RemoteAddress::new("127.0.0.1", 9000),
                ConnectionOptions::default(),
            )
            .unwrap();
        let b = registry
            .get_or_create(
                RemoteAddress::new("127.0.0.1", 9000).with_backup("127.0.0.1", 9001),
                ConnectionOptions::default(),
            )
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(b.address().backup().is_none(), "first registration wins");
        a.subscribe(std::sync::Arc::new(Noop));
        assert_eq!(a.state(), ConnectionState::Idle);
    }

    struct Noop;
    impl crate::listener::SocketActionListener for Noop {}

    #[test]
    fn distinct_addresses_get_distinct_entries() {
        let registry = ConnectionRegistry::new();
        for port in [9000, 9001, 9002] {
            registry
                .get_or_create(
                    RemoteAddress::new("127.0.0.1", port),
                    ConnectionOptions::default(),
                )
                .unwrap();
        }
        assert_eq!(registry.len(), 3);
        let mut ports: Vec<u16> = registry.addresses().iter().map(|a| a.port()).collect();
        ports.sort_unstable();
        assert_eq!(ports, vec![9000, 9001, 9002]);
    }

    #[test]
    fn remove_and_destroy() {
        let registry = ConnectionRegistry::new();
        let address = RemoteAddress::new("127.0.0.1", 9100);
        registry
            .get_or_create(address.clone(), ConnectionOptions::default())
            .unwrap();

        assert!(registry.get(&address).is_some());
        assert!(registry.destroy(&address));
        assert!(!registry.destroy(&address));
        assert!(registry.get(&address).is_none());
        assert!(registry.is_empty());

        registry
            .get_or_create(address.clone(), ConnectionOptions::default())
            .unwrap();
        assert!(registry.remove(&address).is_some());
        assert!(registry.remove(&address).is_none());
    }

    #[test]
    fn invalid_options_do_not_register() {
        let registry = ConnectionRegistry::new();
        let err = registry
            .get_or_create(
                RemoteAddress::new("127.0.0.1", 9200),
                ConnectionOptions {
                    heartbeat_miss_threshold: 0,
                    ..ConnectionOptions::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ConnError::InvalidOptions(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn global_is_shared() {
        let a = ConnectionRegistry::global();
        let b = ConnectionRegistry::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
