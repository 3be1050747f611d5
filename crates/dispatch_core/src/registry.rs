//! Per-process driver registry: the matcher's candidate pool.
//!
//! Dense arena of [`DriverEntry`] plus two indexes (driver public id and
//! socket id). All mutation goes through the registry's own methods;
//! removal is a `swap_remove` with index fix-up. Mirror updates arriving
//! over the relay reuse the same methods, so reapplying a broadcast twice
//! is harmless.

use std::collections::HashMap;

use crate::events::{Configuration, DriverProfile, DriverState, PublicId, SocketId};
use crate::geo::Coordinate;

/// Live state of one driver whose socket terminates on some process.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverEntry {
    pub public_id: PublicId,
    pub socket_id: SocketId,
    pub rating: f64,
    pub p2p_capable: bool,
    pub position: Coordinate,
    pub configuration: Configuration,
    pub state: DriverState,
}

impl DriverEntry {
    pub fn profile(&self) -> DriverProfile {
        DriverProfile {
            public_id: self.public_id.clone(),
            rating: self.rating,
            p2p_capable: self.p2p_capable,
        }
    }
}

#[derive(Debug, Default)]
pub struct DriverRegistry {
    entries: Vec<DriverEntry>,
    by_driver: HashMap<PublicId, usize>,
    by_socket: HashMap<SocketId, usize>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace the entry for a driver. A driver reconnecting
    /// under a new socket id replaces its previous entry.
    pub fn setup(&mut self, entry: DriverEntry) {
        if let Some(&index) = self.by_driver.get(&entry.public_id) {
            let old_socket = self.entries[index].socket_id.clone();
            if old_socket != entry.socket_id {
                self.by_socket.remove(&old_socket);
                self.by_socket.insert(entry.socket_id.clone(), index);
            }
            self.entries[index] = entry;
            return;
        }
        let index = self.entries.len();
        self.by_driver.insert(entry.public_id.clone(), index);
        self.by_socket.insert(entry.socket_id.clone(), index);
        self.entries.push(entry);
    }

    /// Update a driver's position. Unknown sockets are a silent no-op;
    /// that legitimately happens right after a hand-off.
    pub fn set_position(&mut self, socket_id: &str, position: Coordinate) -> bool {
        let Some(&index) = self.by_socket.get(socket_id) else {
            return false;
        };
        self.entries[index].position = position;
        true
    }

    pub fn set_configuration(&mut self, socket_id: &str, configuration: Configuration) -> bool {
        let Some(&index) = self.by_socket.get(socket_id) else {
            return false;
        };
        self.entries[index].configuration = configuration;
        true
    }

    pub fn set_state(&mut self, socket_id: &str, state: DriverState) -> bool {
        let Some(&index) = self.by_socket.get(socket_id) else {
            return false;
        };
        self.entries[index].state = state;
        true
    }

    /// Drop the entry owned by a socket, if any.
    pub fn remove_socket(&mut self, socket_id: &str) -> Option<DriverEntry> {
        let index = self.by_socket.remove(socket_id)?;
        let entry = self.entries.swap_remove(index);
        self.by_driver.remove(&entry.public_id);
        // The entry that moved into the vacated slot needs its indexes
        // pointed at the new position.
        if let Some(moved) = self.entries.get(index) {
            self.by_driver.insert(moved.public_id.clone(), index);
            self.by_socket.insert(moved.socket_id.clone(), index);
        }
        Some(entry)
    }

    pub fn get(&self, public_id: &str) -> Option<&DriverEntry> {
        self.by_driver
            .get(public_id)
            .map(|&index| &self.entries[index])
    }

    pub fn get_by_socket(&self, socket_id: &str) -> Option<&DriverEntry> {
        self.by_socket
            .get(socket_id)
            .map(|&index| &self.entries[index])
    }

    /// Owned copy of the pool, safe to iterate while the registry keeps
    /// mutating under relay traffic.
    pub fn snapshot(&self) -> Vec<DriverEntry> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(public_id: &str, socket_id: &str) -> DriverEntry {
        DriverEntry {
            public_id: public_id.to_string(),
            socket_id: socket_id.to_string(),
            rating: 4.5,
            p2p_capable: true,
            position: Coordinate::new(0.0, 0.0),
            configuration: Configuration::accept_all(),
            state: DriverState::Searching,
        }
    }

    #[test]
    fn setup_replaces_an_existing_driver_and_reindexes_its_socket() {
        let mut registry = DriverRegistry::new();
        registry.setup(entry("drv-1", "sock-1"));
        registry.setup(entry("drv-1", "sock-2"));

        assert_eq!(registry.len(), 1);
        assert!(registry.get_by_socket("sock-1").is_none());
        assert_eq!(
            registry.get_by_socket("sock-2").map(|e| e.public_id.as_str()),
            Some("drv-1")
        );
    }

    #[test]
    fn unknown_socket_mutations_are_no_ops() {
        let mut registry = DriverRegistry::new();
        registry.setup(entry("drv-1", "sock-1"));

        assert!(!registry.set_position("sock-9", Coordinate::new(1.0, 1.0)));
        assert!(!registry.set_state("sock-9", DriverState::Running));
        assert!(registry.remove_socket("sock-9").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn swap_remove_keeps_indexes_consistent() {
        let mut registry = DriverRegistry::new();
        registry.setup(entry("drv-1", "sock-1"));
        registry.setup(entry("drv-2", "sock-2"));
        registry.setup(entry("drv-3", "sock-3"));

        let removed = registry.remove_socket("sock-1").expect("removed");
        assert_eq!(removed.public_id, "drv-1");
        assert_eq!(registry.len(), 2);

        // drv-3 was swapped into slot 0; both of its lookups must still work.
        assert!(registry.set_position("sock-3", Coordinate::new(2.0, 2.0)));
        assert_eq!(
            registry.get("drv-3").map(|e| e.position),
            Some(Coordinate::new(2.0, 2.0))
        );
        assert_eq!(
            registry.get_by_socket("sock-2").map(|e| e.public_id.as_str()),
            Some("drv-2")
        );
    }

    #[test]
    fn snapshot_is_detached_from_later_mutation() {
        let mut registry = DriverRegistry::new();
        registry.setup(entry("drv-1", "sock-1"));
        let snapshot = registry.snapshot();
        registry.set_state("sock-1", DriverState::Running);

        assert_eq!(snapshot[0].state, DriverState::Searching);
        assert_eq!(
            registry.get("drv-1").map(|e| e.state),
            Some(DriverState::Running)
        );
    }
}
