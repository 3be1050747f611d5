//! Connection Directory: broker-backed record of every participant
//! connected anywhere in the fleet.
//!
//! Records are written under a primary key on the public id plus a link
//! key on the socket id, so a record resolves from either identifier.
//! Expiry is TTL-based: a stale record reads as disconnected, which is the
//! disconnect grace window. Processes only hold read-through copies; the
//! backing store is the single source of truth for "where is this
//! participant connected".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::DirectoryConfig;
use crate::error::Result;
use crate::events::{PublicId, RideId, SocketId};

const CONNECTION_PREFIX: &str = "connection:";
const SOCKET_PREFIX: &str = "socket:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Voyager,
    Driver,
}

/// A participant watching another participant's position stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observer {
    pub socket_id: SocketId,
    pub p2p_capable: bool,
}

/// Durable record of one connected participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub internal_id: String,
    pub public_id: PublicId,
    pub role: Role,
    pub p2p_capable: bool,
    pub observers: Vec<Observer>,
    pub socket_id: SocketId,
    pub active_ride_ids: Vec<RideId>,
}

/// Async seam over the fleet's shared key/value cache.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn del(&self, key: &str) -> Result<()>;
}

/// In-memory store with per-key expiry, for tests and single-host runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let deadline = Instant::now() + ttl;
        self.entries
            .lock()
            .insert(key.to_string(), (value, deadline));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, deadline)) if *deadline <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Read/write facade over the connection namespace.
pub struct ConnectionDirectory {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl ConnectionDirectory {
    pub fn new(store: Arc<dyn KeyValueStore>, config: DirectoryConfig) -> Self {
        Self {
            store,
            ttl: config.ttl,
        }
    }

    /// Write the primary record and the socket link key, refreshing the TTL
    /// on both. The primary goes first so a reader that finds the link
    /// always finds the record.
    pub async fn upsert(&self, connection: &Connection) -> Result<()> {
        let record = serde_json::to_string(connection)?;
        self.store
            .set(
                &format!("{CONNECTION_PREFIX}{}", connection.public_id),
                record,
                self.ttl,
            )
            .await?;
        self.store
            .set(
                &format!("{SOCKET_PREFIX}{}", connection.socket_id),
                connection.public_id.clone(),
                self.ttl,
            )
            .await
    }

    /// Resolve a connection from either its public id or its socket id.
    pub async fn get(&self, id_or_socket: &str) -> Result<Option<Connection>> {
        if let Some(connection) = self.get_by_public_id(id_or_socket).await? {
            return Ok(Some(connection));
        }
        let Some(public_id) = self
            .store
            .get(&format!("{SOCKET_PREFIX}{id_or_socket}"))
            .await?
        else {
            return Ok(None);
        };
        self.get_by_public_id(&public_id).await
    }

    /// Append an observer if absent and refresh the record. Returns the
    /// updated connection, or `None` if the participant is not connected.
    pub async fn touch_observers(
        &self,
        public_id: &str,
        observer: Observer,
    ) -> Result<Option<Connection>> {
        let Some(mut connection) = self.get_by_public_id(public_id).await? else {
            return Ok(None);
        };
        if !connection.observers.contains(&observer) {
            connection.observers.push(observer);
        }
        self.upsert(&connection).await?;
        Ok(Some(connection))
    }

    /// Proactively drop a record on clean disconnect; crashed processes
    /// leave it to TTL expiry instead.
    pub async fn remove(&self, connection: &Connection) -> Result<()> {
        self.store
            .del(&format!("{SOCKET_PREFIX}{}", connection.socket_id))
            .await?;
        self.store
            .del(&format!("{CONNECTION_PREFIX}{}", connection.public_id))
            .await
    }

    async fn get_by_public_id(&self, public_id: &str) -> Result<Option<Connection>> {
        let Some(raw) = self
            .store
            .get(&format!("{CONNECTION_PREFIX}{public_id}"))
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }
}
