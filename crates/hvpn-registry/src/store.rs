//! Durable relay membership table.
//!
//! Records live in a sled tree keyed by relay id (JSON values) and are
//! mirrored in memory for lock-cheap reads. Every mutation is flushed to
//! disk before the in-memory table changes, so a restart rebuilds exactly
//! what was committed; stale entries are then pruned by the next sweep.

use crate::error::RegistryError;
use chrono::{DateTime, Utc};
use hvpn_common::endpoint::validate_relay_url;
use hvpn_common::types::{RegisterRequest, RelayEntry};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::RwLock;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

const TREE_NAME: &str = "relays";
const MAX_ID_LEN: usize = 128;
const MAX_LOCATION_LEN: usize = 64;
const MINTED_ID_BYTES: usize = 32;

/// A registered relay node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRecord {
    /// Unique relay identifier.
    pub id: String,
    /// Location label.
    pub location: String,
    /// Validated `ws://`/`wss://` tunnel endpoint.
    pub url: String,
    /// Address the registration came from, used by the secure-id policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<IpAddr>,
    /// When the current registration was accepted.
    #[serde(rename = "registeredAt")]
    pub registered_at: DateTime<Utc>,
    /// Last successful registration or health probe.
    #[serde(rename = "lastSeen")]
    pub last_seen: DateTime<Utc>,
}

impl RelayRecord {
    /// Identity-less projection handed to the router.
    #[must_use]
    pub fn entry(&self) -> RelayEntry {
        RelayEntry::new(self.location.clone(), self.url.clone())
    }
}

/// How relay ids are assigned and protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdPolicy {
    /// Mint ids for short requests and refuse cross-owner reuse.
    pub secure_ids: bool,
    /// Ids shorter than this are replaced when `secure_ids` is set.
    pub min_id_len: usize,
}

impl Default for IdPolicy {
    fn default() -> Self {
        Self {
            secure_ids: false,
            min_id_len: 16,
        }
    }
}

/// Outcome of a successful registration.
#[derive(Debug, Clone)]
pub struct Registered {
    /// The record as committed.
    pub record: RelayRecord,
    /// Whether the identity-less membership list changed.
    pub membership_changed: bool,
}

/// Authoritative relay membership table.
pub struct Registry {
    _db: sled::Db,
    tree: sled::Tree,
    records: RwLock<HashMap<String, RelayRecord>>,
    write_lock: Mutex<()>,
    policy: IdPolicy,
    changes: watch::Sender<u64>,
}

impl Registry {
    /// Opens (or creates) the store at `path` and loads every committed record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or read.
    pub fn open(path: &Path, policy: IdPolicy) -> Result<Self, RegistryError> {
        let db = sled::open(path)?;
        let registry = Self::from_db(db, policy)?;
        info!(
            "loaded {} relay record(s) from {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    /// In-memory store that is discarded on drop.
    ///
    /// # Errors
    ///
    /// Returns an error if sled fails to create the temporary database.
    pub fn temporary(policy: IdPolicy) -> Result<Self, RegistryError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, policy)
    }

    fn from_db(db: sled::Db, policy: IdPolicy) -> Result<Self, RegistryError> {
        let tree = db.open_tree(TREE_NAME)?;
        let mut records = HashMap::new();
        for item in tree.iter() {
            let (key, value) = item?;
            match serde_json::from_slice::<RelayRecord>(&value) {
                Ok(record) => {
                    records.insert(record.id.clone(), record);
                }
                Err(e) => {
                    warn!(
                        key = %String::from_utf8_lossy(&key),
                        "skipping unreadable relay record: {}", e
                    );
                }
            }
        }
        let (changes, _) = watch::channel(0);
        Ok(Self {
            _db: db,
            tree,
            records: RwLock::new(records),
            write_lock: Mutex::new(()),
            policy,
            changes,
        })
    }

    /// Validates and stores a registration, replacing any record with the
    /// same id and refreshing both timestamps.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Validation`] on malformed input,
    /// [`RegistryError::Conflict`] when the secure-id policy refuses reuse,
    /// or a storage error.
    pub async fn register(
        &self,
        request: RegisterRequest,
        owner: Option<IpAddr>,
    ) -> Result<Registered, RegistryError> {
        let location = validate_location(&request.location)?;
        validate_relay_url(&request.url)?;
        let url = request.url.trim().to_string();
        validate_id(&request.id)?;

        let _guard = self.write_lock.lock().await;

        let id = self.resolve_id(request.id.trim(), owner)?;
        let previous = self.get(&id);
        let now = Utc::now();
        let record = RelayRecord {
            id: id.clone(),
            location,
            url,
            owner,
            registered_at: now,
            last_seen: now,
        };

        self.persist(&record).await?;
        self.write_records().insert(id, record.clone());

        let membership_changed = previous.map_or(true, |p| p.entry() != record.entry());
        if membership_changed {
            self.notify_changed();
        }
        Ok(Registered {
            record,
            membership_changed,
        })
    }

    fn resolve_id(&self, requested: &str, owner: Option<IpAddr>) -> Result<String, RegistryError> {
        if !self.policy.secure_ids {
            return Ok(requested.to_string());
        }
        if requested.len() < self.policy.min_id_len {
            let minted = mint_id();
            info!(requested, minted = %minted, "minted relay id for short request");
            return Ok(minted);
        }
        if let Some(existing) = self.get(requested) {
            if existing.owner != owner {
                return Err(RegistryError::Conflict(requested.to_string()));
            }
        }
        Ok(requested.to_string())
    }

    /// Identity-less membership ordered by registration time, then id.
    #[must_use]
    pub fn list(&self) -> Vec<RelayEntry> {
        self.records()
            .into_iter()
            .map(|record| record.entry())
            .collect()
    }

    /// Full records in the same order as [`Registry::list`].
    #[must_use]
    pub fn records(&self) -> Vec<RelayRecord> {
        let mut records: Vec<RelayRecord> = self.read_records().values().cloned().collect();
        records.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }

    /// Looks up a record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<RelayRecord> {
        self.read_records().get(id).cloned()
    }

    /// Number of registered relays.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_records().len()
    }

    /// Returns `true` if no relay is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_records().is_empty()
    }

    /// Refreshes `last_seen` if the record is still the registration that
    /// was probed (same `registered_at`).
    ///
    /// # Errors
    ///
    /// Returns a storage error if the refresh cannot be persisted.
    pub async fn touch(&self, id: &str, registered_at: DateTime<Utc>) -> Result<bool, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let Some(mut record) = self.get(id) else {
            return Ok(false);
        };
        if record.registered_at != registered_at {
            return Ok(false);
        }
        record.last_seen = Utc::now();
        self.persist(&record).await?;
        self.write_records().insert(record.id.clone(), record);
        Ok(true)
    }

    /// Removes the record only if it was admitted at `registered_at`, so a
    /// relay that re-registered while being probed is not evicted.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the removal cannot be persisted.
    pub async fn evict_if(
        &self,
        id: &str,
        registered_at: DateTime<Utc>,
    ) -> Result<bool, RegistryError> {
        let _guard = self.write_lock.lock().await;
        match self.get(id) {
            Some(record) if record.registered_at == registered_at => {}
            _ => return Ok(false),
        }
        self.tree.remove(id.as_bytes())?;
        self.tree.flush_async().await?;
        self.write_records().remove(id);
        self.notify_changed();
        Ok(true)
    }

    /// Subscribes to membership changes. The value is a change counter.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn notify_changed(&self) {
        self.changes.send_modify(|version| *version += 1);
    }

    async fn persist(&self, record: &RelayRecord) -> Result<(), RegistryError> {
        let value = serde_json::to_vec(record)?;
        self.tree.insert(record.id.as_bytes(), value)?;
        self.tree.flush_async().await?;
        Ok(())
    }

    fn read_records(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, RelayRecord>> {
        match self.records.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("registry lock poisoned, using recovered data");
                poisoned.into_inner()
            }
        }
    }

    fn write_records(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, RelayRecord>> {
        match self.records.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("registry lock poisoned, using recovered data");
                poisoned.into_inner()
            }
        }
    }
}

fn validate_id(id: &str) -> Result<(), RegistryError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(RegistryError::invalid("id", "must not be empty"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(RegistryError::invalid(
            "id",
            format!("exceeds {MAX_ID_LEN} characters"),
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(RegistryError::invalid(
            "id",
            "may only contain letters, digits, '-', '_', '.', ':'",
        ));
    }
    Ok(())
}

fn validate_location(location: &str) -> Result<String, RegistryError> {
    let location = location.trim();
    if location.is_empty() {
        return Err(RegistryError::invalid("location", "must not be empty"));
    }
    if location.len() > MAX_LOCATION_LEN {
        return Err(RegistryError::invalid(
            "location",
            format!("exceeds {MAX_LOCATION_LEN} characters"),
        ));
    }
    if location.chars().any(char::is_control) {
        return Err(RegistryError::invalid(
            "location",
            "must not contain control characters",
        ));
    }
    Ok(location.to_string())
}

/// Generates an unguessable relay id.
fn mint_id() -> String {
    let mut bytes = [0u8; MINTED_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bs58::encode(bytes).into_string()
}
