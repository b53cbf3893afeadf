//! Artifact store
//!
//! In-memory map of published artifacts, bounded by capacity, with optional
//! write-through/read-through persistence to SQLite.
//!
//! Production of a fingerprint is gated: [`ArtifactStore::claim`] hands out
//! at most one [`ProductionSlot`] per fingerprint. Other claimants for the
//! same fingerprint wait until the slot publishes (they then see the
//! artifact) or is dropped (one of them takes over production). Nothing is
//! visible until [`ProductionSlot::publish`] inserts the finished artifact.
//!
//! Eviction removes expired entries first, then least recently used ones,
//! and never touches a pinned entry. Runs pin the upstream artifacts of the
//! stage they are computing.

use super::artifact::StageArtifact;
use super::error::StoreError;
use crate::db::ArtifactDb;
use chrono::Utc;
use dissforge_common::Fingerprint;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

struct Entry {
    artifact: Arc<StageArtifact>,
    last_used: u64,
    pins: usize,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Fingerprint, Entry>,
    /// Fingerprints currently being produced; dropping the sender wakes waiters
    in_flight: HashMap<Fingerprint, watch::Sender<()>>,
    /// Pins taken before the artifact was in memory
    pending_pins: HashMap<Fingerprint, usize>,
    clock: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

struct Shared {
    inner: Mutex<Inner>,
    db: Option<ArtifactDb>,
    capacity: usize,
    max_age: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Critical sections never panic midway, so a poisoned map is still consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Result of [`ArtifactStore::claim`]
pub enum Claim {
    /// Artifact already published (memory or database)
    Ready(Arc<StageArtifact>),
    /// Caller is the sole producer of this fingerprint
    Produce(ProductionSlot),
}

/// Exclusive right to produce one fingerprint
pub struct ProductionSlot {
    shared: Arc<Shared>,
    fingerprint: Fingerprint,
    published: bool,
}

/// Keeps an artifact from being evicted while held
pub struct PinGuard {
    shared: Arc<Shared>,
    fingerprint: Fingerprint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub entries: usize,
    pub in_flight: usize,
    pub capacity: usize,
}

/// Shared artifact cache; clones refer to the same store
#[derive(Clone)]
pub struct ArtifactStore {
    shared: Arc<Shared>,
}

impl ArtifactStore {
    /// Memory-only store
    pub fn in_memory(capacity: usize, max_age: Duration) -> Self {
        Self::build(None, capacity, max_age)
    }

    /// Store backed by the artifact table
    pub fn with_database(db: ArtifactDb, capacity: usize, max_age: Duration) -> Self {
        Self::build(Some(db), capacity, max_age)
    }

    fn build(db: Option<ArtifactDb>, capacity: usize, max_age: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                db,
                capacity: capacity.max(1),
                max_age,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Published artifact for `fingerprint` in memory, without touching the database
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<StageArtifact>> {
        let mut inner = self.shared.lock();
        let now = inner.tick();
        inner.entries.get_mut(fingerprint).map(|entry| {
            entry.last_used = now;
            Arc::clone(&entry.artifact)
        })
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.shared.lock().entries.contains_key(fingerprint)
    }

    /// Look up `fingerprint`, or become its producer
    ///
    /// Waits while another task is producing the same fingerprint.
    pub async fn claim(&self, fingerprint: Fingerprint) -> Claim {
        loop {
            let mut waiter = {
                let mut inner = self.shared.lock();
                let now = inner.tick();
                if let Some(entry) = inner.entries.get_mut(&fingerprint) {
                    entry.last_used = now;
                    return Claim::Ready(Arc::clone(&entry.artifact));
                }
                match inner.in_flight.get(&fingerprint) {
                    Some(sender) => sender.subscribe(),
                    None => {
                        let (sender, _) = watch::channel(());
                        inner.in_flight.insert(fingerprint, sender);
                        break;
                    }
                }
            };
            debug!(fingerprint = %fingerprint.short(), "Waiting on in-flight production");
            // Err means the producer finished (published or gave up)
            let _ = waiter.changed().await;
        }

        let slot = ProductionSlot {
            shared: Arc::clone(&self.shared),
            fingerprint,
            published: false,
        };

        if let Some(artifact) = self.read_through(&fingerprint).await {
            let artifact = Arc::new(artifact);
            let mut inner = self.shared.lock();
            insert_evicting(&self.shared, &mut inner, Arc::clone(&artifact));
            // `slot` drops after the guard: waiters wake to a populated map
            drop(inner);
            drop(slot);
            return Claim::Ready(artifact);
        }

        Claim::Produce(slot)
    }

    async fn read_through(&self, fingerprint: &Fingerprint) -> Option<StageArtifact> {
        let db = self.shared.db.as_ref()?;
        match db.load(fingerprint).await {
            Ok(Some(artifact)) if !self.is_expired(&artifact) => {
                debug!(
                    stage = %artifact.stage,
                    fingerprint = %fingerprint.short(),
                    "Artifact loaded from database"
                );
                Some(artifact)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(fingerprint = %fingerprint.short(), error = %e, "Artifact lookup failed, recomputing");
                None
            }
        }
    }

    fn is_expired(&self, artifact: &StageArtifact) -> bool {
        let age = Utc::now().signed_duration_since(artifact.produced_at);
        age.to_std().map(|a| a > self.shared.max_age).unwrap_or(false)
    }

    /// Protect `fingerprint` from eviction until the guard drops
    ///
    /// Pinning an artifact that is not in memory yet is allowed; the pin
    /// applies once it is published.
    pub fn pin(&self, fingerprint: Fingerprint) -> PinGuard {
        let mut inner = self.shared.lock();
        match inner.entries.get_mut(&fingerprint) {
            Some(entry) => entry.pins += 1,
            None => *inner.pending_pins.entry(fingerprint).or_insert(0) += 1,
        }
        PinGuard {
            shared: Arc::clone(&self.shared),
            fingerprint,
        }
    }

    /// Evict expired and least recently used unpinned entries until there is
    /// room for one more; returns how many were removed
    pub fn evict(&self) -> usize {
        let mut inner = self.shared.lock();
        evict_locked(&self.shared, &mut inner)
    }

    /// Drop aged rows from the database
    pub async fn prune_persisted(&self) -> dissforge_common::Result<u64> {
        match &self.shared.db {
            Some(db) => db.prune(self.shared.max_age).await,
            None => Ok(0),
        }
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.shared.lock();
        StoreStats {
            entries: inner.entries.len(),
            in_flight: inner.in_flight.len(),
            capacity: self.shared.capacity,
        }
    }
}

impl ProductionSlot {
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Make the finished artifact visible
    ///
    /// Persistence happens first so a crash never leaves a memory-only
    /// artifact claiming to be durable. Persistence failures are logged and
    /// the artifact stays memory-only. Fails with `CapacityExhausted` when
    /// the store is full; the slot stays valid for another attempt.
    pub async fn publish(&mut self, artifact: Arc<StageArtifact>) -> Result<(), StoreError> {
        if self.published {
            return Ok(());
        }

        {
            let inner = self.shared.lock();
            if inner.entries.len() >= self.shared.capacity {
                return Err(StoreError::CapacityExhausted {
                    capacity: self.shared.capacity,
                });
            }
        }

        if artifact.stage.persisted() {
            if let Some(db) = &self.shared.db {
                if let Err(e) = db.save(&artifact).await {
                    warn!(stage = %artifact.stage, error = %e, "Artifact not persisted");
                }
            }
        }

        let mut inner = self.shared.lock();
        if inner.entries.len() >= self.shared.capacity {
            return Err(StoreError::CapacityExhausted {
                capacity: self.shared.capacity,
            });
        }
        let now = inner.tick();
        let pins = inner.pending_pins.remove(&self.fingerprint).unwrap_or(0);
        inner.entries.insert(
            self.fingerprint,
            Entry {
                artifact,
                last_used: now,
                pins,
            },
        );
        inner.in_flight.remove(&self.fingerprint);
        self.published = true;
        Ok(())
    }
}

impl Drop for ProductionSlot {
    fn drop(&mut self) {
        if !self.published {
            // Abandoned (failed or cancelled): let a waiter take over
            self.shared.lock().in_flight.remove(&self.fingerprint);
        }
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        if let Some(entry) = inner.entries.get_mut(&self.fingerprint) {
            entry.pins = entry.pins.saturating_sub(1);
            return;
        }
        if let Some(count) = inner.pending_pins.get_mut(&self.fingerprint) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                inner.pending_pins.remove(&self.fingerprint);
            }
        }
    }
}

fn insert_evicting(shared: &Shared, inner: &mut Inner, artifact: Arc<StageArtifact>) {
    if inner.entries.len() >= shared.capacity {
        evict_locked(shared, inner);
    }
    if inner.entries.len() >= shared.capacity {
        // Still usable by the caller, just not cached
        return;
    }
    let now = inner.tick();
    let pins = inner.pending_pins.remove(&artifact.fingerprint).unwrap_or(0);
    inner.entries.insert(
        artifact.fingerprint,
        Entry {
            artifact,
            last_used: now,
            pins,
        },
    );
}

fn evict_locked(shared: &Shared, inner: &mut Inner) -> usize {
    let before = inner.entries.len();
    let now = Utc::now();

    inner.entries.retain(|_, entry| {
        if entry.pins > 0 {
            return true;
        }
        let age = now.signed_duration_since(entry.artifact.produced_at);
        !age.to_std().map(|a| a > shared.max_age).unwrap_or(false)
    });

    while inner.entries.len() >= shared.capacity {
        let oldest = inner
            .entries
            .iter()
            .filter(|(_, e)| e.pins == 0)
            .min_by_key(|(_, e)| e.last_used)
            .map(|(fp, _)| *fp);
        match oldest {
            Some(fp) => {
                inner.entries.remove(&fp);
            }
            None => break,
        }
    }

    let evicted = before - inner.entries.len();
    if evicted > 0 {
        info!(evicted, remaining = inner.entries.len(), "Evicted artifacts");
    }
    evicted
}
