//! Document identity map.
//!
//! Maps a stored identifier to the live in-memory representative of that
//! document. Entries are weak: the map never keeps an instance alive, and an
//! entry whose instance has been dropped behaves as if it were absent.
//!
//! Each [`CollectionProxy`](crate::collection::CollectionProxy) owns one map,
//! so identifiers are partitioned by model type. Identifiers are opaque BSON
//! values; the map only hashes and compares them.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use bson::Bson;
use tracing::trace;

use crate::container::{AttrContainer, WeakContainer};

/// Entry count below which dead entries are left for `lookup` to clean up.
const MIN_PRUNE_THRESHOLD: usize = 64;

struct Entries {
    tracked: HashMap<Bson, WeakContainer>,
    prune_at: usize,
}

/// Weak registry of live instances keyed by identifier.
///
/// Every operation runs as one critical section under a mutex.
pub struct IdentityMap {
    entries: Mutex<Entries>,
}

impl Entries {
    fn insert(&mut self, id: Bson, instance: &AttrContainer) {
        self.tracked.insert(id, instance.downgrade());

        if self.tracked.len() >= self.prune_at {
            self.tracked.retain(|_, weak| weak.is_alive());
            let live = self.tracked.len();
            self.prune_at = (live * 2).max(MIN_PRUNE_THRESHOLD);
        }
    }
}

impl IdentityMap {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries {
                tracked: HashMap::new(),
                prune_at: MIN_PRUNE_THRESHOLD,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Tracks `instance` under `id`.
    ///
    /// An existing entry is replaced only if it refers to a different object.
    /// Returns `true` if the map changed.
    pub fn register(&self, id: Bson, instance: &AttrContainer) -> bool {
        let mut entries = self.lock();

        if entries
            .tracked
            .get(&id)
            .is_some_and(|weak| weak.points_to(instance))
        {
            return false;
        }
        trace!(%id, "identity map registered instance");
        entries.insert(id, instance);

        true
    }

    /// Tracks `instance` under `id` unless a live instance is already tracked there.
    ///
    /// Lookup and registration happen in one critical section. Returns the
    /// instance that was already tracked (possibly `instance` itself), or
    /// `None` if `instance` has just been registered.
    pub fn register_if_absent(&self, id: Bson, instance: &AttrContainer) -> Option<AttrContainer> {
        let mut entries = self.lock();

        if let Some(live) = entries
            .tracked
            .get(&id)
            .and_then(WeakContainer::upgrade)
        {
            return Some(live);
        }
        trace!(%id, "identity map registered instance");
        entries.insert(id, instance);

        None
    }

    /// Returns the live instance tracked under `id`.
    ///
    /// An entry whose instance has been reclaimed is removed and reported absent.
    pub fn lookup(&self, id: &Bson) -> Option<AttrContainer> {
        let mut entries = self.lock();
        let upgraded = entries.tracked.get(id)?.upgrade();

        match upgraded {
            Some(instance) => Some(instance),
            None => {
                entries.tracked.remove(id);
                trace!(%id, "identity map dropped reclaimed entry");
                None
            }
        }
    }

    /// Stops tracking `id`. Returns `true` if an entry was removed.
    pub fn forget(&self, id: &Bson) -> bool {
        let removed = self.lock().tracked.remove(id).is_some();
        if removed {
            trace!(%id, "identity map forgot instance");
        }
        removed
    }

    /// Stops tracking `id` only if its entry refers to `instance`.
    pub fn forget_instance(&self, id: &Bson, instance: &AttrContainer) -> bool {
        let mut entries = self.lock();

        if !entries
            .tracked
            .get(id)
            .is_some_and(|weak| weak.points_to(instance))
        {
            return false;
        }
        entries.tracked.remove(id);
        trace!(%id, "identity map forgot instance");

        true
    }

    /// Number of entries whose instance is still alive.
    pub fn len(&self) -> usize {
        self.lock()
            .tracked
            .values()
            .filter(|weak| weak.is_alive())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IdentityMap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityMap")
            .field("live", &self.len())
            .finish()
    }
}
