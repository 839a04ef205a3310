//! Fallback purchased-product cache
//!
//! A persisted best-effort list of identifiers believed purchased, used when
//! the entitlement oracle and transaction stream are unreachable. Updated on
//! every confirmed purchase or revocation; never ground truth for
//! consumables.

use crate::{ProductId, Result, SettingsStore};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// Fixed settings key under which the fallback list is persisted
pub const FALLBACK_STORAGE_KEY: &str = "purchased_products";

/// Tunable behavior of the purchase cache
#[derive(Clone, Debug)]
pub struct CachePolicy {
    /// Serve non-consumable queries from the fallback list once the product
    /// has had one authoritative check this run. Ownership can only become
    /// false via revocation, which arrives on the stream and invalidates the
    /// cache explicitly, so the cached answer stays correct in between.
    pub trust_checked_products: bool,
    /// Legacy reading of an upgraded-away subscription: the lapsed tier still
    /// counts as owned. Off by default; the upgrade event transfers ownership
    /// to the new tier.
    pub upgraded_grants_access: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            trust_checked_products: true,
            upgraded_grants_access: false,
        }
    }
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trust_checked_products(mut self, trust: bool) -> Self {
        self.trust_checked_products = trust;
        self
    }

    pub fn with_upgraded_grants_access(mut self, grants: bool) -> Self {
        self.upgraded_grants_access = grants;
        self
    }
}

/// Persisted fallback list with write-through semantics
///
/// Loaded from the settings store at startup; every mutation that changes
/// membership is written back immediately.
pub struct FallbackCache {
    store: Arc<dyn SettingsStore>,
    ids: Mutex<BTreeSet<ProductId>>,
}

impl FallbackCache {
    pub fn load(store: Arc<dyn SettingsStore>) -> Result<Self> {
        let ids = store.read_ids(FALLBACK_STORAGE_KEY)?.into_iter().collect();
        Ok(Self {
            store,
            ids: Mutex::new(ids),
        })
    }

    pub fn contains(&self, id: &ProductId) -> bool {
        let ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        ids.contains(id)
    }

    /// Insert an identifier; persists and returns true when membership changed
    pub fn insert(&self, id: &ProductId) -> Result<bool> {
        let snapshot = {
            let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
            if !ids.insert(id.clone()) {
                return Ok(false);
            }
            ids.iter().cloned().collect::<Vec<_>>()
        };
        self.store.write_ids(FALLBACK_STORAGE_KEY, &snapshot)?;
        Ok(true)
    }

    /// Remove an identifier; persists and returns true when membership changed
    pub fn remove(&self, id: &ProductId) -> Result<bool> {
        let snapshot = {
            let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
            if !ids.remove(id) {
                return Ok(false);
            }
            ids.iter().cloned().collect::<Vec<_>>()
        };
        self.store.write_ids(FALLBACK_STORAGE_KEY, &snapshot)?;
        Ok(true)
    }

    pub fn ids(&self) -> Vec<ProductId> {
        let ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        ids.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
