//! Consumable purchase counting
//!
//! The platform keeps no history for consumable products, so ownership is
//! tracked in a local counter store (keychain-backed on device). The count
//! for a product equals the number of un-refunded purchases.

use crate::ProductId;
use std::collections::HashMap;
use std::sync::RwLock;

/// Secure local counter for consumable purchases
pub trait ConsumableCounter: Send + Sync {
    fn count(&self, product_id: &ProductId) -> usize;

    /// Increment and return the new count
    fn increment(&self, product_id: &ProductId) -> usize;

    /// Clear the count, e.g. after a refund
    fn reset(&self, product_id: &ProductId);
}

/// In-memory counter store
///
/// Suitable for tests and for hosts that persist counts elsewhere. Device
/// builds should wrap their keychain equivalent instead.
pub struct MemoryConsumableCounter {
    counts: RwLock<HashMap<ProductId, usize>>,
}

impl MemoryConsumableCounter {
    pub fn new() -> Self {
        Self {
            counts: RwLock::new(HashMap::new()),
        }
    }

    /// Force a specific count, for test setup
    pub fn set(&self, product_id: &ProductId, count: usize) {
        let mut counts = self.counts.write().unwrap_or_else(|e| e.into_inner());
        counts.insert(product_id.clone(), count);
    }
}

impl ConsumableCounter for MemoryConsumableCounter {
    fn count(&self, product_id: &ProductId) -> usize {
        let counts = self.counts.read().unwrap_or_else(|e| e.into_inner());
        counts.get(product_id).copied().unwrap_or(0)
    }

    fn increment(&self, product_id: &ProductId) -> usize {
        let mut counts = self.counts.write().unwrap_or_else(|e| e.into_inner());
        let entry = counts.entry(product_id.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    fn reset(&self, product_id: &ProductId) {
        let mut counts = self.counts.write().unwrap_or_else(|e| e.into_inner());
        counts.remove(product_id);
    }
}

impl Default for MemoryConsumableCounter {
    fn default() -> Self {
        Self::new()
    }
}
