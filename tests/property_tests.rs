//! Property-based tests for the reconciliation invariants

use async_trait::async_trait;
use proptest::prelude::*;
use purchasekit::{
    ConsumableCounter, EntitlementProvider, MemoryConsumableCounter, MemorySettingsStore, Product,
    ProductCatalog, ProductId, ProductKind, PurchaseManager, Result, Transaction, VerifyResult,
};
use std::sync::Arc;

struct NoEntitlements;

#[async_trait]
impl EntitlementProvider for NoEntitlements {
    async fn current_entitlement(
        &self,
        _product_id: &ProductId,
    ) -> Result<Option<VerifyResult<Transaction>>> {
        Ok(None)
    }

    async fn all_entitlements(&self) -> Result<Vec<VerifyResult<Transaction>>> {
        Ok(Vec::new())
    }
}

fn test_catalog() -> Arc<ProductCatalog> {
    Arc::new(
        ProductCatalog::new(vec![
            Product::new("com.example.coins", ProductKind::Consumable),
            Product::new("com.example.unlock", ProductKind::NonConsumable),
        ])
        .unwrap(),
    )
}

fn manager_with_counter() -> (PurchaseManager, Arc<MemoryConsumableCounter>) {
    let counter = Arc::new(MemoryConsumableCounter::new());
    let manager = PurchaseManager::new(
        Arc::new(NoEntitlements) as Arc<dyn EntitlementProvider>,
        Arc::clone(&counter) as Arc<dyn ConsumableCounter>,
        Arc::new(MemorySettingsStore::new()),
    )
    .unwrap()
    .with_catalog(test_catalog());
    manager.mark_started();
    (manager, counter)
}

proptest! {
    /// The consumable occurrence count always equals the counter after any
    /// sequence of counter mutations and reconciliations
    #[test]
    fn consumable_list_tracks_counter(counts in prop::collection::vec(0usize..8, 1..20)) {
        let (manager, counter) = manager_with_counter();
        let coins = ProductId::new("com.example.coins");

        for target in counts {
            counter.set(&coins, target);
            manager
                .update_purchased_products(&coins, target > 0, true, true)
                .unwrap();

            let occurrences = manager
                .purchased_products()
                .iter()
                .filter(|p| **p == coins)
                .count();
            prop_assert_eq!(occurrences, counter.count(&coins));
        }
        // Consumables never reach the fallback list
        prop_assert!(manager.fallback_ids().is_empty());
    }

    /// Non-consumable membership is at most one and reflects the last update
    #[test]
    fn non_consumable_membership_at_most_once(updates in prop::collection::vec(any::<bool>(), 1..30)) {
        let (manager, _counter) = manager_with_counter();
        let unlock = ProductId::new("com.example.unlock");

        let last = *updates.last().unwrap();
        for purchased in updates {
            manager
                .update_purchased_products(&unlock, purchased, true, true)
                .unwrap();

            let occurrences = manager
                .purchased_products()
                .iter()
                .filter(|p| **p == unlock)
                .count();
            prop_assert!(occurrences <= 1);
        }

        let owned = manager.purchased_products().contains(&unlock);
        prop_assert_eq!(owned, last);
        prop_assert_eq!(manager.fallback_ids().contains(&unlock), last);
    }

    /// Once a revocation for a transaction is processed, no interleaving of
    /// redelivered purchase/revocation copies re-marks the product owned
    #[test]
    fn revocation_durable_under_shuffled_redelivery(
        events in Just((0..6u8).collect::<Vec<_>>()).prop_shuffle(),
        purchase_copies in 1usize..4,
    ) {
        let (manager, _counter) = manager_with_counter();
        let unlock = ProductId::new("com.example.unlock");

        let purchase = Transaction::new("com.example.unlock").with_transaction_id("txn-p");
        let revoked = purchase.clone().revoked_at(1_700_000_000);

        // Build a delivery schedule: slots 0..purchase_copies are purchase
        // redeliveries, the rest are revocation redeliveries, then shuffle
        for slot in events {
            let event = if (slot as usize) < purchase_copies {
                purchase.clone()
            } else {
                revoked.clone()
            };
            manager.process_update(VerifyResult::Verified(event)).unwrap();
        }

        prop_assert!(!manager.purchased_products().contains(&unlock));
        prop_assert!(!manager.fallback_ids().contains(&unlock));
    }
}
