//! Concurrency tests for the purchase cache
//!
//! Point queries may interleave freely; mutations are serialized internally.
//! The purchase flow is single-flight per manager instance.

use async_trait::async_trait;
use purchasekit::{
    ConsumableCounter, EntitlementProvider, MemoryConsumableCounter, MemorySettingsStore, Product,
    ProductCatalog, ProductId, ProductKind, PurchaseFlow, PurchaseManager, PurchaseOutcome,
    Result, StoreError, Transaction, VerifyResult,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinSet;

struct MockOracle {
    entitlements: Mutex<HashMap<ProductId, VerifyResult<Transaction>>>,
}

impl MockOracle {
    fn new() -> Self {
        Self {
            entitlements: Mutex::new(HashMap::new()),
        }
    }

    fn grant(&self, id: &ProductId, result: VerifyResult<Transaction>) {
        self.entitlements.lock().unwrap().insert(id.clone(), result);
    }
}

#[async_trait]
impl EntitlementProvider for MockOracle {
    async fn current_entitlement(
        &self,
        product_id: &ProductId,
    ) -> Result<Option<VerifyResult<Transaction>>> {
        Ok(self.entitlements.lock().unwrap().get(product_id).cloned())
    }

    async fn all_entitlements(&self) -> Result<Vec<VerifyResult<Transaction>>> {
        Ok(self.entitlements.lock().unwrap().values().cloned().collect())
    }
}

/// Purchase flow that blocks until released, to hold a purchase in flight
struct GatedFlow {
    release: Arc<Notify>,
}

#[async_trait]
impl PurchaseFlow for GatedFlow {
    async fn purchase(&self, product_id: &ProductId) -> Result<PurchaseOutcome> {
        self.release.notified().await;
        Ok(PurchaseOutcome::Success(VerifyResult::Verified(
            Transaction::new(product_id.as_str()),
        )))
    }

    async fn finish(&self, _transaction_id: &str) -> Result<()> {
        Ok(())
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

fn test_manager(
    oracle: Arc<MockOracle>,
    counter: Arc<MemoryConsumableCounter>,
) -> Arc<PurchaseManager> {
    let manager = PurchaseManager::new(
        oracle as Arc<dyn EntitlementProvider>,
        counter as Arc<dyn ConsumableCounter>,
        Arc::new(MemorySettingsStore::new()),
    )
    .unwrap()
    .with_catalog(test_catalog());
    manager.mark_started();
    Arc::new(manager)
}

#[tokio::test]
async fn test_second_purchase_rejected_while_first_in_flight() {
    let release = Arc::new(Notify::new());
    let flow = Arc::new(GatedFlow {
        release: Arc::clone(&release),
    });

    let manager = Arc::new(
        PurchaseManager::new(
            Arc::new(MockOracle::new()) as Arc<dyn EntitlementProvider>,
            Arc::new(MemoryConsumableCounter::new()),
            Arc::new(MemorySettingsStore::new()),
        )
        .unwrap()
        .with_catalog(test_catalog())
        .with_purchase_flow(flow as Arc<dyn PurchaseFlow>),
    );
    manager.mark_started();

    let first = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .purchase(&ProductId::new("com.example.unlock"))
                .await
        })
    };

    // Wait until the first purchase is parked inside the flow
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let err = manager
        .purchase(&ProductId::new("com.example.unlock"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::PurchaseInProgress)
    ));

    release.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert!(matches!(outcome, PurchaseOutcome::Success(_)));

    // The flight flag is released: a new purchase may start
    release.notify_one();
    manager
        .purchase(&ProductId::new("com.example.unlock"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_queries_keep_at_most_one_entry() {
    let oracle = Arc::new(MockOracle::new());
    let unlock = ProductId::new("com.example.unlock");
    oracle.grant(
        &unlock,
        VerifyResult::Verified(Transaction::new("com.example.unlock")),
    );

    let manager = test_manager(oracle, Arc::new(MemoryConsumableCounter::new()));

    let mut tasks = JoinSet::new();
    for _ in 0..50 {
        let manager = Arc::clone(&manager);
        let unlock = unlock.clone();
        tasks.spawn(async move { manager.is_purchased(&unlock).await });
    }

    while let Some(result) = tasks.join_next().await {
        assert!(result.unwrap().unwrap());
    }

    assert_eq!(
        manager
            .purchased_products()
            .iter()
            .filter(|p| **p == unlock)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_concurrent_consumable_reconciliation_matches_counter() {
    let counter = Arc::new(MemoryConsumableCounter::new());
    let coins = ProductId::new("com.example.coins");
    counter.set(&coins, 3);

    let manager = test_manager(Arc::new(MockOracle::new()), Arc::clone(&counter));

    let mut tasks = JoinSet::new();
    for _ in 0..50 {
        let manager = Arc::clone(&manager);
        let coins = coins.clone();
        tasks.spawn(async move { manager.is_purchased(&coins).await });
    }
    while let Some(result) = tasks.join_next().await {
        assert!(result.unwrap().unwrap());
    }

    assert_eq!(
        manager
            .purchased_products()
            .iter()
            .filter(|p| **p == coins)
            .count(),
        3
    );
}

#[tokio::test]
async fn test_concurrent_stream_events_for_distinct_products() {
    let catalog = Arc::new(
        ProductCatalog::new(
            (0..20)
                .map(|i| Product::new(format!("com.example.p{}", i).as_str(), ProductKind::NonConsumable))
                .collect(),
        )
        .unwrap(),
    );

    let manager = Arc::new(
        PurchaseManager::new(
            Arc::new(MockOracle::new()) as Arc<dyn EntitlementProvider>,
            Arc::new(MemoryConsumableCounter::new()),
            Arc::new(MemorySettingsStore::new()),
        )
        .unwrap()
        .with_catalog(catalog),
    );
    manager.mark_started();

    let mut tasks = JoinSet::new();
    for i in 0..20 {
        let manager = Arc::clone(&manager);
        tasks.spawn(async move {
            let txn = Transaction::new(format!("com.example.p{}", i).as_str())
                .with_transaction_id(format!("txn-{}", i));
            manager.process_update(VerifyResult::Verified(txn))
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    let purchased = manager.purchased_products();
    assert_eq!(purchased.len(), 20);
    for i in 0..20 {
        assert!(purchased.contains(&ProductId::new(format!("com.example.p{}", i))));
    }
}
