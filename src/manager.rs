use crate::{
    CachePolicy, ConsumableCounter, EntitlementProvider, FallbackCache, NotificationHandler,
    NotificationKind, ObservationLog, ObservationRecord, ProductCatalog, ProductId, ProductKind,
    PurchaseFlow, PurchaseOutcome, RenewalState, Result, SettingsStore, StoreError,
    StoreNotification, Transaction, VerifyResult,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Disposition for a processed transaction update
///
/// `Finish` carries the transaction id the monitor must acknowledge with the
/// platform; an unacknowledged definitive purchase is redelivered
/// indefinitely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Finish(String),
    Skip,
}

struct CacheState {
    /// Ordered purchased identifiers; consumables may repeat
    purchased: Vec<ProductId>,
    /// Products with at least one authoritative check this run
    checked: HashSet<ProductId>,
    /// Transaction ids already processed as revoked
    revoked_transactions: HashSet<String>,
    /// Transaction ids already applied, for at-least-once delivery
    seen_transactions: HashSet<String>,
}

/// The purchase-state reconciliation cache
///
/// Maintains the authoritative local view of what the current user owns,
/// sourced from the entitlement oracle, the transaction update stream, the
/// consumable counter store, and a persisted fallback list for when the
/// platform is unreachable.
///
/// All mutation is serialized through one internal lock; point queries may be
/// issued concurrently from any task. Oracle calls carry no timeout: a
/// non-responding platform delays resolution, and callers needing a bound
/// should apply their own.
pub struct PurchaseManager {
    entitlements: Arc<dyn EntitlementProvider>,
    counter: Arc<dyn ConsumableCounter>,
    fallback: FallbackCache,
    catalog: Option<Arc<ProductCatalog>>,
    policy: CachePolicy,
    purchase_flow: Option<Arc<dyn PurchaseFlow>>,
    notification_handler: Option<NotificationHandler>,
    state: Mutex<CacheState>,
    observations: ObservationLog,
    products_tx: watch::Sender<Vec<ProductId>>,
    purchase_in_flight: AtomicBool,
    started: AtomicBool,
}

impl PurchaseManager {
    /// Create a manager; the fallback list is loaded from the settings store
    pub fn new(
        entitlements: Arc<dyn EntitlementProvider>,
        counter: Arc<dyn ConsumableCounter>,
        settings: Arc<dyn SettingsStore>,
    ) -> Result<Self> {
        let fallback = FallbackCache::load(settings)?;
        let (products_tx, _) = watch::channel(Vec::new());

        Ok(Self {
            entitlements,
            counter,
            fallback,
            catalog: None,
            policy: CachePolicy::default(),
            purchase_flow: None,
            notification_handler: None,
            state: Mutex::new(CacheState {
                purchased: Vec::new(),
                checked: HashSet::new(),
                revoked_transactions: HashSet::new(),
                seen_transactions: HashSet::new(),
            }),
            observations: ObservationLog::new(),
            products_tx,
            purchase_in_flight: AtomicBool::new(false),
            started: AtomicBool::new(false),
        })
    }

    pub fn with_catalog(mut self, catalog: Arc<ProductCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_purchase_flow(mut self, flow: Arc<dyn PurchaseFlow>) -> Self {
        self.purchase_flow = Some(flow);
        self
    }

    pub fn with_notification_handler(mut self, handler: NotificationHandler) -> Self {
        self.notification_handler = Some(handler);
        self
    }

    /// Observe purchased-product snapshots; the receiver sees every change
    pub fn subscribe(&self) -> watch::Receiver<Vec<ProductId>> {
        self.products_tx.subscribe()
    }

    /// Current purchased-product snapshot
    pub fn purchased_products(&self) -> Vec<ProductId> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.purchased.clone()
    }

    /// Occurrences of an identifier in the purchased list
    pub fn purchased_count(&self, product_id: &ProductId) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.purchased.iter().filter(|p| *p == product_id).count()
    }

    pub fn has_been_checked(&self, product_id: &ProductId) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.checked.contains(product_id)
    }

    /// Snapshot of the persisted fallback list
    pub fn fallback_ids(&self) -> Vec<ProductId> {
        self.fallback.ids()
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn catalog(&self) -> Option<&Arc<ProductCatalog>> {
        self.catalog.as_ref()
    }

    pub fn observation_log(&self) -> &ObservationLog {
        &self.observations
    }

    /// Mark the transaction subsystem started; called by the monitor
    pub fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn kind_of(&self, product_id: &ProductId) -> Option<ProductKind> {
        self.catalog.as_ref().and_then(|c| c.kind_of(product_id))
    }

    fn notify(&self, notification: StoreNotification) {
        tracing::debug!(
            "notification: {} product={:?} transaction={:?}",
            notification.kind,
            notification.product_id,
            notification.transaction_id
        );
        if let Some(handler) = &self.notification_handler {
            handler(notification);
        }
    }

    /// Is the product currently purchased?
    ///
    /// Degrades to the persisted fallback list when the transaction subsystem
    /// has not started, no catalog is loaded, or the identifier is unknown.
    /// Verification failures are hard errors and never folded into "not
    /// purchased"; a plain missing entitlement is, because the platform is
    /// known to report false negatives while offline.
    pub async fn is_purchased(&self, product_id: &ProductId) -> Result<bool> {
        let kind = match self.kind_of(product_id) {
            Some(kind) if self.is_started() => kind,
            _ => {
                tracing::debug!(
                    "degraded ownership check for {}: answering from fallback list",
                    product_id
                );
                return Ok(self.fallback.contains(product_id));
            }
        };

        match kind {
            // Ownership of consumables lives in the local counter only; the
            // platform retains no consumable history.
            ProductKind::Consumable => {
                let owned = self.counter.count(product_id) > 0;
                self.update_purchased_products(product_id, owned, true, true)?;
                Ok(owned)
            }
            ProductKind::NonRenewable => {
                Err(StoreError::UnsupportedProductType(kind).into())
            }
            ProductKind::NonConsumable
                if self.policy.trust_checked_products && self.has_been_checked(product_id) =>
            {
                Ok(self.fallback.contains(product_id))
            }
            ProductKind::NonConsumable | ProductKind::AutoRenewable => {
                self.check_entitlement(product_id, kind).await
            }
        }
    }

    async fn check_entitlement(&self, product_id: &ProductId, kind: ProductKind) -> Result<bool> {
        let entitlement = match self.entitlements.current_entitlement(product_id).await {
            Ok(entitlement) => entitlement,
            Err(e) => {
                // Transient unavailability is not an error; trust the cache
                // only for products that have had an authoritative check.
                tracing::warn!("entitlement lookup failed for {}: {}", product_id, e);
                return Ok(
                    self.has_been_checked(product_id) && self.fallback.contains(product_id)
                );
            }
        };

        match entitlement {
            None => {
                if kind == ProductKind::AutoRenewable {
                    if let Some(record) = self.observations.latest_for(product_id) {
                        if record.state.is_active() {
                            // The entitlement feed has known delivery gaps;
                            // the out-of-band log is the last-resort signal.
                            tracing::debug!(
                                "no entitlement for {} but observed state {:?} is active",
                                product_id,
                                record.state
                            );
                            self.update_purchased_products(product_id, true, false, true)?;
                            return Ok(true);
                        }
                    }
                }
                // A missing entitlement is not durable enough to persist.
                Ok(false)
            }
            Some(VerifyResult::Unverified(txn, failure)) => {
                Err(StoreError::VerificationFailed {
                    product_id: txn.product_id,
                    reason: failure.to_string(),
                }
                .into())
            }
            Some(VerifyResult::Verified(txn)) => {
                let now = chrono::Utc::now().timestamp();
                let owned = txn.grants_ownership_at(now, self.policy.upgraded_grants_access);
                self.update_purchased_products(product_id, owned, true, true)?;
                Ok(owned)
            }
        }
    }

    /// Reconcile the purchased list, fallback list, and check set
    ///
    /// Consumables are reconciled against the counter store: the list is
    /// grown or shrunk until the occurrence count matches exactly, never just
    /// toggled, because a consumable may be purchased multiple times
    /// concurrently. Other kinds keep at-most-once membership. The fallback
    /// list is never written for consumables.
    pub fn update_purchased_products(
        &self,
        product_id: &ProductId,
        purchased: bool,
        update_fallback_list: bool,
        update_transaction_check: bool,
    ) -> Result<()> {
        let kind = self.kind_of(product_id);
        let consumable = kind == Some(ProductKind::Consumable);

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let mut changed = false;

            if consumable {
                let target = self.counter.count(product_id);
                let mut current = state
                    .purchased
                    .iter()
                    .filter(|p| *p == product_id)
                    .count();
                while current < target {
                    state.purchased.push(product_id.clone());
                    current += 1;
                    changed = true;
                }
                if current > target {
                    let mut excess = current - target;
                    state.purchased.retain(|p| {
                        if p == product_id && excess > 0 {
                            excess -= 1;
                            false
                        } else {
                            true
                        }
                    });
                    changed = true;
                }
            } else if purchased {
                if !state.purchased.contains(product_id) {
                    state.purchased.push(product_id.clone());
                    changed = true;
                }
            } else {
                let before = state.purchased.len();
                state.purchased.retain(|p| p != product_id);
                changed = state.purchased.len() != before;
            }

            if update_transaction_check {
                state.checked.insert(product_id.clone());
            }

            if changed {
                self.products_tx.send_replace(state.purchased.clone());
            }
        }

        if update_fallback_list && !consumable {
            if purchased {
                self.fallback.insert(product_id)?;
            } else {
                self.fallback.remove(product_id)?;
            }
        }

        Ok(())
    }

    /// Apply one event from the transaction stream
    ///
    /// Idempotent per transaction: redelivered events change nothing beyond
    /// re-acknowledgement, and a revocation stays durable against redelivery
    /// of the same or an older event for that transaction.
    pub fn process_update(&self, update: VerifyResult<Transaction>) -> Result<Ack> {
        {
            let payload = update.payload();
            self.notify(
                StoreNotification::new(NotificationKind::TransactionReceived)
                    .with_product(payload.product_id.clone())
                    .with_transaction(payload.transaction_id.clone()),
            );
        }

        let txn = match update {
            VerifyResult::Verified(txn) => txn,
            VerifyResult::Unverified(txn, failure) => {
                // One bad event must not terminate the feed; drop it and let
                // the loop continue.
                tracing::warn!(
                    "unverified transaction {} for {}: {}",
                    txn.transaction_id,
                    txn.product_id,
                    failure
                );
                self.notify(
                    StoreNotification::new(NotificationKind::TransactionNotVerified)
                        .with_product(txn.product_id)
                        .with_transaction(txn.transaction_id),
                );
                return Ok(Ack::Skip);
            }
        };

        if let Some(catalog) = &self.catalog {
            if !catalog.contains(&txn.product_id) {
                tracing::warn!(
                    "transaction {} references unknown product {}; acknowledging without cache update",
                    txn.transaction_id,
                    txn.product_id
                );
                return Ok(Ack::Finish(txn.transaction_id));
            }
        }

        let kind = self.kind_of(&txn.product_id);
        let now = chrono::Utc::now().timestamp();

        if txn.is_revoked() {
            let newly_revoked = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                state.revoked_transactions.insert(txn.transaction_id.clone())
            };
            if newly_revoked {
                if kind == Some(ProductKind::Consumable) {
                    self.counter.reset(&txn.product_id);
                }
                self.update_purchased_products(&txn.product_id, false, true, true)?;
                if kind.is_some_and(|k| k.is_subscription()) {
                    self.observations.append(ObservationRecord::new(
                        txn.product_id.clone(),
                        txn.transaction_id.clone(),
                        RenewalState::Revoked,
                    ));
                }
                self.notify(
                    StoreNotification::new(NotificationKind::TransactionRevoked)
                        .with_product(txn.product_id)
                        .with_transaction(txn.transaction_id),
                );
            }
            return Ok(Ack::Skip);
        }

        // A non-revocation event for a transaction already revoked is a stale
        // redelivery; re-acknowledge so it stops, change nothing.
        let stale = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.revoked_transactions.contains(&txn.transaction_id)
        };
        if stale {
            return Ok(Ack::Finish(txn.transaction_id));
        }

        if txn.is_expired_at(now) {
            self.update_purchased_products(&txn.product_id, false, true, true)?;
            if kind.is_some_and(|k| k.is_subscription()) {
                self.observations.append(ObservationRecord::new(
                    txn.product_id.clone(),
                    txn.transaction_id.clone(),
                    RenewalState::Expired,
                ));
            }
            self.notify(
                StoreNotification::new(NotificationKind::TransactionExpired)
                    .with_product(txn.product_id)
                    .with_transaction(txn.transaction_id),
            );
            return Ok(Ack::Skip);
        }

        if txn.is_upgraded {
            // The lapsed tier reads as un-owned unless the legacy policy flag
            // keeps it; ownership moved to the new tier's own transaction.
            let owned = self.policy.upgraded_grants_access;
            self.update_purchased_products(&txn.product_id, owned, true, true)?;
            self.notify(
                StoreNotification::new(NotificationKind::TransactionUpgraded)
                    .with_product(txn.product_id)
                    .with_transaction(txn.transaction_id),
            );
            return Ok(Ack::Skip);
        }

        // Definitive purchase or renewal
        let first_delivery = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.seen_transactions.insert(txn.transaction_id.clone())
        };
        if first_delivery && kind == Some(ProductKind::Consumable) {
            self.counter.increment(&txn.product_id);
        }
        self.update_purchased_products(&txn.product_id, true, true, true)?;
        if kind.is_some_and(|k| k.is_subscription()) {
            self.observations.append(ObservationRecord::new(
                txn.product_id.clone(),
                txn.transaction_id.clone(),
                RenewalState::Subscribed,
            ));
        }
        self.notify(
            StoreNotification::new(NotificationKind::TransactionValidated)
                .with_product(txn.product_id.clone())
                .with_transaction(txn.transaction_id.clone()),
        );
        Ok(Ack::Finish(txn.transaction_id))
    }

    /// Start the platform purchase flow for a product
    ///
    /// Single-flight per manager instance: a second call while one purchase
    /// is in flight fails with [`StoreError::PurchaseInProgress`].
    pub async fn purchase(&self, product_id: &ProductId) -> Result<PurchaseOutcome> {
        let flow = self
            .purchase_flow
            .clone()
            .ok_or_else(|| StoreError::InvalidArgument("no purchase flow configured".into()))?;

        if self.purchase_in_flight.swap(true, Ordering::SeqCst) {
            return Err(StoreError::PurchaseInProgress.into());
        }
        let result = self.run_purchase(flow, product_id).await;
        self.purchase_in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run_purchase(
        &self,
        flow: Arc<dyn PurchaseFlow>,
        product_id: &ProductId,
    ) -> Result<PurchaseOutcome> {
        let outcome = match flow.purchase(product_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.notify(
                    StoreNotification::new(NotificationKind::PurchaseFailure)
                        .with_product(product_id.clone()),
                );
                return Err(e);
            }
        };

        match outcome {
            PurchaseOutcome::Success(VerifyResult::Verified(txn)) => {
                let first_delivery = {
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.seen_transactions.insert(txn.transaction_id.clone())
                };
                if first_delivery && self.kind_of(product_id) == Some(ProductKind::Consumable) {
                    self.counter.increment(product_id);
                }
                self.update_purchased_products(product_id, true, true, true)?;
                if self.kind_of(product_id).is_some_and(|k| k.is_subscription()) {
                    self.observations.append(ObservationRecord::new(
                        product_id.clone(),
                        txn.transaction_id.clone(),
                        RenewalState::Subscribed,
                    ));
                }
                flow.finish(&txn.transaction_id).await?;
                self.notify(
                    StoreNotification::new(NotificationKind::PurchaseSuccess)
                        .with_product(product_id.clone())
                        .with_transaction(txn.transaction_id.clone()),
                );
                Ok(PurchaseOutcome::Success(VerifyResult::Verified(txn)))
            }
            PurchaseOutcome::Success(VerifyResult::Unverified(txn, failure)) => {
                self.notify(
                    StoreNotification::new(NotificationKind::PurchaseFailure)
                        .with_product(product_id.clone())
                        .with_transaction(txn.transaction_id.clone()),
                );
                Err(StoreError::VerificationFailed {
                    product_id: txn.product_id,
                    reason: failure.to_string(),
                }
                .into())
            }
            PurchaseOutcome::Cancelled => {
                self.notify(
                    StoreNotification::new(NotificationKind::PurchaseCancelled)
                        .with_product(product_id.clone()),
                );
                Ok(PurchaseOutcome::Cancelled)
            }
            PurchaseOutcome::Pending => {
                self.notify(
                    StoreNotification::new(NotificationKind::PurchasePending)
                        .with_product(product_id.clone()),
                );
                Ok(PurchaseOutcome::Pending)
            }
        }
    }

    /// Sweep all current entitlements and mark owned products purchased
    ///
    /// Returns the identifiers confirmed owned. Unverified entitlements
    /// surface as [`StoreError::VerificationFailed`].
    pub async fn restore_purchases(&self) -> Result<Vec<ProductId>> {
        let entitlements = self.entitlements.all_entitlements().await?;
        let now = chrono::Utc::now().timestamp();
        let mut owned_ids = Vec::new();

        for entitlement in entitlements {
            match entitlement {
                VerifyResult::Verified(txn) => {
                    let owned = txn.grants_ownership_at(now, self.policy.upgraded_grants_access);
                    self.update_purchased_products(&txn.product_id, owned, true, true)?;
                    if owned {
                        owned_ids.push(txn.product_id);
                    }
                }
                VerifyResult::Unverified(txn, failure) => {
                    return Err(StoreError::VerificationFailed {
                        product_id: txn.product_id,
                        reason: failure.to_string(),
                    }
                    .into());
                }
            }
        }

        Ok(owned_ids)
    }

    /// The highest service tier the user currently holds in a group
    ///
    /// Scans the group's products in configured order (first = highest tier)
    /// and returns the first with a verified, active entitlement. Unverified
    /// statuses are skipped with a warning; this is a scan, not a point
    /// query. Ties break on iteration order, which is stable.
    pub async fn highest_active_subscription(&self, group: &str) -> Result<Option<ProductId>> {
        let catalog = self
            .catalog
            .as_ref()
            .ok_or_else(|| StoreError::NotFound("no product catalog loaded".into()))?;
        let ids = catalog
            .subscription_group(group)
            .ok_or_else(|| StoreError::NotFound(format!("subscription group {}", group)))?;

        let now = chrono::Utc::now().timestamp();
        for id in ids {
            match self.entitlements.current_entitlement(id).await? {
                Some(VerifyResult::Verified(txn))
                    if txn.grants_ownership_at(now, self.policy.upgraded_grants_access) =>
                {
                    return Ok(Some(id.clone()));
                }
                Some(VerifyResult::Unverified(txn, failure)) => {
                    tracing::warn!(
                        "skipping unverified subscription status for {} ({}): {}",
                        id,
                        txn.transaction_id,
                        failure
                    );
                }
                _ => {}
            }
        }

        Ok(None)
    }

    /// Record a subscription status transition seen out of band
    ///
    /// Entry point for the host's secondary notification path; the record
    /// becomes the last-resort signal when the oracle reports no entitlement.
    pub fn record_subscription_change(
        &self,
        product_id: &ProductId,
        transaction_id: &str,
        state: RenewalState,
    ) {
        self.observations.append(ObservationRecord::new(
            product_id.clone(),
            transaction_id,
            state,
        ));
        self.notify(
            StoreNotification::new(NotificationKind::SubscriptionStatusChanged)
                .with_product(product_id.clone())
                .with_transaction(transaction_id),
        );
    }
}
