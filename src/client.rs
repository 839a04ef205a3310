//! External collaborator traits
//!
//! Everything the platform owns (entitlement lookup, the transaction update
//! feed, the purchase sheet) is consumed through these traits. The library
//! never implements the platform side; hosts inject adapters, tests inject
//! scripted mocks.

use crate::{ProductId, Result, Transaction, VerifyResult};
use async_trait::async_trait;

/// On-demand entitlement lookup against the platform
#[async_trait]
pub trait EntitlementProvider: Send + Sync {
    /// The user's current entitlement for a product, if any
    ///
    /// `None` means the platform reports no entitlement. That answer is a
    /// known false negative while the device is offline, which is why the
    /// caller must not treat it as durable.
    async fn current_entitlement(
        &self,
        product_id: &ProductId,
    ) -> Result<Option<VerifyResult<Transaction>>>;

    /// Every current entitlement for the signed-in user
    async fn all_entitlements(&self) -> Result<Vec<VerifyResult<Transaction>>>;
}

/// Unbounded feed of transaction updates from the platform
///
/// Delivery is at-least-once with no cross-product ordering. Updates that
/// represent a definitive purchase must be acknowledged, or the platform
/// redelivers them indefinitely.
#[async_trait]
pub trait TransactionStream: Send {
    /// Await the next update; `None` when the feed has ended
    async fn next_update(&mut self) -> Option<VerifyResult<Transaction>>;

    /// Acknowledge (finish) a delivered transaction
    async fn acknowledge(&mut self, transaction_id: &str) -> Result<()>;
}

/// Outcome of presenting the platform purchase flow
#[derive(Debug, Clone)]
pub enum PurchaseOutcome {
    /// The purchase completed; the envelope may still be unverified
    Success(VerifyResult<Transaction>),
    /// The user dismissed the purchase sheet
    Cancelled,
    /// Deferred, e.g. pending parental approval; the eventual result arrives
    /// on the transaction stream
    Pending,
}

/// The platform purchase sheet
#[async_trait]
pub trait PurchaseFlow: Send + Sync {
    async fn purchase(&self, product_id: &ProductId) -> Result<PurchaseOutcome>;

    /// Finish a completed transaction with the platform
    async fn finish(&self, transaction_id: &str) -> Result<()>;
}
