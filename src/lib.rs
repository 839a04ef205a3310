//! # Purchasekit
//!
//! Purchase-state reconciliation for platform in-app-purchase APIs.
//!
//! The platform owns verification, receipts, and payment processing; this
//! crate owns the local view of "what does the current user own". It consumes
//! an unbounded feed of verification-wrapped transaction updates, answers
//! on-demand ownership queries against an entitlement oracle, and degrades to
//! a persisted fallback list when the platform is unreachable.
//!
//! ## Semantics by product kind
//! - Consumables: counted in a secure local counter store; the platform keeps
//!   no history for them
//! - Non-consumables: entitlement-backed, cacheable between revocations
//! - Auto-renewing subscriptions: entitlement-backed with an out-of-band
//!   status log covering platform delivery gaps
//! - Non-renewing subscriptions: not supported by the entitlement path
//!
//! ## Wiring
//!
//! ```ignore
//! use purchasekit::{ProductCatalog, PurchaseManager, TransactionMonitor};
//! use std::sync::Arc;
//!
//! let catalog = Arc::new(ProductCatalog::load(&config_path)?);
//! let manager = Arc::new(
//!     PurchaseManager::new(oracle, counter, settings)?
//!         .with_catalog(catalog)
//!         .with_purchase_flow(flow),
//! );
//! let monitor = TransactionMonitor::start(Arc::clone(&manager), stream);
//!
//! if manager.is_purchased(&product_id).await? {
//!     // unlock content
//! }
//! ```

pub mod catalog;
pub mod client;
pub mod counter;
pub mod fallback;
pub mod manager;
pub mod monitor;
pub mod notification;
pub mod product;
pub mod storage;
pub mod transaction;

pub use catalog::ProductCatalog;
pub use client::{EntitlementProvider, PurchaseFlow, PurchaseOutcome, TransactionStream};
pub use counter::{ConsumableCounter, MemoryConsumableCounter};
pub use fallback::{CachePolicy, FallbackCache, FALLBACK_STORAGE_KEY};
pub use manager::{Ack, PurchaseManager};
pub use monitor::TransactionMonitor;
pub use notification::{NotificationHandler, NotificationKind, StoreNotification};
pub use product::{Product, ProductId, ProductKind};
pub use storage::{FileSettingsStore, MemorySettingsStore, SettingsStore};
pub use transaction::{
    ObservationLog, ObservationRecord, RenewalState, Transaction, VerificationFailure,
    VerifyResult,
};

pub type Result<T> = anyhow::Result<T>;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The platform could not cryptographically confirm a transaction.
    /// Indicates corruption or tampering, not absence; never folded into
    /// "not purchased".
    #[error("transaction verification failed for {product_id}: {reason}")]
    VerificationFailed {
        product_id: ProductId,
        reason: String,
    },
    #[error("product type not supported on this path: {0}")]
    UnsupportedProductType(ProductKind),
    #[error("another purchase is already in progress")]
    PurchaseInProgress,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}
