//! Lifecycle notifications exposed to the host application

use crate::ProductId;
use std::sync::Arc;

/// Significant purchase and transaction lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    PurchaseSuccess,
    PurchaseFailure,
    PurchaseCancelled,
    PurchasePending,
    TransactionReceived,
    TransactionValidated,
    TransactionNotVerified,
    TransactionRevoked,
    TransactionExpired,
    TransactionUpgraded,
    SubscriptionStatusChanged,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NotificationKind::PurchaseSuccess => "purchase success",
            NotificationKind::PurchaseFailure => "purchase failure",
            NotificationKind::PurchaseCancelled => "purchase cancelled",
            NotificationKind::PurchasePending => "purchase pending",
            NotificationKind::TransactionReceived => "transaction received",
            NotificationKind::TransactionValidated => "transaction validated",
            NotificationKind::TransactionNotVerified => "transaction not verified",
            NotificationKind::TransactionRevoked => "transaction revoked",
            NotificationKind::TransactionExpired => "transaction expired",
            NotificationKind::TransactionUpgraded => "transaction upgraded",
            NotificationKind::SubscriptionStatusChanged => "subscription status changed",
        };
        write!(f, "{}", name)
    }
}

/// A notification delivered to the host's handler
#[derive(Debug, Clone)]
pub struct StoreNotification {
    pub kind: NotificationKind,
    pub product_id: Option<ProductId>,
    pub transaction_id: Option<String>,
}

impl StoreNotification {
    pub fn new(kind: NotificationKind) -> Self {
        Self {
            kind,
            product_id: None,
            transaction_id: None,
        }
    }

    pub fn with_product(mut self, product_id: ProductId) -> Self {
        self.product_id = Some(product_id);
        self
    }

    pub fn with_transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }
}

/// Callback invoked for each notification; must be cheap and non-blocking
pub type NotificationHandler = Arc<dyn Fn(StoreNotification) + Send + Sync>;
