use crate::ProductId;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// A verified-or-not envelope around payloads returned by the platform
///
/// The platform performs the cryptographic verification; this crate only
/// interprets the outcome. An `Unverified` payload still carries the decoded
/// transaction so callers can report which product was affected.
#[derive(Debug, Clone)]
pub enum VerifyResult<T> {
    Verified(T),
    Unverified(T, VerificationFailure),
}

impl<T> VerifyResult<T> {
    /// The wrapped payload, regardless of verification outcome
    pub fn payload(&self) -> &T {
        match self {
            VerifyResult::Verified(t) => t,
            VerifyResult::Unverified(t, _) => t,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, VerifyResult::Verified(_))
    }
}

/// Reason the platform could not confirm a payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationFailure {
    InvalidSignature,
    InvalidCertificateChain,
    Other(String),
}

impl std::fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationFailure::InvalidSignature => write!(f, "invalid signature"),
            VerificationFailure::InvalidCertificateChain => {
                write!(f, "invalid certificate chain")
            }
            VerificationFailure::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// A decoded platform transaction
///
/// Timestamps are unix seconds. `expiration_date` is only present for
/// subscriptions; `revocation_date` is set when the platform refunded or
/// otherwise withdrew the purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub product_id: ProductId,
    pub purchase_date: i64,
    pub expiration_date: Option<i64>,
    pub revocation_date: Option<i64>,
    pub is_upgraded: bool,
}

impl Transaction {
    pub fn new(product_id: impl Into<ProductId>) -> Self {
        Self {
            transaction_id: uuid::Uuid::new_v4().to_string(),
            product_id: product_id.into(),
            purchase_date: chrono::Utc::now().timestamp(),
            expiration_date: None,
            revocation_date: None,
            is_upgraded: false,
        }
    }

    pub fn with_transaction_id(mut self, id: impl Into<String>) -> Self {
        self.transaction_id = id.into();
        self
    }

    pub fn with_expiration(mut self, expires_at: i64) -> Self {
        self.expiration_date = Some(expires_at);
        self
    }

    pub fn revoked_at(mut self, revoked_at: i64) -> Self {
        self.revocation_date = Some(revoked_at);
        self
    }

    pub fn upgraded(mut self) -> Self {
        self.is_upgraded = true;
        self
    }

    pub fn is_revoked(&self) -> bool {
        self.revocation_date.is_some()
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expiration_date.is_some_and(|end| end < now)
    }

    /// Whether this transaction grants ownership of its product at `now`
    ///
    /// Revoked and lapsed transactions never grant ownership. A transaction
    /// superseded by an upgrade grants ownership only when the caller opts
    /// into the legacy reading via `allow_upgraded`.
    pub fn grants_ownership_at(&self, now: i64, allow_upgraded: bool) -> bool {
        if self.is_revoked() || self.is_expired_at(now) {
            return false;
        }
        !self.is_upgraded || allow_upgraded
    }
}

/// Renewal state of an auto-renewing subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenewalState {
    Subscribed,
    InGracePeriod,
    InBillingRetry,
    Expired,
    Revoked,
}

impl RenewalState {
    /// States in which the subscriber retains access to the product
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RenewalState::Subscribed | RenewalState::InGracePeriod | RenewalState::InBillingRetry
        )
    }
}

/// One subscription status transition seen out of band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub product_id: ProductId,
    pub transaction_id: String,
    pub state: RenewalState,
    pub recorded_at: i64,
}

impl ObservationRecord {
    pub fn new(
        product_id: impl Into<ProductId>,
        transaction_id: impl Into<String>,
        state: RenewalState,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            transaction_id: transaction_id.into(),
            state,
            recorded_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// In-memory append-only log of subscription status transitions
///
/// Not persisted. Consulted as a last-resort signal when the entitlement
/// oracle reports no current entitlement for a subscription, which covers
/// platform-reported gaps in renewal/cancellation delivery.
pub struct ObservationLog {
    records: RwLock<Vec<ObservationRecord>>,
}

impl ObservationLog {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn append(&self, record: ObservationRecord) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.push(record);
    }

    /// Most recent record for a product, by append order
    pub fn latest_for(&self, product_id: &ProductId) -> Option<ObservationRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .rev()
            .find(|r| &r.product_id == product_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ObservationLog {
    fn default() -> Self {
        Self::new()
    }
}
