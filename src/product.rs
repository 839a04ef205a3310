use serde::{Deserialize, Serialize};

/// Identifier of a product in the store catalog
///
/// Opaque, globally unique, supplied by configuration at startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductId(pub String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProductId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Kind of a product, immutable for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductKind {
    /// Can be purchased repeatedly; the platform keeps no purchase history
    Consumable,
    /// One-time purchase retained indefinitely in platform history
    NonConsumable,
    /// Auto-renewing subscription, grouped with sibling tiers
    AutoRenewable,
    /// Fixed-duration subscription; not handled by the entitlement path
    NonRenewable,
}

impl ProductKind {
    /// Whether ownership of this kind can be derived from the entitlement oracle
    pub fn has_entitlement(&self) -> bool {
        matches!(self, ProductKind::NonConsumable | ProductKind::AutoRenewable)
    }

    pub fn is_subscription(&self) -> bool {
        matches!(self, ProductKind::AutoRenewable | ProductKind::NonRenewable)
    }
}

impl std::fmt::Display for ProductKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductKind::Consumable => write!(f, "consumable"),
            ProductKind::NonConsumable => write!(f, "non-consumable"),
            ProductKind::AutoRenewable => write!(f, "auto-renewable subscription"),
            ProductKind::NonRenewable => write!(f, "non-renewing subscription"),
        }
    }
}

/// A product as declared in the catalog configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub kind: ProductKind,
    /// Name of the subscription group this product belongs to, if any
    pub subscription_group: Option<String>,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, kind: ProductKind) -> Self {
        Self {
            id: id.into(),
            kind,
            subscription_group: None,
        }
    }

    pub fn with_subscription_group(mut self, group: impl Into<String>) -> Self {
        self.subscription_group = Some(group.into());
        self
    }
}
