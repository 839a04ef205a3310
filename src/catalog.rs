use crate::{Product, ProductId, ProductKind, Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// The product catalog, read once at startup
///
/// Lists every product identifier the store knows about plus optional
/// subscription group metadata. Within a group, the order of identifiers is
/// the configured priority: first entry = highest service tier.
///
/// Catalogs are built in code or loaded from a JSON file:
///
/// ```json
/// {
///   "products": [
///     { "id": "com.example.coins", "kind": "Consumable", "subscription_group": null },
///     { "id": "com.example.pro", "kind": "AutoRenewable", "subscription_group": "main" }
///   ],
///   "subscription_groups": { "main": ["com.example.pro"] }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductCatalog {
    products: Vec<Product>,
    #[serde(default)]
    subscription_groups: HashMap<String, Vec<ProductId>>,
}

impl ProductCatalog {
    pub fn new(products: Vec<Product>) -> Result<Self> {
        let catalog = Self {
            products,
            subscription_groups: HashMap::new(),
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Add a named subscription group; ids in tier order, highest first
    pub fn with_subscription_group(
        mut self,
        name: impl Into<String>,
        ids: Vec<ProductId>,
    ) -> Result<Self> {
        self.subscription_groups.insert(name.into(), ids);
        self.validate()?;
        Ok(self)
    }

    /// Load a catalog from a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Storage(format!("cannot read catalog {}: {}", path.display(), e))
        })?;
        let catalog: ProductCatalog = serde_json::from_str(&json)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn product(&self, id: &ProductId) -> Option<&Product> {
        self.products.iter().find(|p| &p.id == id)
    }

    pub fn kind_of(&self, id: &ProductId) -> Option<ProductKind> {
        self.product(id).map(|p| p.kind)
    }

    pub fn contains(&self, id: &ProductId) -> bool {
        self.product(id).is_some()
    }

    /// Product identifiers of a subscription group, in tier order
    pub fn subscription_group(&self, name: &str) -> Option<&[ProductId]> {
        self.subscription_groups.get(name).map(|ids| ids.as_slice())
    }

    pub fn product_ids(&self) -> impl Iterator<Item = &ProductId> {
        self.products.iter().map(|p| &p.id)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for product in &self.products {
            if product.id.as_str().is_empty() {
                return Err(StoreError::InvalidArgument(
                    "product identifier cannot be empty".to_string(),
                )
                .into());
            }
            if !seen.insert(&product.id) {
                return Err(StoreError::InvalidArgument(format!(
                    "duplicate product identifier: {}",
                    product.id
                ))
                .into());
            }
        }

        for (name, ids) in &self.subscription_groups {
            for id in ids {
                match self.kind_of(id) {
                    None => {
                        return Err(StoreError::InvalidArgument(format!(
                            "subscription group {} references unknown product {}",
                            name, id
                        ))
                        .into());
                    }
                    Some(ProductKind::AutoRenewable) => {}
                    Some(kind) => {
                        return Err(StoreError::InvalidArgument(format!(
                            "subscription group {} member {} is a {}, expected an auto-renewable subscription",
                            name, id, kind
                        ))
                        .into());
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_catalog() -> ProductCatalog {
        ProductCatalog::new(vec![
            Product::new("com.example.coins", ProductKind::Consumable),
            Product::new("com.example.unlock", ProductKind::NonConsumable),
            Product::new("com.example.gold", ProductKind::AutoRenewable)
                .with_subscription_group("main"),
            Product::new("com.example.silver", ProductKind::AutoRenewable)
                .with_subscription_group("main"),
        ])
        .unwrap()
        .with_subscription_group(
            "main",
            vec![
                ProductId::new("com.example.gold"),
                ProductId::new("com.example.silver"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = test_catalog();
        assert_eq!(catalog.len(), 4);
        assert!(catalog.contains(&ProductId::new("com.example.coins")));
        assert!(!catalog.contains(&ProductId::new("com.example.unknown")));
        assert_eq!(
            catalog.kind_of(&ProductId::new("com.example.unlock")),
            Some(ProductKind::NonConsumable)
        );
    }

    #[test]
    fn test_group_tier_order() {
        let catalog = test_catalog();
        let group = catalog.subscription_group("main").unwrap();
        assert_eq!(group[0], ProductId::new("com.example.gold"));
        assert_eq!(group[1], ProductId::new("com.example.silver"));
        assert!(catalog.subscription_group("missing").is_none());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = ProductCatalog::new(vec![
            Product::new("com.example.coins", ProductKind::Consumable),
            Product::new("com.example.coins", ProductKind::NonConsumable),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_group_referencing_unknown_product_rejected() {
        let result = ProductCatalog::new(vec![Product::new(
            "com.example.gold",
            ProductKind::AutoRenewable,
        )])
        .unwrap()
        .with_subscription_group("main", vec![ProductId::new("com.example.missing")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_group_member_must_be_auto_renewable() {
        let result = ProductCatalog::new(vec![Product::new(
            "com.example.coins",
            ProductKind::Consumable,
        )])
        .unwrap()
        .with_subscription_group("main", vec![ProductId::new("com.example.coins")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let json = serde_json::to_string_pretty(&test_catalog()).unwrap();
        std::fs::write(&path, json).unwrap();

        let loaded = ProductCatalog::load(&path).unwrap();
        assert_eq!(loaded.len(), 4);
        assert!(loaded.subscription_group("main").is_some());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ProductCatalog::load(&dir.path().join("absent.json"));
        assert!(result.is_err());
    }
}
