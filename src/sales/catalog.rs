use serde::{Deserialize, Serialize};

/// Catalog entry offered by the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub price: f64,
}

/// Accepted payment method and how to pay with it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub name: String,
    pub details: String,
}

/// Read-only view of the catalog and payment methods
///
/// Read once when a session starts; later changes do not reach a running
/// session.
pub trait CatalogProvider: Send + Sync {
    fn products(&self) -> Vec<Product>;

    fn payment_methods(&self) -> Vec<PaymentMethod>;
}

/// Fixed catalog, typically loaded from the config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticCatalog {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub payment_methods: Vec<PaymentMethod>,
}

impl CatalogProvider for StaticCatalog {
    fn products(&self) -> Vec<Product> {
        self.products.clone()
    }

    fn payment_methods(&self) -> Vec<PaymentMethod> {
        self.payment_methods.clone()
    }
}
