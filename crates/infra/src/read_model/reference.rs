//! Reference data (catalog) the engine reads but does not own.
//!
//! Products, warehouses, carriers and suppliers are upserted by an external
//! catalog (here: the `PUT /reference/*` endpoints or a JSON seed file). The
//! engine only checks existence, the active flag, prices, SKUs and capacities.

use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockflow_core::{CarrierId, DomainError, ProductId, SupplierId, WarehouseId};

use super::store::{InMemoryReadStore, ReadStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
    /// Default unit price in minor units.
    #[serde(default)]
    pub unit_price: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
    #[serde(default)]
    pub capacity: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Carrier {
    pub id: CarrierId,
    pub name: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
    pub daily_capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Supplier {
    pub id: SupplierId,
    pub name: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

/// JSON seed file layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReferenceSeed {
    pub products: Vec<Product>,
    pub warehouses: Vec<Warehouse>,
    pub carriers: Vec<Carrier>,
    pub suppliers: Vec<Supplier>,
}

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("failed to read seed file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse seed file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

#[derive(Debug, Default)]
pub struct ReferenceData {
    products: InMemoryReadStore<ProductId, Product>,
    warehouses: InMemoryReadStore<WarehouseId, Warehouse>,
    carriers: InMemoryReadStore<CarrierId, Carrier>,
    suppliers: InMemoryReadStore<SupplierId, Supplier>,
    // Serializes product upserts so the SKU checks see a stable catalog.
    product_writes: Mutex<()>,
}

impl ReferenceData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: ReferenceSeed) -> Result<Self, DomainError> {
        let data = Self::new();
        data.apply_seed(seed)?;
        Ok(data)
    }

    pub fn load_seed_file(path: impl AsRef<Path>) -> Result<Self, ReferenceError> {
        let raw = std::fs::read_to_string(path)?;
        let seed: ReferenceSeed = serde_json::from_str(&raw)?;
        Ok(Self::from_seed(seed)?)
    }

    pub fn apply_seed(&self, seed: ReferenceSeed) -> Result<(), DomainError> {
        for p in seed.products {
            self.upsert_product(p)?;
        }
        for w in seed.warehouses {
            self.upsert_warehouse(w)?;
        }
        for c in seed.carriers {
            self.upsert_carrier(c)?;
        }
        for s in seed.suppliers {
            self.upsert_supplier(s)?;
        }
        Ok(())
    }

    /// Insert or update a product. A SKU is unique and immutable once issued.
    pub fn upsert_product(&self, product: Product) -> Result<Product, DomainError> {
        let sku = product.sku.trim();
        if sku.is_empty() {
            return Err(DomainError::validation("sku must not be empty"));
        }
        if product.name.trim().is_empty() {
            return Err(DomainError::validation("product name must not be empty"));
        }

        let _guard = self
            .product_writes
            .lock()
            .map_err(|_| DomainError::invariant("product catalog lock poisoned"))?;

        if let Some(existing) = self.products.get(&product.id) {
            if existing.sku != sku {
                return Err(DomainError::conflict(format!(
                    "sku of product {} is immutable (is '{}')",
                    product.id, existing.sku
                )));
            }
        }
        if let Some(other) = self
            .products
            .list()
            .into_iter()
            .find(|p| p.sku == sku && p.id != product.id)
        {
            return Err(DomainError::conflict(format!(
                "sku '{sku}' already belongs to product {}",
                other.id
            )));
        }

        let product = Product {
            sku: sku.to_string(),
            ..product
        };
        self.products.upsert(product.id, product.clone());
        Ok(product)
    }

    pub fn upsert_warehouse(&self, warehouse: Warehouse) -> Result<Warehouse, DomainError> {
        if warehouse.name.trim().is_empty() {
            return Err(DomainError::validation("warehouse name must not be empty"));
        }
        self.warehouses.upsert(warehouse.id, warehouse.clone());
        Ok(warehouse)
    }

    pub fn upsert_carrier(&self, carrier: Carrier) -> Result<Carrier, DomainError> {
        if carrier.name.trim().is_empty() {
            return Err(DomainError::validation("carrier name must not be empty"));
        }
        self.carriers.upsert(carrier.id, carrier.clone());
        Ok(carrier)
    }

    pub fn upsert_supplier(&self, supplier: Supplier) -> Result<Supplier, DomainError> {
        if supplier.name.trim().is_empty() {
            return Err(DomainError::validation("supplier name must not be empty"));
        }
        self.suppliers.upsert(supplier.id, supplier.clone());
        Ok(supplier)
    }

    pub fn product(&self, id: ProductId) -> Option<Product> {
        self.products.get(&id)
    }

    pub fn warehouse(&self, id: WarehouseId) -> Option<Warehouse> {
        self.warehouses.get(&id)
    }

    pub fn carrier(&self, id: CarrierId) -> Option<Carrier> {
        self.carriers.get(&id)
    }

    pub fn supplier(&self, id: SupplierId) -> Option<Supplier> {
        self.suppliers.get(&id)
    }

    pub fn active_product(&self, id: ProductId) -> Result<Product, DomainError> {
        match self.product(id) {
            Some(p) if p.active => Ok(p),
            Some(_) => Err(DomainError::validation(format!("product {id} is inactive"))),
            None => Err(DomainError::not_found(format!("product {id}"))),
        }
    }

    pub fn active_warehouse(&self, id: WarehouseId) -> Result<Warehouse, DomainError> {
        match self.warehouse(id) {
            Some(w) if w.active => Ok(w),
            Some(_) => Err(DomainError::validation(format!("warehouse {id} is inactive"))),
            None => Err(DomainError::not_found(format!("warehouse {id}"))),
        }
    }

    pub fn active_carrier(&self, id: CarrierId) -> Result<Carrier, DomainError> {
        match self.carrier(id) {
            Some(c) if c.active => Ok(c),
            Some(_) => Err(DomainError::validation(format!("carrier {id} is inactive"))),
            None => Err(DomainError::not_found(format!("carrier {id}"))),
        }
    }

    pub fn active_supplier(&self, id: SupplierId) -> Result<Supplier, DomainError> {
        match self.supplier(id) {
            Some(s) if s.active => Ok(s),
            Some(_) => Err(DomainError::validation(format!("supplier {id} is inactive"))),
            None => Err(DomainError::not_found(format!("supplier {id}"))),
        }
    }

    /// SKU for backorder reporting; empty when the product is unknown.
    pub fn sku_of(&self, id: ProductId) -> String {
        self.product(id).map(|p| p.sku).unwrap_or_default()
    }

    /// Active warehouses, ordered by id.
    pub fn active_warehouse_ids(&self) -> Vec<WarehouseId> {
        let mut ids: Vec<_> = self
            .warehouses
            .list()
            .into_iter()
            .filter(|w| w.active)
            .map(|w| w.id)
            .collect();
        ids.sort();
        ids
    }

    /// Every registered warehouse, active or not, ordered by id.
    pub fn warehouse_ids(&self) -> Vec<WarehouseId> {
        let mut ids: Vec<_> = self.warehouses.list().into_iter().map(|w| w.id).collect();
        ids.sort();
        ids
    }

    /// Active carriers, ordered by id.
    pub fn active_carriers(&self) -> Vec<Carrier> {
        let mut carriers: Vec<_> = self.carriers.list().into_iter().filter(|c| c.active).collect();
        carriers.sort_by_key(|c| c.id);
        carriers
    }
}
