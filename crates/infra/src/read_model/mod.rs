//! Disposable read models and the reference data the engine consults.

pub mod reference;
pub mod store;

pub use reference::{
    Carrier, Product, ReferenceData, ReferenceError, ReferenceSeed, Supplier, Warehouse,
};
pub use store::{InMemoryReadStore, ReadStore};
