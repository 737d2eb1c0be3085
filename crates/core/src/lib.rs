//! `stockflow-core`: domain building blocks shared by every stockflow crate.
//!
//! Pure domain primitives only: identifiers, the error taxonomy, the aggregate
//! execution model and lifecycle transition tables. No IO lives here.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod lifecycle;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, CarrierId, ProductId, SupplierId, UserId, WarehouseId};
pub use lifecycle::Lifecycle;
