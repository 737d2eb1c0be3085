//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only (validation, invariants, stock and
/// capacity outcomes, lifecycle violations). Storage and transport problems are
/// modelled by the infrastructure crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input, non-positive quantity).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated. Always a bug or data corruption.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conflict occurred (e.g. stale version, duplicate resource).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Not enough available stock to satisfy a reservation.
    #[error("insufficient stock: {0}")]
    InsufficientStock(String),

    /// A capacity-limited resource (carrier day slot) is full.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The requested lifecycle action is not allowed from the current state.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// A goods reception would exceed the ordered quantity (or is non-positive).
    #[error("invalid reception quantity: {0}")]
    InvalidReceptionQuantity(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn insufficient_stock(msg: impl Into<String>) -> Self {
        Self::InsufficientStock(msg.into())
    }

    pub fn capacity_exceeded(msg: impl Into<String>) -> Self {
        Self::CapacityExceeded(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidStateTransition(msg.into())
    }

    pub fn invalid_reception(msg: impl Into<String>) -> Self {
        Self::InvalidReceptionQuantity(msg.into())
    }
}
