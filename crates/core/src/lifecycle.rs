//! Closed lifecycle enums driven by a central transition table.
//!
//! Each status enum (sales order, shipment, purchase order) implements
//! [`Lifecycle`] with a single `next` match that *is* its transition table.
//! Aggregates never assign a status directly; they ask the table.

use core::fmt::Debug;

use crate::error::{DomainError, DomainResult};

pub trait Lifecycle: Copy + Eq + Debug {
    /// Lifecycle actions (confirm, ship, cancel, ...).
    type Action: Copy + Debug;

    /// Target state for `action` from `self`, or `None` when the table has no entry.
    fn next(self, action: Self::Action) -> Option<Self>;

    /// States from which no further transition exists.
    fn is_terminal(self) -> bool;

    /// [`Lifecycle::next`] as a domain result.
    fn transition(self, action: Self::Action) -> DomainResult<Self> {
        self.next(action).ok_or_else(|| {
            DomainError::invalid_transition(format!("cannot {action:?} from {self:?}"))
        })
    }

    fn allows(self, action: Self::Action) -> bool {
        self.next(action).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Door {
        Open,
        Closed,
        Welded,
    }

    #[derive(Debug, Clone, Copy)]
    enum DoorAction {
        Close,
        Weld,
    }

    impl Lifecycle for Door {
        type Action = DoorAction;

        fn next(self, action: DoorAction) -> Option<Self> {
            match (self, action) {
                (Door::Open, DoorAction::Close) => Some(Door::Closed),
                (Door::Closed, DoorAction::Weld) => Some(Door::Welded),
                _ => None,
            }
        }

        fn is_terminal(self) -> bool {
            matches!(self, Door::Welded)
        }
    }

    #[test]
    fn transition_follows_table() {
        assert_eq!(Door::Open.transition(DoorAction::Close).unwrap(), Door::Closed);
        assert!(Door::Closed.allows(DoorAction::Weld));
    }

    #[test]
    fn missing_entry_is_invalid_transition() {
        let err = Door::Open.transition(DoorAction::Weld).unwrap_err();
        match err {
            DomainError::InvalidStateTransition(msg) => {
                assert!(msg.contains("Weld"));
                assert!(msg.contains("Open"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
