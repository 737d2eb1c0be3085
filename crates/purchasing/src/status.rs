use serde::{Deserialize, Serialize};

use stockflow_core::{DomainError, Lifecycle};

/// Purchase order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseOrderStatus {
    Draft,
    Approved,
    PartiallyReceived,
    Received,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseOrderAction {
    Approve,
    Receive { complete: bool },
    Cancel,
}

impl PurchaseOrderStatus {
    pub fn accepts_goods(self) -> bool {
        matches!(self, Self::Approved | Self::PartiallyReceived)
    }
}

impl core::str::FromStr for PurchaseOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "DRAFT" => Self::Draft,
            "APPROVED" => Self::Approved,
            "PARTIALLY_RECEIVED" => Self::PartiallyReceived,
            "RECEIVED" => Self::Received,
            "CANCELED" => Self::Canceled,
            other => {
                return Err(DomainError::validation(format!(
                    "unknown purchase order status: {other}"
                )));
            }
        })
    }
}

impl Lifecycle for PurchaseOrderStatus {
    type Action = PurchaseOrderAction;

    fn next(self, action: PurchaseOrderAction) -> Option<Self> {
        use PurchaseOrderAction as A;
        use PurchaseOrderStatus as S;

        match (self, action) {
            (S::Draft, A::Approve) => Some(S::Approved),
            (S::Approved | S::PartiallyReceived, A::Receive { complete: true }) => {
                Some(S::Received)
            }
            (S::Approved | S::PartiallyReceived, A::Receive { complete: false }) => {
                Some(S::PartiallyReceived)
            }
            (S::Draft | S::Approved | S::PartiallyReceived, A::Cancel) => Some(S::Canceled),
            _ => None,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Received | Self::Canceled)
    }
}
