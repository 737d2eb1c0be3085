use serde::{Deserialize, Serialize};

use stockflow_core::Lifecycle;

/// Sales order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SalesOrderStatus {
    Created,
    Confirmed,
    Reserved,
    PartiallyReserved,
    Shipped,
    Delivered,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SalesOrderAction {
    Confirm,
    Reserve { fully_reserved: bool },
    Ship,
    Deliver,
    Cancel,
    ExpireHold,
}

impl SalesOrderStatus {
    /// Statuses in which the order holds reserved stock.
    pub fn holds_stock(self) -> bool {
        matches!(self, Self::Reserved | Self::PartiallyReserved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Confirmed => "CONFIRMED",
            Self::Reserved => "RESERVED",
            Self::PartiallyReserved => "PARTIALLY_RESERVED",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::Canceled => "CANCELED",
        }
    }
}

impl core::str::FromStr for SalesOrderStatus {
    type Err = stockflow_core::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CREATED" => Self::Created,
            "CONFIRMED" => Self::Confirmed,
            "RESERVED" => Self::Reserved,
            "PARTIALLY_RESERVED" => Self::PartiallyReserved,
            "SHIPPED" => Self::Shipped,
            "DELIVERED" => Self::Delivered,
            "CANCELED" => Self::Canceled,
            other => {
                return Err(stockflow_core::DomainError::validation(format!(
                    "unknown sales order status: {other}"
                )));
            }
        })
    }
}

impl Lifecycle for SalesOrderStatus {
    type Action = SalesOrderAction;

    fn next(self, action: SalesOrderAction) -> Option<Self> {
        use SalesOrderAction as A;
        use SalesOrderStatus as S;

        match (self, action) {
            (S::Created, A::Confirm) => Some(S::Confirmed),

            (S::Confirmed | S::PartiallyReserved, A::Reserve { fully_reserved: true }) => {
                Some(S::Reserved)
            }
            (S::Confirmed | S::PartiallyReserved, A::Reserve { fully_reserved: false }) => {
                Some(S::PartiallyReserved)
            }

            (S::Reserved, A::Ship) => Some(S::Shipped),
            (S::Shipped, A::Deliver) => Some(S::Delivered),

            (S::Created | S::Confirmed | S::Reserved | S::PartiallyReserved, A::Cancel) => {
                Some(S::Canceled)
            }

            (S::Reserved | S::PartiallyReserved, A::ExpireHold) => Some(S::Confirmed),

            _ => None,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Canceled)
    }
}
