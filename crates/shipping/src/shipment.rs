use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{Aggregate, AggregateId, AggregateRoot, CarrierId, DomainError, Lifecycle};
use stockflow_events::Event;
use stockflow_sales::SalesOrderId;

/// Shipment identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShipmentId(pub AggregateId);

impl ShipmentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ShipmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Shipment status lifecycle.
///
/// New shipments are created directly in `Planned` (they always carry a
/// carrier and date); `Pending` stays in the table for records created
/// without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    Pending,
    Planned,
    InTransit,
    Delivered,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipmentAction {
    Plan,
    Dispatch,
    Deliver,
    Cancel,
}

impl core::str::FromStr for ShipmentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PENDING" => Self::Pending,
            "PLANNED" => Self::Planned,
            "IN_TRANSIT" => Self::InTransit,
            "DELIVERED" => Self::Delivered,
            "CANCELED" => Self::Canceled,
            other => {
                return Err(DomainError::validation(format!(
                    "unknown shipment status: {other}"
                )));
            }
        })
    }
}

impl Lifecycle for ShipmentStatus {
    type Action = ShipmentAction;

    fn next(self, action: ShipmentAction) -> Option<Self> {
        use ShipmentAction as A;
        use ShipmentStatus as S;

        match (self, action) {
            (S::Pending, A::Plan) => Some(S::Planned),
            (S::Pending | S::Planned, A::Dispatch) => Some(S::InTransit),
            (S::InTransit, A::Deliver) => Some(S::Delivered),
            (S::Pending | S::Planned, A::Cancel) => Some(S::Canceled),
            _ => None,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Canceled)
    }
}

/// Aggregate root: Shipment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shipment {
    id: ShipmentId,
    sales_order_id: Option<SalesOrderId>,
    carrier_id: Option<CarrierId>,
    status: ShipmentStatus,
    planned_date: Option<NaiveDate>,
    tracking_number: Option<String>,
    created_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Shipment {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ShipmentId) -> Self {
        Self {
            id,
            sales_order_id: None,
            carrier_id: None,
            status: ShipmentStatus::Pending,
            planned_date: None,
            tracking_number: None,
            created_at: None,
            shipped_at: None,
            delivered_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ShipmentId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn sales_order_id(&self) -> Option<SalesOrderId> {
        self.sales_order_id
    }

    pub fn carrier_id(&self) -> Option<CarrierId> {
        self.carrier_id
    }

    pub fn status(&self) -> ShipmentStatus {
        self.status
    }

    pub fn planned_date(&self) -> Option<NaiveDate> {
        self.planned_date
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn shipped_at(&self) -> Option<DateTime<Utc>> {
        self.shipped_at
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    /// Whether this shipment currently occupies a carrier-day slot.
    pub fn holds_slot(&self) -> bool {
        matches!(self.status, ShipmentStatus::Pending | ShipmentStatus::Planned)
            && self.planned_date.is_some()
    }
}

impl AggregateRoot for Shipment {
    type Id = ShipmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlanShipment (creates the shipment in `Planned`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanShipment {
    pub shipment_id: ShipmentId,
    pub sales_order_id: SalesOrderId,
    pub carrier_id: CarrierId,
    pub planned_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DispatchShipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchShipment {
    pub shipment_id: ShipmentId,
    pub tracking_number: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeliverShipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverShipment {
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelShipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelShipment {
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentCommand {
    PlanShipment(PlanShipment),
    DispatchShipment(DispatchShipment),
    DeliverShipment(DeliverShipment),
    CancelShipment(CancelShipment),
}

/// Event: ShipmentPlanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentPlanned {
    pub shipment_id: ShipmentId,
    pub sales_order_id: SalesOrderId,
    pub carrier_id: CarrierId,
    pub planned_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentDispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentDispatched {
    pub shipment_id: ShipmentId,
    pub tracking_number: String,
    pub occurred_at: DateTime<Utc>,
}

/// Payload of status-only shipment events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentMarker {
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentEvent {
    ShipmentPlanned(ShipmentPlanned),
    ShipmentDispatched(ShipmentDispatched),
    ShipmentDelivered(ShipmentMarker),
    ShipmentCanceled(ShipmentMarker),
}

impl Event for ShipmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ShipmentEvent::ShipmentPlanned(_) => "shipping.shipment.planned",
            ShipmentEvent::ShipmentDispatched(_) => "shipping.shipment.dispatched",
            ShipmentEvent::ShipmentDelivered(_) => "shipping.shipment.delivered",
            ShipmentEvent::ShipmentCanceled(_) => "shipping.shipment.canceled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ShipmentEvent::ShipmentPlanned(e) => e.occurred_at,
            ShipmentEvent::ShipmentDispatched(e) => e.occurred_at,
            ShipmentEvent::ShipmentDelivered(e) | ShipmentEvent::ShipmentCanceled(e) => {
                e.occurred_at
            }
        }
    }
}

impl Aggregate for Shipment {
    type Command = ShipmentCommand;
    type Event = ShipmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ShipmentEvent::ShipmentPlanned(e) => {
                self.id = e.shipment_id;
                self.sales_order_id = Some(e.sales_order_id);
                self.carrier_id = Some(e.carrier_id);
                self.planned_date = Some(e.planned_date);
                self.status = ShipmentStatus::Planned;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            ShipmentEvent::ShipmentDispatched(e) => {
                self.status = ShipmentStatus::InTransit;
                self.tracking_number = Some(e.tracking_number.clone());
                self.shipped_at = Some(e.occurred_at);
            }
            ShipmentEvent::ShipmentDelivered(e) => {
                self.status = ShipmentStatus::Delivered;
                self.delivered_at = Some(e.occurred_at);
            }
            ShipmentEvent::ShipmentCanceled(_) => {
                self.status = ShipmentStatus::Canceled;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ShipmentCommand::PlanShipment(cmd) => self.handle_plan(cmd),
            ShipmentCommand::DispatchShipment(cmd) => self.handle_dispatch(cmd),
            ShipmentCommand::DeliverShipment(cmd) => self.handle_deliver(cmd),
            ShipmentCommand::CancelShipment(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Shipment {
    fn ensure_exists(&self, shipment_id: ShipmentId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("shipment {shipment_id}")));
        }
        if self.id != shipment_id {
            return Err(DomainError::invariant("shipment_id mismatch"));
        }
        Ok(())
    }

    fn handle_plan(&self, cmd: &PlanShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("shipment already exists"));
        }
        self.status.transition(ShipmentAction::Plan)?;

        Ok(vec![ShipmentEvent::ShipmentPlanned(ShipmentPlanned {
            shipment_id: cmd.shipment_id,
            sales_order_id: cmd.sales_order_id,
            carrier_id: cmd.carrier_id,
            planned_date: cmd.planned_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_dispatch(&self, cmd: &DispatchShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_exists(cmd.shipment_id)?;
        self.status.transition(ShipmentAction::Dispatch)?;
        if cmd.tracking_number.trim().is_empty() {
            return Err(DomainError::validation("trackingNumber cannot be empty"));
        }

        Ok(vec![ShipmentEvent::ShipmentDispatched(ShipmentDispatched {
            shipment_id: cmd.shipment_id,
            tracking_number: cmd.tracking_number.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deliver(&self, cmd: &DeliverShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_exists(cmd.shipment_id)?;
        self.status.transition(ShipmentAction::Deliver)?;

        Ok(vec![ShipmentEvent::ShipmentDelivered(ShipmentMarker {
            shipment_id: cmd.shipment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_exists(cmd.shipment_id)?;
        self.status.transition(ShipmentAction::Cancel)?;

        Ok(vec![ShipmentEvent::ShipmentCanceled(ShipmentMarker {
            shipment_id: cmd.shipment_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
