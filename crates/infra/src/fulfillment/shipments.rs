//! Shipment scheduling: slot booking, dispatch with stock consumption, delivery.

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use stockflow_core::{AggregateId, CarrierId, DomainError, Lifecycle};
use stockflow_inventory::StockKey;
use stockflow_sales::{
    AttachShipment, DetachShipment, MarkDelivered, MarkShipped, SalesOrder, SalesOrderCommand,
    SalesOrderId, SalesOrderStatus,
};
use stockflow_shipping::{
    BookSlot, CancelShipment, CarrierDay, CarrierDayKey, DeliverShipment, DispatchShipment,
    PlanShipment, ReleaseSlot, Shipment, ShipmentAction, ShipmentCommand, ShipmentId,
    ShipmentStatus, SlotCapacity, SlotCommand,
};

use super::{FulfillmentEngine, ShipmentView};
use crate::command_dispatcher::DispatchError;
use crate::compensation::{CompensationLog, LedgerStep};

pub const SHIPMENT_AGGREGATE_TYPE: &str = "shipping.shipment";
pub const CARRIER_DAY_AGGREGATE_TYPE: &str = "shipping.carrier_day";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShipmentRequest {
    pub sales_order_id: SalesOrderId,
    pub carrier_id: CarrierId,
    pub planned_date: NaiveDate,
}

impl FulfillmentEngine {
    fn load_shipment(&self, shipment_id: ShipmentId) -> Result<Shipment, DispatchError> {
        let shipment = self.load(shipment_id.0, || Shipment::empty(shipment_id))?;
        if !shipment.exists() {
            return Err(DispatchError::NotFound(format!("shipment {shipment_id}")));
        }
        Ok(shipment)
    }

    fn execute_shipment(
        &self,
        shipment_id: ShipmentId,
        command: ShipmentCommand,
    ) -> Result<Shipment, DispatchError> {
        self.execute(shipment_id.0, SHIPMENT_AGGREGATE_TYPE, command, || {
            Shipment::empty(shipment_id)
        })
    }

    fn owning_order(shipment: &Shipment) -> Result<SalesOrderId, DispatchError> {
        shipment.sales_order_id().ok_or_else(|| {
            DispatchError::InvariantViolation(format!(
                "shipment {} has no sales order",
                shipment.id_typed()
            ))
        })
    }

    fn run_slot(&self, key: CarrierDayKey, command: SlotCommand) -> Result<CarrierDay, DispatchError> {
        let day_id = stockflow_shipping::CarrierDayId::for_key(key);
        self.dispatcher
            .dispatch_with_retry(
                self.settings.ledger_retry,
                day_id.0,
                CARRIER_DAY_AGGREGATE_TYPE,
                &command,
                || CarrierDay::empty(key),
            )
            .map(|out| out.aggregate)
    }

    fn book_slot(
        &self,
        key: CarrierDayKey,
        shipment_id: ShipmentId,
        capacity: u32,
    ) -> Result<CarrierDay, DispatchError> {
        self.run_slot(
            key,
            SlotCommand::BookSlot(BookSlot {
                key,
                shipment_id: shipment_id.0,
                capacity,
                occurred_at: Self::now(),
            }),
        )
    }

    fn release_slot(&self, key: CarrierDayKey, shipment_id: ShipmentId) -> Result<(), DispatchError> {
        self.run_slot(
            key,
            SlotCommand::ReleaseSlot(ReleaseSlot {
                key,
                shipment_id: shipment_id.0,
                occurred_at: Self::now(),
            }),
        )
        .map(|_| ())
    }

    fn slot_key(shipment: &Shipment) -> Option<CarrierDayKey> {
        match (shipment.carrier_id(), shipment.planned_date()) {
            (Some(carrier_id), Some(date)) if shipment.holds_slot() => {
                Some(CarrierDayKey::new(carrier_id, date))
            }
            _ => None,
        }
    }

    /// Plan a shipment for a reserved order, booking a carrier-day slot.
    ///
    /// A same-day request past the cut-off books the first later day in the
    /// horizon with a free slot.
    #[instrument(skip(self, request), fields(order_id = %request.sales_order_id, carrier_id = %request.carrier_id), err)]
    pub fn create_shipment(
        &self,
        request: CreateShipmentRequest,
    ) -> Result<ShipmentView, DispatchError> {
        let carrier = self.reference.active_carrier(request.carrier_id)?;
        let dates = self
            .settings
            .calendar
            .candidate_dates(request.planned_date, Self::now())?;

        let order_id = request.sales_order_id;
        let _guard = self.order_locks.acquire(order_id.0)?;
        let order = self.load_order(order_id)?;
        if !order.status().holds_stock() {
            return Err(DispatchError::InvalidStateTransition(format!(
                "cannot plan a shipment for an order in {}",
                order.status().as_str()
            )));
        }
        if let Some(active) = order.active_shipment_id() {
            return Err(DispatchError::Conflict(format!(
                "order already has active shipment {active}"
            )));
        }

        let shipment_id = ShipmentId::new(AggregateId::new());
        let mut booked = None;
        for date in dates {
            let key = CarrierDayKey::new(carrier.id, date);
            match self.book_slot(key, shipment_id, carrier.daily_capacity) {
                Ok(_) => {
                    booked = Some(key);
                    break;
                }
                Err(DispatchError::CapacityExceeded(msg)) => {
                    info!(date = %date, reason = %msg, "carrier day full, trying next");
                }
                Err(err) => return Err(err),
            }
        }
        let key = booked.ok_or_else(|| {
            DispatchError::CapacityExceeded(format!(
                "carrier {} has no free slot for {}",
                carrier.id, request.planned_date
            ))
        })?;

        let planned = self.execute_shipment(
            shipment_id,
            ShipmentCommand::PlanShipment(PlanShipment {
                shipment_id,
                sales_order_id: order_id,
                carrier_id: carrier.id,
                planned_date: key.date,
                occurred_at: Self::now(),
            }),
        );
        let shipment = match planned {
            Ok(shipment) => shipment,
            Err(err) => {
                self.release_slot_logged(key, shipment_id);
                return Err(err);
            }
        };

        if let Err(err) = self.execute_order(
            order_id,
            SalesOrderCommand::AttachShipment(AttachShipment {
                order_id,
                shipment_id: shipment_id.0,
                occurred_at: Self::now(),
            }),
        ) {
            error!(shipment_id = %shipment_id, error = %err, "attaching shipment failed, canceling it");
            if let Err(cancel_err) = self.execute_shipment(
                shipment_id,
                ShipmentCommand::CancelShipment(CancelShipment {
                    shipment_id,
                    occurred_at: Self::now(),
                }),
            ) {
                error!(shipment_id = %shipment_id, error = %cancel_err, "canceling orphaned shipment failed");
            }
            self.release_slot_logged(key, shipment_id);
            return Err(err);
        }

        info!(shipment_id = %shipment_id, date = %key.date, "shipment planned");
        Ok(ShipmentView::from(&shipment))
    }

    fn release_slot_logged(&self, key: CarrierDayKey, shipment_id: ShipmentId) {
        if let Err(err) = self.release_slot(key, shipment_id) {
            error!(shipment_id = %shipment_id, date = %key.date, error = %err, "slot release failed");
        }
    }

    pub fn get_shipment(&self, shipment_id: ShipmentId) -> Result<ShipmentView, DispatchError> {
        Ok(ShipmentView::from(&self.load_shipment(shipment_id)?))
    }

    /// Dispatch: consume the order's allocations, mark it SHIPPED, then move the
    /// shipment IN_TRANSIT. A retry after the order was already shipped by this
    /// shipment goes straight to the shipment step.
    #[instrument(skip(self, tracking_number), fields(shipment_id = %shipment_id), err)]
    pub fn ship(
        &self,
        shipment_id: ShipmentId,
        tracking_number: Option<String>,
    ) -> Result<ShipmentView, DispatchError> {
        let order_id = Self::owning_order(&self.load_shipment(shipment_id)?)?;
        let _guard = self.order_locks.acquire(order_id.0)?;

        let shipment = self.load_shipment(shipment_id)?;
        shipment.status().transition(ShipmentAction::Dispatch)?;
        let order = self.load_order(order_id)?;

        let already_shipped = order.status() == SalesOrderStatus::Shipped
            && order.shipped_by() == Some(shipment_id.0);
        if !already_shipped {
            self.consume_and_mark_shipped(&order, shipment_id)?;
        }

        let tracking_number = tracking_number
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(generate_tracking_number);
        let shipment = self.execute_shipment(
            shipment_id,
            ShipmentCommand::DispatchShipment(DispatchShipment {
                shipment_id,
                tracking_number,
                occurred_at: Self::now(),
            }),
        )?;
        info!(shipment_id = %shipment_id, order_id = %order_id, "shipment in transit");
        Ok(ShipmentView::from(&shipment))
    }

    fn consume_and_mark_shipped(
        &self,
        order: &SalesOrder,
        shipment_id: ShipmentId,
    ) -> Result<(), DispatchError> {
        let order_id = order.id_typed();
        if order.status() != SalesOrderStatus::Reserved {
            return Err(DispatchError::InvalidStateTransition(format!(
                "order {order_id} must be RESERVED to ship, is {}",
                order.status().as_str()
            )));
        }
        if order.active_shipment_id() != Some(shipment_id.0) {
            return Err(DispatchError::Conflict(format!(
                "shipment {shipment_id} is not attached to order {order_id}"
            )));
        }

        let mut log = CompensationLog::new();
        for alloc in order.allocations() {
            let key = StockKey::new(alloc.product_id, alloc.warehouse_id);
            if let Err(err) = self.ledger.consume(key, alloc.allocated_qty) {
                log.rollback(&self.ledger)?;
                return Err(err);
            }
            log.record(LedgerStep::Consumed {
                key,
                quantity: alloc.allocated_qty,
            });
        }

        match self.execute_order(
            order_id,
            SalesOrderCommand::MarkShipped(MarkShipped {
                order_id,
                shipment_id: shipment_id.0,
                occurred_at: Self::now(),
            }),
        ) {
            Ok(_) => {
                log.commit();
                Ok(())
            }
            Err(err) => {
                error!(order_id = %order_id, error = %err, "marking order shipped failed, restoring stock");
                log.rollback(&self.ledger)?;
                Err(err)
            }
        }
    }

    #[instrument(skip(self), fields(shipment_id = %shipment_id), err)]
    pub fn deliver(&self, shipment_id: ShipmentId) -> Result<ShipmentView, DispatchError> {
        let order_id = Self::owning_order(&self.load_shipment(shipment_id)?)?;
        let _guard = self.order_locks.acquire(order_id.0)?;

        let shipment = self.load_shipment(shipment_id)?;
        shipment.status().transition(ShipmentAction::Deliver)?;
        let order = self.load_order(order_id)?;
        let order_delivered = order.status() == SalesOrderStatus::Delivered;
        if !order_delivered && order.status() != SalesOrderStatus::Shipped {
            return Err(DispatchError::InvalidStateTransition(format!(
                "order {order_id} must be SHIPPED to deliver, is {}",
                order.status().as_str()
            )));
        }

        let shipment = self.execute_shipment(
            shipment_id,
            ShipmentCommand::DeliverShipment(DeliverShipment {
                shipment_id,
                occurred_at: Self::now(),
            }),
        )?;
        if !order_delivered {
            self.execute_order(
                order_id,
                SalesOrderCommand::MarkDelivered(MarkDelivered {
                    order_id,
                    occurred_at: Self::now(),
                }),
            )?;
        }
        info!(shipment_id = %shipment_id, order_id = %order_id, "shipment delivered");
        Ok(ShipmentView::from(&shipment))
    }

    /// Cancel a pre-dispatch shipment: free its slot and detach it from the order.
    #[instrument(skip(self), fields(shipment_id = %shipment_id), err)]
    pub fn cancel_shipment(&self, shipment_id: ShipmentId) -> Result<ShipmentView, DispatchError> {
        let order_id = Self::owning_order(&self.load_shipment(shipment_id)?)?;
        let _guard = self.order_locks.acquire(order_id.0)?;

        let shipment = self.cancel_shipment_record(shipment_id)?;

        let order = self.load_order(order_id)?;
        if order.active_shipment_id() == Some(shipment_id.0) {
            self.execute_order(
                order_id,
                SalesOrderCommand::DetachShipment(DetachShipment {
                    order_id,
                    shipment_id: shipment_id.0,
                    occurred_at: Self::now(),
                }),
            )?;
        }
        Ok(ShipmentView::from(&shipment))
    }

    /// Release the slot and record CANCELED. The caller holds the order lock.
    pub(crate) fn cancel_shipment_record(
        &self,
        shipment_id: ShipmentId,
    ) -> Result<Shipment, DispatchError> {
        let shipment = self.load_shipment(shipment_id)?;
        shipment.status().transition(ShipmentAction::Cancel)?;

        let slot = Self::slot_key(&shipment);
        if let Some(key) = slot {
            self.release_slot(key, shipment_id)?;
        }

        match self.execute_shipment(
            shipment_id,
            ShipmentCommand::CancelShipment(CancelShipment {
                shipment_id,
                occurred_at: Self::now(),
            }),
        ) {
            Ok(shipment) => {
                info!(shipment_id = %shipment_id, "shipment canceled");
                Ok(shipment)
            }
            Err(err) => {
                if let (Some(key), Some(carrier)) =
                    (slot, shipment.carrier_id().and_then(|c| self.reference.carrier(c)))
                {
                    if let Err(rebook) = self.book_slot(key, shipment_id, carrier.daily_capacity) {
                        warn!(shipment_id = %shipment_id, error = %rebook, "could not rebook released slot");
                    }
                }
                Err(err)
            }
        }
    }

    /// Route a status change to the matching operation.
    pub fn update_shipment_status(
        &self,
        shipment_id: ShipmentId,
        status: ShipmentStatus,
        tracking_number: Option<String>,
    ) -> Result<ShipmentView, DispatchError> {
        match status {
            ShipmentStatus::InTransit => self.ship(shipment_id, tracking_number),
            ShipmentStatus::Delivered => self.deliver(shipment_id),
            ShipmentStatus::Canceled => self.cancel_shipment(shipment_id),
            other => Err(DomainError::invalid_transition(format!(
                "cannot move a shipment to {other:?} directly"
            ))
            .into()),
        }
    }

    /// Slot capacity on `date` for one carrier, or summed over active carriers.
    pub fn slot_capacity(
        &self,
        date: NaiveDate,
        carrier_id: Option<CarrierId>,
    ) -> Result<SlotCapacity, DispatchError> {
        let carriers = match carrier_id {
            Some(id) => vec![self
                .reference
                .carrier(id)
                .ok_or_else(|| DispatchError::NotFound(format!("carrier {id}")))?],
            None => self.reference.active_carriers(),
        };

        carriers.iter().try_fold(SlotCapacity::default(), |total, carrier| {
            let key = CarrierDayKey::new(carrier.id, date);
            let day_id = stockflow_shipping::CarrierDayId::for_key(key);
            let day = self.load(day_id.0, || CarrierDay::empty(key))?;
            Ok(total + day.capacity(carrier.daily_capacity))
        })
    }
}

fn generate_tracking_number() -> String {
    let id = Uuid::now_v7().simple().to_string().to_uppercase();
    format!("TRK-{}", &id[id.len() - 12..])
}
