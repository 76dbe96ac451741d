//! Order Fulfillment
//!
//! Multi-line orders debit every line in request order inside one
//! transaction. The first line that cannot be debited aborts the attempt:
//! earlier lines are credited back and nothing about the order is persisted.

use chrono::Utc;
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};

use super::fulfillment_status::{StatusMachine, Transition};
use super::prescriptions::{verify_prescription, PrescriptionLookup};
use super::saga::Saga;
use super::stock_ledger::{DebitResult, StockLedger};
use super::{page_params, Page};
use crate::db::{self, DbPool};
use crate::entities::delivery::{self, DeliveryStatus, Entity as DeliveryEntity};
use crate::entities::medicine::{self, Entity as MedicineEntity};
use crate::entities::order::{
    self, DeliveryMethod, Entity as OrderEntity, OrderStatus, PAYMENT_STATUS_PENDING,
};
use crate::entities::order_item::{self, Entity as OrderItemEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub item_id: i32,
    pub quantity: i32,
    pub instructions: Option<String>,
}

/// Input for a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub patient_id: i32,
    pub branch_id: i32,
    pub items: Vec<OrderLine>,
    pub delivery_method: DeliveryMethod,
    pub address_id: Option<i32>,
    pub payment_method: String,
    pub notes: Option<String>,
    pub prescription_id: Option<i32>,
}

/// An order with the rows it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub delivery: Option<delivery::Model>,
}

/// Debited line with the price captured inside the transaction.
struct PricedLine<'a> {
    line: &'a OrderLine,
    unit_price: Decimal,
    remaining: i32,
}

/// Service for placing orders and driving them through fulfillment.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    ledger: StockLedger,
    event_sender: Arc<EventSender>,
    prescriptions: Arc<dyn PrescriptionLookup>,
    low_stock_threshold: i32,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        ledger: StockLedger,
        event_sender: Arc<EventSender>,
        prescriptions: Arc<dyn PrescriptionLookup>,
        low_stock_threshold: i32,
    ) -> Self {
        Self {
            db_pool,
            ledger,
            event_sender,
            prescriptions,
            low_stock_threshold,
        }
    }

    #[instrument(skip(self, request), fields(patient_id = request.patient_id, lines = request.items.len()))]
    pub async fn create_order(&self, request: NewOrder) -> Result<OrderDetails, ServiceError> {
        let start = std::time::Instant::now();
        validate_new_order(&request)?;

        let db = self.db_pool.as_ref();
        let item_ids: Vec<i32> = request.items.iter().map(|l| l.item_id).collect();
        let medicines: Vec<medicine::Model> = MedicineEntity::find()
            .filter(medicine::Column::ItemId.is_in(item_ids))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        verify_prescription(
            self.prescriptions.as_ref(),
            request.patient_id,
            request.prescription_id,
            &medicines,
        )
        .await?;

        let txn = db::begin(db, "create_order").await?;
        let mut saga = Saga::new("create_order");
        let result = self.place(&txn, &mut saga, &request).await;
        if result.is_err() {
            saga.compensate(&self.ledger, &txn).await;
        }
        let (details, remaining) = db::finish(txn, "create_order", result).await?;

        histogram!("pharmacy_orders.create.duration", start.elapsed());
        counter!("pharmacy_orders.created", 1);
        info!(
            order_id = details.order.id,
            total_amount = %details.order.total_amount,
            delivery_method = %details.order.delivery_method,
            "Order created"
        );

        self.event_sender
            .publish(Event::OrderCreated {
                order_id: details.order.id,
                patient_id: details.order.patient_id,
                branch_id: details.order.pharmacy_branch_id,
                total_amount: details.order.total_amount,
            })
            .await;
        for (item_id, quantity) in remaining {
            if quantity < self.low_stock_threshold {
                self.event_sender
                    .publish(Event::StockLow {
                        branch_id: details.order.pharmacy_branch_id,
                        item_id,
                        quantity,
                        threshold: self.low_stock_threshold,
                    })
                    .await;
            }
        }

        Ok(details)
    }

    async fn place(
        &self,
        txn: &DatabaseTransaction,
        saga: &mut Saga,
        request: &NewOrder,
    ) -> Result<(OrderDetails, Vec<(i32, i32)>), ServiceError> {
        let mut priced = Vec::with_capacity(request.items.len());
        for line in &request.items {
            match self
                .ledger
                .try_debit(txn, request.branch_id, line.item_id, line.quantity)
                .await?
            {
                DebitResult::Applied { remaining } => {
                    saga.record_debit(request.branch_id, line.item_id, line.quantity);
                    let entry = self
                        .ledger
                        .require_entry(txn, request.branch_id, line.item_id)
                        .await?;
                    priced.push(PricedLine {
                        line,
                        unit_price: entry.sold_price,
                        remaining,
                    });
                }
                DebitResult::StockInsufficient { available } => {
                    counter!("pharmacy_orders.rejected", 1, "reason" => "insufficient_stock");
                    return Err(ServiceError::InsufficientStock {
                        item_id: line.item_id,
                        requested: line.quantity,
                        available,
                    });
                }
            }
        }

        let total_amount: Decimal = priced
            .iter()
            .map(|p| p.unit_price * Decimal::from(p.line.quantity))
            .sum();
        let now = Utc::now();

        let created = order::ActiveModel {
            patient_id: Set(request.patient_id),
            pharmacy_branch_id: Set(request.branch_id),
            prescription_id: Set(request.prescription_id),
            order_date: Set(now),
            status: Set(OrderStatus::Pending),
            delivery_method: Set(request.delivery_method),
            payment_method: Set(request.payment_method.clone()),
            payment_status: Set(PAYMENT_STATUS_PENDING.to_string()),
            total_amount: Set(total_amount),
            notes: Set(request.notes.clone()),
            stock_released: Set(false),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;

        let mut items = Vec::with_capacity(priced.len());
        for (index, p) in priced.iter().enumerate() {
            let item = order_item::ActiveModel {
                order_id: Set(created.id),
                line_number: Set(index as i32 + 1),
                item_id: Set(p.line.item_id),
                quantity: Set(p.line.quantity),
                unit_price: Set(p.unit_price),
                instructions: Set(p.line.instructions.clone()),
                ..Default::default()
            }
            .insert(txn)
            .await
            .map_err(ServiceError::db_error)?;
            items.push(item);
        }

        let delivery = match (request.delivery_method, request.address_id) {
            (DeliveryMethod::Delivery, Some(address_id)) => Some(
                delivery::ActiveModel {
                    order_id: Set(created.id),
                    address_id: Set(address_id),
                    delivery_method: Set(DeliveryMethod::Delivery),
                    delivery_status: Set(DeliveryStatus::Pending),
                    notes: Set(None),
                    scheduled_date: Set(None),
                    delivered_date: Set(None),
                    tracking_number: Set(None),
                    created_at: Set(now),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(ServiceError::db_error)?,
            ),
            _ => None,
        };

        let remaining = priced
            .iter()
            .map(|p| (p.line.item_id, p.remaining))
            .collect();

        Ok((
            OrderDetails {
                order: created,
                items,
                delivery,
            },
            remaining,
        ))
    }

    /// Validates and applies a status change.
    ///
    /// Moving to `cancelled` credits every line back exactly once; cancelling
    /// an order that is already cancelled returns it unchanged.
    #[instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        order_id: i32,
        new_status: OrderStatus,
    ) -> Result<OrderDetails, ServiceError> {
        let db = self.db_pool.as_ref();
        let txn = db::begin(db, "update_order_status").await?;
        let result = self.apply_status(&txn, order_id, new_status).await;
        let (old_status, details) = db::finish(txn, "update_order_status", result).await?;

        let Some(old_status) = old_status else {
            return Ok(details);
        };

        counter!("pharmacy_orders.status_changed", 1, "status" => new_status.to_string());
        info!(
            order_id,
            old_status = %old_status,
            new_status = %new_status,
            "Order status updated"
        );
        self.event_sender
            .publish(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;

        Ok(details)
    }

    /// Returns the previous status when a change was applied, `None` for a no-op.
    async fn apply_status(
        &self,
        txn: &DatabaseTransaction,
        order_id: i32,
        new_status: OrderStatus,
    ) -> Result<(Option<OrderStatus>, OrderDetails), ServiceError> {
        let current = find_order(txn, order_id).await?;
        if current.status.transition(new_status)? == Transition::NoOp {
            return Ok((None, load_details(txn, current).await?));
        }

        let releases_stock = current.status.releases_stock_on(new_status);
        let mut update = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(current.status));
        if releases_stock {
            update = update
                .col_expr(order::Column::StockReleased, Expr::value(true))
                .filter(order::Column::StockReleased.eq(false));
        }
        let updated = update.exec(txn).await.map_err(ServiceError::db_error)?;

        if updated.rows_affected == 0 {
            // Another caller changed the order between the read and the update.
            let latest = find_order(txn, order_id).await?;
            return match latest.status.transition(new_status)? {
                Transition::NoOp => Ok((None, load_details(txn, latest).await?)),
                Transition::Applied => Err(ServiceError::InvalidTransition {
                    from: latest.status.to_string(),
                    to: new_status.to_string(),
                }),
            };
        }

        let items = order_items(txn, order_id).await?;
        if releases_stock {
            for item in &items {
                self.ledger
                    .credit(txn, current.pharmacy_branch_id, item.item_id, item.quantity)
                    .await?;
            }
            counter!("pharmacy_orders.stock_released", 1);
        }

        sync_delivery(txn, order_id, new_status).await?;

        let order = find_order(txn, order_id).await?;
        let delivery = order_delivery(txn, order_id).await?;
        Ok((
            Some(current.status),
            OrderDetails {
                order,
                items,
                delivery,
            },
        ))
    }

    pub async fn get_order(&self, order_id: i32) -> Result<OrderDetails, ServiceError> {
        let db = self.db_pool.as_ref();
        let order = find_order(db, order_id).await?;
        load_details(db, order).await
    }

    /// Patient's orders, newest first, with optional status filter.
    pub async fn list_patient_orders(
        &self,
        patient_id: i32,
        status: Option<OrderStatus>,
        page: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Page<OrderDetails>, ServiceError> {
        let db = self.db_pool.as_ref();
        let (page, limit) = page_params(page, limit)?;

        let mut query = OrderEntity::find().filter(order::Column::PatientId.eq(patient_id));
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        let paginator = query
            .order_by_desc(order::Column::OrderDate)
            .order_by_desc(order::Column::Id)
            .paginate(db, limit);
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let orders = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;

        let ids: Vec<i32> = orders.iter().map(|o| o.id).collect();
        let mut items_by_order: HashMap<i32, Vec<order_item::Model>> = HashMap::new();
        for item in OrderItemEntity::find()
            .filter(order_item::Column::OrderId.is_in(ids.clone()))
            .order_by_asc(order_item::Column::OrderId)
            .order_by_asc(order_item::Column::LineNumber)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
        {
            items_by_order.entry(item.order_id).or_default().push(item);
        }
        let mut deliveries: HashMap<i32, delivery::Model> = DeliveryEntity::find()
            .filter(delivery::Column::OrderId.is_in(ids))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|d| (d.order_id, d))
            .collect();

        let details = orders
            .into_iter()
            .map(|order| OrderDetails {
                items: items_by_order.remove(&order.id).unwrap_or_default(),
                delivery: deliveries.remove(&order.id),
                order,
            })
            .collect();

        Ok(Page::new(details, total, page, limit))
    }

    /// Number of the patient's orders that are not yet completed or cancelled.
    pub async fn count_active_orders(&self, patient_id: i32) -> Result<u64, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::PatientId.eq(patient_id))
            .filter(order::Column::Status.is_in(OrderStatus::ACTIVE))
            .count(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }
}

fn validate_new_order(request: &NewOrder) -> Result<(), ServiceError> {
    if request.items.is_empty() {
        return Err(ServiceError::ValidationError(
            "an order needs at least one item".to_string(),
        ));
    }
    if let Some(line) = request.items.iter().find(|l| l.quantity <= 0) {
        return Err(ServiceError::ValidationError(format!(
            "quantity for item {} must be at least 1",
            line.item_id
        )));
    }
    if request.payment_method.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "payment_method is required".to_string(),
        ));
    }
    if request.delivery_method == DeliveryMethod::Delivery && request.address_id.is_none() {
        return Err(ServiceError::MissingAddress);
    }
    Ok(())
}

async fn find_order<C: ConnectionTrait>(
    conn: &C,
    order_id: i32,
) -> Result<order::Model, ServiceError> {
    OrderEntity::find_by_id(order_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

async fn order_items<C: ConnectionTrait>(
    conn: &C,
    order_id: i32,
) -> Result<Vec<order_item::Model>, ServiceError> {
    OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::LineNumber)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

async fn order_delivery<C: ConnectionTrait>(
    conn: &C,
    order_id: i32,
) -> Result<Option<delivery::Model>, ServiceError> {
    DeliveryEntity::find()
        .filter(delivery::Column::OrderId.eq(order_id))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

async fn load_details<C: ConnectionTrait>(
    conn: &C,
    order: order::Model,
) -> Result<OrderDetails, ServiceError> {
    let items = order_items(conn, order.id).await?;
    let delivery = order_delivery(conn, order.id).await?;
    Ok(OrderDetails {
        order,
        items,
        delivery,
    })
}

/// Keeps the delivery row in step with its order.
async fn sync_delivery(
    txn: &DatabaseTransaction,
    order_id: i32,
    order_status: OrderStatus,
) -> Result<(), ServiceError> {
    let target = match order_status {
        OrderStatus::OutForDelivery => DeliveryStatus::InTransit,
        OrderStatus::Completed => DeliveryStatus::Delivered,
        OrderStatus::Cancelled => DeliveryStatus::Cancelled,
        _ => return Ok(()),
    };
    let Some(existing) = order_delivery(txn, order_id).await? else {
        return Ok(());
    };

    let mut active: delivery::ActiveModel = existing.into();
    active.delivery_status = Set(target);
    if target == DeliveryStatus::Delivered {
        active.delivered_date = Set(Some(Utc::now()));
    }
    active.update(txn).await.map_err(ServiceError::db_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn request(delivery_method: DeliveryMethod, address_id: Option<i32>) -> NewOrder {
        NewOrder {
            patient_id: 1,
            branch_id: 1,
            items: vec![OrderLine {
                item_id: 5,
                quantity: 2,
                instructions: None,
            }],
            delivery_method,
            address_id,
            payment_method: "card".to_string(),
            notes: None,
            prescription_id: None,
        }
    }

    #[test]
    fn delivery_without_address_is_rejected() {
        assert_matches!(
            validate_new_order(&request(DeliveryMethod::Delivery, None)),
            Err(ServiceError::MissingAddress)
        );
        assert!(validate_new_order(&request(DeliveryMethod::Delivery, Some(3))).is_ok());
        assert!(validate_new_order(&request(DeliveryMethod::Pickup, None)).is_ok());
    }

    #[test]
    fn empty_and_non_positive_lines_are_rejected() {
        let mut empty = request(DeliveryMethod::Pickup, None);
        empty.items.clear();
        assert_matches!(
            validate_new_order(&empty),
            Err(ServiceError::ValidationError(_))
        );

        let mut zero = request(DeliveryMethod::Pickup, None);
        zero.items[0].quantity = 0;
        assert_matches!(
            validate_new_order(&zero),
            Err(ServiceError::ValidationError(msg)) if msg.contains("item 5")
        );
    }
}
