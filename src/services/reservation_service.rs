//! Reservation Manager
//!
//! Places stock holds for patients. A hold is a real ledger debit taken when
//! the reservation is created; it is consumed on `collected` and credited
//! back exactly once on cancellation or expiry.

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::fulfillment_status::{StatusMachine, Transition};
use super::prescriptions::{verify_prescription, PrescriptionLookup};
use super::saga::Saga;
use super::stock_ledger::{DebitResult, StockLedger};
use super::{page_params, Page};
use crate::db::{self, DbPool};
use crate::entities::medicine::{self, Entity as MedicineEntity};
use crate::entities::reservation::{
    self, CancellationReason, Entity as ReservationEntity, ReservationStatus,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Input for a new reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReservation {
    pub patient_id: i32,
    pub branch_id: i32,
    pub medicine_id: i32,
    pub quantity: i32,
    pub prescription_id: Option<i32>,
    pub pickup_deadline: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Outcome of a cancellation or expiry attempt on one reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reservation", rename_all = "snake_case")]
pub enum Release {
    /// The hold was credited back by this call.
    Released(reservation::Model),
    /// The reservation was already cancelled; nothing was credited.
    AlreadyCancelled(reservation::Model),
}

impl Release {
    pub fn reservation(&self) -> &reservation::Model {
        match self {
            Release::Released(r) | Release::AlreadyCancelled(r) => r,
        }
    }

    pub fn into_reservation(self) -> reservation::Model {
        match self {
            Release::Released(r) | Release::AlreadyCancelled(r) => r,
        }
    }
}

/// Result of one expiry sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirySummary {
    /// Reservations cancelled and credited by this sweep.
    pub expired: u64,
    /// Candidates that another caller had already resolved.
    pub skipped: u64,
    /// Candidates whose release failed; they stay eligible for the next sweep.
    pub failed: u64,
    pub swept_at: DateTime<Utc>,
}

/// Service for placing and resolving reservations.
#[derive(Clone)]
pub struct ReservationService {
    db_pool: Arc<DbPool>,
    ledger: StockLedger,
    event_sender: Arc<EventSender>,
    prescriptions: Arc<dyn PrescriptionLookup>,
    hold_window: Duration,
    low_stock_threshold: i32,
}

impl ReservationService {
    pub fn new(
        db_pool: Arc<DbPool>,
        ledger: StockLedger,
        event_sender: Arc<EventSender>,
        prescriptions: Arc<dyn PrescriptionLookup>,
        hold_window: Duration,
        low_stock_threshold: i32,
    ) -> Self {
        Self {
            db_pool,
            ledger,
            event_sender,
            prescriptions,
            hold_window,
            low_stock_threshold,
        }
    }

    /// Debits the hold and records the reservation in one transaction.
    #[instrument(skip(self, request), fields(patient_id = request.patient_id, medicine_id = request.medicine_id))]
    pub async fn create_reservation(
        &self,
        request: NewReservation,
    ) -> Result<reservation::Model, ServiceError> {
        if request.quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "quantity_reserved must be at least 1".to_string(),
            ));
        }

        let db = self.db_pool.as_ref();
        let medicine = MedicineEntity::find_by_id(request.medicine_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or(ServiceError::MedicineNotFound(request.medicine_id))?;

        verify_prescription(
            self.prescriptions.as_ref(),
            request.patient_id,
            request.prescription_id,
            std::slice::from_ref(&medicine),
        )
        .await?;

        let now = Utc::now();
        let deadline = request.pickup_deadline.unwrap_or(now + self.hold_window);
        if deadline <= now {
            return Err(ServiceError::ValidationError(
                "pickup_deadline must be in the future".to_string(),
            ));
        }

        let txn = db::begin(db, "create_reservation").await?;
        let mut saga = Saga::new("create_reservation");
        let result = self
            .reserve(&txn, &mut saga, &medicine, &request, now, deadline)
            .await;
        if result.is_err() {
            saga.compensate(&self.ledger, &txn).await;
        }
        let (created, remaining) = db::finish(txn, "create_reservation", result).await?;

        counter!("pharmacy_reservations.created", 1);
        info!(
            reservation_id = created.id,
            branch_id = created.pharmacy_branch_id,
            item_id = created.item_id,
            quantity = created.quantity_reserved,
            remaining,
            "Reservation created"
        );

        self.event_sender
            .publish(Event::ReservationCreated {
                reservation_id: created.id,
                patient_id: created.patient_id,
                branch_id: created.pharmacy_branch_id,
                item_id: created.item_id,
                quantity: created.quantity_reserved,
            })
            .await;
        self.report_low_stock(created.pharmacy_branch_id, created.item_id, remaining)
            .await;

        Ok(created)
    }

    async fn reserve(
        &self,
        txn: &DatabaseTransaction,
        saga: &mut Saga,
        medicine: &medicine::Model,
        request: &NewReservation,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Result<(reservation::Model, i32), ServiceError> {
        let remaining = match self
            .ledger
            .try_debit(txn, request.branch_id, medicine.item_id, request.quantity)
            .await?
        {
            DebitResult::Applied { remaining } => remaining,
            DebitResult::StockInsufficient { available } => {
                counter!("pharmacy_reservations.rejected", 1, "reason" => "insufficient_stock");
                return Err(ServiceError::InsufficientStock {
                    item_id: medicine.item_id,
                    requested: request.quantity,
                    available,
                });
            }
        };
        saga.record_debit(request.branch_id, medicine.item_id, request.quantity);

        let created = reservation::ActiveModel {
            patient_id: Set(request.patient_id),
            pharmacy_branch_id: Set(request.branch_id),
            medicine_id: Set(medicine.id),
            item_id: Set(medicine.item_id),
            prescription_id: Set(request.prescription_id),
            quantity_reserved: Set(request.quantity),
            status: Set(ReservationStatus::Reserved),
            reserved_date: Set(now),
            pickup_deadline: Set(Some(deadline)),
            notes: Set(request.notes.clone()),
            cancelled_by: Set(None),
            cancellation_reason: Set(None),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;

        Ok((created, remaining))
    }

    /// Cancels a reservation on behalf of `actor_id` and returns its hold.
    ///
    /// Cancelling an already-cancelled reservation succeeds without crediting.
    #[instrument(skip(self))]
    pub async fn cancel_reservation(
        &self,
        reservation_id: i32,
        actor_id: i32,
    ) -> Result<Release, ServiceError> {
        self.release(
            reservation_id,
            Some(actor_id),
            CancellationReason::Cancelled,
            Utc::now(),
        )
        .await
    }

    async fn release(
        &self,
        reservation_id: i32,
        actor_id: Option<i32>,
        reason: CancellationReason,
        now: DateTime<Utc>,
    ) -> Result<Release, ServiceError> {
        let db = self.db_pool.as_ref();
        let txn = db::begin(db, "release_reservation").await?;
        let result = self
            .release_in(&txn, reservation_id, actor_id, reason, now)
            .await;
        let release = db::finish(txn, "release_reservation", result).await?;

        if let Release::Released(released) = &release {
            counter!("pharmacy_reservations.released", 1, "reason" => reason.to_string());
            info!(
                reservation_id,
                reason = %reason,
                quantity = released.quantity_reserved,
                "Reservation hold returned to stock"
            );
            self.event_sender
                .publish(Event::ReservationCancelled {
                    reservation_id,
                    reason,
                    quantity_released: released.quantity_reserved,
                })
                .await;
        }

        Ok(release)
    }

    async fn release_in(
        &self,
        txn: &DatabaseTransaction,
        reservation_id: i32,
        actor_id: Option<i32>,
        reason: CancellationReason,
        now: DateTime<Utc>,
    ) -> Result<Release, ServiceError> {
        let current = find_reservation(txn, reservation_id).await?;
        if current.status.transition(ReservationStatus::Cancelled)? == Transition::NoOp {
            return Ok(Release::AlreadyCancelled(current));
        }

        // Only the caller that moves the row out of a holding state credits it.
        let updated = ReservationEntity::update_many()
            .col_expr(
                reservation::Column::Status,
                Expr::value(ReservationStatus::Cancelled),
            )
            .col_expr(reservation::Column::CancellationReason, Expr::value(reason))
            .col_expr(reservation::Column::CancelledBy, Expr::value(actor_id))
            .col_expr(reservation::Column::UpdatedAt, Expr::value(now))
            .filter(reservation::Column::Id.eq(reservation_id))
            .filter(reservation::Column::Status.is_in(ReservationStatus::HOLDING))
            .exec(txn)
            .await
            .map_err(ServiceError::db_error)?;

        if updated.rows_affected == 0 {
            let latest = find_reservation(txn, reservation_id).await?;
            latest.status.transition(ReservationStatus::Cancelled)?;
            return Ok(Release::AlreadyCancelled(latest));
        }

        self.ledger
            .credit(
                txn,
                current.pharmacy_branch_id,
                current.item_id,
                current.quantity_reserved,
            )
            .await?;

        Ok(Release::Released(
            find_reservation(txn, reservation_id).await?,
        ))
    }

    /// Moves a reservation forward (`confirmed`, `ready`, `collected`).
    ///
    /// `cancelled` as the target behaves like [`Self::cancel_reservation`]
    /// without an actor.
    #[instrument(skip(self))]
    pub async fn update_reservation_status(
        &self,
        reservation_id: i32,
        new_status: ReservationStatus,
    ) -> Result<reservation::Model, ServiceError> {
        if new_status == ReservationStatus::Cancelled {
            return self
                .release(
                    reservation_id,
                    None,
                    CancellationReason::Cancelled,
                    Utc::now(),
                )
                .await
                .map(Release::into_reservation);
        }

        let db = self.db_pool.as_ref();
        let txn = db::begin(db, "update_reservation_status").await?;
        let result = advance_in(&txn, reservation_id, new_status).await;
        let (old_status, updated) = db::finish(txn, "update_reservation_status", result).await?;

        info!(
            reservation_id,
            old_status = %old_status,
            new_status = %new_status,
            "Reservation status updated"
        );
        self.event_sender
            .publish(Event::ReservationStatusChanged {
                reservation_id,
                old_status,
                new_status,
            })
            .await;

        Ok(updated)
    }

    /// Cancels every holding reservation whose pickup deadline is before `now`.
    ///
    /// Each reservation is released in its own transaction; a failure is
    /// logged and the sweep moves on.
    #[instrument(skip(self))]
    pub async fn expire_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ExpirySummary, ServiceError> {
        let start = std::time::Instant::now();
        let candidates = ReservationEntity::find()
            .filter(reservation::Column::Status.is_in(ReservationStatus::HOLDING))
            .filter(reservation::Column::PickupDeadline.lt(now))
            .order_by_asc(reservation::Column::PickupDeadline)
            .order_by_asc(reservation::Column::Id)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        let mut summary = ExpirySummary {
            expired: 0,
            skipped: 0,
            failed: 0,
            swept_at: now,
        };

        for candidate in candidates {
            match self
                .release(candidate.id, None, CancellationReason::Expired, now)
                .await
            {
                Ok(Release::Released(_)) => summary.expired += 1,
                Ok(Release::AlreadyCancelled(_)) => summary.skipped += 1,
                Err(ServiceError::InvalidTransition { from, .. }) => {
                    debug!(reservation_id = candidate.id, status = %from, "Reservation resolved before expiry");
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!(
                        reservation_id = candidate.id,
                        error = %e,
                        "Failed to expire reservation"
                    );
                    summary.failed += 1;
                }
            }
        }

        histogram!("pharmacy_reservations.expiry_sweep.duration", start.elapsed());
        counter!("pharmacy_reservations.expired", summary.expired);
        if summary.failed > 0 {
            counter!("pharmacy_reservations.expiry_failures", summary.failed);
        }
        info!(
            expired = summary.expired,
            skipped = summary.skipped,
            failed = summary.failed,
            "Reservation expiry sweep finished"
        );

        if summary.expired > 0 {
            self.event_sender
                .publish(Event::ReservationsExpired {
                    expired: summary.expired,
                    swept_at: now,
                })
                .await;
        }

        Ok(summary)
    }

    pub async fn get_reservation(
        &self,
        reservation_id: i32,
    ) -> Result<reservation::Model, ServiceError> {
        find_reservation(self.db_pool.as_ref(), reservation_id).await
    }

    /// Patient's reservations, newest first.
    pub async fn list_patient_reservations(
        &self,
        patient_id: i32,
        status: Option<ReservationStatus>,
        page: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Page<reservation::Model>, ServiceError> {
        let (page, limit) = page_params(page, limit)?;
        let mut query =
            ReservationEntity::find().filter(reservation::Column::PatientId.eq(patient_id));
        if let Some(status) = status {
            query = query.filter(reservation::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(reservation::Column::ReservedDate)
            .order_by_desc(reservation::Column::Id)
            .paginate(self.db_pool.as_ref(), limit);
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let items = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(Page::new(items, total, page, limit))
    }

    async fn report_low_stock(&self, branch_id: i32, item_id: i32, remaining: i32) {
        if remaining < self.low_stock_threshold {
            self.event_sender
                .publish(Event::StockLow {
                    branch_id,
                    item_id,
                    quantity: remaining,
                    threshold: self.low_stock_threshold,
                })
                .await;
        }
    }
}

async fn find_reservation<C: ConnectionTrait>(
    conn: &C,
    reservation_id: i32,
) -> Result<reservation::Model, ServiceError> {
    ReservationEntity::find_by_id(reservation_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Reservation {} not found", reservation_id)))
}

async fn advance_in(
    txn: &DatabaseTransaction,
    reservation_id: i32,
    new_status: ReservationStatus,
) -> Result<(ReservationStatus, reservation::Model), ServiceError> {
    let current = find_reservation(txn, reservation_id).await?;
    current.status.transition(new_status)?;

    let updated = ReservationEntity::update_many()
        .col_expr(reservation::Column::Status, Expr::value(new_status))
        .col_expr(reservation::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(reservation::Column::Id.eq(reservation_id))
        .filter(reservation::Column::Status.eq(current.status))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?;

    if updated.rows_affected == 0 {
        let latest = find_reservation(txn, reservation_id).await?;
        return Err(ServiceError::InvalidTransition {
            from: latest.status.to_string(),
            to: new_status.to_string(),
        });
    }

    Ok((current.status, find_reservation(txn, reservation_id).await?))
}
