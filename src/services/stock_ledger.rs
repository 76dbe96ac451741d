//! Stock Ledger
//!
//! The only component allowed to change on-hand quantity. Every mutation is a
//! single conditional `UPDATE` keyed by (branch, item), so concurrent callers
//! are serialized by the database row rather than by in-process locks.
//! Callers pass the connection or transaction the change belongs to.

use chrono::Utc;
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::entities::stock_entry::{self, Entity as StockEntry};
use crate::errors::ServiceError;

/// Outcome of a conditional debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebitResult {
    /// The debit was applied; carries the quantity left on the row.
    Applied { remaining: i32 },
    /// The row holds less than requested; nothing changed.
    StockInsufficient { available: i32 },
}

impl DebitResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, DebitResult::Applied { .. })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StockLedger;

impl StockLedger {
    pub fn new() -> Self {
        Self
    }

    /// Atomically decrements `qty` if at least `qty` is on hand.
    ///
    /// Returns `ItemNotFound` when the branch does not stock the item.
    #[instrument(skip(self, conn))]
    pub async fn try_debit<C: ConnectionTrait>(
        &self,
        conn: &C,
        branch_id: i32,
        item_id: i32,
        qty: i32,
    ) -> Result<DebitResult, ServiceError> {
        ensure_positive(qty)?;

        let result = StockEntry::update_many()
            .col_expr(
                stock_entry::Column::Quantity,
                Expr::col(stock_entry::Column::Quantity).sub(qty),
            )
            .col_expr(stock_entry::Column::LastUpdated, Expr::value(Utc::now()))
            .filter(stock_entry::Column::PharmacyBranchId.eq(branch_id))
            .filter(stock_entry::Column::ItemId.eq(item_id))
            .filter(stock_entry::Column::Quantity.gte(qty))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        // The row is read back on the same handle, so it reflects this debit
        // (or, on rejection, the quantity that made it fail).
        let current = self.require_entry(conn, branch_id, item_id).await?.quantity;

        if result.rows_affected == 0 {
            counter!("pharmacy_ledger.debit.insufficient", 1);
            debug!(available = current, "Debit rejected");
            return Ok(DebitResult::StockInsufficient { available: current });
        }

        counter!("pharmacy_ledger.debit.applied", 1);
        Ok(DebitResult::Applied { remaining: current })
    }

    /// Atomically increments the row by `qty`; returns the new quantity.
    #[instrument(skip(self, conn))]
    pub async fn credit<C: ConnectionTrait>(
        &self,
        conn: &C,
        branch_id: i32,
        item_id: i32,
        qty: i32,
    ) -> Result<i32, ServiceError> {
        ensure_positive(qty)?;

        let result = StockEntry::update_many()
            .col_expr(
                stock_entry::Column::Quantity,
                Expr::col(stock_entry::Column::Quantity).add(qty),
            )
            .col_expr(stock_entry::Column::LastUpdated, Expr::value(Utc::now()))
            .filter(stock_entry::Column::PharmacyBranchId.eq(branch_id))
            .filter(stock_entry::Column::ItemId.eq(item_id))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ItemNotFound { branch_id, item_id });
        }

        counter!("pharmacy_ledger.credit.applied", 1);
        Ok(self.require_entry(conn, branch_id, item_id).await?.quantity)
    }

    /// Display read of the current quantity. Never used to decide a debit.
    pub async fn peek<C: ConnectionTrait>(
        &self,
        conn: &C,
        branch_id: i32,
        item_id: i32,
    ) -> Result<i32, ServiceError> {
        Ok(self.require_entry(conn, branch_id, item_id).await?.quantity)
    }

    pub async fn entry<C: ConnectionTrait>(
        &self,
        conn: &C,
        branch_id: i32,
        item_id: i32,
    ) -> Result<Option<stock_entry::Model>, ServiceError> {
        StockEntry::find()
            .filter(stock_entry::Column::PharmacyBranchId.eq(branch_id))
            .filter(stock_entry::Column::ItemId.eq(item_id))
            .one(conn)
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn require_entry<C: ConnectionTrait>(
        &self,
        conn: &C,
        branch_id: i32,
        item_id: i32,
    ) -> Result<stock_entry::Model, ServiceError> {
        self.entry(conn, branch_id, item_id)
            .await?
            .ok_or(ServiceError::ItemNotFound { branch_id, item_id })
    }

    /// Rows of a branch holding fewer than `threshold` units, lowest first.
    pub async fn low_stock<C: ConnectionTrait>(
        &self,
        conn: &C,
        branch_id: i32,
        threshold: i32,
    ) -> Result<Vec<stock_entry::Model>, ServiceError> {
        StockEntry::find()
            .filter(stock_entry::Column::PharmacyBranchId.eq(branch_id))
            .filter(stock_entry::Column::Quantity.lt(threshold))
            .order_by_asc(stock_entry::Column::Quantity)
            .order_by_asc(stock_entry::Column::ItemId)
            .all(conn)
            .await
            .map_err(ServiceError::db_error)
    }
}

fn ensure_positive(qty: i32) -> Result<(), ServiceError> {
    if qty <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "quantity must be positive, got {}",
            qty
        )));
    }
    Ok(())
}
