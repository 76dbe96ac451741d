/*!
 * Transaction Helper Utilities
 *
 * Every stock mutation runs between `begin` and `finish`: the result of the
 * unit of work decides whether the transaction commits or rolls back.
 */

use metrics::counter;
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use tracing::{debug, warn};

use crate::errors::ServiceError;

/// Opens a transaction for the named operation.
pub async fn begin(
    db: &DatabaseConnection,
    operation: &'static str,
) -> Result<DatabaseTransaction, ServiceError> {
    debug!(operation, "Starting database transaction");
    counter!("pharmacy_db.transaction.started", 1, "operation" => operation);
    db.begin().await.map_err(ServiceError::db_error)
}

/// Commits on `Ok`, rolls back on `Err`, and hands the result back.
///
/// A failed commit is reported as [`ServiceError::CommitFailed`] and is never
/// retried: the driver cannot say whether the work landed. A failed rollback
/// is logged only; the original error is still returned and the transaction
/// is discarded by the driver.
pub async fn finish<T>(
    txn: DatabaseTransaction,
    operation: &'static str,
    result: Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    match result {
        Ok(value) => {
            txn.commit().await.map_err(|e| {
                warn!(operation, error = %e, "Transaction commit failed");
                counter!("pharmacy_db.transaction.commit_failed", 1, "operation" => operation);
                ServiceError::CommitFailed(e)
            })?;
            counter!("pharmacy_db.transaction.committed", 1, "operation" => operation);
            debug!(operation, "Transaction committed");
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!(operation, error = %rollback_err, "Transaction rollback failed");
            }
            counter!("pharmacy_db.transaction.rolled_back", 1, "operation" => operation);
            debug!(operation, error = %err, "Transaction rolled back");
            Err(err)
        }
    }
}
