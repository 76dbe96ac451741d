use metrics::counter;
use sea_orm::ConnectionTrait;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::stock_ledger::StockLedger;

/// A compensating action recorded after a successful step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compensation {
    Credit {
        branch_id: i32,
        item_id: i32,
        quantity: i32,
    },
}

/// Outcome of running compensations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompensationReport {
    pub applied: usize,
    pub failed: usize,
}

/// Ordered record of ledger debits made during one creation attempt.
///
/// When the attempt fails, [`Saga::compensate`] credits every recorded debit
/// back in reverse order before the surrounding transaction is rolled back.
#[derive(Debug)]
pub struct Saga {
    id: Uuid,
    name: &'static str,
    steps: Vec<Compensation>,
}

impl Saga {
    pub fn new(name: &'static str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            steps: Vec::new(),
        }
    }

    pub fn record_debit(&mut self, branch_id: i32, item_id: i32, quantity: i32) {
        self.steps.push(Compensation::Credit {
            branch_id,
            item_id,
            quantity,
        });
    }

    pub fn steps(&self) -> &[Compensation] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs compensations newest first. A failing step is logged and the
    /// remaining steps still run.
    pub async fn compensate<C: ConnectionTrait>(
        self,
        ledger: &StockLedger,
        conn: &C,
    ) -> CompensationReport {
        let mut report = CompensationReport::default();
        if self.steps.is_empty() {
            return report;
        }

        warn!(
            saga_id = %self.id,
            saga = self.name,
            steps = self.steps.len(),
            "Compensating failed saga"
        );

        for step in self.steps.iter().rev() {
            match *step {
                Compensation::Credit {
                    branch_id,
                    item_id,
                    quantity,
                } => match ledger.credit(conn, branch_id, item_id, quantity).await {
                    Ok(_) => report.applied += 1,
                    Err(e) => {
                        report.failed += 1;
                        error!(
                            saga_id = %self.id,
                            branch_id,
                            item_id,
                            quantity,
                            error = %e,
                            "Compensating credit failed"
                        );
                    }
                },
            }
        }

        counter!("pharmacy_saga.compensated", 1, "saga" => self.name);
        info!(
            saga_id = %self.id,
            applied = report.applied,
            failed = report.failed,
            "Saga compensation finished"
        );
        report
    }
}
