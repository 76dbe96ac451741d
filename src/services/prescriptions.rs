use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entities::medicine;
use crate::errors::ServiceError;

/// Prescription as reported by the prescription service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionRecord {
    pub prescription_id: i32,
    pub patient_id: i32,
    /// Medicines the prescription authorizes
    pub medicine_ids: Vec<i32>,
}

impl PrescriptionRecord {
    pub fn covers(&self, medicine_id: i32) -> bool {
        self.medicine_ids.contains(&medicine_id)
    }
}

/// Read access to prescriptions owned by another service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrescriptionLookup: Send + Sync {
    async fn get_prescription_by_id(
        &self,
        prescription_id: i32,
    ) -> Result<Option<PrescriptionRecord>, ServiceError>;
}

/// Process-local prescription store for tests and standalone runs.
#[derive(Debug, Default)]
pub struct InMemoryPrescriptions {
    records: DashMap<i32, PrescriptionRecord>,
}

impl InMemoryPrescriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: PrescriptionRecord) {
        self.records.insert(record.prescription_id, record);
    }
}

#[async_trait]
impl PrescriptionLookup for InMemoryPrescriptions {
    async fn get_prescription_by_id(
        &self,
        prescription_id: i32,
    ) -> Result<Option<PrescriptionRecord>, ServiceError> {
        Ok(self
            .records
            .get(&prescription_id)
            .map(|entry| entry.value().clone()))
    }
}

/// Checks that `patient_id` may receive every medicine in `medicines`.
///
/// Prescription-only medicines need a prescription that belongs to the patient
/// and lists the medicine. A supplied prescription is always resolved and
/// checked for ownership, even when every medicine is over the counter.
pub async fn verify_prescription(
    lookup: &dyn PrescriptionLookup,
    patient_id: i32,
    prescription_id: Option<i32>,
    medicines: &[medicine::Model],
) -> Result<(), ServiceError> {
    let Some(prescription_id) = prescription_id else {
        return match medicines.iter().find(|m| m.prescription_required) {
            Some(m) => Err(ServiceError::PrescriptionRequired(m.id)),
            None => Ok(()),
        };
    };

    let record = lookup
        .get_prescription_by_id(prescription_id)
        .await?
        .ok_or(ServiceError::PrescriptionNotFound(prescription_id))?;

    if record.patient_id != patient_id {
        return Err(ServiceError::PrescriptionMismatch(format!(
            "prescription {} does not belong to patient {}",
            prescription_id, patient_id
        )));
    }

    if let Some(m) = medicines
        .iter()
        .find(|m| m.prescription_required && !record.covers(m.id))
    {
        return Err(ServiceError::PrescriptionMismatch(format!(
            "prescription {} does not cover medicine {}",
            prescription_id, m.id
        )));
    }

    debug!(prescription_id, patient_id, "Prescription verified");
    Ok(())
}
