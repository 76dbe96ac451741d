use crate::{
    commands::Command,
    entities::reservation,
    errors::ServiceError,
    handlers::AppServices,
    services::reservation_service::NewReservation,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateReservationCommand {
    #[serde(rename = "patientId", alias = "patient_id")]
    pub patient_id: i32,
    pub pharmacy_branch_id: i32,
    pub medicine_id: i32,
    #[validate(range(min = 1, message = "quantity_reserved must be at least 1"))]
    pub quantity_reserved: i32,
    pub prescription_id: Option<i32>,
    pub pickup_deadline: Option<DateTime<Utc>>,
    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
}

#[async_trait::async_trait]
impl Command for CreateReservationCommand {
    type Result = reservation::Model;

    #[instrument(skip(self, services), fields(patient_id = self.patient_id, medicine_id = self.medicine_id))]
    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError> {
        self.validate()?;

        services
            .reservations
            .create_reservation(NewReservation {
                patient_id: self.patient_id,
                branch_id: self.pharmacy_branch_id,
                medicine_id: self.medicine_id,
                quantity: self.quantity_reserved,
                prescription_id: self.prescription_id,
                pickup_deadline: self.pickup_deadline,
                notes: self.notes.clone(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_mixed_case_payload() {
        let cmd: CreateReservationCommand = serde_json::from_value(json!({
            "patientId": 4,
            "pharmacy_branch_id": 1,
            "medicine_id": 9,
            "quantity_reserved": 2
        }))
        .unwrap();
        assert_eq!(cmd.patient_id, 4);
        assert_eq!(cmd.prescription_id, None);
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn rejects_zero_quantity() {
        let cmd: CreateReservationCommand = serde_json::from_value(json!({
            "patient_id": 4,
            "pharmacy_branch_id": 1,
            "medicine_id": 9,
            "quantity_reserved": 0
        }))
        .unwrap();
        assert!(cmd.validate().is_err());
    }
}
