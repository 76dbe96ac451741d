use crate::{
    commands::Command,
    errors::ServiceError,
    handlers::AppServices,
    services::reservation_service::Release,
};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use validator::Validate;

/// Patient-initiated cancellation of their own reservation.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CancelReservationCommand {
    #[serde(rename = "reservationId", alias = "reservation_id")]
    pub reservation_id: i32,
    #[serde(rename = "patientId", alias = "patient_id")]
    pub patient_id: i32,
}

#[async_trait::async_trait]
impl Command for CancelReservationCommand {
    type Result = Release;

    #[instrument(skip(self, services), fields(reservation_id = self.reservation_id))]
    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError> {
        let reservation = services
            .reservations
            .get_reservation(self.reservation_id)
            .await?;
        // Another patient's reservation is reported as missing.
        if reservation.patient_id != self.patient_id {
            warn!(
                patient_id = self.patient_id,
                "Cancellation refused for reservation owned by another patient"
            );
            return Err(ServiceError::NotFound(format!(
                "Reservation {} not found",
                self.reservation_id
            )));
        }

        services
            .reservations
            .cancel_reservation(self.reservation_id, self.patient_id)
            .await
    }
}
