use crate::{
    commands::Command,
    entities::reservation::{self, ReservationStatus},
    errors::ServiceError,
    handlers::AppServices,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateReservationStatusCommand {
    #[serde(rename = "reservationId", alias = "reservation_id")]
    pub reservation_id: i32,
    pub status: ReservationStatus,
}

#[async_trait::async_trait]
impl Command for UpdateReservationStatusCommand {
    type Result = reservation::Model;

    #[instrument(skip(self, services), fields(reservation_id = self.reservation_id, status = %self.status))]
    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError> {
        services
            .reservations
            .update_reservation_status(self.reservation_id, self.status)
            .await
    }
}
