use crate::{
    commands::Command,
    errors::ServiceError,
    handlers::AppServices,
    services::reservation_service::ExpirySummary,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use validator::Validate;

/// Runs one expiry sweep; `now` defaults to the current time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ExpireReservationsCommand {
    pub now: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
impl Command for ExpireReservationsCommand {
    type Result = ExpirySummary;

    #[instrument(skip(self, services))]
    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError> {
        services
            .reservations
            .expire_reservations(self.now.unwrap_or_else(Utc::now))
            .await
    }
}
