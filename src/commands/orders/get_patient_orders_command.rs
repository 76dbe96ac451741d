use crate::{
    commands::Command,
    entities::order::OrderStatus,
    errors::ServiceError,
    handlers::AppServices,
    services::{order_service::OrderDetails, Page},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GetPatientOrdersCommand {
    #[serde(rename = "patientId", alias = "patient_id")]
    pub patient_id: i32,
    pub status: Option<OrderStatus>,
    #[validate(range(min = 1, max = 1000000))]
    pub page: Option<u64>,
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<u64>,
}

#[async_trait::async_trait]
impl Command for GetPatientOrdersCommand {
    type Result = Page<OrderDetails>;

    #[instrument(skip(self, services), fields(patient_id = self.patient_id))]
    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError> {
        self.validate()?;

        services
            .orders
            .list_patient_orders(self.patient_id, self.status, self.page, self.limit)
            .await
    }
}
