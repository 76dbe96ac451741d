use crate::{commands::Command, errors::ServiceError, handlers::AppServices};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GetCurrentOrdersCountCommand {
    #[serde(rename = "patientId", alias = "patient_id")]
    pub patient_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdersCount {
    pub patient_id: i32,
    pub count: u64,
}

#[async_trait::async_trait]
impl Command for GetCurrentOrdersCountCommand {
    type Result = OrdersCount;

    #[instrument(skip(self, services), fields(patient_id = self.patient_id))]
    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError> {
        let count = services.orders.count_active_orders(self.patient_id).await?;
        Ok(OrdersCount {
            patient_id: self.patient_id,
            count,
        })
    }
}
