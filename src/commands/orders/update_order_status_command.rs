use crate::{
    commands::Command,
    entities::order::OrderStatus,
    errors::ServiceError,
    handlers::AppServices,
    services::order_service::OrderDetails,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateOrderStatusCommand {
    #[serde(rename = "orderId", alias = "order_id")]
    pub order_id: i32,
    pub status: OrderStatus,
}

#[async_trait::async_trait]
impl Command for UpdateOrderStatusCommand {
    type Result = OrderDetails;

    #[instrument(skip(self, services), fields(order_id = self.order_id, status = %self.status))]
    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError> {
        services
            .orders
            .update_order_status(self.order_id, self.status)
            .await
    }
}
