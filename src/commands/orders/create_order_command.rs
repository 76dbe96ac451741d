use crate::{
    commands::Command,
    entities::order::DeliveryMethod,
    errors::ServiceError,
    handlers::AppServices,
    services::order_service::{NewOrder, OrderDetails, OrderLine},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderLineInput {
    pub item_id: i32,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    #[validate(length(max = 500))]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderCommand {
    #[serde(rename = "patientId", alias = "patient_id")]
    pub patient_id: i32,
    pub pharmacy_branch_id: i32,
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<OrderLineInput>,
    pub delivery_method: DeliveryMethod,
    pub address_id: Option<i32>,
    #[validate(length(min = 1, max = 50))]
    pub payment_method: String,
    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
    pub prescription_id: Option<i32>,
}

#[async_trait::async_trait]
impl Command for CreateOrderCommand {
    type Result = OrderDetails;

    #[instrument(skip(self, services), fields(patient_id = self.patient_id, lines = self.items.len()))]
    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError> {
        self.validate()?;
        for line in &self.items {
            line.validate()?;
        }

        services.orders.create_order(self.to_new_order()).await
    }
}

impl CreateOrderCommand {
    fn to_new_order(&self) -> NewOrder {
        NewOrder {
            patient_id: self.patient_id,
            branch_id: self.pharmacy_branch_id,
            items: self
                .items
                .iter()
                .map(|line| OrderLine {
                    item_id: line.item_id,
                    quantity: line.quantity,
                    instructions: line.instructions.clone(),
                })
                .collect(),
            delivery_method: self.delivery_method,
            address_id: self.address_id,
            payment_method: self.payment_method.clone(),
            notes: self.notes.clone(),
            prescription_id: self.prescription_id,
        }
    }
}
