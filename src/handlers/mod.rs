//! Message handlers
//!
//! Accepts `{"cmd": "<name>", ...payload}` JSON messages, runs the matching
//! command with transient-failure retries and answers with either the
//! resulting entity or an [`ErrorResponse`](crate::errors::ErrorResponse).

use crate::commands::orders::{
    CreateOrderCommand, GetCurrentOrdersCountCommand, GetPatientOrdersCommand,
    UpdateOrderStatusCommand,
};
use crate::commands::reservations::{
    CancelReservationCommand, CreateReservationCommand, ExpireReservationsCommand,
    GetPatientReservationsCommand, UpdateReservationStatusCommand,
};
use crate::commands::Command;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::retry::{with_retry, TransientDbPolicy};
use crate::services::{
    order_service::OrderService, prescriptions::PrescriptionLookup,
    reservation_service::ReservationService, stock_ledger::StockLedger,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

// Re-export AppState so callers can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates the business logic used by commands
#[derive(Clone)]
pub struct AppServices {
    pub ledger: StockLedger,
    pub reservations: Arc<ReservationService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        prescriptions: Arc<dyn PrescriptionLookup>,
        config: &AppConfig,
    ) -> Self {
        let ledger = StockLedger::new();
        let reservations = Arc::new(ReservationService::new(
            db_pool.clone(),
            ledger,
            event_sender.clone(),
            prescriptions.clone(),
            config.reservation_hold(),
            config.low_stock_threshold,
        ));
        let orders = Arc::new(OrderService::new(
            db_pool,
            ledger,
            event_sender,
            prescriptions,
            config.low_stock_threshold,
        ));

        Self {
            ledger,
            reservations,
            orders,
        }
    }
}

/// Incoming command message, tagged by `cmd`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum CommandMessage {
    CreateReservation(CreateReservationCommand),
    CancelReservation(CancelReservationCommand),
    UpdateReservationStatus(UpdateReservationStatusCommand),
    GetPatientReservations(GetPatientReservationsCommand),
    ExpireReservations(ExpireReservationsCommand),
    CreateOrder(CreateOrderCommand),
    UpdateOrderStatus(UpdateOrderStatusCommand),
    GetPatientOrders(GetPatientOrdersCommand),
    GetCurrentOrdersCount(GetCurrentOrdersCountCommand),
}

impl CommandMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateReservation(_) => "create_reservation",
            Self::CancelReservation(_) => "cancel_reservation",
            Self::UpdateReservationStatus(_) => "update_reservation_status",
            Self::GetPatientReservations(_) => "get_patient_reservations",
            Self::ExpireReservations(_) => "expire_reservations",
            Self::CreateOrder(_) => "create_order",
            Self::UpdateOrderStatus(_) => "update_order_status",
            Self::GetPatientOrders(_) => "get_patient_orders",
            Self::GetCurrentOrdersCount(_) => "get_current_orders_count",
        }
    }
}

/// Runs `message`, retrying transient database failures per the configured policy.
#[instrument(skip(state, message), fields(cmd = message.name()))]
pub async fn dispatch(state: &AppState, message: CommandMessage) -> Result<Value, ServiceError> {
    let services = &state.services;
    let message = &message;

    with_retry(&state.retry, TransientDbPolicy, move || async move {
        match message {
            CommandMessage::CreateReservation(cmd) => respond(cmd.execute(services).await?),
            CommandMessage::CancelReservation(cmd) => respond(cmd.execute(services).await?),
            CommandMessage::UpdateReservationStatus(cmd) => {
                respond(cmd.execute(services).await?)
            }
            CommandMessage::GetPatientReservations(cmd) => respond(cmd.execute(services).await?),
            CommandMessage::ExpireReservations(cmd) => respond(cmd.execute(services).await?),
            CommandMessage::CreateOrder(cmd) => respond(cmd.execute(services).await?),
            CommandMessage::UpdateOrderStatus(cmd) => respond(cmd.execute(services).await?),
            CommandMessage::GetPatientOrders(cmd) => respond(cmd.execute(services).await?),
            CommandMessage::GetCurrentOrdersCount(cmd) => respond(cmd.execute(services).await?),
        }
    })
    .await
}

/// Parses and dispatches a raw message. Failures become a serialized
/// [`ErrorResponse`](crate::errors::ErrorResponse).
pub async fn handle_message(state: &AppState, raw: &str) -> Value {
    let message: CommandMessage = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(e) => {
            warn!("Rejected malformed command message: {}", e);
            counter!("pharmacy_commands.handled", 1, "cmd" => "unknown", "outcome" => "malformed");
            return error_value(&ServiceError::from(e));
        }
    };

    let cmd = message.name();
    match dispatch(state, message).await {
        Ok(value) => {
            counter!("pharmacy_commands.handled", 1, "cmd" => cmd, "outcome" => "ok");
            value
        }
        Err(e) => {
            match &e {
                ServiceError::DatabaseError(_)
                | ServiceError::CommitFailed(_)
                | ServiceError::InternalError(_)
                | ServiceError::ExternalServiceError(_) => {
                    error!(cmd, code = e.code(), "Command failed: {}", e)
                }
                _ => info!(cmd, code = e.code(), "Command rejected: {}", e),
            }
            counter!("pharmacy_commands.handled", 1, "cmd" => cmd, "outcome" => e.code());
            error_value(&e)
        }
    }
}

fn respond<T: Serialize>(value: T) -> Result<Value, ServiceError> {
    serde_json::to_value(value)
        .map_err(|e| ServiceError::InternalError(format!("Failed to serialize response: {}", e)))
}

fn error_value(error: &ServiceError) -> Value {
    serde_json::to_value(error.to_response()).unwrap_or_else(|_| {
        serde_json::json!({ "error": error.code(), "message": error.response_message() })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn messages_are_tagged_by_cmd() {
        let message: CommandMessage = serde_json::from_value(json!({
            "cmd": "cancel_reservation",
            "reservationId": 3,
            "patientId": 8
        }))
        .unwrap();
        assert_eq!(message.name(), "cancel_reservation");
        assert_matches!(
            message,
            CommandMessage::CancelReservation(CancelReservationCommand {
                reservation_id: 3,
                patient_id: 8
            })
        );
    }

    #[test]
    fn expire_takes_an_empty_payload() {
        let message: CommandMessage =
            serde_json::from_value(json!({ "cmd": "expire_reservations" })).unwrap();
        assert_matches!(message, CommandMessage::ExpireReservations(cmd) if cmd.now.is_none());
    }

    #[test]
    fn unknown_commands_fail_to_parse() {
        assert!(serde_json::from_value::<CommandMessage>(json!({ "cmd": "drop_tables" })).is_err());
    }
}
