pub mod create_order_command;
pub mod get_current_orders_count_command;
pub mod get_patient_orders_command;
pub mod update_order_status_command;

pub use create_order_command::{CreateOrderCommand, OrderLineInput};
pub use get_current_orders_count_command::{GetCurrentOrdersCountCommand, OrdersCount};
pub use get_patient_orders_command::GetPatientOrdersCommand;
pub use update_order_status_command::UpdateOrderStatusCommand;
