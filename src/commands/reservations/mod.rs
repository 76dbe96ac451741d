pub mod cancel_reservation_command;
pub mod create_reservation_command;
pub mod expire_reservations_command;
pub mod get_patient_reservations_command;
pub mod update_reservation_status_command;

pub use cancel_reservation_command::CancelReservationCommand;
pub use create_reservation_command::CreateReservationCommand;
pub use expire_reservations_command::ExpireReservationsCommand;
pub use get_patient_reservations_command::GetPatientReservationsCommand;
pub use update_reservation_status_command::UpdateReservationStatusCommand;
