//! Transition rules shared by reservations and orders.
//!
//! Reservation: `reserved -> confirmed -> ready -> collected`, and any holding
//! state `-> cancelled`.
//! Order: `pending -> confirmed -> processing -> ready_for_pickup | out_for_delivery
//! -> completed`, and any state before `completed` `-> cancelled`.
//! Cancelling something already cancelled is a no-op rather than an error.

use serde::{Deserialize, Serialize};

use crate::entities::order::OrderStatus;
use crate::entities::reservation::ReservationStatus;
use crate::errors::ServiceError;

/// Result of validating a requested status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// The change is allowed and must be persisted.
    Applied,
    /// The entity is already in the requested terminal state; nothing to do.
    NoOp,
}

pub trait StatusMachine: Copy + PartialEq + std::fmt::Display {
    fn can_transition(self, to: Self) -> bool;
    fn is_terminal(self) -> bool;
    fn cancelled() -> Self;

    /// Validates `self -> to`, treating a repeated cancel as a no-op.
    fn transition(self, to: Self) -> Result<Transition, ServiceError> {
        if self == to && to == Self::cancelled() {
            return Ok(Transition::NoOp);
        }
        if self.can_transition(to) {
            Ok(Transition::Applied)
        } else {
            Err(ServiceError::InvalidTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl StatusMachine for ReservationStatus {
    fn can_transition(self, to: Self) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, to),
            (Reserved, Confirmed)
                | (Confirmed, Ready)
                | (Ready, Collected)
                | (Reserved, Cancelled)
                | (Confirmed, Cancelled)
                | (Ready, Cancelled)
        )
    }

    fn is_terminal(self) -> bool {
        matches!(self, ReservationStatus::Collected | ReservationStatus::Cancelled)
    }

    fn cancelled() -> Self {
        ReservationStatus::Cancelled
    }
}

impl ReservationStatus {
    /// States in which the reserved quantity is debited from the ledger and
    /// still owed back on cancellation.
    pub const HOLDING: [ReservationStatus; 3] = [
        ReservationStatus::Reserved,
        ReservationStatus::Confirmed,
        ReservationStatus::Ready,
    ];

    pub fn holds_stock(self) -> bool {
        Self::HOLDING.contains(&self)
    }
}

impl StatusMachine for OrderStatus {
    fn can_transition(self, to: Self) -> bool {
        use OrderStatus::*;
        match (self, to) {
            (Pending, Confirmed)
            | (Confirmed, Processing)
            | (Processing, ReadyForPickup)
            | (Processing, OutForDelivery)
            | (ReadyForPickup, Completed)
            | (OutForDelivery, Completed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    fn cancelled() -> Self {
        OrderStatus::Cancelled
    }
}

impl OrderStatus {
    /// Orders still moving toward the patient.
    pub const ACTIVE: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::ReadyForPickup,
        OrderStatus::OutForDelivery,
    ];

    /// Only cancellation hands an order's stock back to the ledger.
    pub fn releases_stock_on(self, to: OrderStatus) -> bool {
        to == OrderStatus::Cancelled && !self.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rstest::rstest;
    use sea_orm::Iterable;

    #[rstest]
    #[case(ReservationStatus::Reserved, ReservationStatus::Confirmed)]
    #[case(ReservationStatus::Confirmed, ReservationStatus::Ready)]
    #[case(ReservationStatus::Ready, ReservationStatus::Collected)]
    #[case(ReservationStatus::Reserved, ReservationStatus::Cancelled)]
    #[case(ReservationStatus::Ready, ReservationStatus::Cancelled)]
    fn allowed_reservation_transitions(
        #[case] from: ReservationStatus,
        #[case] to: ReservationStatus,
    ) {
        assert_eq!(from.transition(to).unwrap(), Transition::Applied);
    }

    #[rstest]
    #[case(ReservationStatus::Collected, ReservationStatus::Cancelled)]
    #[case(ReservationStatus::Cancelled, ReservationStatus::Reserved)]
    #[case(ReservationStatus::Reserved, ReservationStatus::Collected)]
    #[case(ReservationStatus::Ready, ReservationStatus::Confirmed)]
    fn rejected_reservation_transitions(
        #[case] from: ReservationStatus,
        #[case] to: ReservationStatus,
    ) {
        assert_matches!(
            from.transition(to),
            Err(ServiceError::InvalidTransition { .. })
        );
    }

    #[rstest]
    #[case(OrderStatus::Pending, OrderStatus::Confirmed)]
    #[case(OrderStatus::Confirmed, OrderStatus::Processing)]
    #[case(OrderStatus::Processing, OrderStatus::ReadyForPickup)]
    #[case(OrderStatus::Processing, OrderStatus::OutForDelivery)]
    #[case(OrderStatus::OutForDelivery, OrderStatus::Completed)]
    #[case(OrderStatus::OutForDelivery, OrderStatus::Cancelled)]
    fn allowed_order_transitions(#[case] from: OrderStatus, #[case] to: OrderStatus) {
        assert_eq!(from.transition(to).unwrap(), Transition::Applied);
    }

    #[rstest]
    #[case(OrderStatus::Completed, OrderStatus::Cancelled)]
    #[case(OrderStatus::Pending, OrderStatus::Processing)]
    #[case(OrderStatus::ReadyForPickup, OrderStatus::OutForDelivery)]
    #[case(OrderStatus::Cancelled, OrderStatus::Pending)]
    fn rejected_order_transitions(#[case] from: OrderStatus, #[case] to: OrderStatus) {
        let err = from.transition(to).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Invalid transition from {} to {}", from, to)
        );
    }

    #[test]
    fn repeated_cancel_is_noop() {
        assert_eq!(
            OrderStatus::Cancelled
                .transition(OrderStatus::Cancelled)
                .unwrap(),
            Transition::NoOp
        );
        assert_eq!(
            ReservationStatus::Cancelled
                .transition(ReservationStatus::Cancelled)
                .unwrap(),
            Transition::NoOp
        );
    }

    #[test]
    fn statuses_render_as_snake_case() {
        assert_eq!(OrderStatus::ReadyForPickup.to_string(), "ready_for_pickup");
        assert_eq!(ReservationStatus::Collected.to_string(), "collected");
    }

    fn order_status() -> impl Strategy<Value = OrderStatus> {
        prop::sample::select(OrderStatus::iter().collect::<Vec<_>>())
    }

    fn reservation_status() -> impl Strategy<Value = ReservationStatus> {
        prop::sample::select(ReservationStatus::iter().collect::<Vec<_>>())
    }

    proptest! {
        #[test]
        fn terminal_orders_never_move(from in order_status(), to in order_status()) {
            if from.is_terminal() {
                let moved = matches!(from.transition(to), Ok(Transition::Applied));
                prop_assert!(!moved);
            }
        }

        #[test]
        fn terminal_reservations_never_move(
            from in reservation_status(),
            to in reservation_status(),
        ) {
            if from.is_terminal() {
                let moved = matches!(from.transition(to), Ok(Transition::Applied));
                prop_assert!(!moved);
            }
        }

        #[test]
        fn only_holding_reservations_can_cancel(from in reservation_status()) {
            let applied = matches!(
                from.transition(ReservationStatus::Cancelled),
                Ok(Transition::Applied)
            );
            prop_assert_eq!(applied, from.holds_stock());
        }

        #[test]
        fn stock_release_matches_cancellable_orders(from in order_status()) {
            let applied = matches!(
                from.transition(OrderStatus::Cancelled),
                Ok(Transition::Applied)
            );
            prop_assert_eq!(applied, from.releases_stock_on(OrderStatus::Cancelled));
        }
    }
}
