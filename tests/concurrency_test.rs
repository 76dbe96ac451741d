mod common;

use assert_matches::assert_matches;
use common::TestApp;
use futures::future::join_all;
use pharmacy_fulfillment::{
    entities::order::{DeliveryMethod, OrderStatus},
    errors::ServiceError,
    handlers::handle_message,
    services::{
        order_service::{NewOrder, OrderLine},
        reservation_service::{NewReservation, Release},
    },
};
use rust_decimal_macros::dec;
use serde_json::json;

const BRANCH: i32 = 1;
const ITEM: i32 = 5;
const MEDICINE: i32 = 50;

fn reserve(patient_id: i32, quantity: i32) -> NewReservation {
    NewReservation {
        patient_id,
        branch_id: BRANCH,
        medicine_id: MEDICINE,
        quantity,
        prescription_id: None,
        pickup_deadline: None,
        notes: None,
    }
}

fn order(patient_id: i32, quantity: i32) -> NewOrder {
    NewOrder {
        patient_id,
        branch_id: BRANCH,
        items: vec![OrderLine {
            item_id: ITEM,
            quantity,
            instructions: None,
        }],
        delivery_method: DeliveryMethod::Pickup,
        address_id: None,
        payment_method: "cash".to_string(),
        notes: None,
        prescription_id: None,
    }
}

async fn app_with_stock(quantity: i32) -> TestApp {
    let app = TestApp::new().await;
    app.seed_medicine(MEDICINE, ITEM, false).await;
    app.seed_stock(BRANCH, ITEM, quantity, dec!(2.00)).await;
    app
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_reservations_race_for_the_last_units() {
    let app = app_with_stock(3).await;
    let service = app.reservations();

    let (a, b) = tokio::join!(
        service.create_reservation(reserve(1, 2)),
        service.create_reservation(reserve(2, 2)),
    );

    let outcomes = [a, b];
    let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    let failure = outcomes
        .into_iter()
        .find_map(|r| r.err())
        .expect("one reservation must fail");
    assert_matches!(
        failure,
        ServiceError::InsufficientStock { requested: 2, available: 1, .. }
    );
    assert_eq!(app.stock(BRANCH, ITEM).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_concurrent_reservations_never_oversell() {
    let app = app_with_stock(10).await;

    let tasks = (0..20).map(|patient| {
        let service = app.reservations();
        tokio::spawn(async move {
            service.create_reservation(reserve(patient, 1)).await.is_ok()
        })
    });

    let successes = join_all(tasks)
        .await
        .into_iter()
        .filter(|joined| *joined.as_ref().unwrap())
        .count();

    assert_eq!(successes, 10);
    assert_eq!(app.stock(BRANCH, ITEM).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_cancellations_credit_once() {
    let app = app_with_stock(10).await;
    let service = app.reservations();
    let reservation = service.create_reservation(reserve(1, 4)).await.unwrap();
    assert_eq!(app.stock(BRANCH, ITEM).await, 6);

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let service = app.reservations();
        let id = reservation.id;
        tasks.push(tokio::spawn(async move {
            service.cancel_reservation(id, 1).await
        }));
    }

    let mut released = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            Release::Released(_) => released += 1,
            Release::AlreadyCancelled(_) => {}
        }
    }

    assert_eq!(released, 1);
    assert_eq!(app.stock(BRANCH, ITEM).await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweep_and_cancel_race_credits_once() {
    let app = app_with_stock(10).await;
    let service = app.reservations();
    let mut request = reserve(1, 3);
    request.pickup_deadline = Some(chrono::Utc::now() + chrono::Duration::minutes(10));
    let reservation = service.create_reservation(request).await.unwrap();

    let sweep_at = chrono::Utc::now() + chrono::Duration::hours(1);
    let (sweep, cancel) = tokio::join!(
        service.expire_reservations(sweep_at),
        service.cancel_reservation(reservation.id, 1),
    );

    let swept = sweep.unwrap().expired;
    let cancelled = matches!(cancel.unwrap(), Release::Released(_)) as u64;
    assert_eq!(swept + cancelled, 1);
    assert_eq!(app.stock(BRANCH, ITEM).await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_orders_and_reservations_balance_the_ledger() {
    let app = app_with_stock(25).await;

    let mut tasks = Vec::new();
    for patient in 0..12 {
        let reservations = app.reservations();
        let orders = app.orders();
        tasks.push(tokio::spawn(async move {
            if patient % 2 == 0 {
                reservations
                    .create_reservation(reserve(patient, 2))
                    .await
                    .map(|_| 2)
                    .unwrap_or(0)
            } else {
                orders
                    .create_order(order(patient, 3))
                    .await
                    .map(|_| 3)
                    .unwrap_or(0)
            }
        }));
    }

    let mut debited = 0;
    for task in tasks {
        debited += task.await.unwrap();
    }

    let remaining = app.stock(BRANCH, ITEM).await;
    assert!(remaining >= 0);
    assert_eq!(remaining, 25 - debited);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_order_cancels_restore_stock_once() {
    let app = app_with_stock(10).await;
    let orders = app.orders();
    let created = orders.create_order(order(1, 6)).await.unwrap();
    assert_eq!(app.stock(BRANCH, ITEM).await, 4);

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let orders = app.orders();
        let id = created.order.id;
        tasks.push(tokio::spawn(async move {
            orders.update_order_status(id, OrderStatus::Cancelled).await
        }));
    }
    for task in tasks {
        let details = task.await.unwrap().unwrap();
        assert_eq!(details.order.status, OrderStatus::Cancelled);
    }

    assert_eq!(app.stock(BRANCH, ITEM).await, 10);
}

async fn pooled_app_with_stock(quantity: i32) -> TestApp {
    let app = TestApp::on_file(8).await;
    app.seed_medicine(MEDICINE, ITEM, false).await;
    app.seed_stock(BRANCH, ITEM, quantity, dec!(2.00)).await;
    app
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pooled_reservation_messages_never_oversell() {
    let app = pooled_app_with_stock(10).await;

    let tasks = (0..30).map(|patient| {
        let state = app.state.clone();
        tokio::spawn(async move {
            let raw = json!({
                "cmd": "create_reservation",
                "patientId": patient,
                "pharmacy_branch_id": BRANCH,
                "medicine_id": MEDICINE,
                "quantity_reserved": 1
            })
            .to_string();
            handle_message(&state, &raw).await
        })
    });

    let responses: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();
    let reserved = responses
        .iter()
        .filter(|r| r["status"] == "reserved")
        .count();
    let rejected = responses
        .iter()
        .filter(|r| r["error"] == "insufficient_stock")
        .count();

    assert_eq!(reserved, 10);
    assert_eq!(rejected, 20);
    assert_eq!(app.stock(BRANCH, ITEM).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pooled_cancel_messages_credit_once() {
    let app = pooled_app_with_stock(10).await;
    let reservation = app
        .reservations()
        .create_reservation(reserve(1, 4))
        .await
        .unwrap();
    assert_eq!(app.stock(BRANCH, ITEM).await, 6);

    let tasks = (0..6).map(|_| {
        let state = app.state.clone();
        let raw = json!({
            "cmd": "cancel_reservation",
            "reservationId": reservation.id,
            "patientId": 1
        })
        .to_string();
        tokio::spawn(async move { handle_message(&state, &raw).await })
    });

    let outcomes: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();
    let released = outcomes
        .iter()
        .filter(|r| r["outcome"] == "released")
        .count();

    assert_eq!(released, 1);
    assert!(outcomes
        .iter()
        .all(|r| r["reservation"]["status"] == "cancelled"));
    assert_eq!(app.stock(BRANCH, ITEM).await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pooled_orders_and_holds_balance_the_ledger() {
    let app = pooled_app_with_stock(25).await;

    let tasks = (0..16).map(|patient| {
        let state = app.state.clone();
        let raw = if patient % 2 == 0 {
            json!({
                "cmd": "create_reservation",
                "patientId": patient,
                "pharmacy_branch_id": BRANCH,
                "medicine_id": MEDICINE,
                "quantity_reserved": 2
            })
        } else {
            json!({
                "cmd": "create_order",
                "patientId": patient,
                "pharmacy_branch_id": BRANCH,
                "items": [{ "item_id": ITEM, "quantity": 3 }],
                "delivery_method": "pickup",
                "payment_method": "cash"
            })
        }
        .to_string();
        tokio::spawn(async move { (patient, handle_message(&state, &raw).await) })
    });

    let mut debited = 0;
    for joined in join_all(tasks).await {
        let (patient, response) = joined.unwrap();
        if response.get("error").is_some() {
            assert_eq!(response["error"], "insufficient_stock");
        } else {
            debited += if patient % 2 == 0 { 2 } else { 3 };
        }
    }

    assert_eq!(app.stock(BRANCH, ITEM).await, 25 - debited);
}
