#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set};
use tempfile::TempDir;
use tokio::sync::mpsc;

use pharmacy_fulfillment::{
    config::AppConfig,
    db,
    entities::{medicine, stock_entry},
    events::{Event, EventSender},
    services::{
        order_service::OrderService,
        prescriptions::{InMemoryPrescriptions, PrescriptionRecord},
        reservation_service::ReservationService,
        stock_ledger::StockLedger,
    },
    AppState,
};

/// Application state backed by a fresh SQLite database.
pub struct TestApp {
    pub state: AppState,
    pub prescriptions: Arc<InMemoryPrescriptions>,
    events: mpsc::Receiver<Event>,
    _dir: Option<TempDir>,
}

fn test_config(database_url: String) -> AppConfig {
    let mut cfg = AppConfig::new(database_url, "test".to_string());
    cfg.low_stock_threshold = 2;
    cfg.retry_initial_delay_ms = 1;
    cfg.retry_max_delay_ms = 5;
    cfg
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = test_config("sqlite::memory:".to_string());
        // A second connection would open a second, empty in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        Self::with_config(cfg, None).await
    }

    /// Application state over a SQLite file shared by a pool of `max_connections`.
    pub async fn on_file(max_connections: u32) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("pharmacy.db");
        let mut cfg = test_config(format!("sqlite://{}?mode=rwc", path.display()));
        cfg.db_max_connections = max_connections;
        cfg.db_min_connections = 1;
        cfg.retry_max_attempts = 10;
        cfg.retry_max_delay_ms = 20;
        Self::with_config(cfg, Some(dir)).await
    }

    async fn with_config(cfg: AppConfig, dir: Option<TempDir>) -> Self {
        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let (event_sender, events) = EventSender::channel(4096);
        let prescriptions = Arc::new(InMemoryPrescriptions::new());
        let state = AppState::new(
            Arc::new(pool),
            cfg,
            Arc::new(event_sender),
            prescriptions.clone(),
        );

        Self {
            state,
            prescriptions,
            events,
            _dir: dir,
        }
    }

    pub fn db(&self) -> &db::DbPool {
        self.state.db.as_ref()
    }

    pub fn ledger(&self) -> StockLedger {
        self.state.services.ledger
    }

    pub fn reservations(&self) -> Arc<ReservationService> {
        self.state.reservation_service()
    }

    pub fn orders(&self) -> Arc<OrderService> {
        self.state.order_service()
    }

    pub async fn seed_stock(&self, branch_id: i32, item_id: i32, quantity: i32, price: Decimal) {
        stock_entry::ActiveModel {
            pharmacy_branch_id: Set(branch_id),
            item_id: Set(item_id),
            quantity: Set(quantity),
            initial_price: Set(price),
            sold_price: Set(price),
            expiry_date: Set(None),
            ..Default::default()
        }
        .insert(self.db())
        .await
        .expect("failed to seed stock");
    }

    pub async fn seed_medicine(&self, medicine_id: i32, item_id: i32, prescription_required: bool) {
        medicine::ActiveModel {
            id: Set(medicine_id),
            item_id: Set(item_id),
            name: Set(format!("medicine-{}", medicine_id)),
            prescription_required: Set(prescription_required),
            medicine_type: Set(Some("tablet".to_string())),
            dosage: Set(Some("500mg".to_string())),
        }
        .insert(self.db())
        .await
        .expect("failed to seed medicine");
    }

    pub fn seed_prescription(&self, prescription_id: i32, patient_id: i32, medicine_ids: Vec<i32>) {
        self.prescriptions.insert(PrescriptionRecord {
            prescription_id,
            patient_id,
            medicine_ids,
        });
    }

    pub async fn stock(&self, branch_id: i32, item_id: i32) -> i32 {
        self.ledger()
            .peek(self.db(), branch_id, item_id)
            .await
            .expect("stock row missing")
    }

    /// Installs a trigger that aborts matching statements with `message`.
    pub async fn fail_statements(
        &self,
        name: &str,
        event: &str,
        table: &str,
        when: Option<&str>,
        message: &str,
    ) {
        let when = when.map(|w| format!(" WHEN {}", w)).unwrap_or_default();
        let sql = format!(
            "CREATE TRIGGER {name} BEFORE {event} ON {table}{when} BEGIN SELECT RAISE(ABORT, '{message}'); END;"
        );
        self.db()
            .execute_unprepared(&sql)
            .await
            .expect("failed to install trigger");
    }

    /// Everything published so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
