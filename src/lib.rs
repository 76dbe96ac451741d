//! Pharmacy fulfillment core
//!
//! Keeps per-branch medicine stock consistent while patients reserve
//! medicines and place multi-line orders concurrently.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod commands;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod retry;
pub mod services;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::retry::RetryConfig;
use crate::services::prescriptions::PrescriptionLookup;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
    pub retry: RetryConfig,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: Arc<events::EventSender>,
        prescriptions: Arc<dyn PrescriptionLookup>,
    ) -> Self {
        let services =
            handlers::AppServices::new(db.clone(), event_sender.clone(), prescriptions, &config);
        let retry = config.retry_config();
        Self {
            db,
            config,
            event_sender,
            services,
            retry,
        }
    }

    pub fn reservation_service(&self) -> Arc<services::reservation_service::ReservationService> {
        self.services.reservations.clone()
    }

    pub fn order_service(&self) -> Arc<services::order_service::OrderService> {
        self.services.orders.clone()
    }
}
