use crate::{errors::ServiceError, handlers::AppServices};
use async_trait::async_trait;

/// Command trait for implementing the Command Pattern
///
/// A command carries a validated payload and runs one business operation
/// against the application services.
#[async_trait]
pub trait Command: Send + Sync {
    /// The return type of the command when executed successfully
    type Result;

    /// Execute the command against the given services
    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError>;
}

pub mod orders;
pub mod reservations;
