//! Storage boundaries for jobfeed: HTTP fetching, the durable job/alert store
//! and the ephemeral TTL store backing dedup and the notification queue.

pub mod ephemeral;
pub mod http;
pub mod jobs;
pub mod memory;
pub mod postgres;

use jobfeed_core::FailureClass;
use thiserror::Error;

pub use ephemeral::{EphemeralStore, MemoryEphemeralStore, RedisEphemeralStore};
pub use http::{
    FetchError, FetchRequest, FetchedResponse, HttpClientConfig, HttpFetcher, RateLimit,
    RetryPolicy, SourceLimits,
};
pub use jobs::{
    retention_cutoff, AlertStore, BatchUpsert, JobQuery, JobStore, NewAlert, Pagination,
    UpsertOutcome, MAX_ALERTS_PER_OWNER,
};
pub use memory::{MemoryAlertStore, MemoryJobStore};
pub use postgres::{PgAlertStore, PgJobStore};
pub use sqlx::PgPool;

pub const CRATE_NAME: &str = "jobfeed-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("unique constraint on {field} violated by {value}")]
    Conflict { field: &'static str, value: String },
    #[error("{email} already holds the maximum of {limit} alerts")]
    AlertLimit { email: String, limit: usize },
    #[error("retention window of {days} days is out of range")]
    InvalidRetention { days: i64 },
    #[error("stored row is malformed: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn class(&self) -> FailureClass {
        match self {
            StoreError::Database(sqlx::Error::PoolTimedOut)
            | StoreError::Database(sqlx::Error::Io(_)) => FailureClass::Unavailable,
            StoreError::Corrupt(_) => FailureClass::Parse,
            StoreError::AlertLimit { .. } | StoreError::InvalidRetention { .. } => {
                FailureClass::Configuration
            }
            _ => FailureClass::Persistence,
        }
    }
}

#[derive(Debug, Error)]
pub enum EphemeralError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl EphemeralError {
    pub fn class(&self) -> FailureClass {
        FailureClass::Unavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_classified() {
        assert_eq!(
            StoreError::Conflict {
                field: "apply_url",
                value: "https://x.test/1".into()
            }
            .class(),
            FailureClass::Persistence
        );
        assert_eq!(
            StoreError::Database(sqlx::Error::PoolTimedOut).class(),
            FailureClass::Unavailable
        );
    }
}
