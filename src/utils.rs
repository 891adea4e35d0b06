//! Utility functions for the matchmaking engine

use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Generate a correlation id for outbound messages
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Time left of a `budget` that started at `started_at`, zero once spent
pub fn remaining_budget(started_at: DateTime<Utc>, budget: Duration, now: DateTime<Utc>) -> Duration {
    let elapsed = (now - started_at).to_std().unwrap_or(Duration::ZERO);
    budget.saturating_sub(elapsed)
}
