// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod context;
mod exit_codes;
mod format;
#[cfg(test)]
mod tests;

pub use context::ErrorContext;
pub use exit_codes::get_exit_code;
pub use format::format_error_chain;

use crate::locking::LockInfo;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LeaseholdError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Lease on lock '{key}' was lost ({})", describe_holder(.current))]
    LeaseLost {
        key: String,
        token: String,
        current: Option<Box<LockInfo>>,
    },

    #[error("Lock '{key}' is not currently held by this process: {details}")]
    NotHeld {
        key: String,
        token: String,
        details: String,
    },

    #[error("Heartbeat for lock '{key}' was cancelled while the lock was still held")]
    HeartbeatInterrupted { key: String, token: String },

    #[error("Heartbeat for lock '{key}' panicked: {details}")]
    HeartbeatPanicked { key: String, details: String },

    #[error("Timestamp {timestamp} cannot be stored as Unix nanoseconds")]
    TimestampOutOfRange { timestamp: String },

    #[error("Malformed lock row{}: {details}", describe_key(.key))]
    MalformedRow { key: Option<String>, details: String },

    #[error("Lock store {operation} failed for '{key}': {source}")]
    Store {
        operation: &'static str,
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("Lock store {operation} for '{key}' was cancelled")]
    Cancelled { operation: &'static str, key: String },

    #[error("Could not settle acquisition of lock '{key}' after {attempts} attempts")]
    AcquireRace { key: String, attempts: usize },

    #[error("Lock '{key}' is held by {}", holder_token(.holder))]
    LockUnavailable { key: String, holder: Box<LockInfo> },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LeaseholdError>;

impl LeaseholdError {
    /// Maps a store failure, keeping cancellation distinct from transport faults.
    pub(crate) fn from_store(operation: &'static str, key: &str, source: StoreError) -> Self {
        match source {
            StoreError::Cancelled => LeaseholdError::Cancelled {
                operation,
                key: key.to_string(),
            },
            source => LeaseholdError::Store {
                operation,
                key: key.to_string(),
                source,
            },
        }
    }
}

impl From<config::ConfigError> for LeaseholdError {
    fn from(err: config::ConfigError) -> Self {
        LeaseholdError::ConfigError(err.to_string())
    }
}

fn describe_holder(current: &Option<Box<LockInfo>>) -> String {
    match current.as_deref() {
        Some(info) => format!(
            "now held by {}, acquired {}, active: {}",
            info.token,
            info.acquired_at.to_rfc3339(),
            info.active
        ),
        None => "row no longer exists".to_string(),
    }
}

fn describe_key(key: &Option<String>) -> String {
    key.as_deref()
        .map(|key| format!(" '{key}'"))
        .unwrap_or_default()
}

fn holder_token(holder: &LockInfo) -> &str {
    &holder.token
}
