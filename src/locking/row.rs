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

//! Persisted lock row layout and its translation to [`LockInfo`].

use crate::error::{LeaseholdError, Result};
use crate::store::{AttributeValue, Item, normalize_unix_nanos};
use chrono::{DateTime, Utc};
use log::warn;
use serde::Serialize;
use std::collections::BTreeMap;

pub const ACQUIRED_COLUMN: &str = "AcquiredUnixNano";
pub const EXPIRES_COLUMN: &str = "ExpiresUnixNano";
pub const LOGS_URL_COLUMN: &str = "LogsUrl";
pub const METADATA_COLUMN: &str = "Metadata";

/// Caller-supplied diagnostic metadata stored alongside a lock.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Snapshot of a lock row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockInfo {
    pub key: String,
    /// Fencing token of the acquisition that wrote the row.
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub log_ref: Option<String>,
    pub metadata: Metadata,
    /// Whether `expires_at` was in the future when the row was read.
    pub active: bool,
}

impl LockInfo {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Encodes and decodes lock rows for a table with configurable key and
/// version columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowCodec {
    key_column: String,
    version_column: String,
}

impl RowCodec {
    pub fn new(key_column: impl Into<String>, version_column: impl Into<String>) -> Self {
        Self {
            key_column: key_column.into(),
            version_column: version_column.into(),
        }
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn version_column(&self) -> &str {
        &self.version_column
    }

    pub fn encode(&self, info: &LockInfo) -> Result<Item> {
        let mut item = Item::new();
        item.insert(self.key_column.clone(), AttributeValue::S(info.key.clone()));
        item.insert(
            self.version_column.clone(),
            AttributeValue::S(info.token.clone()),
        );
        item.insert(
            ACQUIRED_COLUMN.to_string(),
            AttributeValue::N(unix_nanos(info.acquired_at)?),
        );
        item.insert(
            EXPIRES_COLUMN.to_string(),
            AttributeValue::N(unix_nanos(info.expires_at)?),
        );
        if let Some(log_ref) = &info.log_ref {
            item.insert(
                LOGS_URL_COLUMN.to_string(),
                AttributeValue::S(log_ref.clone()),
            );
        }
        item.insert(
            METADATA_COLUMN.to_string(),
            AttributeValue::S(serde_json::to_string(&info.metadata)?),
        );
        Ok(item)
    }

    /// Decodes a row, judging `active` against `now`.
    ///
    /// Identity and lease columns are mandatory; the log reference and
    /// metadata are diagnostics only, so their decode failures are logged
    /// and otherwise ignored.
    pub fn decode(&self, item: &Item, now: DateTime<Utc>) -> Result<LockInfo> {
        let key = required_string(item, &self.key_column, None)?;
        let token = required_string(item, &self.version_column, Some(&key))?;
        let acquired_at = required_timestamp(item, ACQUIRED_COLUMN, &key)?;
        let expires_at = required_timestamp(item, EXPIRES_COLUMN, &key)?;

        let log_ref = match item.get(LOGS_URL_COLUMN) {
            Some(AttributeValue::S(value)) => Some(value.clone()),
            Some(other) => {
                warn!("Logs URL field in lock row '{key}' is not a string: {other:?}");
                None
            }
            None => None,
        };

        let metadata = match item.get(METADATA_COLUMN) {
            Some(AttributeValue::S(raw)) => match serde_json::from_str::<Metadata>(raw) {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!("Metadata field in lock row '{key}' is not a JSON object ({err}): {raw}");
                    Metadata::new()
                }
            },
            Some(other) => {
                warn!("Metadata field in lock row '{key}' is not a string: {other:?}");
                Metadata::new()
            }
            None => Metadata::new(),
        };

        Ok(LockInfo {
            key,
            token,
            acquired_at,
            expires_at,
            log_ref,
            metadata,
            active: expires_at > now,
        })
    }
}

pub(crate) fn unix_nanos(instant: DateTime<Utc>) -> Result<i64> {
    instant
        .timestamp_nanos_opt()
        .ok_or_else(|| LeaseholdError::TimestampOutOfRange {
            timestamp: instant.to_rfc3339(),
        })
}

/// Interprets a Unix timestamp in seconds, milliseconds, microseconds or
/// nanoseconds, picking the unit by magnitude.
///
/// Store conditions read expiries through the same rule, so a row decodes
/// as active exactly when acquisition would refuse to overwrite it.
pub fn timestamp_from_unix(value: i64) -> Option<DateTime<Utc>> {
    normalize_unix_nanos(value).map(DateTime::from_timestamp_nanos)
}

fn required_string(item: &Item, column: &str, key: Option<&str>) -> Result<String> {
    match item.get(column) {
        Some(AttributeValue::S(value)) => Ok(value.clone()),
        Some(_) => Err(malformed(key, format!("{column} field is not a string"))),
        None => Err(malformed(key, format!("no {column} field in lock row"))),
    }
}

fn required_timestamp(item: &Item, column: &str, key: &str) -> Result<DateTime<Utc>> {
    match item.get(column) {
        Some(AttributeValue::N(value)) => timestamp_from_unix(*value)
            .ok_or_else(|| malformed(Some(key), format!("{column} value {value} is out of range"))),
        Some(_) => Err(malformed(Some(key), format!("{column} field is not a number"))),
        None => Err(malformed(Some(key), format!("no {column} field in lock row"))),
    }
}

fn malformed(key: Option<&str>, details: String) -> LeaseholdError {
    LeaseholdError::MalformedRow {
        key: key.map(str::to_string),
        details,
    }
}
