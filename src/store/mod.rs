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

//! Adapter boundary to the conditional-write key-value store that arbitrates
//! lock ownership.
//!
//! Every mutation is a single-row compare-and-set: the store evaluates a
//! [`Condition`] against the current row and applies the write only when it
//! holds. Correctness of the lock protocol rests entirely on that atomicity.

mod condition;
mod file;
mod memory;

pub use condition::{Condition, normalize_unix_nanos};
pub use file::FileStore;
pub use memory::MemoryStore;

use crate::locking::CancellationToken;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use thiserror::Error;

/// A single attribute of a stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(i64),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::S(value) => Some(value),
            AttributeValue::N(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            AttributeValue::N(value) => Some(*value),
            AttributeValue::S(_) => None,
        }
    }
}

/// Flat row representation, keyed by column name.
pub type Item = BTreeMap<String, AttributeValue>;

/// Identifies the table a store call operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub key_column: String,
}

impl TableRef {
    pub fn new(name: impl Into<String>, key_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_column: key_column.into(),
        }
    }
}

/// Parameters for one page of a paginated scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRequest {
    pub filter: Option<Condition>,
    pub start_after: Option<String>,
    pub limit: usize,
}

/// A row the backend could not read at all, reported instead of failing the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableRow {
    pub key: String,
    pub details: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub items: Vec<Item>,
    pub unreadable: Vec<UnreadableRow>,
    /// Key to resume from; `None` once the scan is exhausted.
    pub last_key: Option<String>,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("conditional check failed")]
    ConditionFailed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Strongly consistent, single-row-atomic store used as the lock arbiter.
pub trait LockStore: Send + Sync {
    /// Consistent point read.
    fn get(&self, ctx: &CancellationToken, table: &TableRef, key: &str)
    -> StoreResult<Option<Item>>;

    /// Writes `item` as the whole row for `key` if `condition` holds.
    fn put(
        &self,
        ctx: &CancellationToken,
        table: &TableRef,
        key: &str,
        item: Item,
        condition: &Condition,
    ) -> StoreResult<()>;

    /// Overwrites the given attributes of a row if `condition` holds.
    fn update(
        &self,
        ctx: &CancellationToken,
        table: &TableRef,
        key: &str,
        changes: Item,
        condition: &Condition,
    ) -> StoreResult<()>;

    /// Removes the row for `key` if `condition` holds.
    fn delete(
        &self,
        ctx: &CancellationToken,
        table: &TableRef,
        key: &str,
        condition: &Condition,
    ) -> StoreResult<()>;

    fn scan(
        &self,
        ctx: &CancellationToken,
        table: &TableRef,
        request: &ScanRequest,
    ) -> StoreResult<ScanPage>;
}

pub(crate) fn ensure_active(ctx: &CancellationToken) -> StoreResult<()> {
    if ctx.is_cancelled() {
        return Err(StoreError::Cancelled);
    }
    Ok(())
}
