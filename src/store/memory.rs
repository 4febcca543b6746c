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

use crate::locking::CancellationToken;
use crate::store::{
    AttributeValue, Condition, Item, LockStore, ScanPage, ScanRequest, StoreError, StoreResult,
    TableRef, ensure_active,
};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};

type Rows = BTreeMap<String, Item>;

/// Process-local store. All tables share one mutex, which makes every
/// conditional write trivially atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Rows>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, HashMap<String, Rows>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LockStore for MemoryStore {
    fn get(
        &self,
        ctx: &CancellationToken,
        table: &TableRef,
        key: &str,
    ) -> StoreResult<Option<Item>> {
        ensure_active(ctx)?;
        let tables = self.tables();
        Ok(tables
            .get(&table.name)
            .and_then(|rows| rows.get(key))
            .cloned())
    }

    fn put(
        &self,
        ctx: &CancellationToken,
        table: &TableRef,
        key: &str,
        mut item: Item,
        condition: &Condition,
    ) -> StoreResult<()> {
        ensure_active(ctx)?;
        let mut tables = self.tables();
        let rows = tables.entry(table.name.clone()).or_default();
        if !condition.matches(rows.get(key)) {
            return Err(StoreError::ConditionFailed);
        }
        item.insert(table.key_column.clone(), AttributeValue::S(key.to_string()));
        rows.insert(key.to_string(), item);
        Ok(())
    }

    fn update(
        &self,
        ctx: &CancellationToken,
        table: &TableRef,
        key: &str,
        changes: Item,
        condition: &Condition,
    ) -> StoreResult<()> {
        ensure_active(ctx)?;
        let mut tables = self.tables();
        let rows = tables.entry(table.name.clone()).or_default();
        if !condition.matches(rows.get(key)) {
            return Err(StoreError::ConditionFailed);
        }
        let row = rows.entry(key.to_string()).or_insert_with(|| {
            let mut item = Item::new();
            item.insert(table.key_column.clone(), AttributeValue::S(key.to_string()));
            item
        });
        row.extend(changes);
        Ok(())
    }

    fn delete(
        &self,
        ctx: &CancellationToken,
        table: &TableRef,
        key: &str,
        condition: &Condition,
    ) -> StoreResult<()> {
        ensure_active(ctx)?;
        let mut tables = self.tables();
        let rows = tables.entry(table.name.clone()).or_default();
        if !condition.matches(rows.get(key)) {
            return Err(StoreError::ConditionFailed);
        }
        rows.remove(key);
        Ok(())
    }

    fn scan(
        &self,
        ctx: &CancellationToken,
        table: &TableRef,
        request: &ScanRequest,
    ) -> StoreResult<ScanPage> {
        ensure_active(ctx)?;
        let tables = self.tables();
        let mut page = ScanPage::default();
        let Some(rows) = tables.get(&table.name) else {
            return Ok(page);
        };

        let lower = match &request.start_after {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };
        let limit = request.limit.max(1);
        let mut evaluated = 0;
        let mut iter = rows
            .range::<String, _>((lower, Bound::Unbounded))
            .peekable();
        while let Some((key, item)) = iter.next() {
            if request
                .filter
                .as_ref()
                .is_none_or(|filter| filter.matches(Some(item)))
            {
                page.items.push(item.clone());
            }
            evaluated += 1;
            if evaluated >= limit {
                if iter.peek().is_some() {
                    page.last_key = Some(key.clone());
                }
                break;
            }
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableRef {
        TableRef::new("locks", "LockKey")
    }

    fn row(expires: i64) -> Item {
        let mut item = Item::new();
        item.insert("Expires".to_string(), AttributeValue::N(expires));
        item
    }

    #[test]
    fn put_stamps_key_column_and_respects_condition() {
        let store = MemoryStore::new();
        let ctx = CancellationToken::new();
        store
            .put(&ctx, &table(), "job", row(10), &Condition::NotExists)
            .unwrap();

        let stored = store.get(&ctx, &table(), "job").unwrap().unwrap();
        assert_eq!(
            stored.get("LockKey"),
            Some(&AttributeValue::S("job".to_string()))
        );

        let err = store
            .put(&ctx, &table(), "job", row(20), &Condition::NotExists)
            .unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed));
    }

    #[test]
    fn update_merges_changes() {
        let store = MemoryStore::new();
        let ctx = CancellationToken::new();
        store
            .put(&ctx, &table(), "job", row(10), &Condition::NotExists)
            .unwrap();

        let mut changes = Item::new();
        changes.insert("Expires".to_string(), AttributeValue::N(30));
        let guard = Condition::equals("LockKey", AttributeValue::S("job".to_string()));
        store
            .update(&ctx, &table(), "job", changes.clone(), &guard)
            .unwrap();
        let stored = store.get(&ctx, &table(), "job").unwrap().unwrap();
        assert_eq!(stored.get("Expires"), Some(&AttributeValue::N(30)));

        let err = store
            .update(&ctx, &table(), "missing", changes, &guard)
            .unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed));
    }

    #[test]
    fn scan_paginates_in_key_order() {
        let store = MemoryStore::new();
        let ctx = CancellationToken::new();
        for (idx, key) in ["c", "a", "b"].iter().enumerate() {
            store
                .put(&ctx, &table(), key, row(idx as i64), &Condition::NotExists)
                .unwrap();
        }

        let first = store
            .scan(
                &ctx,
                &table(),
                &ScanRequest {
                    limit: 2,
                    ..ScanRequest::default()
                },
            )
            .unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.last_key.as_deref(), Some("b"));

        let second = store
            .scan(
                &ctx,
                &table(),
                &ScanRequest {
                    start_after: first.last_key.clone(),
                    limit: 2,
                    ..ScanRequest::default()
                },
            )
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.last_key, None);
    }

    #[test]
    fn cancelled_context_aborts_before_touching_rows() {
        let store = MemoryStore::new();
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = store
            .put(&ctx, &table(), "job", row(10), &Condition::NotExists)
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
        assert!(
            store
                .get(&CancellationToken::new(), &table(), "job")
                .unwrap()
                .is_none()
        );
    }
}
