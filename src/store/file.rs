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

//! Directory-backed lock table shared between processes.
//!
//! Each row is one JSON document named after the hex-encoded key, or after
//! the SHA-256 of the key when the hex name would not fit in a file name.
//! Digest-named rows carry their real key in the key column. Mutations
//! take an exclusive advisory lock on the table's `.table.lock` file, read
//! the current row, evaluate the condition, and replace the document with an
//! atomic rename. Reads never take the lock because a rename is observed
//! either fully or not at all.

use crate::locking::CancellationToken;
use crate::store::{
    AttributeValue, Condition, Item, LockStore, ScanPage, ScanRequest, StoreError, StoreResult,
    TableRef, UnreadableRow, ensure_active,
};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const ROW_SUFFIX: &str = ".json";
const TABLE_LOCK_FILE: &str = ".table.lock";
const DIGEST_PREFIX: &str = "sha256-";
// Common limit for a single path component on Linux, macOS and Windows.
const MAX_FILE_NAME: usize = 255;

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, table: &TableRef) -> io::Result<PathBuf> {
        let dir = self.root.join(&table.name);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn row_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(row_file_name(key))
    }

    fn with_table_lock<T>(
        &self,
        dir: &Path,
        operation: impl FnOnce() -> StoreResult<T>,
    ) -> StoreResult<T> {
        let lock_path = dir.join(TABLE_LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        lock_file.lock()?;

        let result = operation();

        if let Err(err) = lock_file.unlock() {
            warn!(
                "Failed to unlock table lock {}: {err}",
                lock_path.display()
            );
        }
        result
    }

    fn mutate(
        &self,
        ctx: &CancellationToken,
        table: &TableRef,
        key: &str,
        condition: &Condition,
        apply: impl FnOnce(Option<Item>) -> Option<Item>,
    ) -> StoreResult<()> {
        ensure_active(ctx)?;
        let dir = self.table_dir(table)?;
        let path = Self::row_path(&dir, key);

        self.with_table_lock(&dir, || {
            // The wait for the table lock may have been long.
            ensure_active(ctx)?;
            let current = read_row(&path)?;
            if !condition.matches(current.as_ref()) {
                return Err(StoreError::ConditionFailed);
            }
            match apply(current) {
                Some(item) => write_row(&dir, &path, &item),
                None => remove_row(&path),
            }
        })
    }
}

impl LockStore for FileStore {
    fn get(
        &self,
        ctx: &CancellationToken,
        table: &TableRef,
        key: &str,
    ) -> StoreResult<Option<Item>> {
        ensure_active(ctx)?;
        let dir = self.table_dir(table)?;
        read_row(&Self::row_path(&dir, key))
    }

    fn put(
        &self,
        ctx: &CancellationToken,
        table: &TableRef,
        key: &str,
        mut item: Item,
        condition: &Condition,
    ) -> StoreResult<()> {
        item.insert(table.key_column.clone(), AttributeValue::S(key.to_string()));
        self.mutate(ctx, table, key, condition, |_| Some(item))
    }

    fn update(
        &self,
        ctx: &CancellationToken,
        table: &TableRef,
        key: &str,
        changes: Item,
        condition: &Condition,
    ) -> StoreResult<()> {
        self.mutate(ctx, table, key, condition, |current| {
            let mut row = current.unwrap_or_else(|| {
                let mut item = Item::new();
                item.insert(table.key_column.clone(), AttributeValue::S(key.to_string()));
                item
            });
            row.extend(changes);
            Some(row)
        })
    }

    fn delete(
        &self,
        ctx: &CancellationToken,
        table: &TableRef,
        key: &str,
        condition: &Condition,
    ) -> StoreResult<()> {
        self.mutate(ctx, table, key, condition, |_| None)
    }

    fn scan(
        &self,
        ctx: &CancellationToken,
        table: &TableRef,
        request: &ScanRequest,
    ) -> StoreResult<ScanPage> {
        ensure_active(ctx)?;
        let dir = self.table_dir(table)?;

        let mut keys = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(stem) = name.strip_suffix(ROW_SUFFIX) else {
                continue;
            };
            if stem.starts_with(DIGEST_PREFIX) {
                let path = entry.path();
                match read_row(&path) {
                    Ok(Some(item)) => {
                        let key = item
                            .get(&table.key_column)
                            .and_then(AttributeValue::as_str)
                            .unwrap_or(stem)
                            .to_string();
                        keys.push((key, path));
                    }
                    Ok(None) => {}
                    // Reported as unreadable under its file name below.
                    Err(_) => keys.push((stem.to_string(), path)),
                }
                continue;
            }
            match decode_key(stem) {
                Some(key) => keys.push((key, entry.path())),
                None => debug!("Ignoring foreign file {name} in lock table"),
            }
        }
        keys.sort_by(|a, b| a.0.cmp(&b.0));

        let mut page = ScanPage::default();
        let limit = request.limit.max(1);
        let mut remaining = keys
            .into_iter()
            .filter(|(key, _)| {
                request
                    .start_after
                    .as_ref()
                    .is_none_or(|start| key > start)
            })
            .peekable();
        let mut evaluated = 0;
        while let Some((key, path)) = remaining.next() {
            ensure_active(ctx)?;
            match read_row(&path) {
                Ok(Some(item)) => {
                    if request
                        .filter
                        .as_ref()
                        .is_none_or(|filter| filter.matches(Some(&item)))
                    {
                        page.items.push(item);
                    }
                }
                // Deleted between listing and reading.
                Ok(None) => {}
                Err(err) => page.unreadable.push(UnreadableRow {
                    key: key.clone(),
                    details: err.to_string(),
                }),
            }
            evaluated += 1;
            if evaluated >= limit {
                if remaining.peek().is_some() {
                    page.last_key = Some(key);
                }
                break;
            }
        }
        Ok(page)
    }
}

fn row_file_name(key: &str) -> String {
    let encoded = hex::encode(key.as_bytes());
    if encoded.len() + ROW_SUFFIX.len() <= MAX_FILE_NAME {
        return format!("{encoded}{ROW_SUFFIX}");
    }
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{DIGEST_PREFIX}{:x}{ROW_SUFFIX}", hasher.finalize())
}

fn decode_key(stem: &str) -> Option<String> {
    let bytes = hex::decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}

fn read_row(path: &Path) -> StoreResult<Option<Item>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn write_row(dir: &Path, path: &Path, item: &Item) -> StoreResult<()> {
    let mut staged = NamedTempFile::new_in(dir)?;
    let payload = serde_json::to_vec_pretty(item)?;
    staged.write_all(&payload)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn remove_row(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn table() -> TableRef {
        TableRef::new("locks", "LockKey")
    }

    fn row(token: &str, expires: i64) -> Item {
        let mut item = Item::new();
        item.insert("Version".to_string(), AttributeValue::S(token.to_string()));
        item.insert("Expires".to_string(), AttributeValue::N(expires));
        item
    }

    #[test]
    fn rows_are_stored_under_hex_names() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        let ctx = CancellationToken::new();
        store
            .put(&ctx, &table(), "jobs/7", row("a-0", 10), &Condition::NotExists)
            .unwrap();

        let expected = temp
            .path()
            .join("locks")
            .join(format!("{}.json", hex::encode("jobs/7")));
        assert!(expected.exists());

        let stored = store.get(&ctx, &table(), "jobs/7").unwrap().unwrap();
        assert_eq!(
            stored.get("LockKey"),
            Some(&AttributeValue::S("jobs/7".to_string()))
        );
    }

    #[test]
    fn long_keys_are_stored_under_digest_names() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        let ctx = CancellationToken::new();
        let long_key = "k".repeat(200);
        store
            .put(&ctx, &table(), &long_key, row("a-0", 10), &Condition::NotExists)
            .unwrap();
        store
            .put(&ctx, &table(), "short", row("b-0", 10), &Condition::NotExists)
            .unwrap();

        let names: Vec<String> = fs::read_dir(temp.path().join("locks"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.ends_with(ROW_SUFFIX))
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|name| name.len() <= MAX_FILE_NAME));
        assert!(names.iter().any(|name| name.starts_with(DIGEST_PREFIX)));

        let mut changes = Item::new();
        changes.insert("Expires".to_string(), AttributeValue::N(99));
        let current = Condition::equals("Version", AttributeValue::S("a-0".to_string()));
        store
            .update(&ctx, &table(), &long_key, changes, &current)
            .unwrap();
        let stored = store.get(&ctx, &table(), &long_key).unwrap().unwrap();
        assert_eq!(
            stored.get("LockKey"),
            Some(&AttributeValue::S(long_key.clone()))
        );
        assert_eq!(stored.get("Expires"), Some(&AttributeValue::N(99)));

        let page = store
            .scan(
                &ctx,
                &table(),
                &ScanRequest {
                    limit: 10,
                    ..ScanRequest::default()
                },
            )
            .unwrap();
        let keys: Vec<_> = page
            .items
            .iter()
            .filter_map(|item| item.get("LockKey").and_then(AttributeValue::as_str))
            .collect();
        assert_eq!(keys, vec![long_key.as_str(), "short"]);

        store.delete(&ctx, &table(), &long_key, &current).unwrap();
        assert!(store.get(&ctx, &table(), &long_key).unwrap().is_none());
    }

    #[test]
    fn conditional_update_and_delete() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        let ctx = CancellationToken::new();
        store
            .put(&ctx, &table(), "job", row("a-0", 10), &Condition::NotExists)
            .unwrap();

        let stale = Condition::equals("Version", AttributeValue::S("b-0".to_string()));
        let mut changes = Item::new();
        changes.insert("Expires".to_string(), AttributeValue::N(99));
        let err = store
            .update(&ctx, &table(), "job", changes.clone(), &stale)
            .unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed));

        let current = Condition::equals("Version", AttributeValue::S("a-0".to_string()));
        store
            .update(&ctx, &table(), "job", changes, &current)
            .unwrap();
        let stored = store.get(&ctx, &table(), "job").unwrap().unwrap();
        assert_eq!(stored.get("Expires"), Some(&AttributeValue::N(99)));

        store.delete(&ctx, &table(), "job", &current).unwrap();
        assert!(store.get(&ctx, &table(), "job").unwrap().is_none());
    }

    #[test]
    fn scan_reports_corrupt_documents_without_failing() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        let ctx = CancellationToken::new();
        store
            .put(&ctx, &table(), "good", row("a-0", 10), &Condition::NotExists)
            .unwrap();
        let corrupt = temp
            .path()
            .join("locks")
            .join(format!("{}.json", hex::encode("broken")));
        fs::write(&corrupt, b"{not json").unwrap();
        fs::write(temp.path().join("locks").join("README.json"), b"{}").unwrap();

        let page = store
            .scan(
                &ctx,
                &table(),
                &ScanRequest {
                    limit: 10,
                    ..ScanRequest::default()
                },
            )
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.unreadable.len(), 1);
        assert_eq!(page.unreadable[0].key, "broken");
        assert_eq!(page.last_key, None);
    }

    #[test]
    fn scan_filter_and_pagination() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        let ctx = CancellationToken::new();
        let now = 1_700_000_000_000_000_000;
        for (key, expires) in [("a", now - 5), ("b", now + 50), ("c", now + 500)] {
            store
                .put(&ctx, &table(), key, row("t-0", expires), &Condition::NotExists)
                .unwrap();
        }
        let filter = Condition::ExpiresAfter {
            column: "Expires".to_string(),
            at: now,
        };

        let first = store
            .scan(
                &ctx,
                &table(),
                &ScanRequest {
                    filter: Some(filter.clone()),
                    start_after: None,
                    limit: 2,
                },
            )
            .unwrap();
        assert_eq!(first.items.len(), 1);
        assert_eq!(first.last_key.as_deref(), Some("b"));

        let second = store
            .scan(
                &ctx,
                &table(),
                &ScanRequest {
                    filter: Some(filter),
                    start_after: first.last_key,
                    limit: 2,
                },
            )
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.last_key, None);
    }

    #[test]
    fn concurrent_inserts_admit_a_single_winner() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(temp.path()));

        let winners: usize = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|idx| {
                    let store = Arc::clone(&store);
                    scope.spawn(move || {
                        let ctx = CancellationToken::new();
                        store
                            .put(
                                &ctx,
                                &table(),
                                "job",
                                row(&format!("holder-{idx}"), 10),
                                &Condition::NotExists,
                            )
                            .is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| usize::from(handle.join().unwrap()))
                .sum()
        });

        assert_eq!(winners, 1);
    }
}
