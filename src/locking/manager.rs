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

use crate::config::{LeaseholdConfig, StoreBackend};
use crate::error::{LeaseholdError, Result};
use crate::locking::cancellation::CancellationToken;
use crate::locking::clock::{Clock, SystemClock};
use crate::locking::fencing::{HolderIdentity, LockRegistry};
use crate::locking::handle::LockHandle;
use crate::locking::heartbeat::{HeartbeatParams, HeartbeatTask, LeaseState};
use crate::locking::row::{EXPIRES_COLUMN, LockInfo, Metadata, RowCodec, unix_nanos};
use crate::store::{
    AttributeValue, Condition, FileStore, Item, LockStore, MemoryStore, ScanRequest, StoreError,
    TableRef,
};
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Conditional inserts attempted when the conflicting row keeps vanishing
/// before it can be read back.
const ACQUIRE_ATTEMPTS: usize = 3;

/// Outcome of [`LockManager::acquire`]. Contention is a normal result, not
/// an error.
#[derive(Debug)]
pub enum LockAttempt {
    Acquired(Box<LockHandle>),
    /// Another acquisition owns the row; carries its snapshot.
    Contended(LockInfo),
}

impl LockAttempt {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockAttempt::Acquired(_))
    }

    pub fn into_handle(self) -> Option<LockHandle> {
        match self {
            LockAttempt::Acquired(handle) => Some(*handle),
            LockAttempt::Contended(_) => None,
        }
    }

    pub fn existing(&self) -> Option<&LockInfo> {
        match self {
            LockAttempt::Acquired(_) => None,
            LockAttempt::Contended(info) => Some(info),
        }
    }
}

/// Which rows [`LockManager::list_locks`] returns, judged at read time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockFilter {
    #[default]
    All,
    Active,
    Expired,
}

/// A row a scan could not turn into a [`LockInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    pub key: Option<String>,
    pub details: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LockListing {
    pub locks: BTreeMap<String, LockInfo>,
    pub failures: Vec<RowFailure>,
}

/// Result of one guarded lease extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Renewal {
    Extended(DateTime<Utc>),
    /// The fencing guard failed.
    Superseded,
}

/// Mediates every store interaction for one lock table.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    table: TableRef,
    codec: RowCodec,
    registry: Arc<LockRegistry>,
    clock: Arc<dyn Clock>,
    lease: Duration,
    lease_delta: TimeDelta,
    heartbeat_interval: Duration,
    page_size: usize,
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("table", &self.table)
            .field("codec", &self.codec)
            .field("holder", self.registry.holder())
            .field("clock", &self.clock)
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

impl LockManager {
    pub fn new(
        store: Arc<dyn LockStore>,
        config: &LeaseholdConfig,
        registry: Arc<LockRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let lease = config.lease.duration();
        let lease_delta = TimeDelta::from_std(lease).map_err(|_| {
            LeaseholdError::InvalidConfig(format!(
                "lease.duration_ms {} is out of range",
                config.lease.duration_ms
            ))
        })?;

        Ok(Self {
            store,
            table: TableRef::new(&config.table.name, &config.table.key_column),
            codec: RowCodec::new(&config.table.key_column, &config.table.version_column),
            registry,
            clock: Arc::new(SystemClock),
            lease,
            lease_delta,
            heartbeat_interval: config.lease.heartbeat_interval(),
            page_size: config.table.page_size,
        })
    }

    /// Builds the configured store backend and a registry for the configured
    /// holder.
    pub fn from_config(config: &LeaseholdConfig) -> Result<Self> {
        let store: Arc<dyn LockStore> = match config.store.backend {
            StoreBackend::File => Arc::new(FileStore::new(config.store_root())),
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        };
        let registry = Arc::new(LockRegistry::new(HolderIdentity::from_config(
            &config.holder,
        )));
        Self::new(store, config, registry)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table.name
    }

    pub fn holder(&self) -> &HolderIdentity {
        self.registry.holder()
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Attempts to take the lock for `key`.
    ///
    /// The insert succeeds when no row exists or the existing row has
    /// expired. On contention the current holder's row is read back and
    /// returned as [`LockAttempt::Contended`]. On success a heartbeat thread
    /// starts renewing the lease; its lease context is a child of `ctx`.
    pub fn acquire(
        &self,
        ctx: &CancellationToken,
        key: &str,
        metadata: Metadata,
    ) -> Result<LockAttempt> {
        let holder = self.registry.holder();

        for attempt in 1..=ACQUIRE_ATTEMPTS {
            let now = self.clock.now();
            let candidate = LockInfo {
                key: key.to_string(),
                token: self.registry.next_token(key),
                acquired_at: now,
                expires_at: now + self.lease_delta,
                log_ref: holder.log_ref().map(str::to_string),
                metadata: metadata.clone(),
                active: true,
            };
            let item = self.codec.encode(&candidate)?;
            let free = Condition::Any(vec![
                Condition::NotExists,
                Condition::ExpiresAtOrBefore {
                    column: EXPIRES_COLUMN.to_string(),
                    at: unix_nanos(now)?,
                },
            ]);

            match self.store.put(ctx, &self.table, key, item, &free) {
                Ok(()) => {
                    info!(
                        "Acquired lock '{key}' ({}), lease expires {}",
                        candidate.token,
                        candidate.expires_at.to_rfc3339()
                    );
                    let handle = self.start_lease(ctx, candidate)?;
                    return Ok(LockAttempt::Acquired(Box::new(handle)));
                }
                Err(StoreError::ConditionFailed) => {}
                Err(err) => return Err(LeaseholdError::from_store("acquire", key, err)),
            }

            match self.get_lock(ctx, key)? {
                Some(existing) => {
                    info!(
                        "Lock '{key}' is held by {} (active: {}, acquired {}, logs: {})",
                        existing.token,
                        existing.active,
                        existing.acquired_at.to_rfc3339(),
                        existing.log_ref.as_deref().unwrap_or("none")
                    );
                    return Ok(LockAttempt::Contended(existing));
                }
                None => debug!(
                    "Lock '{key}' vanished after a failed insert (attempt {attempt}/{ACQUIRE_ATTEMPTS})"
                ),
            }
        }

        Err(LeaseholdError::AcquireRace {
            key: key.to_string(),
            attempts: ACQUIRE_ATTEMPTS,
        })
    }

    /// Releases `handle`; see [`LockHandle::release`].
    pub fn release(&self, ctx: &CancellationToken, handle: &mut LockHandle) -> Result<()> {
        handle.release(ctx)
    }

    /// Consistent point read of one lock row. A malformed row is an error.
    pub fn get_lock(&self, ctx: &CancellationToken, key: &str) -> Result<Option<LockInfo>> {
        let item = self
            .store
            .get(ctx, &self.table, key)
            .map_err(|err| LeaseholdError::from_store("get", key, err))?;

        item.map(|item| {
            self.codec
                .decode(&item, self.clock.now())
                .map_err(|err| attach_key(err, key))
        })
        .transpose()
    }

    /// Scans the whole table page by page. Rows that fail to decode are
    /// collected in [`LockListing::failures`] instead of failing the scan.
    pub fn list_locks(&self, ctx: &CancellationToken, filter: LockFilter) -> Result<LockListing> {
        let now = self.clock.now();
        let at = unix_nanos(now)?;
        let column = EXPIRES_COLUMN.to_string();
        let condition = match filter {
            LockFilter::All => None,
            LockFilter::Active => Some(Condition::ExpiresAfter { column, at }),
            LockFilter::Expired => Some(Condition::ExpiresAtOrBefore { column, at }),
        };

        let mut listing = LockListing::default();
        let mut start_after = None;
        loop {
            let request = ScanRequest {
                filter: condition.clone(),
                start_after: start_after.take(),
                limit: self.page_size,
            };
            let page = self
                .store
                .scan(ctx, &self.table, &request)
                .map_err(|err| LeaseholdError::from_store("scan", &self.table.name, err))?;

            for row in page.unreadable {
                warn!("Skipping unreadable lock row '{}': {}", row.key, row.details);
                listing.failures.push(RowFailure {
                    key: Some(row.key),
                    details: row.details,
                });
            }

            for item in &page.items {
                match self.codec.decode(item, now) {
                    Ok(info) => {
                        listing.locks.insert(info.key.clone(), info);
                    }
                    Err(err) => {
                        let key = item
                            .get(self.codec.key_column())
                            .and_then(AttributeValue::as_str)
                            .map(str::to_string);
                        warn!("Skipping lock row: {err}");
                        listing.failures.push(RowFailure {
                            key,
                            details: err.to_string(),
                        });
                    }
                }
            }

            match page.last_key {
                Some(last_key) => start_after = Some(last_key),
                None => break,
            }
        }

        debug!(
            "Listed {} lock(s) from '{}' ({} unreadable)",
            listing.locks.len(),
            self.table.name,
            listing.failures.len()
        );
        Ok(listing)
    }

    pub fn all_locks(&self, ctx: &CancellationToken) -> Result<LockListing> {
        self.list_locks(ctx, LockFilter::All)
    }

    pub fn active_locks(&self, ctx: &CancellationToken) -> Result<LockListing> {
        self.list_locks(ctx, LockFilter::Active)
    }

    pub fn expired_locks(&self, ctx: &CancellationToken) -> Result<LockListing> {
        self.list_locks(ctx, LockFilter::Expired)
    }

    /// Pushes the expiry of the row fenced by `token` to `now + lease`.
    pub(crate) fn renew(&self, ctx: &CancellationToken, key: &str, token: &str) -> Result<Renewal> {
        let expires_at = self.clock.now() + self.lease_delta;
        let changes = expiry_change(expires_at)?;
        match self
            .store
            .update(ctx, &self.table, key, changes, &self.fence(token))
        {
            Ok(()) => Ok(Renewal::Extended(expires_at)),
            Err(StoreError::ConditionFailed) => Ok(Renewal::Superseded),
            Err(err) => Err(LeaseholdError::from_store("renew", key, err)),
        }
    }

    /// Ends the lease fenced by `token` by setting its expiry to now.
    pub(crate) fn void_lease(&self, ctx: &CancellationToken, key: &str, token: &str) -> Result<()> {
        let changes = expiry_change(self.clock.now())?;
        match self
            .store
            .update(ctx, &self.table, key, changes, &self.fence(token))
        {
            Ok(()) => Ok(()),
            Err(StoreError::ConditionFailed) => Err(LeaseholdError::NotHeld {
                key: key.to_string(),
                token: token.to_string(),
                details: "the row was taken over by another acquisition or no longer exists"
                    .to_string(),
            }),
            Err(err) => Err(LeaseholdError::from_store("release", key, err)),
        }
    }

    /// Deletes the row for `key` only if it still carries `token` and has
    /// expired as of `now`. Returns whether a row was removed.
    pub(crate) fn delete_expired(
        &self,
        ctx: &CancellationToken,
        key: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let condition = Condition::All(vec![
            self.fence(token),
            Condition::ExpiresAtOrBefore {
                column: EXPIRES_COLUMN.to_string(),
                at: unix_nanos(now)?,
            },
        ]);
        match self.store.delete(ctx, &self.table, key, &condition) {
            Ok(()) => Ok(true),
            Err(StoreError::ConditionFailed) => Ok(false),
            Err(err) => Err(LeaseholdError::from_store("purge", key, err)),
        }
    }

    fn fence(&self, token: &str) -> Condition {
        Condition::equals(
            self.codec.version_column(),
            AttributeValue::S(token.to_string()),
        )
    }

    fn start_lease(&self, ctx: &CancellationToken, info: LockInfo) -> Result<LockHandle> {
        let stop = ctx.child();
        let lease_context = ctx.child();
        let lease = Arc::new(LeaseState::new(info.expires_at));

        let spawned = HeartbeatTask::spawn(HeartbeatParams {
            manager: self.clone(),
            ctx: ctx.clone(),
            stop: stop.clone(),
            propagation: lease_context.clone(),
            key: info.key.clone(),
            token: info.token.clone(),
            lease: Arc::clone(&lease),
            interval: self.heartbeat_interval,
        });

        match spawned {
            Ok(task) => Ok(LockHandle::new(
                self.clone(),
                info,
                stop,
                lease_context,
                lease,
                task,
            )),
            Err(err) => {
                if let Err(void_err) = self.void_lease(ctx, &info.key, &info.token) {
                    warn!(
                        "Failed to void lock '{}' after heartbeat start failure: {void_err}",
                        info.key
                    );
                }
                Err(err)
            }
        }
    }
}

fn expiry_change(expires_at: DateTime<Utc>) -> Result<Item> {
    let mut changes = Item::new();
    changes.insert(
        EXPIRES_COLUMN.to_string(),
        AttributeValue::N(unix_nanos(expires_at)?),
    );
    Ok(changes)
}

fn attach_key(err: LeaseholdError, key: &str) -> LeaseholdError {
    match err {
        LeaseholdError::MalformedRow { key: None, details } => LeaseholdError::MalformedRow {
            key: Some(key.to_string()),
            details,
        },
        other => other,
    }
}
