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

use crate::error::{LeaseholdError, Result};
use crate::locking::cancellation::CancellationToken;
use crate::locking::heartbeat::{HeartbeatState, HeartbeatTask, LeaseState};
use crate::locking::manager::LockManager;
use crate::locking::row::{LockInfo, Metadata};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::sync::Arc;
use std::time::Instant;

/// A held lease on one lock key.
///
/// The handle keeps a heartbeat thread renewing the lease until
/// [`LockHandle::release`] is called. Work that must not outlive the lease
/// should watch [`LockHandle::lease_context`], which is cancelled when the
/// heartbeat fails.
///
/// Dropping a handle without releasing it stops the heartbeat and cancels the
/// lease context but leaves the row in place; the lease then lapses at its
/// current expiry and another holder may reclaim it.
#[derive(Debug)]
pub struct LockHandle {
    manager: LockManager,
    info: LockInfo,
    stop: CancellationToken,
    lease_context: CancellationToken,
    lease: Arc<LeaseState>,
    heartbeat: Option<HeartbeatTask>,
    acquired: Instant,
    released: bool,
}

impl LockHandle {
    pub(crate) fn new(
        manager: LockManager,
        info: LockInfo,
        stop: CancellationToken,
        lease_context: CancellationToken,
        lease: Arc<LeaseState>,
        heartbeat: HeartbeatTask,
    ) -> Self {
        Self {
            manager,
            info,
            stop,
            lease_context,
            lease,
            heartbeat: Some(heartbeat),
            acquired: Instant::now(),
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.info.key
    }

    /// Fencing token of this acquisition.
    pub fn token(&self) -> &str {
        &self.info.token
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.info.acquired_at
    }

    /// Expiry as of the most recent successful renewal.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.lease.expires_at()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.info.metadata
    }

    pub fn log_ref(&self) -> Option<&str> {
        self.info.log_ref.as_deref()
    }

    pub fn heartbeat_state(&self) -> HeartbeatState {
        self.lease.state()
    }

    /// True while the handle is unreleased and its heartbeat is healthy.
    pub fn is_held(&self) -> bool {
        !self.released && self.lease.state() == HeartbeatState::Running
    }

    /// Cancelled when the lease is lost or the heartbeat fails; never on a
    /// voluntary release.
    pub fn lease_context(&self) -> &CancellationToken {
        &self.lease_context
    }

    /// Snapshot of the lock as this handle currently sees it.
    pub fn info(&self) -> LockInfo {
        let mut info = self.info.clone();
        info.expires_at = self.expires_at();
        info.active = self.is_held();
        info
    }

    /// Stops the heartbeat and voids the lease in the store.
    ///
    /// A heartbeat failure takes priority over the outcome of the store
    /// write. If the write is cancelled or hits a store fault the handle
    /// stays releasable and the call may be repeated. Once the write lands,
    /// or the store reports the lease is no longer ours, further calls
    /// report [`LeaseholdError::NotHeld`] without touching the store.
    pub fn release(&mut self, ctx: &CancellationToken) -> Result<()> {
        if self.released {
            return Err(LeaseholdError::NotHeld {
                key: self.info.key.clone(),
                token: self.info.token.clone(),
                details: "this handle has already been released".to_string(),
            });
        }

        self.lease.mark_released();
        self.stop.cancel();
        let heartbeat = match self.heartbeat.take() {
            Some(task) => task.join(&self.info.key),
            None => Ok(()),
        };

        let voided = self
            .manager
            .void_lease(ctx, &self.info.key, &self.info.token);
        if matches!(voided, Ok(()) | Err(LeaseholdError::NotHeld { .. })) {
            self.released = true;
        }

        match (heartbeat, voided) {
            (Ok(()), Ok(())) => {
                info!(
                    "Released lock '{}' ({}) after {:.3}s",
                    self.info.key,
                    self.info.token,
                    self.acquired.elapsed().as_secs_f64()
                );
                Ok(())
            }
            (Ok(()), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => {
                warn!(
                    "Release of lock '{}' also failed after heartbeat error: {release_err}",
                    self.info.key
                );
                Err(err)
            }
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.lease.mark_released();
        self.stop.cancel();
        self.lease_context.cancel();
        warn!(
            "Lock '{}' ({}) dropped without release; lease lapses at {}",
            self.info.key,
            self.info.token,
            self.lease.expires_at().to_rfc3339()
        );
    }
}
