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

//! Background lease renewal.
//!
//! Each held lock owns one heartbeat thread. The thread wakes every half
//! lease and pushes the row's expiry forward with a write guarded on the
//! handle's fencing token. It stops when the handle's stop token fires, when
//! the guard fails (the lease was taken over), or on any other store error.
//! Every exit other than a voluntary release cancels the handle's lease
//! context so dependent work can stop.

use crate::error::{LeaseholdError, Result};
use crate::locking::cancellation::CancellationToken;
use crate::locking::manager::{LockManager, Renewal};
use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Lifecycle of a heartbeat. Every state except `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Running,
    /// Stopped after a voluntary release.
    Released,
    /// The fencing guard failed; another acquisition owns the row.
    Lost,
    /// Stopped by a store fault, an interrupted scope or a panic.
    Crashed,
}

/// State shared between a handle and its heartbeat thread.
#[derive(Debug)]
pub(crate) struct LeaseState {
    held: AtomicBool,
    state: Mutex<HeartbeatState>,
    expires_at: Mutex<DateTime<Utc>>,
}

impl LeaseState {
    pub(crate) fn new(expires_at: DateTime<Utc>) -> Self {
        Self {
            held: AtomicBool::new(true),
            state: Mutex::new(HeartbeatState::Running),
            expires_at: Mutex::new(expires_at),
        }
    }

    pub(crate) fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Records that the owner is giving the lock up voluntarily.
    pub(crate) fn mark_released(&self) {
        self.held.store(false, Ordering::SeqCst);
    }

    pub(crate) fn state(&self) -> HeartbeatState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, terminal: HeartbeatState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == HeartbeatState::Running {
            *state = terminal;
        }
    }

    pub(crate) fn expires_at(&self) -> DateTime<Utc> {
        *self.expires_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn extend(&self, expires_at: DateTime<Utc>) {
        let mut current = self
            .expires_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if expires_at > *current {
            *current = expires_at;
        }
    }
}

pub(crate) struct HeartbeatParams {
    pub manager: LockManager,
    /// Caller scope the lock was acquired under; store calls honour it.
    pub ctx: CancellationToken,
    /// Fired by release (or by cancellation of `ctx`).
    pub stop: CancellationToken,
    /// Handed to dependents; cancelled when the heartbeat fails.
    pub propagation: CancellationToken,
    pub key: String,
    pub token: String,
    pub lease: Arc<LeaseState>,
    pub interval: Duration,
}

#[derive(Debug)]
pub(crate) struct HeartbeatTask {
    join: JoinHandle<Result<()>>,
}

impl HeartbeatTask {
    pub(crate) fn spawn(params: HeartbeatParams) -> Result<Self> {
        let join = thread::Builder::new()
            .name("leasehold-heartbeat".to_string())
            .spawn(move || run(params))?;
        Ok(Self { join })
    }

    /// Waits for the thread to exit and returns its outcome.
    pub(crate) fn join(self, key: &str) -> Result<()> {
        match self.join.join() {
            Ok(result) => result,
            Err(payload) => Err(LeaseholdError::HeartbeatPanicked {
                key: key.to_string(),
                details: panic_message(payload.as_ref()),
            }),
        }
    }
}

fn run(params: HeartbeatParams) -> Result<()> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| beat(&params)));
    let result = match outcome {
        Ok(result) => result,
        Err(payload) => Err(LeaseholdError::HeartbeatPanicked {
            key: params.key.clone(),
            details: panic_message(payload.as_ref()),
        }),
    };

    match &result {
        Ok(()) => params.lease.finish(HeartbeatState::Released),
        Err(LeaseholdError::LeaseLost { .. }) => params.lease.finish(HeartbeatState::Lost),
        Err(_) => params.lease.finish(HeartbeatState::Crashed),
    }

    if let Err(err) = &result {
        warn!("Heartbeat for lock '{}' stopped: {err}", params.key);
        params.propagation.cancel();
    }
    result
}

fn beat(params: &HeartbeatParams) -> Result<()> {
    let HeartbeatParams {
        manager,
        ctx,
        stop,
        key,
        token,
        lease,
        interval,
        ..
    } = params;

    loop {
        if stop.wait_timeout(*interval) {
            if lease.is_held() {
                return Err(LeaseholdError::HeartbeatInterrupted {
                    key: key.clone(),
                    token: token.clone(),
                });
            }
            return Ok(());
        }

        debug!("Renewing lease for lock '{key}' ({token})");
        match manager.renew(ctx, key, token)? {
            Renewal::Extended(expires_at) => lease.extend(expires_at),
            Renewal::Superseded => {
                let current = match manager.get_lock(ctx, key) {
                    Ok(current) => current,
                    Err(err) => {
                        warn!("Failed to read current holder of lost lock '{key}': {err}");
                        None
                    }
                };
                let err = LeaseholdError::LeaseLost {
                    key: key.clone(),
                    token: token.clone(),
                    current: current.map(Box::new),
                };
                error!("{err}");
                return Err(err);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_sticky() {
        let lease = LeaseState::new(Utc::now());
        lease.finish(HeartbeatState::Lost);
        lease.finish(HeartbeatState::Released);
        assert_eq!(lease.state(), HeartbeatState::Lost);
    }

    #[test]
    fn expiry_never_moves_backwards() {
        let start = Utc::now();
        let lease = LeaseState::new(start);
        lease.extend(start - chrono::TimeDelta::seconds(5));
        assert_eq!(lease.expires_at(), start);
        lease.extend(start + chrono::TimeDelta::seconds(5));
        assert_eq!(lease.expires_at(), start + chrono::TimeDelta::seconds(5));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload = panic::catch_unwind(|| panic!("renewal exploded")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "renewal exploded");

        let payload = panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "code 7");
    }
}
