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

use log::{debug, warn};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::thread;
use std::time::Duration;

/// Cancellation scope shared between a caller and the work it starts.
///
/// Tokens form a tree: cancelling a token cancels every child derived from
/// it, while cancelling a child leaves the parent untouched. Waiters block on
/// a condition variable so a cancelled token wakes them immediately.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct State {
    cancelled: bool,
    children: Vec<Weak<Inner>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
        }
    }

    /// Derives a token that is cancelled together with this one.
    pub fn child(&self) -> Self {
        let child = Self::new();
        let mut state = lock(&self.inner);
        if state.cancelled {
            drop(state);
            child.cancel();
        } else {
            state.children.retain(|weak| weak.strong_count() > 0);
            state.children.push(Arc::downgrade(&child.inner));
        }
        child
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.inner).cancelled
    }

    pub fn cancel(&self) {
        cancel_inner(&self.inner);
    }

    /// Blocks until the token is cancelled or `timeout` elapses. Returns
    /// `true` when the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = lock(&self.inner);
        let (state, _) = self
            .inner
            .changed
            .wait_timeout_while(state, timeout, |state| !state.cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        state.cancelled
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(inner: &Inner) -> MutexGuard<'_, State> {
    inner.state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cancel_inner(inner: &Arc<Inner>) {
    let children = {
        let mut state = lock(inner);
        if state.cancelled {
            return;
        }
        state.cancelled = true;
        std::mem::take(&mut state.children)
    };
    inner.changed.notify_all();

    for child in children {
        if let Some(child) = child.upgrade() {
            cancel_inner(&child);
        }
    }
}

static GLOBAL_TOKEN: OnceLock<CancellationToken> = OnceLock::new();

/// Returns a token cancelled on SIGINT or SIGTERM.
pub fn global_token() -> CancellationToken {
    GLOBAL_TOKEN.get_or_init(register_signals).clone()
}

fn register_signals() -> CancellationToken {
    let token = CancellationToken::new();
    match Signals::new([SIGINT, SIGTERM]) {
        Ok(mut signals) => {
            let notify = token.clone();
            let spawned = thread::Builder::new()
                .name("leasehold-signals".to_string())
                .spawn(move || {
                    if let Some(signal) = signals.forever().next() {
                        debug!("Received signal {signal}; cancelling outstanding work");
                        notify.cancel();
                    }
                });
            if let Err(err) = spawned {
                warn!("Failed to start signal listener: {err}");
            }
        }
        Err(err) => warn!("Failed to register cancellation signal handlers: {err}"),
    }
    token
}
