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

//! Fencing token generation.
//!
//! A token is `<holder-id>-<sequence>`. The sequence is a per-key counter
//! local to this registry, so uniqueness across processes depends entirely on
//! holder ids being distinct.

use crate::config::HolderConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Identifies the process (or invocation) acquiring locks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolderIdentity {
    id: String,
    log_ref: Option<String>,
}

impl HolderIdentity {
    /// Identity tied to an execution-environment request id.
    pub fn from_request(request_id: impl Into<String>, log_ref: Option<String>) -> Self {
        Self {
            id: request_id.into(),
            log_ref,
        }
    }

    /// Identity for a plain process run, using a random run id.
    pub fn local() -> Self {
        Self {
            id: format!("local/{}", Uuid::new_v4().hyphenated()),
            log_ref: None,
        }
    }

    pub fn from_config(config: &HolderConfig) -> Self {
        let identity = match config.request_id.as_deref().map(str::trim) {
            Some(request_id) if !request_id.is_empty() => {
                Self::from_request(request_id, None)
            }
            _ => Self::local(),
        };
        identity.with_log_ref(config.log_ref.clone())
    }

    pub fn with_log_ref(mut self, log_ref: Option<String>) -> Self {
        self.log_ref = log_ref.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn log_ref(&self) -> Option<&str> {
        self.log_ref.as_deref()
    }
}

/// Per-key monotonically increasing counters, created lazily.
#[derive(Debug, Default)]
pub struct FencingCounter {
    counters: Mutex<HashMap<String, Arc<AtomicU64>>>,
}

impl FencingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next sequence number for `key`, starting at zero.
    pub fn next(&self, key: &str) -> u64 {
        let counter = {
            let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(counters.entry(key.to_string()).or_default())
        };
        counter.fetch_add(1, Ordering::SeqCst)
    }
}

/// Application-scoped context shared by every lock manager that acquires on
/// behalf of one holder.
#[derive(Debug)]
pub struct LockRegistry {
    holder: HolderIdentity,
    counters: FencingCounter,
}

impl LockRegistry {
    pub fn new(holder: HolderIdentity) -> Self {
        Self {
            holder,
            counters: FencingCounter::new(),
        }
    }

    pub fn holder(&self) -> &HolderIdentity {
        &self.holder
    }

    pub fn next_token(&self, key: &str) -> String {
        format!("{}-{}", self.holder.id, self.counters.next(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn tokens_count_per_key() {
        let registry = LockRegistry::new(HolderIdentity::from_request("req-1", None));
        assert_eq!(registry.next_token("a"), "req-1-0");
        assert_eq!(registry.next_token("a"), "req-1-1");
        assert_eq!(registry.next_token("b"), "req-1-0");
        assert_eq!(registry.next_token("a"), "req-1-2");
    }

    #[test]
    fn local_identity_is_random_per_run() {
        let first = HolderIdentity::local();
        let second = HolderIdentity::local();
        assert!(first.id().starts_with("local/"));
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn config_prefers_request_id() {
        let config = HolderConfig {
            request_id: Some("8f1c-request".to_string()),
            log_ref: Some("https://logs.example/8f1c".to_string()),
        };
        let identity = HolderIdentity::from_config(&config);
        assert_eq!(identity.id(), "8f1c-request");
        assert_eq!(identity.log_ref(), Some("https://logs.example/8f1c"));

        let blank = HolderConfig {
            request_id: Some("  ".to_string()),
            log_ref: Some(String::new()),
        };
        let identity = HolderIdentity::from_config(&blank);
        assert!(identity.id().starts_with("local/"));
        assert_eq!(identity.log_ref(), None);
    }

    #[test]
    fn concurrent_increments_never_repeat() {
        let counter = FencingCounter::new();
        let seen: HashSet<u64> = thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| (0..250).map(|_| counter.next("job")).collect::<Vec<_>>()))
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect()
        });
        assert_eq!(seen.len(), 1000);
        assert_eq!(counter.next("job"), 1000);
    }
}
