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

#![allow(dead_code)]

use assert_cmd::Command;
use leasehold::config::{HolderConfig, LeaseholdConfig};
use leasehold::locking::LockManager;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Isolated `LEASEHOLD_HOME` removed when dropped.
pub struct TestHome {
    dir: TempDir,
}

impl TestHome {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create test home directory"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_config(&self, contents: &str) -> &Self {
        fs::write(self.path().join("config.toml"), contents).expect("Failed to write config.toml");
        self
    }

    /// File-backed configuration for an in-process holder.
    pub fn config(&self, request_id: &str, lease_ms: u64) -> LeaseholdConfig {
        let mut config = LeaseholdConfig {
            home: self.path().to_path_buf(),
            holder: HolderConfig {
                request_id: Some(request_id.to_string()),
                log_ref: Some(format!("https://logs.example/{request_id}")),
            },
            ..Default::default()
        };
        config.lease.duration_ms = lease_ms;
        config
    }

    pub fn manager(&self, request_id: &str, lease_ms: u64) -> LockManager {
        LockManager::from_config(&self.config(request_id, lease_ms))
            .expect("Failed to build lock manager")
    }

    /// The CLI binary pointed at this home.
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("leasehold").expect("leasehold binary not built");
        cmd.env("LEASEHOLD_HOME", self.path())
            .env("LEASEHOLD_HOLDER__REQUEST_ID", "cli-test")
            .env_remove("RUST_LOG");
        cmd
    }
}
