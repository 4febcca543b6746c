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

//! Removal of expired lock rows.
//!
//! Acquisition overwrites expired rows in place and never deletes them, so a
//! table keeps one row for every key ever locked. The hygiene runner sweeps
//! expired rows and deletes each one with a write guarded on both its fencing
//! token and its expiry, which leaves rows re-acquired mid-sweep untouched.

use crate::error::{LeaseholdError, Result};
use crate::locking::cancellation::CancellationToken;
use crate::locking::manager::{LockFilter, LockManager};
use log::{debug, info, warn};
use std::time::{Duration, Instant};

/// Summary of a hygiene sweep.
#[derive(Debug, Default, Clone)]
pub struct LockHygieneReport {
    pub scanned: usize,
    pub removed: usize,
    /// Rows that changed hands (or were renewed) before they could be removed.
    pub skipped: usize,
    /// Rows that failed to decode or delete.
    pub errors: usize,
    pub duration: Duration,
}

/// Deletes expired lock rows from one table.
#[derive(Debug, Clone)]
pub struct LockHygieneRunner {
    manager: LockManager,
    dry_run: bool,
}

impl LockHygieneRunner {
    pub fn new(manager: LockManager) -> Self {
        Self {
            manager,
            dry_run: false,
        }
    }

    /// Reports what would be removed without deleting anything.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn run(&self, ctx: &CancellationToken) -> Result<LockHygieneReport> {
        let start = Instant::now();
        let mut report = LockHygieneReport::default();

        let listing = self.manager.list_locks(ctx, LockFilter::Expired)?;
        report.errors += listing.failures.len();
        let now = self.manager.now();

        for (key, lock) in &listing.locks {
            report.scanned += 1;
            if self.dry_run {
                debug!("Would remove expired lock '{key}' ({})", lock.token);
                report.removed += 1;
                continue;
            }

            match self.manager.delete_expired(ctx, key, &lock.token, now) {
                Ok(true) => {
                    debug!("Removed expired lock '{key}' ({})", lock.token);
                    report.removed += 1;
                }
                Ok(false) => {
                    debug!("Lock '{key}' changed since it was scanned; leaving it");
                    report.skipped += 1;
                }
                Err(err @ LeaseholdError::Cancelled { .. }) => return Err(err),
                Err(err) => {
                    warn!("Failed to remove expired lock '{key}': {err}");
                    report.errors += 1;
                }
            }
        }

        report.duration = start.elapsed();
        info!(
            "Lock hygiene on '{}' {} {} of {} expired row(s) ({} skipped, {} error(s)) in {:.3}s",
            self.manager.table_name(),
            if self.dry_run { "would remove" } else { "removed" },
            report.removed,
            report.scanned,
            report.skipped,
            report.errors,
            report.duration.as_secs_f64()
        );
        Ok(report)
    }
}
