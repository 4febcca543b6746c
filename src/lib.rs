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

//! Lease-based distributed locks arbitrated by a conditional-write store.
//!
//! ```no_run
//! use leasehold::config::new_leasehold_config;
//! use leasehold::locking::{CancellationToken, LockAttempt, LockManager, Metadata};
//!
//! # fn main() -> leasehold::error::Result<()> {
//! let manager = LockManager::from_config(&new_leasehold_config()?)?;
//! let ctx = CancellationToken::new();
//! match manager.acquire(&ctx, "nightly-report", Metadata::new())? {
//!     LockAttempt::Acquired(mut handle) => {
//!         // ... work, watching handle.lease_context() ...
//!         handle.release(&ctx)?;
//!     }
//!     LockAttempt::Contended(holder) => println!("held by {}", holder.token),
//! }
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod locking;
pub mod logging;
pub mod store;
