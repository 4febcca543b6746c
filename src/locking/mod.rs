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

//! Lease-based distributed mutual exclusion.
//!
//! A [`LockManager`] arbitrates ownership of keys through conditional writes
//! to a [`crate::store::LockStore`]. Each successful acquisition yields a
//! [`LockHandle`] whose heartbeat keeps the lease alive until release.

pub mod cancellation;
pub mod clock;
pub mod fencing;
pub mod handle;
pub mod heartbeat;
pub mod hygiene;
pub mod manager;
pub mod row;

pub use cancellation::{CancellationToken, global_token};
pub use clock::{Clock, ManualClock, SystemClock};
pub use fencing::{FencingCounter, HolderIdentity, LockRegistry};
pub use handle::LockHandle;
pub use heartbeat::HeartbeatState;
pub use hygiene::{LockHygieneReport, LockHygieneRunner};
pub use manager::{LockAttempt, LockFilter, LockListing, LockManager, RowFailure};
pub use row::{LockInfo, Metadata, RowCodec};
