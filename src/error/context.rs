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

use crate::error::LeaseholdError;
use std::fmt;

pub struct ErrorContext<'a> {
    pub error: &'a LeaseholdError,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl<'a> ErrorContext<'a> {
    pub fn new(error: &'a LeaseholdError) -> Self {
        let (suggestion, details) = match error {
            LeaseholdError::InvalidConfig(msg) => {
                let suggestion = Some(
                    "Check the [table] and [lease] sections of config.toml and any \
                     LEASEHOLD_* environment variables."
                        .to_string(),
                );
                let details = Some(format!("Validation failed: {msg}"));
                (suggestion, details)
            }
            LeaseholdError::ConfigError(msg) => {
                let suggestion = Some(
                    "Ensure config.toml is valid TOML and numeric settings are integers."
                        .to_string(),
                );
                let details = Some(msg.clone());
                (suggestion, details)
            }
            LeaseholdError::LeaseLost { token, current, .. } => {
                let suggestion = Some(
                    "Another holder took over after the lease lapsed. Work performed under \
                     this lock may have overlapped with the new holder and should be \
                     verified."
                        .to_string(),
                );
                let details = match current.as_deref() {
                    Some(info) => {
                        let mut lines = vec![
                            format!("Our token: {token}"),
                            format!("Current token: {}", info.token),
                            format!("Current expiry: {}", info.expires_at.to_rfc3339()),
                        ];
                        if let Some(log_ref) = &info.log_ref {
                            lines.push(format!("Current holder logs: {log_ref}"));
                        }
                        Some(lines.join("\n"))
                    }
                    None => Some(format!("Our token: {token}")),
                };
                (suggestion, details)
            }
            LeaseholdError::NotHeld { token, .. } => {
                let suggestion = Some(
                    "The lease had already been released or taken over before this release."
                        .to_string(),
                );
                let details = Some(format!("Token presented: {token}"));
                (suggestion, details)
            }
            LeaseholdError::LockUnavailable { holder, .. } => {
                let suggestion =
                    Some("Retry once the current holder releases the lock or its lease expires.".to_string());
                let mut lines = vec![
                    format!("Held by: {}", holder.token),
                    format!("Acquired: {}", holder.acquired_at.to_rfc3339()),
                    format!("Expires: {}", holder.expires_at.to_rfc3339()),
                ];
                if let Some(log_ref) = &holder.log_ref {
                    lines.push(format!("Holder logs: {log_ref}"));
                }
                (suggestion, Some(lines.join("\n")))
            }
            LeaseholdError::MalformedRow { .. } => {
                let suggestion = Some(
                    "The row was not written by a compatible client. Inspect it with \
                     'leasehold list --json' or remove it from the store."
                        .to_string(),
                );
                (suggestion, None)
            }
            LeaseholdError::TimestampOutOfRange { .. } => {
                let suggestion = Some(
                    "Check the system clock and keep lease.duration_ms within a few years."
                        .to_string(),
                );
                (suggestion, None)
            }
            LeaseholdError::Store { source, .. } => {
                let suggestion = Some(
                    "The lock store could not be reached or rejected the request. Retry the \
                     operation; the lock state was not changed."
                        .to_string(),
                );
                let details = Some(source.to_string());
                (suggestion, details)
            }
            LeaseholdError::Cancelled { .. } => {
                let details = Some("The operation was interrupted before it completed.".to_string());
                (None, details)
            }
            _ => (None, None),
        };

        ErrorContext {
            error,
            suggestion,
            details,
        }
    }
}

impl<'a> fmt::Display for ErrorContext<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\n\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}
