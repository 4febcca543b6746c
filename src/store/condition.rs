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

use crate::store::{AttributeValue, Item};

/// Predicate evaluated atomically against the current state of a row.
///
/// `None` stands for an absent row. Comparisons against a missing or
/// mistyped attribute never hold, so a row without an expiry is neither
/// expired nor live. Expiry bounds are Unix nanoseconds; stored expiries are
/// read through [`normalize_unix_nanos`] before comparing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    NotExists,
    Equals { column: String, value: AttributeValue },
    ExpiresAtOrBefore { column: String, at: i64 },
    ExpiresAfter { column: String, at: i64 },
    Any(Vec<Condition>),
    All(Vec<Condition>),
}

impl Condition {
    pub fn equals(column: impl Into<String>, value: AttributeValue) -> Self {
        Condition::Equals {
            column: column.into(),
            value,
        }
    }

    pub fn matches(&self, current: Option<&Item>) -> bool {
        match self {
            Condition::NotExists => current.is_none(),
            Condition::Equals { column, value } => {
                current.and_then(|item| item.get(column)) == Some(value)
            }
            Condition::ExpiresAtOrBefore { column, at } => {
                numeric(current, column).is_some_and(|expires| expires <= *at)
            }
            Condition::ExpiresAfter { column, at } => {
                numeric(current, column).is_some_and(|expires| expires > *at)
            }
            Condition::Any(conditions) => conditions.iter().any(|c| c.matches(current)),
            Condition::All(conditions) => conditions.iter().all(|c| c.matches(current)),
        }
    }
}

fn numeric(current: Option<&Item>, column: &str) -> Option<i64> {
    current
        .and_then(|item| item.get(column))
        .and_then(AttributeValue::as_number)
        .and_then(normalize_unix_nanos)
}

/// Converts a Unix timestamp in seconds, milliseconds, microseconds or
/// nanoseconds to nanoseconds, picking the unit by magnitude.
///
/// Returns `None` when the value does not fit in `i64` nanoseconds.
pub fn normalize_unix_nanos(value: i64) -> Option<i64> {
    const SECONDS_LIMIT: u64 = i32::MAX as u64;
    let magnitude = value.unsigned_abs();
    let scale = if magnitude <= SECONDS_LIMIT {
        1_000_000_000
    } else if magnitude <= 1_000 * SECONDS_LIMIT {
        1_000_000
    } else if magnitude <= 10_000_000 * SECONDS_LIMIT {
        1_000
    } else {
        1
    };
    value.checked_mul(scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: i64 = 1_700_000_000_000_000_000;

    fn row(expires: i64, token: &str) -> Item {
        let mut item = Item::new();
        item.insert("Expires".to_string(), AttributeValue::N(expires));
        item.insert("Version".to_string(), AttributeValue::S(token.to_string()));
        item
    }

    #[test]
    fn not_exists_only_matches_absent_rows() {
        assert!(Condition::NotExists.matches(None));
        assert!(!Condition::NotExists.matches(Some(&row(T, "a"))));
    }

    #[test]
    fn expiry_boundary_counts_as_expired() {
        let item = row(T + 10, "a");
        let expired_at_10 = Condition::ExpiresAtOrBefore {
            column: "Expires".to_string(),
            at: T + 10,
        };
        let live_at_10 = Condition::ExpiresAfter {
            column: "Expires".to_string(),
            at: T + 10,
        };
        assert!(expired_at_10.matches(Some(&item)));
        assert!(!live_at_10.matches(Some(&item)));
        assert!(live_at_10.matches(Some(&row(T + 11, "a"))));
    }

    #[test]
    fn missing_or_mistyped_expiry_never_matches() {
        let mut item = row(T, "a");
        item.insert("Expires".to_string(), AttributeValue::S("soon".to_string()));
        let condition = Condition::ExpiresAtOrBefore {
            column: "Expires".to_string(),
            at: T + 100,
        };
        assert!(!condition.matches(Some(&item)));
        assert!(!condition.matches(None));
    }

    #[test]
    fn combinators_compose() {
        let acquire = Condition::Any(vec![
            Condition::NotExists,
            Condition::ExpiresAtOrBefore {
                column: "Expires".to_string(),
                at: T + 5,
            },
        ]);
        assert!(acquire.matches(None));
        assert!(acquire.matches(Some(&row(T + 5, "a"))));
        assert!(!acquire.matches(Some(&row(T + 6, "a"))));

        let purge = Condition::All(vec![
            Condition::equals("Version", AttributeValue::S("a".to_string())),
            Condition::ExpiresAtOrBefore {
                column: "Expires".to_string(),
                at: T + 5,
            },
        ]);
        assert!(purge.matches(Some(&row(T + 3, "a"))));
        assert!(!purge.matches(Some(&row(T + 3, "b"))));
        assert!(!purge.matches(None));
    }

    #[test]
    fn expiry_in_coarser_units_compares_as_nanoseconds() {
        let now = T;
        let expired = Condition::ExpiresAtOrBefore {
            column: "Expires".to_string(),
            at: now,
        };
        let live = Condition::ExpiresAfter {
            column: "Expires".to_string(),
            at: now,
        };

        // One minute after `now`, in seconds and in milliseconds.
        for future in [1_700_000_060, 1_700_000_060_000] {
            assert!(live.matches(Some(&row(future, "a"))));
            assert!(!expired.matches(Some(&row(future, "a"))));
        }
        // One minute before `now`, in seconds.
        assert!(expired.matches(Some(&row(1_699_999_940, "a"))));
    }

    #[test]
    fn normalize_picks_unit_by_magnitude() {
        assert_eq!(normalize_unix_nanos(1_700_000_000), Some(T));
        assert_eq!(normalize_unix_nanos(1_700_000_000_000), Some(T));
        assert_eq!(normalize_unix_nanos(1_700_000_000_000_000), Some(T));
        assert_eq!(normalize_unix_nanos(T), Some(T));
        assert_eq!(normalize_unix_nanos(20_000_000_000_000_000), None);
    }
}
