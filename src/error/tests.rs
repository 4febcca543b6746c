use crate::error::*;
use crate::locking::{LockInfo, Metadata};
use crate::store::StoreError;
use chrono::{DateTime, TimeDelta};

fn holder() -> LockInfo {
    let acquired_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    LockInfo {
        key: "nightly".to_string(),
        token: "req-77-3".to_string(),
        acquired_at,
        expires_at: acquired_at + TimeDelta::seconds(20),
        log_ref: Some("https://logs.example/req-77".to_string()),
        metadata: Metadata::new(),
        active: true,
    }
}

#[test]
fn test_error_context_lease_lost_names_both_tokens() {
    let error = LeaseholdError::LeaseLost {
        key: "nightly".to_string(),
        token: "local/abc-0".to_string(),
        current: Some(Box::new(holder())),
    };
    let context = ErrorContext::new(&error);

    let details = context.details.unwrap();
    assert!(details.contains("Our token: local/abc-0"));
    assert!(details.contains("Current token: req-77-3"));
    assert!(details.contains("https://logs.example/req-77"));
    assert!(context.suggestion.is_some());
}

#[test]
fn test_lease_lost_message_without_current_row() {
    let error = LeaseholdError::LeaseLost {
        key: "nightly".to_string(),
        token: "local/abc-0".to_string(),
        current: None,
    };
    assert_eq!(
        error.to_string(),
        "Lease on lock 'nightly' was lost (row no longer exists)"
    );
}

#[test]
fn test_error_context_lock_unavailable() {
    let error = LeaseholdError::LockUnavailable {
        key: "nightly".to_string(),
        holder: Box::new(holder()),
    };
    assert_eq!(error.to_string(), "Lock 'nightly' is held by req-77-3");

    let context = ErrorContext::new(&error);
    assert!(context.details.unwrap().contains("Holder logs:"));
    assert!(context.suggestion.unwrap().contains("Retry"));
}

#[test]
fn test_malformed_row_message() {
    let keyed = LeaseholdError::MalformedRow {
        key: Some("nightly".to_string()),
        details: "no LockVersion field in lock row".to_string(),
    };
    assert_eq!(
        keyed.to_string(),
        "Malformed lock row 'nightly': no LockVersion field in lock row"
    );

    let anonymous = LeaseholdError::MalformedRow {
        key: None,
        details: "no LockKey field in lock row".to_string(),
    };
    assert_eq!(
        anonymous.to_string(),
        "Malformed lock row: no LockKey field in lock row"
    );
}

#[test]
fn test_from_store_keeps_cancellation_distinct() {
    let cancelled = LeaseholdError::from_store("renew", "nightly", StoreError::Cancelled);
    assert!(matches!(
        cancelled,
        LeaseholdError::Cancelled {
            operation: "renew",
            ..
        }
    ));

    let fault = LeaseholdError::from_store(
        "renew",
        "nightly",
        StoreError::Backend("throttled".to_string()),
    );
    assert!(matches!(fault, LeaseholdError::Store { .. }));
    assert!(std::error::Error::source(&fault).is_some());
}

#[test]
fn test_config_error_conversion() {
    let error: LeaseholdError = config::ConfigError::Message("bad value".to_string()).into();
    assert!(matches!(error, LeaseholdError::ConfigError(_)));
}

#[test]
fn test_exit_codes() {
    assert_eq!(
        get_exit_code(&LeaseholdError::InvalidConfig("x".to_string())),
        2
    );
    assert_eq!(
        get_exit_code(&LeaseholdError::LockUnavailable {
            key: "nightly".to_string(),
            holder: Box::new(holder()),
        }),
        75
    );
    assert_eq!(
        get_exit_code(&LeaseholdError::Cancelled {
            operation: "run",
            key: "nightly".to_string(),
        }),
        130
    );
    assert_eq!(
        get_exit_code(&LeaseholdError::AcquireRace {
            key: "nightly".to_string(),
            attempts: 3,
        }),
        1
    );
    assert_eq!(
        get_exit_code(&LeaseholdError::TimestampOutOfRange {
            timestamp: "+262143-12-31T23:59:59Z".to_string(),
        }),
        1
    );
}

#[test]
fn test_timestamp_out_of_range_points_at_clock() {
    let error = LeaseholdError::TimestampOutOfRange {
        timestamp: "+262143-12-31T23:59:59Z".to_string(),
    };
    assert!(error.to_string().contains("Unix nanoseconds"));
    let context = ErrorContext::new(&error);
    assert!(context.suggestion.unwrap().contains("system clock"));
}

#[test]
fn test_format_error_chain() {
    let error = LeaseholdError::NotHeld {
        key: "nightly".to_string(),
        token: "local/abc-1".to_string(),
        details: "this handle has already been released".to_string(),
    };
    let formatted = format_error_chain(&error);

    assert!(formatted.starts_with("Error: Lock 'nightly' is not currently held"));
    assert!(formatted.contains("Details: Token presented: local/abc-1"));
    assert!(formatted.contains("Suggestion:"));
}
