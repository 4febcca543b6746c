use crate::error::LeaseholdError;

pub fn get_exit_code(error: &LeaseholdError) -> i32 {
    match error {
        LeaseholdError::InvalidConfig(_) | LeaseholdError::ConfigError(_) => 2,

        LeaseholdError::LeaseLost { .. } => 3,

        LeaseholdError::NotHeld { .. } => 4,

        LeaseholdError::Store { .. } => 20,

        LeaseholdError::MalformedRow { .. } => 65,

        LeaseholdError::LockUnavailable { .. } => 75, // EX_TEMPFAIL

        LeaseholdError::Cancelled { .. } => 130,

        _ => 1,
    }
}
