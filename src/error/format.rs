use crate::error::{ErrorContext, LeaseholdError};

pub fn format_error_chain(error: &LeaseholdError) -> String {
    let context = ErrorContext::new(error);
    context.to_string()
}
