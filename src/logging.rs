use env_logger;

/// Initialize the logger with the specified verbosity level
///
/// # Arguments
/// * `verbose` - Verbosity level (0=warn, 1=info, 2=debug, 3+=trace)
///
/// `RUST_LOG` takes precedence over the verbosity flag when set.
pub fn setup_logger(verbose: u8) {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(filter_for_verbosity(verbose)),
    )
    .format_timestamp(None)
    .format_module_path(false)
    .format_target(false)
    .init();
}

fn filter_for_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "leasehold=warn",
        1 => "leasehold=info",
        2 => "leasehold=debug",
        _ => "leasehold=trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_filters() {
        assert_eq!(filter_for_verbosity(0), "leasehold=warn");
        assert_eq!(filter_for_verbosity(2), "leasehold=debug");
        assert_eq!(filter_for_verbosity(9), "leasehold=trace");
    }
}
