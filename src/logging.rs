use std::str::FromStr;

/// Initialise `env_logger` once; `RUST_LOG` overrides the configured level.
pub fn init_logging(level: &str) {
    let filter = log::LevelFilter::from_str(level).unwrap_or(log::LevelFilter::Info);

    let result = env_logger::Builder::new()
        .filter_level(filter)
        .parse_default_env()
        .try_init();

    match result {
        Ok(()) => log::info!("Logging initialised at {}", filter),
        Err(_) => log::debug!("Logger already initialised"),
    }
}
