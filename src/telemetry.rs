use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// JSON logs on stdout, filtered by `RUST_LOG` (default `info`).
///
/// Records emitted through the `log` crate are forwarded as well.
pub fn init_telemetry() {
    let formatting_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .json();

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter())
        .with(formatting_layer)
        .try_init()
    {
        eprintln!("Telemetry already initialised: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_initialisation_does_not_panic() {
        init_telemetry();
        init_telemetry();
    }

    #[test]
    fn test_default_filter_parses() {
        assert_eq!(EnvFilter::new(DEFAULT_FILTER).to_string(), "info");
    }
}
