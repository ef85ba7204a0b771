use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global tracing subscriber for an embedding application.
///
/// `RUST_LOG` wins when set; `default_directives` applies otherwise. With
/// `json` the output is line-delimited JSON for log shippers, matching the
/// plain-text field layout.
pub fn init_logging(default_directives: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }
    Ok(())
}
