use crate::Result;

/// Initialize logging/tracing for the bridge.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    // Default: info for our crates, warn for everything else.
    // Can be overridden with `RUST_LOG`.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(service_name)));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(true)
        .init();

    Ok(())
}

fn default_filter(service_name: &str) -> String {
    format!("warn,msb_core=info,{service_name}=info")
}
