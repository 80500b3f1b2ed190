use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.  `RUST_LOG` overrides the
/// default filter.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("sigil_client=debug,sigil_sync=debug,sigil_search=info,sigil_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
