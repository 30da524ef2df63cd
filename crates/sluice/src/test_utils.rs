use tracing_subscriber::EnvFilter;

/// Initialize tracing for tests, honouring `RUST_LOG` and defaulting to
/// debug output for this crate only.
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sluice=debug")),
        )
        .with_test_writer()
        .try_init();
}
