use once_cell::sync::Lazy;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Lazy<()> = Lazy::new(|| {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let fmt_layer = fmt::layer().with_target(false).with_ansi(false).compact();
    // ignore a second init from another test binary in the same process
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
});

pub fn init() {
    Lazy::force(&INIT);
}
