use crate::hw::config;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install a global `fmt` subscriber. Debug output is enabled with
/// `MAOLAN_COREAUDIO_LOG=1`. Calling this more than once is harmless; only
/// the first call installs anything.
pub fn init() {
    let level = if config::env_flag(config::LOG_ENV) {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_thread_names(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
