use std::time::Duration;

pub const DETACH_QUIESCENCE_ENV: &str = "MAOLAN_COREAUDIO_DETACH_QUIESCENCE_MS";
pub const LOG_ENV: &str = "MAOLAN_COREAUDIO_LOG";

pub fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let s = v.trim().to_ascii_lowercase();
            s == "1" || s == "true" || s == "yes" || s == "on"
        })
        .unwrap_or(false)
}

/// Read a millisecond duration from the environment. Unset or unparsable
/// values yield `None`.
pub fn env_millis(key: &str) -> Option<Duration> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!("Ignoring {key}={raw:?}: expected integer milliseconds");
            None
        }
    }
}
