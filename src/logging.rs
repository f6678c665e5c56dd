//! Logging bootstrap and log-safe rendering of commands.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing_subscriber::{fmt, EnvFilter};

/// Longest command text written to a log line.
pub const MAX_LOGGED_COMMAND: usize = 1000;

static PASSWORD_ARG: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"password\s+\S+").ok());

/// Install the global subscriber. `RUST_LOG` wins; otherwise `default_directive` (e.g. `info`).
/// Calling it twice is harmless.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// Replace `password <value>` with a fixed mask.
pub fn mask_password(command: &str) -> String {
    match PASSWORD_ARG.as_ref() {
        Some(re) if command.contains("password") => re.replace_all(command, "password ********").into_owned(),
        _ => command.to_string(),
    }
}

/// Masked command cut to `MAX_LOGGED_COMMAND` characters.
pub fn loggable_command(command: &str) -> String {
    mask_password(command).chars().take(MAX_LOGGED_COMMAND).collect()
}
