pub mod config;
pub mod error;
pub mod response;
pub mod storage;
pub mod locks;
pub mod identity;
pub mod transport;
pub mod health;
pub mod classify;
pub mod session;
pub mod telemetry;
pub mod client;
pub mod dispatch;
pub mod command;
pub mod logging;

#[cfg(test)]
mod test_support;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult, ErrorKind};
pub use identity::Principal;
pub use response::Response;
pub use session::{Session, SessionManager};

// Test-only printing helper: expands to eprintln! during tests and debug builds.
// Usage in tests: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In release builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        if false { let _ = format!($($arg)*); }
    });
}
