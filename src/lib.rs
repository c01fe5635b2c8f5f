pub mod error;
pub mod config;
pub mod extract;
pub mod claims;
pub mod cache;
pub mod scope;
pub mod verifier;
pub mod resolver;
pub mod server;
pub mod broker;

// Test-only printing helper: expands to tprintln! during tests and is absent otherwise.
// Usage in tests: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In non-test builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        // Preserve formatting checks in release without producing code
        if false { let _ = format!($($arg)*); }
    });
}

/// Current time as epoch milliseconds. All validity-window comparisons in this
/// crate are strict against this clock: `now >= expires_at` means expired.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
