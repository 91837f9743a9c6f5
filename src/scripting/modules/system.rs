//! System utilities for scripts
//!
//! Scripts run on a blocking thread, so `random_delay` may sleep the thread
//! directly without stalling the async runtime.

use rune::alloc::String as RuneString;
use rune::{ContextError, Module};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::delay::DelayStrategy;

/// Longest sleep a script may request (5 minutes)
const MAX_DELAY_MS: i64 = 300_000;

/// Create the system module
pub fn module() -> Result<Module, ContextError> {
    let mut module = Module::with_crate("system")?;

    module.function("random_delay", random_delay).build()?;
    module.function("timestamp_now", timestamp_now).build()?;
    module.function("now_ms", now_ms).build()?;

    Ok(module)
}

/// Sleep a uniform random duration in `[min_ms, max_ms]`; returns the
/// milliseconds slept.
fn random_delay(min_ms: i64, max_ms: i64) -> i64 {
    let min = min_ms.clamp(0, MAX_DELAY_MS) as u64;
    let max = max_ms.clamp(0, MAX_DELAY_MS) as u64;
    let duration = DelayStrategy::range(min, max).sample();
    std::thread::sleep(duration);
    duration.as_millis() as i64
}

/// Local time, ISO 8601 with microseconds
fn timestamp_now() -> RuneString {
    let now = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
    RuneString::try_from(now).unwrap_or_default()
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
