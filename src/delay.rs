//! Wait-duration model
//!
//! Four strategies, picked by the call site:
//!
//! - [`DelayStrategy::fixed`]: exact duration (`wait` steps)
//! - [`DelayStrategy::range`]: uniform integer milliseconds in `[min, max]`
//!   (`random_wait` steps, the script `system::random_delay` helper)
//! - [`DelayStrategy::variance`]: `base * (1 + U * variance)` with `U` in
//!   `[0, 1)`; never shorter than `base`, zero when `base <= 0`
//!   (pacing after action steps)
//! - [`DelayStrategy::human`]: Gaussian around 1.5s, sd 0.5s, clamped to
//!   `[0.5s, 3.0s]` (pacing direct device actions)

use rand::Rng;
use std::time::Duration;

pub const DEFAULT_VARIANCE: f64 = 0.15;

const HUMAN_MEAN_MS: f64 = 1500.0;
const HUMAN_STD_DEV_MS: f64 = 500.0;
const HUMAN_MIN_MS: f64 = 500.0;
const HUMAN_MAX_MS: f64 = 3000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DelayStrategy {
    Fixed { ms: u64 },
    Range { min_ms: u64, max_ms: u64 },
    Variance { base_ms: u64, variance: f64 },
    Human { mean_ms: f64, std_dev_ms: f64, min_ms: f64, max_ms: f64 },
}

impl DelayStrategy {
    pub fn fixed(ms: u64) -> Self {
        DelayStrategy::Fixed { ms }
    }

    /// Uniform range. Reversed bounds are swapped rather than rejected.
    pub fn range(min_ms: u64, max_ms: u64) -> Self {
        let (min_ms, max_ms) = if min_ms > max_ms { (max_ms, min_ms) } else { (min_ms, max_ms) };
        DelayStrategy::Range { min_ms, max_ms }
    }

    pub fn variance(base_ms: i64, variance: f64) -> Self {
        let variance = if variance.is_finite() { variance.max(0.0) } else { DEFAULT_VARIANCE };
        DelayStrategy::Variance {
            base_ms: base_ms.max(0) as u64,
            variance,
        }
    }

    pub fn human() -> Self {
        DelayStrategy::Human {
            mean_ms: HUMAN_MEAN_MS,
            std_dev_ms: HUMAN_STD_DEV_MS,
            min_ms: HUMAN_MIN_MS,
            max_ms: HUMAN_MAX_MS,
        }
    }

    /// Draw a duration from the thread-local RNG.
    pub fn sample(&self) -> Duration {
        self.sample_with(&mut rand::rng())
    }

    pub fn sample_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        match *self {
            DelayStrategy::Fixed { ms } => Duration::from_millis(ms),
            DelayStrategy::Range { min_ms, max_ms } => {
                Duration::from_millis(rng.random_range(min_ms..=max_ms))
            }
            DelayStrategy::Variance { base_ms, variance } => {
                if base_ms == 0 {
                    return Duration::ZERO;
                }
                let factor = 1.0 + rng.random::<f64>() * variance;
                millis_f64(base_ms as f64 * factor)
            }
            DelayStrategy::Human { mean_ms, std_dev_ms, min_ms, max_ms } => {
                let ms = gaussian(rng, mean_ms, std_dev_ms).clamp(min_ms, max_ms);
                millis_f64(ms)
            }
        }
    }

    /// Sample and sleep. Returns the duration actually waited.
    pub async fn pause(&self) -> Duration {
        let delay = self.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay
    }
}

fn millis_f64(ms: f64) -> Duration {
    Duration::from_micros((ms.max(0.0) * 1000.0).round() as u64)
}

/// Box-Muller transform over two uniform draws.
fn gaussian<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    // 1 - u keeps the log argument in (0, 1]
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + z * std_dev
}

/// Parse a millisecond value from resolved template text.
///
/// Accepts integers and decimals ("1500", "1500.0", " 250 "). Negative values
/// clamp to zero. Anything else is `None`.
pub fn parse_millis(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    if let Ok(ms) = trimmed.parse::<i64>() {
        return Some(ms.max(0) as u64);
    }
    match trimmed.parse::<f64>() {
        Ok(ms) if ms.is_finite() => Some(ms.max(0.0).round() as u64),
        _ => None,
    }
}
