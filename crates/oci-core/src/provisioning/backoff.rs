//! Decorrelated-jitter exponential backoff (§4.5.2) and the
//! inter-availability-domain sleep.

use rand::Rng;

pub const MAX_CYCLES: u32 = 5000;
pub const MAX_ERROR_CYCLES: u32 = 5;
pub const MAX_BACKOFF_ATTEMPTS: u32 = 9;
pub const BASE_BACKOFF_SECS: u64 = 2;
pub const MAX_BACKOFF_SECS: u64 = 300;
pub const DECORRELATED_JITTER_SECS: u64 = 1;
pub const INTER_AD_MIN_SECS: u64 = 1;
pub const INTER_AD_MAX_SECS: u64 = 5;

/// `sleep = min(BASE_BACKOFF * 2^exp + jitter, MAX_BACKOFF)` where `exp =
/// min(backoff_attempts, MAX_BACKOFF_ATTEMPTS)` and jitter is a uniform
/// draw from `[0, DECORRELATED_JITTER]`.
pub fn compute_adaptive_sleep(backoff_attempts: u32, rng: &mut impl Rng) -> u64 {
    let exp = backoff_attempts.min(MAX_BACKOFF_ATTEMPTS);
    let base = BASE_BACKOFF_SECS.saturating_mul(2u64.saturating_pow(exp));
    let jitter = rng.gen_range(0..=DECORRELATED_JITTER_SECS);
    base.saturating_add(jitter).min(MAX_BACKOFF_SECS)
}

/// Update `backoff_attempts` after a cycle: increments (saturating at
/// [`MAX_BACKOFF_ATTEMPTS`]) if any AD was throttled this cycle,
/// otherwise decrements (floored at 0).
pub fn update_backoff_attempts(backoff_attempts: u32, throttled: bool) -> u32 {
    if throttled {
        (backoff_attempts + 1).min(MAX_BACKOFF_ATTEMPTS)
    } else {
        backoff_attempts.saturating_sub(1)
    }
}

/// Uniform random sleep duration (seconds) between AD attempts within a
/// cycle, per §4.5.
pub fn inter_ad_sleep_secs(rng: &mut impl Rng) -> u64 {
    rng.gen_range(INTER_AD_MIN_SECS..=INTER_AD_MAX_SECS)
}
