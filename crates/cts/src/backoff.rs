//! Full-jitter exponential backoff, shared by the view fetch loop, the
//! driver's apply retry, and the handler chain's retry. Each caller
//! supplies its own base/cap/max-attempts; this just computes the
//! delay for a given attempt number.

use std::time::Duration;

use rand::Rng;

/// `attempt` is 1-based. Returns `min(cap, base * 2^(attempt-1))`
/// scaled by a uniform random factor in `[0, 1)` ("full jitter"),
/// the way AWS's backoff write-up recommends: avoids every failed
/// caller retrying in lockstep.
pub fn full_jitter(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exp = 1u64 << attempt.saturating_sub(1).min(20);
    let capped = base.saturating_mul(exp as u32).min(cap);
    let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
    Duration::from_secs_f64(capped.as_secs_f64() * jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_cap() {
        for attempt in 1..30 {
            let d = full_jitter(Duration::from_millis(250), Duration::from_secs(60), attempt);
            assert!(d <= Duration::from_secs(60));
        }
    }

    #[test]
    fn attempt_one_is_bounded_by_base() {
        for _ in 0..100 {
            let d = full_jitter(Duration::from_millis(250), Duration::from_secs(60), 1);
            assert!(d <= Duration::from_millis(250));
        }
    }
}
