//! Capped exponential backoff, applied to `schedule_at` when a task re-enters
//! `PENDING` after a failure. The dispatcher never sleeps for this; it only
//! adjusts the row's `schedule_at`.

/// `backoff(k) = min(base_delay * multiplier^k, max_delay)`, all in seconds
/// in, milliseconds out. `k` is zero-based: the delay applied when a task is
/// promoted to its `k+1`-th attempt.
pub fn backoff_ms(k: u32, base_delay_secs: f64, multiplier: f64, max_delay_secs: f64) -> i64 {
    let delay_secs = (base_delay_secs * multiplier.powi(k as i32)).min(max_delay_secs);
    (delay_secs * 1000.0) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_reference_values_at_first_attempt() {
        // base=60s, multiplier=2.0, max=3600s
        assert_eq!(backoff_ms(0, 60.0, 2.0, 3600.0), 60_000);
        assert_eq!(backoff_ms(1, 60.0, 2.0, 3600.0), 120_000);
        assert_eq!(backoff_ms(2, 60.0, 2.0, 3600.0), 240_000);
    }

    #[test]
    fn saturates_at_max_delay() {
        assert_eq!(backoff_ms(20, 60.0, 2.0, 3600.0), 3_600_000);
    }

    #[test]
    fn monotonic_nondecreasing() {
        let mut prev = 0;
        for k in 0..10 {
            let cur = backoff_ms(k, 60.0, 2.0, 3600.0);
            assert!(cur >= prev, "backoff decreased at k={k}");
            prev = cur;
        }
    }
}
