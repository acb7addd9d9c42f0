//! Progress derivation: accumulated carbon impact vs. the challenge target.

/// Fallback target when a challenge has no usable `target_impact`.
pub const DEFAULT_TARGET_IMPACT: f64 = 100.0;

/// Derive the progress percentage from accumulated carbon savings.
///
/// A non-positive `target_impact` falls back to [`DEFAULT_TARGET_IMPACT`];
/// target validity is a challenge-boundary concern and must never surface
/// here as a division error.  The result is clamped to `0..=100`.
pub fn recompute(carbon_saved: f64, target_impact: f64) -> i64 {
    let target = if target_impact > 0.0 {
        target_impact
    } else {
        DEFAULT_TARGET_IMPACT
    };
    let pct = (carbon_saved / target * 100.0).round() as i64;
    pct.clamp(0, 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_carbon_is_zero_progress() {
        assert_eq!(recompute(0.0, 100.0), 0);
    }

    #[test]
    fn partial_progress_rounds_to_nearest_percent() {
        assert_eq!(recompute(60.0, 100.0), 60);
        assert_eq!(recompute(33.4, 100.0), 33);
        assert_eq!(recompute(12.5, 50.0), 25);
    }

    #[test]
    fn overshoot_clamps_to_one_hundred() {
        assert_eq!(recompute(110.0, 100.0), 100);
        assert_eq!(recompute(1e9, 100.0), 100);
    }

    #[test]
    fn non_positive_target_falls_back_to_default() {
        assert_eq!(recompute(50.0, 0.0), 50);
        assert_eq!(recompute(50.0, -10.0), 50);
    }

    #[test]
    fn monotonic_in_carbon_saved() {
        let mut prev = 0;
        for step in 0..400 {
            let p = recompute(step as f64 * 0.5, 150.0);
            assert!(p >= prev, "progress regressed at step {step}");
            prev = p;
        }
    }
}
