//! Percentile sampling: run a noisy measurement several times and keep one
//! representative reading, instead of trusting any single sample.

/// Returns the index into a slice of length `len` that corresponds to
/// `percentile` (`0.0` = minimum, `1.0` = maximum), rounding to nearest and
/// clamping into range.
fn percentile_index(percentile: f32, len: usize) -> usize {
    debug_assert!(len > 0, "percentile_index called on an empty sample set");
    let idx = (len as f32 * percentile).round() as isize;
    idx.clamp(0, len as isize - 1) as usize
}

/// Sorts `samples` and returns the value at `percentile`.
pub fn percentile<T: PartialOrd + Copy>(percentile: f32, samples: &mut [T]) -> T {
    samples.sort_by(|a, b| a.partial_cmp(b).expect("NaN in sample set"));
    samples[percentile_index(percentile, samples.len())]
}

/// Runs `f` `count` times and returns the `percentile`-th smallest result.
///
/// This is the workhorse noise-reduction primitive used everywhere a single
/// timing measurement would be unreliable: eviction-set calibration, the
/// cycle-timer calibration, and (indirectly, via `Evicter`) every
/// `evict_and_time` call.
pub fn sample<T, F>(percentile_point: f32, count: usize, mut f: F) -> T
where
    T: PartialOrd + Copy,
    F: FnMut() -> T,
{
    let mut samples: Vec<T> = (0..count).map(|_| f()).collect();
    percentile(percentile_point, &mut samples)
}

/// Runs `f` `count` times once, then returns the value at each requested
/// percentile -- avoids re-running `f` per percentile when several are
/// needed from the same batch (e.g. calibrating a hit and a miss threshold
/// from the same timing run).
pub fn sample_many<T, F>(percentiles: &[f32], count: usize, mut f: F) -> Vec<T>
where
    T: PartialOrd + Copy,
    F: FnMut() -> T,
{
    let mut samples: Vec<T> = (0..count).map(|_| f()).collect();
    samples.sort_by(|a, b| a.partial_cmp(b).expect("NaN in sample set"));
    percentiles
        .iter()
        .map(|&p| samples[percentile_index(p, samples.len())])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn percentile_zero_and_one_are_min_and_max() {
        let mut samples = vec![5, 1, 4, 2, 3];
        assert_eq!(percentile(0.0, &mut samples.clone()), 1);
        assert_eq!(percentile(1.0, &mut samples), 5);
    }

    #[test]
    fn percentile_point_five_is_the_median_for_odd_length() {
        let mut samples = vec![10, 30, 20];
        assert_eq!(percentile(0.5, &mut samples), 20);
    }

    #[test]
    fn sample_runs_the_closure_count_times() {
        let mut calls = 0;
        let mut counter = || {
            calls += 1;
            calls
        };
        let result = sample(1.0, 7, &mut counter);
        assert_eq!(calls, 7);
        assert_eq!(result, 7);
    }

    #[test]
    fn sample_many_matches_individual_sample_calls() {
        let values = vec![8, 3, 6, 1, 9, 2, 7, 4, 5];
        let mut iter = values.clone().into_iter();
        let many = sample_many(&[0.0, 0.5, 1.0], values.len(), || iter.next().unwrap());

        let one = |p: f32| {
            let mut v = values.clone();
            percentile(p, &mut v)
        };
        assert_eq!(many, vec![one(0.0), one(0.5), one(1.0)]);
    }
}
