/// Mean squared difference between probabilities and binary outcomes.
///
/// Returns 0 for empty or mismatched inputs.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn brier_score(probabilities: &[f64], outcomes: &[bool]) -> f64 {
    if probabilities.is_empty() || probabilities.len() != outcomes.len() {
        return 0.0;
    }
    probabilities
        .iter()
        .zip(outcomes)
        .map(|(p, &y)| (p - f64::from(u8::from(y))).powi(2))
        .sum::<f64>()
        / probabilities.len() as f64
}

/// Expected calibration error over `bins` equal-width probability bins.
///
/// Bins are half-open `[lo, hi)` except the last, which includes 1.0. Empty
/// bins are skipped; each occupied bin is weighted by its share of samples.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn expected_calibration_error(probabilities: &[f64], outcomes: &[bool], bins: usize) -> f64 {
    if probabilities.is_empty() || probabilities.len() != outcomes.len() || bins == 0 {
        return 0.0;
    }
    let total = probabilities.len() as f64;
    let width = bins as f64;
    let mut ece = 0.0;
    for bin in 0..bins {
        let lo = bin as f64 / width;
        let hi = (bin + 1) as f64 / width;
        let last = bin + 1 == bins;
        let (mut count, mut confidence, mut hits) = (0_usize, 0.0, 0.0);
        for (&p, &y) in probabilities.iter().zip(outcomes) {
            let inside = p >= lo && (p < hi || (last && p <= hi));
            if inside {
                count += 1;
                confidence += p;
                hits += f64::from(u8::from(y));
            }
        }
        if count == 0 {
            continue;
        }
        let n = count as f64;
        ece += (n / total) * (hits / n - confidence / n).abs();
    }
    ece
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brier_of_perfect_forecast_is_zero() {
        assert!(brier_score(&[1.0, 0.0, 1.0], &[true, false, true]).abs() < f64::EPSILON);
        assert!((brier_score(&[0.5, 0.5], &[true, false]) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn ece_weights_bins_by_occupancy() {
        // bin [0.1, 0.2): two samples, mean 0.15, none positive -> gap 0.15
        // bin [0.9, 1.0]: two samples incl. 1.0, mean 0.95, all positive -> gap 0.05
        let probs = [0.1, 0.2 - 1e-9, 0.9, 1.0];
        let outcomes = [false, false, true, true];
        let ece = expected_calibration_error(&probs, &outcomes, 10);
        assert!((ece - (0.5 * 0.15 + 0.5 * 0.05)).abs() < 1e-6);
    }

    #[test]
    fn degenerate_inputs_yield_zero() {
        assert!(expected_calibration_error(&[], &[], 10).abs() < f64::EPSILON);
        assert!(brier_score(&[0.3], &[]).abs() < f64::EPSILON);
    }
}
