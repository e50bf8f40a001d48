//! Descriptive statistics over series with missing (`NaN`) values.

/// Finite values of a series, in order.
#[must_use]
pub fn finite_values(series: &[f64]) -> Vec<f64> {
    series.iter().copied().filter(|v| v.is_finite()).collect()
}

/// Mean of the finite values, `NaN` if there are none.
#[must_use]
pub fn mean(series: &[f64]) -> f64 {
    let (sum, count) = series
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, c), &v| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Sample standard deviation (`ddof = 1`) of the finite values.
///
/// `NaN` with fewer than two finite values.
#[must_use]
pub fn sample_std(series: &[f64]) -> f64 {
    let values = finite_values(series);
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Finite minimum and maximum, `None` if there are no finite values.
#[must_use]
pub fn min_max(series: &[f64]) -> Option<(f64, f64)> {
    series
        .iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Quantile `q` in `[0, 1]` of the finite values with linear interpolation
/// between order statistics.
#[must_use]
pub fn quantile(series: &[f64], q: f64) -> f64 {
    let mut values = finite_values(series);
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(f64::total_cmp);

    let pos = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    values[lo] + (values[hi] - values[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean_skips_nan() {
        assert_relative_eq!(mean(&[1.0, f64::NAN, 3.0]), 2.0);
        assert!(mean(&[f64::NAN]).is_nan());
    }

    #[test]
    fn test_sample_std() {
        let series = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(sample_std(&series), 2.138_089_935_299_395, epsilon = 1e-12);
        assert!(sample_std(&[1.0]).is_nan());
    }

    #[test]
    fn test_quantile_interpolates() {
        let s = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(quantile(&s, 0.5), 2.5);
        assert_relative_eq!(quantile(&s, 0.25), 1.75);
        assert_relative_eq!(quantile(&s, 1.0), 4.0);
    }

    #[test]
    fn test_min_max() {
        assert_eq!(min_max(&[3.0, f64::NAN, -1.0]), Some((-1.0, 3.0)));
        assert_eq!(min_max(&[f64::NAN]), None);
    }
}
