//! Butterworth IIR design and zero-phase filtering.
//!
//! Filters are designed from the analog prototype through the bilinear
//! transform (with frequency pre-warping) and realized as cascaded
//! second-order sections, which stay numerically stable for the very low
//! normalized cutoffs used on motion series (0.2 Hz at 60 Hz).
//!
//! [`filtfilt`] runs the cascade forward and backward over an
//! odd-extended signal with steady-state initial conditions, so the output
//! has zero phase shift and no start-up transient.

use std::f64::consts::PI;

use num_complex::Complex64;

use crate::config::FilterConfig;
use crate::error::Result;

/// Filter response type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Lowpass,
    Highpass,
    Bandpass,
}

/// Second-order section `[b0, b1, b2, a0, a1, a2]` with `a0 == 1`.
pub type Section = [f64; 6];

/// Cascade of second-order sections.
#[derive(Debug, Clone, PartialEq)]
pub struct Sos {
    pub sections: Vec<Section>,
}

/// Design-time sample rate of the normalized bilinear transform.
const DESIGN_FS: f64 = 2.0;

/// Imaginary parts below this are treated as real poles.
const REAL_TOL: f64 = 1e-9;

/// Design a Butterworth filter.
///
/// Lowpass uses `high_cut_hz`, highpass uses `low_cut_hz`, bandpass uses
/// both edges.
///
/// # Errors
///
/// Returns an error if the filter configuration is invalid.
pub fn design(kind: FilterKind, config: &FilterConfig) -> Result<Sos> {
    config.validate()?;
    let n = config.order;
    let warp = |hz: f64| 2.0 * DESIGN_FS * (PI * hz / config.sample_rate).tan();

    // Analog prototype: unit cutoff, no zeros, unit gain
    let prototype: Vec<Complex64> = (0..n)
        .map(|k| {
            let m = 2.0 * k as f64 - n as f64 + 1.0;
            -Complex64::from_polar(1.0, PI * m / (2.0 * n as f64))
        })
        .collect();

    let (zeros, poles, gain) = match kind {
        FilterKind::Lowpass => {
            let wo = warp(config.high_cut_hz);
            let poles: Vec<Complex64> = prototype.iter().map(|&p| p * wo).collect();
            (Vec::new(), poles, wo.powi(n as i32))
        }
        FilterKind::Highpass => {
            let wo = warp(config.low_cut_hz);
            let poles: Vec<Complex64> = prototype.iter().map(|&p| wo / p).collect();
            let prod: Complex64 = prototype.iter().map(|&p| -p).product();
            (vec![Complex64::new(0.0, 0.0); n], poles, (Complex64::new(1.0, 0.0) / prod).re)
        }
        FilterKind::Bandpass => {
            let w1 = warp(config.low_cut_hz);
            let w2 = warp(config.high_cut_hz);
            let bw = w2 - w1;
            let wo2 = w1 * w2;
            let scaled: Vec<Complex64> = prototype.iter().map(|&p| p * (bw / 2.0)).collect();
            let mut poles = Vec::with_capacity(2 * n);
            for &p in &scaled {
                let root = (p * p - wo2).sqrt();
                poles.push(p + root);
                poles.push(p - root);
            }
            (vec![Complex64::new(0.0, 0.0); n], poles, bw.powi(n as i32))
        }
    };

    let (zeros, poles, gain) = bilinear(&zeros, &poles, gain);
    Ok(zpk_to_sos(&zeros, &poles, gain))
}

/// Map analog zeros/poles/gain to the z-plane.
fn bilinear(
    zeros: &[Complex64],
    poles: &[Complex64],
    gain: f64,
) -> (Vec<f64>, Vec<Complex64>, f64) {
    let fs2 = 2.0 * DESIGN_FS;
    let num: Complex64 = zeros.iter().map(|&z| fs2 - z).product();
    let den: Complex64 = poles.iter().map(|&p| fs2 - p).product();

    let mut z_zeros: Vec<f64> = zeros.iter().map(|&z| ((fs2 + z) / (fs2 - z)).re).collect();
    // Zeros at infinity map to Nyquist
    z_zeros.extend(std::iter::repeat(-1.0).take(poles.len() - zeros.len()));
    let z_poles = poles.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect();

    (z_zeros, z_poles, gain * (num / den).re)
}

/// Group poles into conjugate pairs (or real pairs) and give each section
/// two zeros, pairing the extremes of the sorted zero list so a bandpass
/// section gets one zero at DC and one at Nyquist.
fn zpk_to_sos(zeros: &[f64], poles: &[Complex64], gain: f64) -> Sos {
    let mut denominators: Vec<[f64; 3]> = Vec::new();
    let mut real_poles: Vec<f64> = Vec::new();
    for p in poles {
        if p.im > REAL_TOL {
            denominators.push([1.0, -2.0 * p.re, p.norm_sqr()]);
        } else if p.im.abs() <= REAL_TOL {
            real_poles.push(p.re);
        }
    }
    real_poles.sort_by(f64::total_cmp);
    for pair in real_poles.chunks(2) {
        match pair {
            [p1, p2] => denominators.push([1.0, -(p1 + p2), p1 * p2]),
            [p] => denominators.push([1.0, -p, 0.0]),
            _ => {}
        }
    }
    // First-order section last so it takes the single leftover zero
    denominators.sort_by_key(|d| d[2] == 0.0);

    let mut sorted = zeros.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut ordered = Vec::with_capacity(sorted.len());
    let (mut lo, mut hi) = (0usize, sorted.len());
    while lo < hi {
        ordered.push(sorted[lo]);
        lo += 1;
        if lo < hi {
            hi -= 1;
            ordered.push(sorted[hi]);
        }
    }
    let mut zero_iter = ordered.into_iter();

    let mut sections: Vec<Section> = denominators
        .into_iter()
        .map(|a| {
            let b = if a[2] == 0.0 {
                let z = zero_iter.next().unwrap_or(0.0);
                [1.0, -z, 0.0]
            } else {
                match (zero_iter.next(), zero_iter.next()) {
                    (Some(z1), Some(z2)) => [1.0, -(z1 + z2), z1 * z2],
                    (Some(z1), None) => [1.0, -z1, 0.0],
                    _ => [1.0, 0.0, 0.0],
                }
            };
            [b[0], b[1], b[2], a[0], a[1], a[2]]
        })
        .collect();

    if let Some(first) = sections.first_mut() {
        for c in first.iter_mut().take(3) {
            *c *= gain;
        }
    }
    Sos { sections }
}

/// Steady-state initial conditions of each section for a unit step input.
fn sos_zi(sos: &Sos) -> Vec<[f64; 2]> {
    let mut scale = 1.0;
    sos.sections
        .iter()
        .map(|s| {
            let [b0, b1, b2, _, a1, a2] = *s;
            let beta0 = b1 - a1 * b0;
            let beta1 = b2 - a2 * b0;
            let z0 = (beta0 + beta1) / (1.0 + a1 + a2);
            let z1 = beta1 - a2 * z0;
            let zi = [scale * z0, scale * z1];
            scale *= (b0 + b1 + b2) / (1.0 + a1 + a2);
            zi
        })
        .collect()
}

/// Run the cascade over `x` in transposed direct form II.
fn sosfilt(sos: &Sos, x: &[f64], state: &mut [[f64; 2]]) -> Vec<f64> {
    x.iter()
        .map(|&sample| {
            let mut v = sample;
            for (s, z) in sos.sections.iter().zip(state.iter_mut()) {
                let [b0, b1, b2, _, a1, a2] = *s;
                let y = b0 * v + z[0];
                z[0] = b1 * v - a1 * y + z[1];
                z[1] = b2 * v - a2 * y;
                v = y;
            }
            v
        })
        .collect()
}

/// Default edge padding: three times the number of filter taps.
fn default_padlen(sos: &Sos) -> usize {
    let n = sos.sections.len();
    let zero_b2 = sos.sections.iter().filter(|s| s[2] == 0.0).count();
    let zero_a2 = sos.sections.iter().filter(|s| s[5] == 0.0).count();
    3 * (2 * n + 1 - zero_b2.min(zero_a2))
}

/// Zero-phase forward-backward filtering.
///
/// Signals shorter than the default padding are padded with as many
/// samples as they have (minus one); signals with fewer than two samples
/// are returned unchanged.
#[must_use]
pub fn filtfilt(sos: &Sos, x: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n < 2 || sos.sections.is_empty() {
        return x.to_vec();
    }
    let mut padlen = default_padlen(sos);
    if n <= padlen {
        log::warn!(
            "series of {n} samples is shorter than filter padding {padlen}, shrinking padding"
        );
        padlen = n - 1;
    }

    // Odd extension at both ends
    let mut ext = Vec::with_capacity(n + 2 * padlen);
    ext.extend((1..=padlen).rev().map(|i| 2.0 * x[0] - x[i]));
    ext.extend_from_slice(x);
    ext.extend((1..=padlen).map(|i| 2.0 * x[n - 1] - x[n - 1 - i]));

    let zi = sos_zi(sos);

    let mut state: Vec<[f64; 2]> = zi.iter().map(|z| [z[0] * ext[0], z[1] * ext[0]]).collect();
    let mut forward = sosfilt(sos, &ext, &mut state);

    forward.reverse();
    let mut state: Vec<[f64; 2]> = zi
        .iter()
        .map(|z| [z[0] * forward[0], z[1] * forward[0]])
        .collect();
    let mut backward = sosfilt(sos, &forward, &mut state);
    backward.reverse();

    backward[padlen..padlen + n].to_vec()
}
