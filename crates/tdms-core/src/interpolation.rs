//! Sub-cell field reconstruction.
//!
//! Field components live on the staggered half-sample positions of the Yee
//! cell; exported values are wanted at cell centres. Reconstruction is a dot
//! product of (up to) eight scheme coefficients with eight consecutive line
//! samples. Two scheme families are available: band-limited interpolation
//! (the default, eight schemes covering the interior and the offset windows
//! needed near a boundary) and cubic Lagrange interpolation (first, middle
//! and last cell variants).
//!
//! The interior band-limited scheme is the least-squares half-sample shift
//! filter over the band `|omega| <= pi/2`, the same filter MATLAB's `interp`
//! designs for r = 2, l = 4. The off-centre windows use the degree-seven
//! polynomial weights for their target position, rescaled so that every
//! band-limited scheme shares the interior coefficient sum.

use num_complex::Complex64;
use std::sync::OnceLock;

/// Which scheme family to reconstruct with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationMethod {
    BandLimited,
    Cubic,
}

/// One reconstruction stencil. `coeffs[ind]` multiplies the line sample at
/// `index - datapoints_to_left + ind`; the target position is the half-step
/// `index + 0.5`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolationScheme {
    coeffs: [f64; 8],
    first_nonzero_coeff: usize,
    last_nonzero_coeff: usize,
    datapoints_to_left: usize,
}

impl InterpolationScheme {
    pub const fn coefficients(&self) -> &[f64; 8] {
        &self.coeffs
    }

    pub const fn first_nonzero_coeff(&self) -> usize {
        self.first_nonzero_coeff
    }

    pub const fn last_nonzero_coeff(&self) -> usize {
        self.last_nonzero_coeff
    }

    pub const fn datapoints_to_left(&self) -> usize {
        self.datapoints_to_left
    }

    pub fn interpolate_real(&self, samples: &[f64; 8]) -> f64 {
        let mut value = 0.0;
        for ind in self.first_nonzero_coeff..=self.last_nonzero_coeff {
            value += self.coeffs[ind] * samples[ind];
        }
        value
    }

    pub fn interpolate_complex(&self, samples: &[Complex64; 8]) -> Complex64 {
        let mut value = Complex64::new(0.0, 0.0);
        for ind in self.first_nonzero_coeff..=self.last_nonzero_coeff {
            value += self.coeffs[ind] * samples[ind];
        }
        value
    }
}

const fn cubic_scheme(coeffs: [f64; 4], datapoints_to_left: usize) -> InterpolationScheme {
    InterpolationScheme {
        coeffs: [
            coeffs[0], coeffs[1], coeffs[2], coeffs[3], 0.0, 0.0, 0.0, 0.0,
        ],
        first_nonzero_coeff: 0,
        last_nonzero_coeff: 3,
        datapoints_to_left,
    }
}

/// Cubic scheme for the first cell of a line (target 0.5 on nodes 0..3).
pub static CUBIC_FIRST: InterpolationScheme =
    cubic_scheme([5.0 / 16.0, 15.0 / 16.0, -5.0 / 16.0, 1.0 / 16.0], 0);
/// Cubic scheme for interior cells (target 1.5 on nodes 0..3).
pub static CUBIC_MIDDLE: InterpolationScheme =
    cubic_scheme([-1.0 / 16.0, 9.0 / 16.0, 9.0 / 16.0, -1.0 / 16.0], 1);
/// Cubic scheme for the last cell of a line (target 2.5 on nodes 0..3).
pub static CUBIC_LAST: InterpolationScheme =
    cubic_scheme([1.0 / 16.0, -5.0 / 16.0, 15.0 / 16.0, 5.0 / 16.0], 2);

static BAND_LIMITED: OnceLock<[InterpolationScheme; 8]> = OnceLock::new();

/// The eight band-limited schemes. `band_limited(m)` targets position
/// `m + 0.5` within its eight-sample window.
pub fn band_limited(offset: usize) -> &'static InterpolationScheme {
    &band_limited_schemes()[offset]
}

fn band_limited_schemes() -> &'static [InterpolationScheme; 8] {
    BAND_LIMITED.get_or_init(|| {
        let interior = solve_normal_equations(3.5);
        let interior_sum: f64 = interior.iter().sum();

        let mut schemes = [CUBIC_MIDDLE; 8];
        for (offset, scheme) in schemes.iter_mut().enumerate() {
            let coeffs = if offset == 3 {
                interior
            } else {
                scaled_lagrange_weights(offset as f64 + 0.5, interior_sum)
            };
            *scheme = InterpolationScheme {
                coeffs,
                first_nonzero_coeff: 0,
                last_nonzero_coeff: 7,
                datapoints_to_left: offset,
            };
        }
        schemes
    })
}

/// Least-squares fractional-delay filter restricted to the band
/// `|omega| <= pi/2`: solve `sum_n sinc((m-n)/2) h[n] = sinc((m-tau)/2)`.
fn solve_normal_equations(tau: f64) -> [f64; 8] {
    let mut matrix = [[0.0_f64; 8]; 8];
    let mut rhs = [0.0_f64; 8];
    for m in 0..8 {
        for n in 0..8 {
            matrix[m][n] = sinc((m as f64 - n as f64) / 2.0);
        }
        rhs[m] = sinc((m as f64 - tau) / 2.0);
    }
    solve_dense(matrix, rhs)
}

/// Degree-seven Lagrange weights at `tau` over the nodes 0..7, rescaled so
/// the coefficient sum matches `target_sum`.
fn scaled_lagrange_weights(tau: f64, target_sum: f64) -> [f64; 8] {
    let mut weights = [0.0_f64; 8];
    for (m, weight) in weights.iter_mut().enumerate() {
        let mut value = 1.0;
        for q in 0..8 {
            if q != m {
                value *= (tau - q as f64) / (m as f64 - q as f64);
            }
        }
        *weight = value * target_sum;
    }
    weights
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (std::f64::consts::PI * x).sin() / (std::f64::consts::PI * x)
    }
}

/// Gaussian elimination with partial pivoting. The callers only pass the
/// fixed, well-conditioned sinc normal-equation matrix.
fn solve_dense(mut matrix: [[f64; 8]; 8], mut rhs: [f64; 8]) -> [f64; 8] {
    for pivot_col in 0..8 {
        let mut pivot_row = pivot_col;
        for row in (pivot_col + 1)..8 {
            if matrix[row][pivot_col].abs() > matrix[pivot_row][pivot_col].abs() {
                pivot_row = row;
            }
        }
        if pivot_row != pivot_col {
            matrix.swap(pivot_col, pivot_row);
            rhs.swap(pivot_col, pivot_row);
        }
        let pivot = matrix[pivot_col][pivot_col];
        for row in (pivot_col + 1)..8 {
            let factor = matrix[row][pivot_col] / pivot;
            for col in pivot_col..8 {
                matrix[row][col] -= factor * matrix[pivot_col][col];
            }
            rhs[row] -= factor * rhs[pivot_col];
        }
    }

    let mut solution = [0.0_f64; 8];
    for row in (0..8).rev() {
        let mut value = rhs[row];
        for col in (row + 1)..8 {
            value -= matrix[row][col] * solution[col];
        }
        solution[row] = value / matrix[row][row];
    }
    solution
}

/// Pick the best admissible scheme for reconstructing at `index + 0.5` on a
/// line whose samples run `0..=last_sample`. Band-limited schemes need eight
/// samples; the interior scheme is used whenever the window admits four
/// samples either side, and the offset schemes take over near the two
/// boundaries. Lines too short for an eight-sample window fall back to the
/// cubic family.
pub fn best_scheme(
    last_sample: usize,
    index: usize,
    method: InterpolationMethod,
) -> &'static InterpolationScheme {
    if method == InterpolationMethod::Cubic || last_sample < 7 {
        let index = index.min(last_sample.saturating_sub(1));
        return if index == 0 {
            &CUBIC_FIRST
        } else if index >= last_sample.saturating_sub(1) {
            &CUBIC_LAST
        } else {
            &CUBIC_MIDDLE
        };
    }

    if index < 3 {
        band_limited(index)
    } else if index + 4 <= last_sample {
        band_limited(3)
    } else {
        band_limited((index + 7 - last_sample).min(7))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = f64::EPSILON;

    fn cubic_samples(poly: impl Fn(f64) -> f64, start: f64) -> [f64; 8] {
        let mut samples = [0.0; 8];
        for (ind, sample) in samples.iter_mut().enumerate().take(4) {
            *sample = poly(start + ind as f64);
        }
        samples
    }

    #[test]
    fn cubic_schemes_reproduce_cubic_polynomials() {
        let poly = |x: f64| 4.2 * x * x * x + 9.81 * x * x - 2.7182818 * x + std::f64::consts::PI;
        let tol = 40.0 * EPS * 1.0e3;

        let samples = cubic_samples(poly, 0.0);
        assert!((CUBIC_FIRST.interpolate_real(&samples) - poly(0.5)).abs() <= tol);
        assert!((CUBIC_MIDDLE.interpolate_real(&samples) - poly(1.5)).abs() <= tol);
        assert!((CUBIC_LAST.interpolate_real(&samples) - poly(2.5)).abs() <= tol);
    }

    #[test]
    fn band_limited_coefficient_sums_agree() {
        let ones = [1.0_f64; 8];
        let reference = band_limited(0).interpolate_real(&ones);
        for offset in 1..8 {
            let sum = band_limited(offset).interpolate_real(&ones);
            assert!(
                (sum - reference).abs() < 10.0 * EPS,
                "scheme {offset} sum {sum:.17} differs from {reference:.17}"
            );
        }
    }

    #[test]
    fn interior_scheme_matches_reference_filter() {
        // Half-sample shift filter for the band |omega| <= pi/2; leading
        // values of the symmetric interior stencil.
        let coeffs = band_limited(3).coefficients();
        assert!((coeffs[0] - -0.006777513830).abs() < 1.0e-9);
        assert!((coeffs[1] - 0.039457774231).abs() < 1.0e-9);
        assert!((coeffs[2] - -0.142658093428).abs() < 1.0e-9);
        assert!((coeffs[3] - 0.609836360661).abs() < 1.0e-9);
        assert!((coeffs[3] - coeffs[4]).abs() < 1.0e-9);
        assert!((coeffs[2] - coeffs[5]).abs() < 1.0e-9);
    }

    #[test]
    fn scheme_selection_tracks_the_window_position() {
        let method = InterpolationMethod::BandLimited;
        assert_eq!(best_scheme(99, 0, method).datapoints_to_left(), 0);
        assert_eq!(best_scheme(99, 2, method).datapoints_to_left(), 2);
        assert_eq!(best_scheme(99, 3, method).datapoints_to_left(), 3);
        assert_eq!(best_scheme(99, 95, method).datapoints_to_left(), 3);
        assert_eq!(best_scheme(99, 96, method).datapoints_to_left(), 4);
        assert_eq!(best_scheme(99, 98, method).datapoints_to_left(), 6);
        assert_eq!(best_scheme(99, 99, method).datapoints_to_left(), 7);
    }

    #[test]
    fn cubic_selection_covers_first_middle_last() {
        let method = InterpolationMethod::Cubic;
        assert_eq!(best_scheme(99, 0, method), &CUBIC_FIRST);
        assert_eq!(best_scheme(99, 50, method), &CUBIC_MIDDLE);
        assert_eq!(best_scheme(99, 98, method), &CUBIC_LAST);
    }

    #[test]
    fn short_lines_fall_back_to_cubic() {
        let scheme = best_scheme(4, 2, InterpolationMethod::BandLimited);
        assert_eq!(scheme.last_nonzero_coeff(), 3);
    }

    #[test]
    fn complex_interpolation_applies_coefficients_to_both_parts() {
        let samples = [
            Complex64::new(1.0, -1.0),
            Complex64::new(1.0, -1.0),
            Complex64::new(1.0, -1.0),
            Complex64::new(1.0, -1.0),
            Complex64::new(1.0, -1.0),
            Complex64::new(1.0, -1.0),
            Complex64::new(1.0, -1.0),
            Complex64::new(1.0, -1.0),
        ];
        let value = band_limited(3).interpolate_complex(&samples);
        assert!((value.re + value.im).abs() < 1.0e-14);
    }
}
