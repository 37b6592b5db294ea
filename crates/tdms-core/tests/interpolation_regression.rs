//! Band-limited interpolation accuracy against the reference benchmarks.
//!
//! 100 samples of each test function are reconstructed at the 99 midpoints;
//! the maximum pointwise error must stay within the benchmark error of the
//! reference implementation on the same data.

use num_complex::Complex64;
use tdms_core::interpolation::{best_scheme, InterpolationMethod};

const N_SAMPLES: usize = 100;

const CONST_FN_BENCHMARK_ERROR: f64 = 2.83e-4;
const SIN_BENCHMARK_ERROR: f64 = 2.64e-4;
const PULSE_BENCHMARK_ERROR: f64 = 4.88e-4;
const COMPLEX_BENCHMARK_ERROR: f64 = 5.36e-4;

fn sample_positions() -> Vec<f64> {
    let spacing = 1.0 / (N_SAMPLES - 1) as f64;
    (0..N_SAMPLES).map(|i| i as f64 * spacing).collect()
}

fn interpolate_line(data: &[f64]) -> Vec<f64> {
    let last_sample = data.len() - 1;
    (0..last_sample)
        .map(|i| {
            let scheme = best_scheme(last_sample, i, InterpolationMethod::BandLimited);
            let start = i as isize - scheme.datapoints_to_left() as isize;
            let mut samples = [0.0_f64; 8];
            for ind in scheme.first_nonzero_coeff()..=scheme.last_nonzero_coeff() {
                let offset = (start + ind as isize).clamp(0, last_sample as isize) as usize;
                samples[ind] = data[offset];
            }
            scheme.interpolate_real(&samples)
        })
        .collect()
}

fn interpolate_line_complex(data: &[Complex64]) -> Vec<Complex64> {
    let last_sample = data.len() - 1;
    (0..last_sample)
        .map(|i| {
            let scheme = best_scheme(last_sample, i, InterpolationMethod::BandLimited);
            let start = i as isize - scheme.datapoints_to_left() as isize;
            let mut samples = [Complex64::new(0.0, 0.0); 8];
            for ind in scheme.first_nonzero_coeff()..=scheme.last_nonzero_coeff() {
                let offset = (start + ind as isize).clamp(0, last_sample as isize) as usize;
                samples[ind] = data[offset];
            }
            scheme.interpolate_complex(&samples)
        })
        .collect()
}

fn max_error(interpolated: &[f64], exact: &[f64]) -> f64 {
    interpolated
        .iter()
        .zip(exact)
        .fold(0.0_f64, |acc, (a, b)| acc.max((a - b).abs()))
}

fn s2pi(x: f64) -> f64 {
    (2.0 * std::f64::consts::PI * x).sin()
}

/// Smooth compactly-supported pulse: the standard mollifier evaluated at
/// 3(2x - 1), supported in [1/3, 2/3].
fn pulse(x: f64) -> f64 {
    let x_hat = (3.0 * (2.0 * x - 1.0)).abs();
    if x_hat >= 1.0 {
        0.0
    } else {
        (-1.0 / (1.0 - x_hat * x_hat)).exp()
    }
}

#[test]
fn constant_function_reconstruction_matches_reference_error() {
    let data = vec![1.0_f64; N_SAMPLES];
    let interpolated = interpolate_line(&data);
    let exact = vec![1.0_f64; N_SAMPLES - 1];

    let error = max_error(&interpolated, &exact);
    assert!(
        error < CONST_FN_BENCHMARK_ERROR,
        "constant-function error {error:.8e} exceeds benchmark {CONST_FN_BENCHMARK_ERROR:.8e}"
    );
}

#[test]
fn sine_reconstruction_matches_reference_error() {
    let positions = sample_positions();
    let spacing = positions[1] - positions[0];
    let data: Vec<f64> = positions.iter().map(|&x| s2pi(x)).collect();
    let exact: Vec<f64> = positions[..N_SAMPLES - 1]
        .iter()
        .map(|&x| s2pi(x + spacing / 2.0))
        .collect();

    let interpolated = interpolate_line(&data);
    let error = max_error(&interpolated, &exact);
    assert!(
        error < SIN_BENCHMARK_ERROR,
        "sin(2 pi x) error {error:.8e} exceeds benchmark {SIN_BENCHMARK_ERROR:.8e}"
    );
}

#[test]
fn compact_pulse_reconstruction_matches_reference_error() {
    let positions = sample_positions();
    let spacing = positions[1] - positions[0];
    let data: Vec<f64> = positions.iter().map(|&x| pulse(x)).collect();
    let exact: Vec<f64> = positions[..N_SAMPLES - 1]
        .iter()
        .map(|&x| pulse(x + spacing / 2.0))
        .collect();

    let interpolated = interpolate_line(&data);
    let error = max_error(&interpolated, &exact);
    assert!(
        error < PULSE_BENCHMARK_ERROR,
        "compact pulse error {error:.8e} exceeds benchmark {PULSE_BENCHMARK_ERROR:.8e}"
    );
}

#[test]
fn complex_valued_reconstruction_matches_reference_error() {
    let positions = sample_positions();
    let spacing = positions[1] - positions[0];
    let data: Vec<Complex64> = positions
        .iter()
        .map(|&x| Complex64::new(s2pi(x), pulse(x)))
        .collect();
    let exact: Vec<Complex64> = positions[..N_SAMPLES - 1]
        .iter()
        .map(|&x| Complex64::new(s2pi(x + spacing / 2.0), pulse(x + spacing / 2.0)))
        .collect();

    let interpolated = interpolate_line_complex(&data);
    let error = interpolated
        .iter()
        .zip(&exact)
        .fold(0.0_f64, |acc, (a, b)| acc.max((a - b).norm()));
    assert!(
        error < COMPLEX_BENCHMARK_ERROR,
        "complex-valued error {error:.8e} exceeds benchmark {COMPLEX_BENCHMARK_ERROR:.8e}"
    );
}

#[test]
fn all_interpolation_positions_use_in_range_windows() {
    // every cell of a 100-sample line must resolve to a window that fits
    for i in 0..(N_SAMPLES - 1) {
        let scheme = best_scheme(N_SAMPLES - 1, i, InterpolationMethod::BandLimited);
        let start = i as isize - scheme.datapoints_to_left() as isize;
        assert!(start >= 0, "cell {i}: window starts at {start}");
        assert!(
            start + 7 <= (N_SAMPLES - 1) as isize,
            "cell {i}: window ends at {}",
            start + 7
        );
    }
}
