//! Universal properties of the phasor accumulation and normalisation.

use num_complex::Complex64;
use tdms_core::constants::DCPI;
use tdms_core::phasors::{normalise_sample, PhasorNorms};
use tdms_core::source::{gaussian_envelope, linear_ramp, pulsed_phase, steady_phase};

#[test]
fn resonant_fourier_accumulation_has_unit_magnitude() {
    // summing exp(i w n dt) / N over one exact period of the resonant
    // signal exp(-i w n dt) leaves unit magnitude
    let n_samples = 128;
    let dt = 1.0 / n_samples as f64;
    let omega = 2.0 * DCPI;

    let mut accumulator = Complex64::new(0.0, 0.0);
    for n in 0..n_samples {
        let time = n as f64 * dt;
        let signal = (-Complex64::new(0.0, omega * time)).exp();
        accumulator += signal * Complex64::new(0.0, omega * time).exp() / n_samples as f64;
    }

    assert!(
        (accumulator.norm() - 1.0).abs() < 10.0 * f64::EPSILON * n_samples as f64,
        "resonant accumulation magnitude {} is not unity",
        accumulator.norm()
    );
}

#[test]
fn ramp_boundary_values_and_monotonicity() {
    let period = 3.0e-15;
    let width = 4.0;

    assert_eq!(linear_ramp(0.0, period), 0.0);
    assert_eq!(linear_ramp(width * period, period), 1.0);
    assert_eq!(linear_ramp(10.0 * width * period, period), 1.0);

    let mut previous = -1.0;
    for step in 0..1000 {
        let value = linear_ramp(step as f64 * period / 100.0, period);
        assert!(value >= previous);
        previous = value;
    }
}

#[test]
fn normaliser_is_idempotent_with_unit_source_phasor() {
    let samples = [
        Complex64::new(1.5, -0.25),
        Complex64::new(0.0, 0.0),
        Complex64::new(-3.0, 4.0),
    ];
    let unit = Complex64::new(1.0, 0.0);
    for sample in samples {
        let once = normalise_sample(sample, unit);
        let twice = normalise_sample(once, unit);
        assert!((once - sample).norm() <= 1.0e-15 * sample.norm().max(1.0));
        assert!((twice - once).norm() <= 1.0e-15 * sample.norm().max(1.0));
    }
}

#[test]
fn normaliser_applies_conjugate_over_norm_squared() {
    let sample = Complex64::new(2.0, 2.0);
    let norm = Complex64::new(0.0, 2.0);
    // sample / norm = (2 + 2i) / 2i = 1 - i
    let out = normalise_sample(sample, norm);
    assert!((out - Complex64::new(1.0, -1.0)).norm() < 1.0e-14);
}

#[test]
fn source_norm_windows_match_between_families() {
    // the normaliser and the field phasors share the accumulation window:
    // accumulating a constant envelope over N steps yields the same value
    // whichever window the caller passes, scaled by 1/N
    let n_samples = 50;
    let dt = 2.0e-16;
    let frequencies = [1.0e14, 2.0e14];

    let mut norms = PhasorNorms::new(frequencies.len());
    for n in 0..n_samples {
        norms.accumulate(1.0, 1.0, n as i64, &frequencies, dt, n_samples);
    }
    for (e, h) in norms.e_norm.iter().zip(&norms.h_norm) {
        assert!(e.norm() > 0.0);
        assert!(h.norm() > 0.0);
        assert!(e.norm() <= 1.0 + 1.0e-12);
        assert!(h.norm() <= 1.0 + 1.0e-12);
    }

    norms.zero();
    assert!(norms.e_norm.iter().all(|value| value.norm() == 0.0));
}

#[test]
fn pulsed_envelope_carrier_is_unit_magnitude() {
    let omega = 2.0 * DCPI * 3.0e14;
    for step in 0..50 {
        let time = step as f64 * 1.0e-16;
        assert!((pulsed_phase(omega, time, 1.0e-15).norm() - 1.0).abs() < 1.0e-12);
        assert!((steady_phase(omega, time).norm() - 1.0).abs() < 1.0e-12);
    }
}

#[test]
fn gaussian_envelope_is_symmetric_about_the_delay() {
    let t0 = 2.0e-15;
    let hwhm = 5.0e-16;
    for offset in [1.0e-16, 3.0e-16, 7.0e-16] {
        let before = gaussian_envelope(t0 - offset, t0, hwhm, 0.0);
        let after = gaussian_envelope(t0 + offset, t0, hwhm, 0.0);
        assert!((before - after).abs() < 1.0e-15);
    }
}
