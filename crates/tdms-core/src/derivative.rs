//! Spatial derivative engines.
//!
//! Every split-field update consumes the half-step spatial derivative of a
//! packed line of field sums along one axis. Two interchangeable engines
//! provide it behind one contract, so the update kernels are scheme
//! agnostic:
//!
//! * finite difference: neighbour differences staggered by half a cell
//!   (backward for the E half-step, forward for H);
//! * pseudo-spectral: forward FFT, multiplication by the precomputed shift
//!   operator `d_k = i*k*exp(+/- i*k/2)`, inverse FFT, real part, 1/N scale.
//!
//! Engines are shared across worker threads; each thread passes its own
//! line and FFT scratch buffers so nothing is allocated inside the time
//! loop.

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::constants::DCPI;
use crate::grid::AxialDirection;

/// Which field family the derivative drives; decides the half-cell shift
/// direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Electric,
    Magnetic,
}

/// One-axis half-step derivative of a packed line of field sums.
///
/// The line holds real samples in the real part; after the call, `line[m].re`
/// is the derivative sample that drives the update at index `m` (backward
/// staggered for `Electric`, forward for `Magnetic`).
pub trait Derivative: Sync + Send {
    fn apply(
        &self,
        kind: FieldKind,
        axis: AxialDirection,
        line: &mut [Complex64],
        scratch: &mut [Complex64],
    );

    /// FFT scratch length a caller must provide (0 for finite differences).
    fn scratch_len(&self) -> usize;
}

/// Staggered neighbour differences.
#[derive(Debug, Default)]
pub struct FiniteDifference;

impl Derivative for FiniteDifference {
    fn apply(
        &self,
        kind: FieldKind,
        _axis: AxialDirection,
        line: &mut [Complex64],
        _scratch: &mut [Complex64],
    ) {
        match kind {
            FieldKind::Electric => {
                for m in (1..line.len()).rev() {
                    line[m] = Complex64::new(line[m].re - line[m - 1].re, 0.0);
                }
                line[0] = Complex64::new(0.0, 0.0);
            }
            FieldKind::Magnetic => {
                let last = line.len() - 1;
                for m in 0..last {
                    line[m] = Complex64::new(line[m + 1].re - line[m].re, 0.0);
                }
                line[last] = Complex64::new(0.0, 0.0);
            }
        }
    }

    fn scratch_len(&self) -> usize {
        0
    }
}

struct SpectralOperator {
    dk: Vec<Complex64>,
    fft: Arc<dyn Fft<f64>>,
    ifft: Arc<dyn Fft<f64>>,
}

impl SpectralOperator {
    fn new(planner: &mut FftPlanner<f64>, len: usize, shift: f64) -> Self {
        Self {
            dk: diff_shift_op(shift, len),
            fft: planner.plan_fft_forward(len),
            ifft: planner.plan_fft_inverse(len),
        }
    }
}

/// `d_k = i*k*exp(i*k*shift)` over the standard FFT wavenumber grid.
fn diff_shift_op(shift: f64, len: usize) -> Vec<Complex64> {
    let mut dk = Vec::with_capacity(len);
    for m in 0..len {
        let lambda = if m <= len / 2 {
            2.0 * DCPI * m as f64 / len as f64
        } else {
            2.0 * DCPI * (m as f64 - len as f64) / len as f64
        };
        let phase = Complex64::new(0.0, lambda * shift).exp();
        dk.push(Complex64::new(0.0, lambda) * phase);
    }
    dk
}

/// FFT-based derivative with the half-cell shift folded into the operator.
pub struct PseudoSpectral {
    // indexed [kind][axis]
    operators: [[SpectralOperator; 3]; 2],
    scratch_len: usize,
}

impl PseudoSpectral {
    /// Line lengths match the component loop extents: `N_tot` samples for
    /// the electric half-step, `N_tot + 1` for the magnetic one.
    pub fn new(i_tot: usize, j_tot: usize, k_tot: usize) -> Self {
        let mut planner = FftPlanner::new();
        let electric = [
            SpectralOperator::new(&mut planner, i_tot.max(1), -0.5),
            SpectralOperator::new(&mut planner, j_tot.max(1), -0.5),
            SpectralOperator::new(&mut planner, k_tot.max(1), -0.5),
        ];
        let magnetic = [
            SpectralOperator::new(&mut planner, i_tot + 1, 0.5),
            SpectralOperator::new(&mut planner, j_tot + 1, 0.5),
            SpectralOperator::new(&mut planner, k_tot + 1, 0.5),
        ];
        let scratch_len = electric
            .iter()
            .chain(magnetic.iter())
            .map(|op| {
                op.fft
                    .get_inplace_scratch_len()
                    .max(op.ifft.get_inplace_scratch_len())
            })
            .max()
            .unwrap_or(0);
        Self {
            operators: [electric, magnetic],
            scratch_len,
        }
    }

    fn operator(&self, kind: FieldKind, axis: AxialDirection) -> &SpectralOperator {
        let kind_index = match kind {
            FieldKind::Electric => 0,
            FieldKind::Magnetic => 1,
        };
        let axis_index = match axis {
            AxialDirection::X => 0,
            AxialDirection::Y => 1,
            AxialDirection::Z => 2,
        };
        &self.operators[kind_index][axis_index]
    }
}

impl Derivative for PseudoSpectral {
    fn apply(
        &self,
        kind: FieldKind,
        axis: AxialDirection,
        line: &mut [Complex64],
        scratch: &mut [Complex64],
    ) {
        let op = self.operator(kind, axis);
        debug_assert_eq!(line.len(), op.dk.len());
        op.fft.process_with_scratch(line, scratch);
        for (value, dk) in line.iter_mut().zip(&op.dk) {
            *value *= dk;
        }
        op.ifft.process_with_scratch(line, scratch);
        let scale = 1.0 / line.len() as f64;
        for value in line.iter_mut() {
            *value = Complex64::new(value.re * scale, 0.0);
        }
    }

    fn scratch_len(&self) -> usize {
        self.scratch_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(values: &[f64]) -> Vec<Complex64> {
        values.iter().map(|&v| Complex64::new(v, 0.0)).collect()
    }

    #[test]
    fn finite_difference_staggers_by_field_kind() {
        let fd = FiniteDifference;
        let mut line = pack(&[1.0, 3.0, 6.0, 10.0]);
        fd.apply(FieldKind::Electric, AxialDirection::X, &mut line, &mut []);
        assert_eq!(line[1].re, 2.0);
        assert_eq!(line[2].re, 3.0);
        assert_eq!(line[3].re, 4.0);

        let mut line = pack(&[1.0, 3.0, 6.0, 10.0]);
        fd.apply(FieldKind::Magnetic, AxialDirection::X, &mut line, &mut []);
        assert_eq!(line[0].re, 2.0);
        assert_eq!(line[1].re, 3.0);
        assert_eq!(line[2].re, 4.0);
    }

    #[test]
    fn spectral_derivative_matches_analytic_sinusoid() {
        let n = 32;
        let engine = PseudoSpectral::new(n, 8, 8);
        let mut scratch = vec![Complex64::new(0.0, 0.0); engine.scratch_len()];

        // f(m) = sin(2 pi m / N); electric derivative is evaluated half a
        // sample to the left: f'(m - 1/2) = (2 pi / N) cos(2 pi (m - 1/2)/N)
        let mut line: Vec<Complex64> = (0..n)
            .map(|m| Complex64::new((2.0 * DCPI * m as f64 / n as f64).sin(), 0.0))
            .collect();
        engine.apply(
            FieldKind::Electric,
            AxialDirection::X,
            &mut line,
            &mut scratch,
        );

        for (m, value) in line.iter().enumerate() {
            let expected =
                2.0 * DCPI / n as f64 * (2.0 * DCPI * (m as f64 - 0.5) / n as f64).cos();
            assert!(
                (value.re - expected).abs() < 1.0e-12,
                "sample {m}: {} vs {}",
                value.re,
                expected
            );
        }
    }

    #[test]
    fn spectral_magnetic_shift_runs_forward() {
        let n = 16;
        let engine = PseudoSpectral::new(8, 8, n - 1);
        let mut scratch = vec![Complex64::new(0.0, 0.0); engine.scratch_len()];

        let mut line: Vec<Complex64> = (0..n)
            .map(|m| Complex64::new((2.0 * DCPI * m as f64 / n as f64).cos(), 0.0))
            .collect();
        engine.apply(
            FieldKind::Magnetic,
            AxialDirection::Z,
            &mut line,
            &mut scratch,
        );

        for (m, value) in line.iter().enumerate() {
            let expected =
                -2.0 * DCPI / n as f64 * (2.0 * DCPI * (m as f64 + 0.5) / n as f64).sin();
            assert!(
                (value.re - expected).abs() < 1.0e-12,
                "sample {m}: {} vs {}",
                value.re,
                expected
            );
        }
    }
}
