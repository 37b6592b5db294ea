//! Detector-plane far-field mode projection.
//!
//! At the observation plane the centred transverse field snapshot is Fourier
//! transformed, weighted by the pupil window and the modal sensitivity
//! functions, propagated through the angular-spectrum factor (optionally
//! split across an air interface) and summed over the transverse plane. The
//! result accumulates per detection mode and extraction frequency with the
//! electric-field phase convention.

use ndarray::{Array2, Array3};
use num_complex::Complex64;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::constants::{light_v, DCPI, IMAGINARY_UNIT};
use crate::domain::{TdmsError, TdmsResult};
use crate::grid::ElectricSplitField;
use crate::params::SimulationParameters;

/// Spatial-frequency axes of the detector plane.
#[derive(Debug, Clone, Default)]
pub struct FrequencyVectors {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// Modal sensitivity functions, one `(n1, n0)` matrix per detection mode.
#[derive(Debug, Clone)]
pub struct DetectorModes {
    pub x: Array3<Complex64>,
    pub y: Array3<Complex64>,
}

impl DetectorModes {
    pub fn num_det_modes(&self) -> usize {
        self.x.dim().2
    }
}

/// Owns the FFT plans and scratch for the detector plane, sized to the
/// PML-free extents `(n1, n0) = (J_tot - Dyu - Dyl, I_tot - Dxu - Dxl)`.
pub struct DetectorIntegrator {
    n0: usize,
    n1: usize,
    fft_rows: Arc<dyn Fft<f64>>,
    fft_cols: Arc<dyn Fft<f64>>,
    fft_scratch: Vec<Complex64>,
    column_scratch: Vec<Complex64>,
    ex_t: Vec<Complex64>,
    ey_t: Vec<Complex64>,
    pupil: Array2<f64>,
    modes: DetectorModes,
    f_vec: FrequencyVectors,
    refind: f64,
    /// `(n_frequencies, n_modes)` running sums.
    pub idx: Array2<Complex64>,
    pub idy: Array2<Complex64>,
}

impl std::fmt::Debug for DetectorIntegrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorIntegrator")
            .field("n0", &self.n0)
            .field("n1", &self.n1)
            .finish_non_exhaustive()
    }
}

impl DetectorIntegrator {
    pub fn new(
        n0: usize,
        n1: usize,
        pupil: Array2<f64>,
        modes: DetectorModes,
        f_vec: FrequencyVectors,
        refind: f64,
        n_frequencies: usize,
    ) -> TdmsResult<Self> {
        if f_vec.x.len() != n0 || f_vec.y.len() != n1 {
            return Err(TdmsError::input_validation(
                "INPUT.F_VEC",
                format!(
                    "spatial frequency vectors have lengths ({}, {}), expected ({}, {})",
                    f_vec.x.len(),
                    f_vec.y.len(),
                    n0,
                    n1
                ),
            ));
        }
        if pupil.dim() != (n1, n0) {
            return Err(TdmsError::input_validation(
                "INPUT.PUPIL",
                format!("pupil has shape {:?}, expected ({}, {})", pupil.dim(), n1, n0),
            ));
        }
        if modes.x.dim().0 != n1 || modes.x.dim().1 != n0 || modes.x.dim() != modes.y.dim() {
            return Err(TdmsError::input_validation(
                "INPUT.D_TILDE",
                format!(
                    "detector mode tensors have shapes {:?}/{:?}, expected ({}, {}, modes)",
                    modes.x.dim(),
                    modes.y.dim(),
                    n1,
                    n0
                ),
            ));
        }
        let mut planner = FftPlanner::new();
        let fft_rows = planner.plan_fft_forward(n1.max(1));
        let fft_cols = planner.plan_fft_forward(n0.max(1));
        let scratch_len = fft_rows
            .get_inplace_scratch_len()
            .max(fft_cols.get_inplace_scratch_len());
        let n_modes = modes.num_det_modes();
        Ok(Self {
            n0,
            n1,
            fft_rows,
            fft_cols,
            fft_scratch: vec![Complex64::new(0.0, 0.0); scratch_len],
            column_scratch: vec![Complex64::new(0.0, 0.0); n0.max(n1)],
            ex_t: vec![Complex64::new(0.0, 0.0); n0 * n1],
            ey_t: vec![Complex64::new(0.0, 0.0); n0 * n1],
            pupil,
            modes,
            f_vec,
            refind,
            idx: Array2::zeros((n_frequencies, n_modes)),
            idy: Array2::zeros((n_frequencies, n_modes)),
        })
    }

    pub fn num_det_modes(&self) -> usize {
        self.modes.num_det_modes()
    }

    /// Accumulate one sample: snapshot the plane, transform, weight, and add
    /// the propagated sum for every mode and extraction frequency.
    #[allow(clippy::too_many_arguments)]
    pub fn accumulate(
        &mut self,
        e_s: &ElectricSplitField,
        params: &SimulationParameters,
        f_ex_vec: &[f64],
        tind: usize,
        dt: f64,
        npe: usize,
    ) {
        let (n0, n1) = (self.n0, self.n1);
        if n0 == 0 || n1 == 0 {
            return;
        }
        let k_obs = params.k_det_obs;
        let pml = &params.pml;

        // centred field sums over the PML-free plane, j fastest
        for i in 0..n0 {
            for j in 0..n1 {
                let gi = i + pml.dxl;
                let gj = j + pml.dyl;
                let m = j + i * n1;
                self.ex_t[m] = Complex64::new(
                    e_s.field.xy[[k_obs, gj, gi]] + e_s.field.xz[[k_obs, gj, gi]],
                    0.0,
                );
                self.ey_t[m] = Complex64::new(
                    e_s.field.yx[[k_obs, gj, gi]] + e_s.field.yz[[k_obs, gj, gi]],
                    0.0,
                );
            }
        }
        self.fft_2d();

        let light = light_v();
        let air_interface = params.air_interface;
        let z_obs = params.z_obs;
        let refind = self.refind;
        let pupil = &self.pupil;
        let modes = &self.modes;
        let f_vec = &self.f_vec;
        let ex_t = &self.ex_t;
        let ey_t = &self.ey_t;

        for mode in 0..self.modes.num_det_modes() {
            let rows: Vec<(usize, &mut Complex64, &mut Complex64)> = self
                .idx
                .column_mut(mode)
                .into_iter()
                .zip(self.idy.column_mut(mode))
                .enumerate()
                .map(|(ifx, (idx, idy))| (ifx, idx, idy))
                .collect();

            rows.into_par_iter().for_each(|(ifx, idx, idy)| {
                let lambda = light / f_ex_vec[ifx];
                let mut idxt = Complex64::new(0.0, 0.0);
                let mut idyt = Complex64::new(0.0, 0.0);

                for j in 0..n1 {
                    for i in 0..n0 {
                        let fx = lambda * f_vec.x[i];
                        let fy = lambda * f_vec.y[j];
                        let kprop = if fx * fx + fy * fy < 1.0 {
                            match air_interface {
                                None => (IMAGINARY_UNIT * z_obs * 2.0 * DCPI / lambda * refind
                                    * (1.0 - (fx / refind).powi(2) - (fy / refind).powi(2))
                                        .sqrt())
                                .exp(),
                                Some(air) => (IMAGINARY_UNIT * (z_obs - air) * 2.0 * DCPI
                                    / lambda
                                    * refind
                                    * (1.0 - (fx / refind).powi(2) - (fy / refind).powi(2))
                                        .sqrt())
                                .exp()
                                    * (IMAGINARY_UNIT * air * 2.0 * DCPI / lambda
                                        * (1.0 - fx * fx - fy * fy).sqrt())
                                    .exp(),
                            }
                        } else {
                            Complex64::new(0.0, 0.0)
                        };
                        let m = j + i * n1;
                        let weight = pupil[[j, i]];
                        idxt += ex_t[m] * weight * modes.x[[j, i, mode]] * kprop;
                        idyt += ey_t[m] * weight * modes.y[[j, i, mode]] * kprop;
                    }
                }

                let phase_e =
                    (f_ex_vec[ifx] * 2.0 * DCPI * tind as f64 * dt) % (2.0 * DCPI);
                let weight = Complex64::new(0.0, phase_e).exp() / npe as f64;
                *idx += idxt * weight;
                *idy += idyt * weight;
            });
        }
    }

    /// Normalise both running sums by the electric source phasor.
    pub fn normalise(&mut self, e_norm: &[Complex64]) {
        for (ifx, norm) in e_norm.iter().enumerate() {
            let norm_sqr = norm.norm_sqr();
            if norm_sqr == 0.0 {
                continue;
            }
            let inverse = norm.conj() / norm_sqr;
            for mode in 0..self.idx.dim().1 {
                self.idx[[ifx, mode]] *= inverse;
                self.idy[[ifx, mode]] *= inverse;
            }
        }
    }

    /// In-place 2-D FFT over the `(n0, n1)` row-major snapshot buffers.
    fn fft_2d(&mut self) {
        let (n0, n1) = (self.n0, self.n1);
        let buffers: [&mut Vec<Complex64>; 2] = [&mut self.ex_t, &mut self.ey_t];
        for buffer in buffers {
            // rows of length n1
            for row in buffer.chunks_mut(n1) {
                self.fft_rows.process_with_scratch(row, &mut self.fft_scratch);
            }
            // columns of length n0, gathered through the scratch line
            for j in 0..n1 {
                for i in 0..n0 {
                    self.column_scratch[i] = buffer[j + i * n1];
                }
                self.fft_cols
                    .process_with_scratch(&mut self.column_scratch[..n0], &mut self.fft_scratch);
                for i in 0..n0 {
                    buffer[j + i * n1] = self.column_scratch[i];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_modes(n0: usize, n1: usize, modes: usize) -> DetectorModes {
        DetectorModes {
            x: Array3::from_elem((n1, n0, modes), Complex64::new(1.0, 0.0)),
            y: Array3::from_elem((n1, n0, modes), Complex64::new(1.0, 0.0)),
        }
    }

    #[test]
    fn integrator_rejects_mismatched_frequency_vectors() {
        let error = DetectorIntegrator::new(
            4,
            4,
            Array2::ones((4, 4)),
            flat_modes(4, 4, 1),
            FrequencyVectors {
                x: vec![0.0; 3],
                y: vec![0.0; 4],
            },
            1.0,
            1,
        )
        .expect_err("length mismatch should fail");
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn zero_snapshot_accumulates_nothing() {
        let mut integrator = DetectorIntegrator::new(
            4,
            4,
            Array2::ones((4, 4)),
            flat_modes(4, 4, 2),
            FrequencyVectors {
                x: vec![0.0; 4],
                y: vec![0.0; 4],
            },
            1.0,
            1,
        )
        .expect("integrator");

        let e_s = ElectricSplitField::zeros(8, 8, 8);
        let params = SimulationParameters {
            dt: 1.0e-16,
            npe: 10,
            ..SimulationParameters::default()
        };
        integrator.accumulate(&e_s, &params, &[1.0e14], 0, params.dt, 10);

        assert!(integrator.idx.iter().all(|value| value.norm() == 0.0));
        assert!(integrator.idy.iter().all(|value| value.norm() == 0.0));
    }

    #[test]
    fn normalisation_with_unit_norm_is_identity() {
        let mut integrator = DetectorIntegrator::new(
            2,
            2,
            Array2::ones((2, 2)),
            flat_modes(2, 2, 1),
            FrequencyVectors {
                x: vec![0.0; 2],
                y: vec![0.0; 2],
            },
            1.0,
            1,
        )
        .expect("integrator");
        integrator.idx[[0, 0]] = Complex64::new(2.0, -1.0);
        integrator.normalise(&[Complex64::new(1.0, 0.0)]);
        assert!((integrator.idx[[0, 0]] - Complex64::new(2.0, -1.0)).norm() < 1.0e-15);
    }
}
