//! Total-field/scattered-field source injection.
//!
//! The prescribed incident field enters the grid through corrections applied
//! on the six faces of the interface box: after the E half-step the electric
//! split components on the box are adjusted by the re-scaled source-plane
//! values, and after the H half-step the magnetic components just outside the
//! box are adjusted. Each polarisation slot of a source plane maps to one
//! split component and sign following the canonical Yee TF/SF formulation.
//!
//! Two temporal envelopes exist. In steady-state mode the source is ramped
//! on over four periods and oscillates forever; in pulsed mode it carries a
//! Gaussian envelope whose K-plane argument includes the half-cell offset
//! `dz/(2c)` between the staggered field times.

use ndarray::Array3;
use num_complex::Complex64;

use crate::constants::{light_v, DCPI, IMAGINARY_UNIT};
use crate::grid::{DispersiveMultiLayer, GridStore, XyzVectors};
use crate::params::{Dimension, InterfaceBox, SimulationParameters, SourceMode};

/// Width of the steady-state turn-on ramp, in source periods.
const RAMP_WIDTH: f64 = 4.0;

/// Complex amplitudes prescribing the incident field on the interface
/// planes; eight polarisation slots per transverse grid point.
#[derive(Debug, Default)]
pub struct SourcePlanes {
    /// `(K-extent, J-extent, 8)` for the I0/I1 planes.
    pub isource: Option<Array3<Complex64>>,
    /// `(K-extent, I-extent, 8)` for the J0/J1 planes.
    pub jsource: Option<Array3<Complex64>>,
    /// `(J-extent, I-extent, 8)` for the K0/K1 planes.
    pub ksource: Option<Array3<Complex64>>,
}

impl SourcePlanes {
    /// True when any of the four named polarisation slots of the K-plane
    /// source carries a non-trivial value; used to pick the TE/TM subcase of
    /// a 2-D run.
    pub fn ksource_slot_nonzero(&self, slot: usize) -> bool {
        self.ksource.as_ref().is_some_and(|ksource| {
            let (n_j, n_i, _) = ksource.dim();
            (0..n_j).any(|j| (0..n_i).any(|i| ksource[[j, i, slot]].norm() > 1.0e-15))
        })
    }
}

/// Broadband incident field added to the K0-plane H corrections, one
/// `(Nt, J_tot+1, I_tot+1)` tensor per transverse polarisation.
#[derive(Debug, Default)]
pub struct IncidentField {
    pub exi: Option<Array3<f64>>,
    pub eyi: Option<Array3<f64>>,
}

/// Linear turn-on: 0 at t = 0, 1 from `RAMP_WIDTH` periods onward.
pub fn linear_ramp(time: f64, period: f64) -> f64 {
    (time / (RAMP_WIDTH * period)).min(1.0)
}

/// `exp(-i omega t)` with the argument wrapped into one turn.
pub fn steady_phase(omega: f64, time: f64) -> Complex64 {
    (-IMAGINARY_UNIT * ((omega * time) % (2.0 * DCPI))).exp()
}

/// `(-i) exp(-i omega (t - t0))`, the carrier of the pulsed envelope.
pub fn pulsed_phase(omega: f64, time: f64, t0: f64) -> Complex64 {
    -IMAGINARY_UNIT * (-IMAGINARY_UNIT * ((omega * (time - t0)) % (2.0 * DCPI))).exp()
}

/// Gaussian envelope `exp(-pi ((t - t0 + offset)/hwhm)^2)`.
pub fn gaussian_envelope(time: f64, t0: f64, hwhm: f64, offset: f64) -> f64 {
    (-DCPI * ((time - t0 + offset) / hwhm).powi(2)).exp()
}

/// Everything the interface passes read.
pub struct TfsfInputs<'a> {
    pub interface: &'a InterfaceBox,
    pub sources: &'a SourcePlanes,
    pub incident: &'a IncidentField,
    pub c_b: &'a XyzVectors,
    pub d_b: &'a XyzVectors,
    pub rho_cond: &'a XyzVectors,
    pub ml: &'a DispersiveMultiLayer,
    pub params: &'a SimulationParameters,
    pub is_cond: bool,
}

impl<'a> TfsfInputs<'a> {
    fn x_index(&self, i: usize, k: usize, i_tot: usize) -> usize {
        if self.params.is_multilayer {
            (i_tot + 1) * k + i
        } else {
            i
        }
    }

    fn y_index(&self, j: usize, k: usize, j_tot: usize) -> usize {
        if self.params.is_multilayer {
            (j_tot + 1) * k + j
        } else {
            j
        }
    }
}

fn source_value(
    plane: Option<&Array3<Complex64>>,
    a: isize,
    b: isize,
    slot: usize,
) -> Complex64 {
    match plane {
        Some(source) => {
            let (n_a, n_b, _) = source.dim();
            if a < 0 || b < 0 || a as usize >= n_a || b as usize >= n_b {
                Complex64::new(0.0, 0.0)
            } else {
                source[[a as usize, b as usize, slot]]
            }
        }
        None => Complex64::new(0.0, 0.0),
    }
}

/// E-side interface corrections, applied after the six electric component
/// updates. Returns the H-time envelope sample `fth` that feeds the
/// magnetic source-phasor normaliser.
pub fn apply_electric_interface(
    grid: &mut GridStore,
    inputs: &TfsfInputs<'_>,
    tind: usize,
    time_h: f64,
) -> f64 {
    match inputs.params.source_mode {
        SourceMode::SteadyState => steady_electric_interface(grid, inputs, time_h),
        SourceMode::Pulsed => pulsed_electric_interface(grid, inputs, tind, time_h),
    }
}

fn steady_electric_interface(grid: &mut GridStore, inputs: &TfsfInputs<'_>, time_h: f64) -> f64 {
    let params = inputs.params;
    let period = 2.0 * DCPI / params.omega_an;
    let common = linear_ramp(time_h, period) * steady_phase(params.omega_an, time_h);
    let interface = inputs.interface;
    let (i_tot, j_tot) = (grid.i_tot, grid.j_tot);
    let tm = params.dimension == Dimension::TransverseMagnetic;
    let two_dt = 2.0 * params.dt;

    let (i0, i1) = (interface.i0, interface.i1);
    let (j0, j1) = (interface.j0, interface.j1);
    let (k0, k1) = (interface.k0, interface.k1);

    for k in k0.index..=k1.index {
        for j in j0.index..=j1.index {
            let kp = (k - k0.index) as isize;
            let jp = (j - j0.index) as isize;
            for (plane, lower) in [(i0, true), (i1, false)] {
                if !plane.apply {
                    continue;
                }
                let ai = inputs.x_index(plane.index, k, i_tot);
                let cb = inputs.c_b.x[ai];
                let rho = if inputs.is_cond { inputs.rho_cond.x[ai] } else { 0.0 };
                let disp = if params.is_disp_ml {
                    inputs.ml.kappa.x[ai] * inputs.ml.gamma[k] / two_dt
                } else {
                    0.0
                };
                let (slot_z, sign_z, slot_y, sign_y) = if lower {
                    (2, -1.0, 3, 1.0)
                } else {
                    (6, 1.0, 7, -1.0)
                };
                if k < k1.index || tm {
                    let term =
                        cb * (common * source_value(inputs.sources.isource.as_ref(), kp, jp, slot_z)).re;
                    grid.e.field.zx[[k, j, plane.index]] += sign_z * term;
                    if inputs.is_cond {
                        if let Some(j_c) = grid.aux.j_c.as_mut() {
                            j_c.zx[[k, j, plane.index]] -= sign_z * rho * term;
                        }
                    }
                    if params.is_disp_ml {
                        if let Some(j_s) = grid.aux.j_s.as_mut() {
                            j_s.zx[[k, j, plane.index]] -= sign_z * disp * term;
                        }
                    }
                }
                if j < j1.index {
                    let term =
                        cb * (common * source_value(inputs.sources.isource.as_ref(), kp, jp, slot_y)).re;
                    grid.e.field.yx[[k, j, plane.index]] += sign_y * term;
                    if inputs.is_cond {
                        if let Some(j_c) = grid.aux.j_c.as_mut() {
                            j_c.yx[[k, j, plane.index]] -= sign_y * rho * term;
                        }
                    }
                    if params.is_disp_ml {
                        if let Some(j_s) = grid.aux.j_s.as_mut() {
                            j_s.yx[[k, j, plane.index]] -= sign_y * disp * term;
                        }
                    }
                }
            }
        }
    }

    for k in k0.index..=k1.index {
        for i in i0.index..=i1.index {
            let kp = (k - k0.index) as isize;
            let ip = (i - i0.index) as isize;
            for (plane, lower) in [(j0, true), (j1, false)] {
                if !plane.apply {
                    continue;
                }
                let ai = inputs.y_index(plane.index, k, j_tot);
                let cb = inputs.c_b.y[ai];
                let rho = if inputs.is_cond { inputs.rho_cond.y[ai] } else { 0.0 };
                let disp = if params.is_disp_ml {
                    inputs.ml.kappa.y[ai] * inputs.ml.gamma[k] / two_dt
                } else {
                    0.0
                };
                let (slot_z, sign_z, slot_x, sign_x) = if lower {
                    (2, 1.0, 3, -1.0)
                } else {
                    (6, -1.0, 7, 1.0)
                };
                if k < k1.index || tm {
                    let term =
                        cb * (common * source_value(inputs.sources.jsource.as_ref(), kp, ip, slot_z)).re;
                    grid.e.field.zy[[k, plane.index, i]] += sign_z * term;
                    if inputs.is_cond {
                        if let Some(j_c) = grid.aux.j_c.as_mut() {
                            j_c.zy[[k, plane.index, i]] -= sign_z * rho * term;
                        }
                    }
                    if params.is_disp_ml {
                        if let Some(j_s) = grid.aux.j_s.as_mut() {
                            j_s.zy[[k, plane.index, i]] -= disp * term;
                        }
                    }
                }
                if i < i1.index {
                    let term =
                        cb * (common * source_value(inputs.sources.jsource.as_ref(), kp, ip, slot_x)).re;
                    grid.e.field.xy[[k, plane.index, i]] += sign_x * term;
                    if inputs.is_cond {
                        if let Some(j_c) = grid.aux.j_c.as_mut() {
                            j_c.xy[[k, plane.index, i]] -= sign_x * rho * term;
                        }
                    }
                    if params.is_disp_ml {
                        if let Some(j_s) = grid.aux.j_s.as_mut() {
                            j_s.xy[[k, plane.index, i]] += disp * term;
                        }
                    }
                }
            }
        }
    }

    for j in j0.index..=j1.index {
        for i in i0.index..=i1.index {
            let jp = (j - j0.index) as isize;
            let ip = (i - i0.index) as isize;
            for (plane, lower) in [(k0, true), (k1, false)] {
                if !plane.apply {
                    continue;
                }
                let kp = plane.index;
                let cb = inputs.c_b.z[kp];
                let rho = if inputs.is_cond { inputs.rho_cond.z[kp] } else { 0.0 };
                let disp = if params.is_disp_ml {
                    inputs.ml.kappa.z[kp] * inputs.ml.gamma[kp] / two_dt
                } else {
                    0.0
                };
                let (slot_y, sign_y, slot_x, sign_x) = if lower {
                    (2, -1.0, 3, 1.0)
                } else {
                    (6, 1.0, 7, -1.0)
                };
                if j < j1.index {
                    let term =
                        cb * (common * source_value(inputs.sources.ksource.as_ref(), jp, ip, slot_y)).re;
                    grid.e.field.yz[[kp, j, i]] += sign_y * term;
                    if inputs.is_cond {
                        if let Some(j_c) = grid.aux.j_c.as_mut() {
                            j_c.yz[[kp, j, i]] -= sign_y * rho * term;
                        }
                    }
                    if params.is_disp_ml {
                        if let Some(j_s) = grid.aux.j_s.as_mut() {
                            j_s.yz[[kp, j, i]] += sign_y * disp * term;
                        }
                    }
                }
                if i < i1.index {
                    let term =
                        cb * (common * source_value(inputs.sources.ksource.as_ref(), jp, ip, slot_x)).re;
                    grid.e.field.xz[[kp, j, i]] += sign_x * term;
                    if inputs.is_cond {
                        if let Some(j_c) = grid.aux.j_c.as_mut() {
                            j_c.xz[[kp, j, i]] -= sign_x * rho * term;
                        }
                    }
                    if params.is_disp_ml {
                        if let Some(j_s) = grid.aux.j_s.as_mut() {
                            j_s.xz[[kp, j, i]] += sign_x * disp * term;
                        }
                    }
                }
            }
        }
    }

    (linear_ramp(time_h, period) * steady_phase(params.omega_an, time_h)).re
}

fn pulsed_electric_interface(
    grid: &mut GridStore,
    inputs: &TfsfInputs<'_>,
    _tind: usize,
    time_h: f64,
) -> f64 {
    let params = inputs.params;
    let interface = inputs.interface;
    let k0 = interface.k0.index;
    let (i_tot, j_tot) = (grid.i_tot, grid.j_tot);
    let i0 = interface.i0.index as isize;
    let j0 = interface.j0.index as isize;

    let phase = pulsed_phase(params.omega_an, time_h, params.to_l);
    let half_cell = params.delta.dz / light_v() / 2.0;
    let envelope = gaussian_envelope(time_h, params.to_l, params.hwhm, half_cell);
    let cb = inputs.c_b.z[k0];
    let rho = if inputs.is_cond { inputs.rho_cond.z[k0] } else { 0.0 };
    let disp = if params.is_disp_ml {
        inputs.ml.kappa.z[k0] * inputs.ml.gamma[k0] / (2.0 * params.dt)
    } else {
        0.0
    };

    let j_upper = if j_tot == 0 { 1 } else { j_tot };
    for j in 0..j_upper {
        for i in 0..=i_tot {
            let jp = if j_tot == 0 { 0 } else { j as isize - j0 };
            let value = source_value(inputs.sources.ksource.as_ref(), jp, i as isize - i0, 2);
            let term = cb * (value * phase).re * envelope;
            grid.e.field.yz[[k0, j, i]] -= term;
            if inputs.is_cond {
                if let Some(j_c) = grid.aux.j_c.as_mut() {
                    j_c.yz[[k0, j, i]] += rho * term;
                }
            }
            if params.is_disp_ml {
                if let Some(j_s) = grid.aux.j_s.as_mut() {
                    j_s.yz[[k0, j, i]] -= disp * term;
                }
            }
        }
    }
    for j in 0..=j_tot {
        for i in 0..i_tot {
            let value =
                source_value(inputs.sources.ksource.as_ref(), j as isize - j0, i as isize - i0, 3);
            let term = cb * (value * phase).re * envelope;
            grid.e.field.xz[[k0, j, i]] += term;
            if inputs.is_cond {
                if let Some(j_c) = grid.aux.j_c.as_mut() {
                    j_c.xz[[k0, j, i]] -= rho * term;
                }
            }
            if params.is_disp_ml {
                if let Some(j_s) = grid.aux.j_s.as_mut() {
                    j_s.xz[[k0, j, i]] += disp * term;
                }
            }
        }
    }

    phase.re * envelope
}

/// H-side interface corrections, applied after the six magnetic component
/// updates. Returns the E-time envelope sample `fte` for the electric
/// source-phasor normaliser.
pub fn apply_magnetic_interface(
    grid: &mut GridStore,
    inputs: &TfsfInputs<'_>,
    tind: usize,
    time_e: f64,
) -> f64 {
    match inputs.params.source_mode {
        SourceMode::SteadyState => steady_magnetic_interface(grid, inputs, time_e),
        SourceMode::Pulsed => pulsed_magnetic_interface(grid, inputs, tind, time_e),
    }
}

fn steady_magnetic_interface(grid: &mut GridStore, inputs: &TfsfInputs<'_>, time_e: f64) -> f64 {
    let params = inputs.params;
    let period = 2.0 * DCPI / params.omega_an;
    let common = linear_ramp(time_e, period) * steady_phase(params.omega_an, time_e);
    let interface = inputs.interface;
    let (i_tot, j_tot) = (grid.i_tot, grid.j_tot);
    let tm = params.dimension == Dimension::TransverseMagnetic;

    let (i0, i1) = (interface.i0, interface.i1);
    let (j0, j1) = (interface.j0, interface.j1);
    let (k0, k1) = (interface.k0, interface.k1);

    for k in k0.index..=k1.index {
        for j in j0.index..=j1.index {
            let kp = (k - k0.index) as isize;
            let jp = (j - j0.index) as isize;
            for (plane, lower) in [(i0, true), (i1, false)] {
                if !plane.apply || (lower && plane.index == 0) {
                    continue;
                }
                let (target_i, ai_index) = if lower {
                    (plane.index - 1, plane.index - 1)
                } else {
                    (plane.index, plane.index)
                };
                let ai = inputs.x_index(ai_index, k, i_tot);
                let db = inputs.d_b.x[ai];
                let (slot_z, sign_z, slot_y, sign_y) = if lower {
                    (0, 1.0, 1, -1.0)
                } else {
                    (4, -1.0, 5, 1.0)
                };
                if j < j1.index {
                    let term =
                        db * (common * source_value(inputs.sources.isource.as_ref(), kp, jp, slot_z)).re;
                    grid.h.field.zx[[k, j, target_i]] += sign_z * term;
                }
                if k < k1.index || tm {
                    let term =
                        db * (common * source_value(inputs.sources.isource.as_ref(), kp, jp, slot_y)).re;
                    grid.h.field.yx[[k, j, target_i]] += sign_y * term;
                }
            }
        }
    }

    for k in k0.index..=k1.index {
        for i in i0.index..=i1.index {
            let kp = (k - k0.index) as isize;
            let ip = (i - i0.index) as isize;
            for (plane, lower) in [(j0, true), (j1, false)] {
                if !plane.apply || (lower && plane.index == 0) {
                    continue;
                }
                let target_j = if lower { plane.index - 1 } else { plane.index };
                let ai = inputs.y_index(plane.index, k, j_tot);
                let db = inputs.d_b.y[ai];
                let (slot_z, sign_z, slot_x, sign_x) = if lower {
                    (0, -1.0, 1, 1.0)
                } else {
                    (4, 1.0, 5, -1.0)
                };
                if i < i1.index {
                    let term =
                        db * (common * source_value(inputs.sources.jsource.as_ref(), kp, ip, slot_z)).re;
                    grid.h.field.zy[[k, target_j, i]] += sign_z * term;
                }
                if k < k1.index || tm {
                    let term =
                        db * (common * source_value(inputs.sources.jsource.as_ref(), kp, ip, slot_x)).re;
                    grid.h.field.xy[[k, target_j, i]] += sign_x * term;
                }
            }
        }
    }

    for j in j0.index..=j1.index {
        for i in i0.index..=i1.index {
            let jp = (j - j0.index) as isize;
            let ip = (i - i0.index) as isize;
            for (plane, lower) in [(k0, true), (k1, false)] {
                if !plane.apply || (lower && plane.index == 0) {
                    continue;
                }
                let target_k = if lower { plane.index - 1 } else { plane.index };
                let db = inputs.d_b.z[target_k];
                let (slot_y, sign_y, slot_x, sign_x) = if lower {
                    (0, 1.0, 1, -1.0)
                } else {
                    (4, -1.0, 5, 1.0)
                };
                if i < i1.index {
                    let term =
                        db * (common * source_value(inputs.sources.ksource.as_ref(), jp, ip, slot_y)).re;
                    grid.h.field.yz[[target_k, j, i]] += sign_y * term;
                }
                if j < j1.index {
                    let term =
                        db * (common * source_value(inputs.sources.ksource.as_ref(), jp, ip, slot_x)).re;
                    grid.h.field.xz[[target_k, j, i]] += sign_x * term;
                }
            }
        }
    }

    (linear_ramp(time_e, period) * steady_phase(params.omega_an, time_e)).re
}

fn pulsed_magnetic_interface(
    grid: &mut GridStore,
    inputs: &TfsfInputs<'_>,
    tind: usize,
    time_e: f64,
) -> f64 {
    let params = inputs.params;
    let interface = inputs.interface;
    let k0 = interface.k0.index;
    let target_k = k0 - 1;
    let (i_tot, j_tot) = (grid.i_tot, grid.j_tot);
    let i0 = interface.i0.index as isize;
    let j0 = interface.j0.index as isize;

    let phase = pulsed_phase(params.omega_an, time_e, params.to_l);
    let envelope = gaussian_envelope(time_e, params.to_l, params.hwhm, 0.0);
    let db = inputs.d_b.z[target_k];

    let j_upper = if j_tot == 0 { 1 } else { j_tot };
    for j in 0..j_upper {
        for i in 0..=i_tot {
            let jp = if j_tot == 0 { 0 } else { j as isize - j0 };
            let value = source_value(inputs.sources.ksource.as_ref(), jp, i as isize - i0, 1);
            grid.h.field.xz[[target_k, j, i]] -= db * (value * phase).re * envelope;
            if params.eyi_present {
                if let Some(eyi) = inputs.incident.eyi.as_ref() {
                    grid.h.field.xz[[target_k, j, i]] -= db * eyi[[tind, j, i]];
                }
            }
        }
    }
    for j in 0..=j_tot {
        for i in 0..i_tot {
            let value =
                source_value(inputs.sources.ksource.as_ref(), j as isize - j0, i as isize - i0, 0);
            grid.h.field.yz[[target_k, j, i]] += db * (value * phase).re * envelope;
            if params.exi_present {
                if let Some(exi) = inputs.incident.exi.as_ref() {
                    grid.h.field.yz[[target_k, j, i]] += db * exi[[tind, j, i]];
                }
            }
        }
    }

    phase.re * envelope
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_has_unit_plateau_and_zero_onset() {
        let period = 2.0;
        assert_eq!(linear_ramp(0.0, period), 0.0);
        assert_eq!(linear_ramp(RAMP_WIDTH * period, period), 1.0);
        assert_eq!(linear_ramp(100.0 * period, period), 1.0);

        let mut previous = 0.0;
        for step in 0..100 {
            let value = linear_ramp(step as f64 * 0.1, period);
            assert!(value >= previous, "ramp must be monotone non-decreasing");
            previous = value;
        }
    }

    #[test]
    fn steady_phase_wraps_the_argument() {
        let omega = 2.0 * DCPI * 1.0e14;
        let period = 2.0 * DCPI / omega;
        let a = steady_phase(omega, 3.0 * period + 0.25 * period);
        let b = steady_phase(omega, 0.25 * period);
        assert!((a - b).norm() < 1.0e-9);
    }

    #[test]
    fn pulsed_envelope_peaks_at_the_delay() {
        let peak = gaussian_envelope(5.0, 5.0, 1.0, 0.0);
        assert_eq!(peak, 1.0);
        assert!(gaussian_envelope(7.0, 5.0, 1.0, 0.0) < peak);
        // the half-cell offset slides the peak
        assert!(gaussian_envelope(5.0, 5.0, 1.0, 0.5) < 1.0);
    }

    #[test]
    fn ksource_slot_detection_sees_only_populated_slots() {
        let mut ksource = Array3::zeros((1, 4, 8));
        ksource[[0, 2, 2]] = Complex64::new(0.0, 1.0e-3);
        let planes = SourcePlanes {
            ksource: Some(ksource),
            ..SourcePlanes::default()
        };
        assert!(planes.ksource_slot_nonzero(2));
        assert!(!planes.ksource_slot_nonzero(3));
        assert!(!SourcePlanes::default().ksource_slot_nonzero(0));
    }
}
