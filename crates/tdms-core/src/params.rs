//! Simulation parameters, run/source modes and the TF/SF interface box.

use crate::constants::DCPI;
use crate::domain::{TdmsError, TdmsResult};
use std::fmt::{Display, Formatter};

/// Spatial derivative scheme used to advance the fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverMethod {
    #[default]
    FiniteDifference,
    PseudoSpectral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    SteadyState,
    Pulsed,
}

impl SourceMode {
    pub fn from_name(name: &str) -> TdmsResult<Self> {
        match name {
            "steadystate" => Ok(Self::SteadyState),
            "pulsed" => Ok(Self::Pulsed),
            other => Err(TdmsError::input_validation(
                "INPUT.SOURCEMODE",
                format!("value must be 'steadystate' or 'pulsed', got '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Complete,
    Analyse,
}

impl RunMode {
    pub fn from_name(name: &str) -> TdmsResult<Self> {
        match name {
            "complete" => Ok(Self::Complete),
            "analyse" => Ok(Self::Analyse),
            other => Err(TdmsError::input_validation(
                "INPUT.RUNMODE",
                format!("value must be 'complete' or 'analyse', got '{}'", other),
            )),
        }
    }
}

/// Simulation dimensionality. `J_tot = 0` grids run one of the transverse
/// subcases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Three,
    TransverseElectric,
    TransverseMagnetic,
}

impl Dimension {
    pub fn from_name(name: &str) -> TdmsResult<Self> {
        match name {
            "3" => Ok(Self::Three),
            "TE" => Ok(Self::TransverseElectric),
            "TM" => Ok(Self::TransverseMagnetic),
            other => Err(TdmsError::input_validation(
                "INPUT.DIMENSION",
                format!("value must be '3', 'TE' or 'TM', got '{}'", other),
            )),
        }
    }
}

impl Display for Dimension {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Three => "3",
            Self::TransverseElectric => "TE",
            Self::TransverseMagnetic => "TM",
        })
    }
}

/// Perfectly-matched-layer thickness per face, in cells.
#[derive(Debug, Clone, Copy, Default)]
pub struct PmlThickness {
    pub dxl: usize,
    pub dxu: usize,
    pub dyl: usize,
    pub dyu: usize,
    pub dzl: usize,
    pub dzu: usize,
}

/// One plane of the TF/SF interface box.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterfacePlane {
    pub index: usize,
    pub apply: bool,
}

/// The six planes bounding the total-field region.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceBox {
    pub i0: InterfacePlane,
    pub i1: InterfacePlane,
    pub j0: InterfacePlane,
    pub j1: InterfacePlane,
    pub k0: InterfacePlane,
    pub k1: InterfacePlane,
}

/// Yee cell extents.
#[derive(Debug, Clone, Copy, Default)]
pub struct CellSpacing {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

#[derive(Debug, Clone)]
pub struct SimulationParameters {
    pub omega_an: f64,
    pub to_l: f64,
    pub hwhm: f64,
    pub dt: f64,
    pub nt: usize,
    pub start_tind: usize,
    pub delta: CellSpacing,
    pub pml: PmlThickness,
    pub source_mode: SourceMode,
    pub run_mode: RunMode,
    pub dimension: Dimension,
    pub exphasorsvolume: bool,
    pub exphasorssurface: bool,
    pub intphasorssurface: bool,
    pub exdetintegral: bool,
    pub spacing_stride: [usize; 3],
    pub k_det_obs: usize,
    pub z_obs: f64,
    pub air_interface: Option<f64>,
    pub interp_mat_props: bool,
    pub is_structure: bool,
    pub is_multilayer: bool,
    pub is_disp_ml: bool,
    /// Phasor sampling stride in time steps (pulsed mode).
    pub np: usize,
    /// Effective number of phasor samples in pulsed mode.
    pub npe: usize,
    pub exi_present: bool,
    pub eyi_present: bool,
    pub has_tdfdir: bool,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            omega_an: 0.0,
            to_l: 0.0,
            hwhm: 0.0,
            dt: 0.0,
            nt: 0,
            start_tind: 0,
            delta: CellSpacing::default(),
            pml: PmlThickness::default(),
            source_mode: SourceMode::Pulsed,
            run_mode: RunMode::Complete,
            dimension: Dimension::Three,
            exphasorsvolume: false,
            exphasorssurface: false,
            intphasorssurface: false,
            exdetintegral: false,
            spacing_stride: [1, 1, 1],
            k_det_obs: 0,
            z_obs: 0.0,
            air_interface: None,
            interp_mat_props: false,
            is_structure: false,
            is_multilayer: false,
            is_disp_ml: false,
            np: 1,
            npe: 0,
            exi_present: false,
            eyi_present: false,
            has_tdfdir: false,
        }
    }
}

impl SimulationParameters {
    /// In steady-state mode, adjust `dt` so that an integer number of steps
    /// spans three source periods, and round `Nt` down to a whole number of
    /// those acquisition windows. Returns the window length `Nsteps`.
    pub fn adjust_for_steady_state(&mut self) -> usize {
        if self.source_mode != SourceMode::SteadyState {
            return 0;
        }
        let dt_old = self.dt;
        let nsteps_tmp = (2.0 * DCPI / self.omega_an / self.dt * 3.0).ceil();
        self.dt = 2.0 * DCPI / self.omega_an * 3.0 / nsteps_tmp;
        let nsteps = nsteps_tmp.round() as usize;
        if self.run_mode == RunMode::Complete {
            log::info!("Changing dt from {:.10e} to {:.10e}", dt_old, self.dt);
            if !self.nt.is_multiple_of(nsteps) {
                let nt_old = self.nt;
                self.nt = self.nt / nsteps * nsteps;
                log::info!(
                    "Changing the value of Nt from {} to {} for correct phasor extraction",
                    nt_old,
                    self.nt
                );
            }
        }
        nsteps
    }

    /// Phasor sampling stride and effective sample count for pulsed mode.
    /// The stride keeps the highest extraction frequency oversampled by a
    /// factor 2.5.
    pub fn set_phasor_window(&mut self, f_ex_vec: &[f64]) {
        let f_max = f_ex_vec.iter().fold(0.0_f64, |acc, f| acc.max(*f));
        self.np = if f_max > 0.0 {
            ((1.0 / (2.5 * self.dt * f_max)).floor() as usize).max(1)
        } else {
            1
        };
        let remaining = self.nt.saturating_sub(self.start_tind);
        self.npe = remaining.div_ceil(self.np);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_state_timestep_spans_three_periods_exactly() {
        let mut params = SimulationParameters {
            omega_an: 2.0 * DCPI * 1.0e14,
            dt: 1.3e-16,
            nt: 500,
            source_mode: SourceMode::SteadyState,
            run_mode: RunMode::Complete,
            ..SimulationParameters::default()
        };
        let nsteps = params.adjust_for_steady_state();

        assert!(nsteps > 0);
        let window = params.dt * nsteps as f64;
        let three_periods = 3.0 * 2.0 * DCPI / params.omega_an;
        assert!((window - three_periods).abs() < 1.0e-12 * three_periods);
        assert!(params.nt.is_multiple_of(nsteps));
    }

    #[test]
    fn pulsed_mode_leaves_timestep_untouched() {
        let mut params = SimulationParameters {
            omega_an: 1.0e15,
            dt: 1.3e-16,
            nt: 100,
            source_mode: SourceMode::Pulsed,
            ..SimulationParameters::default()
        };
        assert_eq!(params.adjust_for_steady_state(), 0);
        assert_eq!(params.dt, 1.3e-16);
    }

    #[test]
    fn phasor_window_oversamples_highest_frequency() {
        let mut params = SimulationParameters {
            dt: 1.0e-16,
            nt: 1000,
            ..SimulationParameters::default()
        };
        params.set_phasor_window(&[1.0e14, 4.0e14]);

        assert_eq!(params.np, 10);
        assert_eq!(params.npe, 100);
        // stride satisfies the 2.5x oversampling bound
        assert!(params.np as f64 <= 1.0 / (2.5 * params.dt * 4.0e14));
    }

    #[test]
    fn mode_names_parse_and_reject() {
        assert_eq!(
            SourceMode::from_name("steadystate").expect("mode"),
            SourceMode::SteadyState
        );
        assert!(SourceMode::from_name("harmonic").is_err());
        assert_eq!(RunMode::from_name("analyse").expect("mode"), RunMode::Analyse);
        assert_eq!(
            Dimension::from_name("TM").expect("dimension"),
            Dimension::TransverseMagnetic
        );
        assert!(Dimension::from_name("2").is_err());
    }
}
