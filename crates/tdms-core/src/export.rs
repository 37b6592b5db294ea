//! Time-domain diagnostics: strided field snapshots and field-sample
//! moment accumulation.

use ndarray::{Array2, ArrayD, IxDyn};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use crate::bundle::FieldSampleData;
use crate::domain::{TdmsError, TdmsResult};
use crate::grid::{AxialDirection, ElectricSplitField};
use crate::params::PmlThickness;

/// Writes the E_x split-field sum over the (i, k) plane at j = 0 to one file
/// per export step. The spatial stride is 6 for the finite-difference solver
/// and 1 for the pseudo-spectral one.
#[derive(Debug)]
pub struct TdFieldExporter2d {
    pub folder: PathBuf,
    pub stride: usize,
    ni: usize,
    nk: usize,
}

impl TdFieldExporter2d {
    pub fn new(folder: impl Into<PathBuf>, stride: usize, i_tot: usize, k_tot: usize) -> Self {
        let stride = stride.max(1);
        Self {
            folder: folder.into(),
            stride,
            ni: (0..i_tot).step_by(stride).count(),
            nk: (0..k_tot).step_by(stride).count(),
        }
    }

    pub fn export_field(&self, e_s: &ElectricSplitField, tind: usize) -> TdmsResult<()> {
        let mut snapshot = Array2::<f64>::zeros((self.nk, self.ni));
        for (kt, k) in (0..e_s.field.k_tot).step_by(self.stride).enumerate() {
            for (it, i) in (0..e_s.field.i_tot).step_by(self.stride).enumerate() {
                snapshot[[kt, it]] = e_s.field.x_sum(k, 0, i);
            }
        }

        fs::create_dir_all(&self.folder).map_err(|error| {
            TdmsError::io_system(
                "IO.TDFDIR",
                format!("failed to create '{}': {}", self.folder.display(), error),
            )
        })?;
        let path = self.folder.join(format!("ex_{:06}.csv", tind));
        let mut file = fs::File::create(&path).map_err(|error| {
            TdmsError::io_system(
                "IO.TDFDIR",
                format!("failed to create '{}': {}", path.display(), error),
            )
        })?;
        for row in snapshot.rows() {
            let rendered: Vec<String> = row.iter().map(|value| format!("{value:.15e}")).collect();
            writeln!(file, "{}", rendered.join(",")).map_err(|error| {
                TdmsError::io_system(
                    "IO.TDFDIR",
                    format!("failed to write '{}': {}", path.display(), error),
                )
            })?;
        }
        Ok(())
    }
}

/// Accumulates `|E|^n / Nt` at the user's sample locations for each
/// requested moment `n`, interpolating the split field to cell centres.
#[derive(Debug)]
pub struct FieldSample {
    pub request: FieldSampleData,
    /// `(n_moments, nk, nj, ni)`.
    pub tensor: ArrayD<f64>,
}

impl FieldSample {
    pub fn new(request: FieldSampleData) -> Self {
        let shape = IxDyn(&[request.n.len(), request.k.len(), request.j.len(), request.i.len()]);
        Self {
            request,
            tensor: ArrayD::zeros(shape),
        }
    }

    pub fn is_active(&self) -> bool {
        self.request.all_vectors_are_non_empty()
    }

    pub fn accumulate(&mut self, e_s: &ElectricSplitField, pml: &PmlThickness, nt: usize) {
        if !self.is_active() {
            return;
        }
        let clamp = |value: usize, upper: usize| value.min(upper);
        for (kt, &ks) in self.request.k.iter().enumerate() {
            for (jt, &js) in self.request.j.iter().enumerate() {
                for (it, &is) in self.request.i.iter().enumerate() {
                    let i = clamp((is + pml.dxl).saturating_sub(1), e_s.field.i_tot);
                    let j = clamp((js + pml.dyl).saturating_sub(1), e_s.field.j_tot);
                    let k = clamp((ks + pml.dzl).saturating_sub(1), e_s.field.k_tot);

                    let ex = e_s.interpolate_to_centre_of(AxialDirection::X, k, j, i);
                    let ey = if j != 0 {
                        e_s.interpolate_to_centre_of(AxialDirection::Y, k, j, i)
                    } else {
                        e_s.field.y_sum(k, j, i)
                    };
                    let ez = e_s.interpolate_to_centre_of(AxialDirection::Z, k, j, i);
                    let magnitude_sq = ex * ex + ey * ey + ez * ez;

                    for (nt_index, &moment) in self.request.n.iter().enumerate() {
                        self.tensor[[nt_index, kt, jt, it]] +=
                            magnitude_sq.powf(moment / 2.0) / nt as f64;
                    }
                }
            }
        }
    }
}
