//! The input and output bundles exchanged with the file-IO collaborator.
//!
//! The solver core is a pure transform from a bundle of named tensors and
//! scalars to a bundle of output tensors. Container parsing (HDF5/MAT style
//! files) stays outside the core; this module speaks a JSON rendering of the
//! same named groups through serde, and validates shapes on ingestion so
//! that every malformed input is rejected before the time loop starts.
//!
//! All indices in the bundle are zero-based. Tensors are shaped
//! `dims = [n_k, n_j, n_i]` records over flat row-major data.

use ndarray::{Array2, Array3};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{TdmsError, TdmsResult};

#[derive(Debug, thiserror::Error)]
pub enum BundleFileError {
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<BundleFileError> for TdmsError {
    fn from(error: BundleFileError) -> Self {
        match &error {
            BundleFileError::Read { .. } => TdmsError::io_system("IO.INPUT_FILE", error.to_string()),
            BundleFileError::Parse { .. } => {
                TdmsError::input_validation("INPUT.PARSE", error.to_string())
            }
        }
    }
}

fn read_bundle_source(path: &Path) -> Result<String, BundleFileError> {
    fs::read_to_string(path).map_err(|source| BundleFileError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TensorData {
    pub dims: Vec<usize>,
    pub data: Vec<f64>,
}

impl TensorData {
    pub fn validate(&self, label: &'static str) -> TdmsResult<()> {
        let expected: usize = self.dims.iter().product();
        if self.data.len() != expected {
            return Err(TdmsError::input_validation(
                label,
                format!(
                    "tensor data length {} does not match dims {:?}",
                    self.data.len(),
                    self.dims
                ),
            ));
        }
        Ok(())
    }

    pub fn to_array3(&self, label: &'static str) -> TdmsResult<Array3<f64>> {
        self.validate(label)?;
        if self.dims.len() != 3 {
            return Err(TdmsError::input_validation(
                label,
                format!("expected a 3-D tensor, got dims {:?}", self.dims),
            ));
        }
        Array3::from_shape_vec(
            (self.dims[0], self.dims[1], self.dims[2]),
            self.data.clone(),
        )
        .map_err(|error| TdmsError::input_validation(label, error.to_string()))
    }

    pub fn to_array2(&self, label: &'static str) -> TdmsResult<Array2<f64>> {
        self.validate(label)?;
        if self.dims.len() != 2 {
            return Err(TdmsError::input_validation(
                label,
                format!("expected a 2-D tensor, got dims {:?}", self.dims),
            ));
        }
        Array2::from_shape_vec((self.dims[0], self.dims[1]), self.data.clone())
            .map_err(|error| TdmsError::input_validation(label, error.to_string()))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ComplexTensorData {
    pub dims: Vec<usize>,
    pub real: Vec<f64>,
    pub imag: Vec<f64>,
}

impl ComplexTensorData {
    pub fn validate(&self, label: &'static str) -> TdmsResult<()> {
        let expected: usize = self.dims.iter().product();
        if self.real.len() != expected || self.imag.len() != expected {
            return Err(TdmsError::input_validation(
                label,
                format!(
                    "complex tensor parts ({}, {}) do not match dims {:?}",
                    self.real.len(),
                    self.imag.len(),
                    self.dims
                ),
            ));
        }
        Ok(())
    }

    pub fn to_array3(&self, label: &'static str) -> TdmsResult<Array3<Complex64>> {
        self.validate(label)?;
        if self.dims.len() != 3 {
            return Err(TdmsError::input_validation(
                label,
                format!("expected a 3-D tensor, got dims {:?}", self.dims),
            ));
        }
        let values = self
            .real
            .iter()
            .zip(&self.imag)
            .map(|(&re, &im)| Complex64::new(re, im))
            .collect();
        Array3::from_shape_vec((self.dims[0], self.dims[1], self.dims[2]), values)
            .map_err(|error| TdmsError::input_validation(label, error.to_string()))
    }

    pub fn from_array3(array: &Array3<Complex64>) -> Self {
        let dims = array.dim();
        Self {
            dims: vec![dims.0, dims.1, dims.2],
            real: array.iter().map(|value| value.re).collect(),
            imag: array.iter().map(|value| value.im).collect(),
        }
    }

    pub fn from_array2(array: &Array2<Complex64>) -> Self {
        let dims = array.dim();
        Self {
            dims: vec![dims.0, dims.1],
            real: array.iter().map(|value| value.re).collect(),
            imag: array.iter().map(|value| value.im).collect(),
        }
    }
}

/// The twelve split-field tensors plus the material index volume.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FdtdGridData {
    #[serde(rename = "Exy")]
    pub exy: TensorData,
    #[serde(rename = "Exz")]
    pub exz: TensorData,
    #[serde(rename = "Eyx")]
    pub eyx: TensorData,
    #[serde(rename = "Eyz")]
    pub eyz: TensorData,
    #[serde(rename = "Ezx")]
    pub ezx: TensorData,
    #[serde(rename = "Ezy")]
    pub ezy: TensorData,
    #[serde(rename = "Hxy")]
    pub hxy: TensorData,
    #[serde(rename = "Hxz")]
    pub hxz: TensorData,
    #[serde(rename = "Hyx")]
    pub hyx: TensorData,
    #[serde(rename = "Hyz")]
    pub hyz: TensorData,
    #[serde(rename = "Hzx")]
    pub hzx: TensorData,
    #[serde(rename = "Hzy")]
    pub hzy: TensorData,
    pub materials: TensorData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CCoefficientsData {
    #[serde(rename = "Cax")]
    pub cax: Vec<f64>,
    #[serde(rename = "Cay")]
    pub cay: Vec<f64>,
    #[serde(rename = "Caz")]
    pub caz: Vec<f64>,
    #[serde(rename = "Cbx")]
    pub cbx: Vec<f64>,
    #[serde(rename = "Cby")]
    pub cby: Vec<f64>,
    #[serde(rename = "Cbz")]
    pub cbz: Vec<f64>,
    #[serde(rename = "Ccx", default)]
    pub ccx: Vec<f64>,
    #[serde(rename = "Ccy", default)]
    pub ccy: Vec<f64>,
    #[serde(rename = "Ccz", default)]
    pub ccz: Vec<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DCoefficientsData {
    #[serde(rename = "Dax")]
    pub dax: Vec<f64>,
    #[serde(rename = "Day")]
    pub day: Vec<f64>,
    #[serde(rename = "Daz")]
    pub daz: Vec<f64>,
    #[serde(rename = "Dbx")]
    pub dbx: Vec<f64>,
    #[serde(rename = "Dby")]
    pub dby: Vec<f64>,
    #[serde(rename = "Dbz")]
    pub dbz: Vec<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FreespaceData {
    #[serde(rename = "Cbx")]
    pub cbx: Vec<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispParamsData {
    #[serde(default)]
    pub alpha: Vec<f64>,
    #[serde(default)]
    pub beta: Vec<f64>,
    #[serde(default)]
    pub gamma: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DeltaData {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// `[index, apply]` pairs per interface plane, zero-based.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterfaceData {
    #[serde(rename = "I0")]
    pub i0: (usize, bool),
    #[serde(rename = "I1")]
    pub i1: (usize, bool),
    #[serde(rename = "J0")]
    pub j0: (usize, bool),
    #[serde(rename = "J1")]
    pub j1: (usize, bool),
    #[serde(rename = "K0")]
    pub k0: (usize, bool),
    #[serde(rename = "K1")]
    pub k1: (usize, bool),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GridLabelsData {
    pub x_grid_labels: Vec<f64>,
    pub y_grid_labels: Vec<f64>,
    pub z_grid_labels: Vec<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConductiveAuxData {
    pub rho_x: Vec<f64>,
    pub rho_y: Vec<f64>,
    pub rho_z: Vec<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispersiveAuxData {
    pub alpha: Vec<f64>,
    pub beta: Vec<f64>,
    pub gamma: Vec<f64>,
    pub kappa_x: Vec<f64>,
    pub kappa_y: Vec<f64>,
    pub kappa_z: Vec<f64>,
    pub sigma_x: Vec<f64>,
    pub sigma_y: Vec<f64>,
    pub sigma_z: Vec<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrequencyVectorsData {
    pub fx_vec: Vec<f64>,
    pub fy_vec: Vec<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DTildeData {
    #[serde(rename = "Dx_tilde")]
    pub dx_tilde: ComplexTensorData,
    #[serde(rename = "Dy_tilde")]
    pub dy_tilde: ComplexTensorData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentFieldData {
    #[serde(default)]
    pub exi: Option<TensorData>,
    #[serde(default)]
    pub eyi: Option<TensorData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldSampleData {
    pub i: Vec<usize>,
    pub j: Vec<usize>,
    pub k: Vec<usize>,
    pub n: Vec<f64>,
}

impl FieldSampleData {
    pub fn all_vectors_are_non_empty(&self) -> bool {
        !self.i.is_empty() && !self.j.is_empty() && !self.k.is_empty() && !self.n.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CampsSampleData {
    pub vertices: Vec<[usize; 3]>,
    pub components: Vec<u8>,
}

/// The full named input bundle. Field names mirror the legacy input file.
#[derive(Debug, Clone, Deserialize)]
pub struct InputBundle {
    pub fdtdgrid: FdtdGridData,
    #[serde(rename = "Cmaterial")]
    pub c_material: CCoefficientsData,
    #[serde(rename = "Dmaterial")]
    pub d_material: DCoefficientsData,
    #[serde(rename = "C")]
    pub c_background: CCoefficientsData,
    #[serde(rename = "D")]
    pub d_background: DCoefficientsData,
    pub freespace: FreespaceData,
    pub disp_params: DispParamsData,
    pub delta: DeltaData,
    pub interface: InterfaceData,
    #[serde(rename = "Isource", default)]
    pub isource: Option<ComplexTensorData>,
    #[serde(rename = "Jsource", default)]
    pub jsource: Option<ComplexTensorData>,
    #[serde(rename = "Ksource", default)]
    pub ksource: Option<ComplexTensorData>,
    pub grid_labels: GridLabelsData,
    pub omega_an: f64,
    pub to_l: f64,
    pub hwhm: f64,
    #[serde(rename = "Dxl")]
    pub dxl: usize,
    #[serde(rename = "Dxu")]
    pub dxu: usize,
    #[serde(rename = "Dyl")]
    pub dyl: usize,
    #[serde(rename = "Dyu")]
    pub dyu: usize,
    #[serde(rename = "Dzl")]
    pub dzl: usize,
    #[serde(rename = "Dzu")]
    pub dzu: usize,
    #[serde(rename = "Nt")]
    pub nt: usize,
    pub dt: f64,
    #[serde(rename = "tind", default)]
    pub start_tind: usize,
    pub sourcemode: String,
    pub runmode: String,
    pub exphasorsvolume: bool,
    pub exphasorssurface: bool,
    pub intphasorssurface: bool,
    #[serde(default)]
    pub phasorsurface: Option<[usize; 6]>,
    pub phasorinc: [usize; 3],
    pub dimension: String,
    pub conductive_aux: ConductiveAuxData,
    #[serde(default)]
    pub dispersive_aux: Option<DispersiveAuxData>,
    #[serde(default)]
    pub structure: Option<Vec<[i64; 2]>>,
    pub f_ex_vec: Vec<f64>,
    #[serde(default)]
    pub exdetintegral: bool,
    #[serde(default)]
    pub f_vec: Option<FrequencyVectorsData>,
    #[serde(rename = "Pupil", default)]
    pub pupil: Option<TensorData>,
    #[serde(rename = "D_tilde", default)]
    pub d_tilde: Option<DTildeData>,
    #[serde(default)]
    pub k_det_obs: Option<usize>,
    #[serde(default)]
    pub air_interface: Option<f64>,
    pub intmatprops: bool,
    #[serde(default)]
    pub intmethod: Option<u32>,
    #[serde(default)]
    pub tdfield: Option<IncidentFieldData>,
    #[serde(default)]
    pub tdfdir: Option<String>,
    #[serde(default)]
    pub fieldsample: Option<FieldSampleData>,
    #[serde(default)]
    pub campssample: Option<CampsSampleData>,
    #[serde(default)]
    pub use_pstd: Option<serde_json::Value>,
    #[serde(default)]
    pub use_bli: Option<serde_json::Value>,
}

impl InputBundle {
    pub fn load(path: impl AsRef<Path>) -> TdmsResult<Self> {
        let path = path.as_ref();
        let source = read_bundle_source(path)?;
        serde_json::from_str(&source)
            .map_err(|source| BundleFileError::Parse {
                path: path.to_path_buf(),
                source,
            })
            .map_err(TdmsError::from)
    }

    /// Three-filename form: the `fdtdgrid` group is read from a separate
    /// grid file and spliced over the main bundle.
    pub fn load_with_grid(
        path: impl AsRef<Path>,
        grid_path: impl AsRef<Path>,
    ) -> TdmsResult<Self> {
        #[derive(Deserialize)]
        struct GridFile {
            fdtdgrid: FdtdGridData,
        }

        let mut bundle = Self::load(path)?;
        let grid_path = grid_path.as_ref();
        let source = read_bundle_source(grid_path)?;
        let grid_file: GridFile = serde_json::from_str(&source)
            .map_err(|source| BundleFileError::Parse {
                path: grid_path.to_path_buf(),
                source,
            })
            .map_err(TdmsError::from)?;
        bundle.fdtdgrid = grid_file.fdtdgrid;
        Ok(bundle)
    }

    /// Optional file-level flag override. Present-but-non-boolean values are
    /// a configuration error.
    pub fn scalar_flag(&self, name: &str) -> TdmsResult<Option<bool>> {
        let value = match name {
            "use_pstd" => &self.use_pstd,
            "use_bli" => &self.use_bli,
            other => {
                return Err(TdmsError::internal(
                    "INPUT.FLAG",
                    format!("'{}' is not an expected flag", other),
                ))
            }
        };
        match value {
            None => Ok(None),
            Some(serde_json::Value::Bool(flag)) => Ok(Some(*flag)),
            Some(other) => Err(TdmsError::input_validation(
                "INPUT.FLAG",
                format!("flag '{}' is present but not scalar: {}", name, other),
            )),
        }
    }
}

/// Detector-plane output: one complex array per polarisation, indexed
/// `[frequency][mode]`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IdOutputData {
    #[serde(rename = "Idx")]
    pub idx: ComplexTensorData,
    #[serde(rename = "Idy")]
    pub idy: ComplexTensorData,
}

/// The named output bundle; 31 tensors in the legacy ordering.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputBundle {
    #[serde(rename = "Ex_out")]
    pub ex_out: ComplexTensorData,
    #[serde(rename = "Ey_out")]
    pub ey_out: ComplexTensorData,
    #[serde(rename = "Ez_out")]
    pub ez_out: ComplexTensorData,
    #[serde(rename = "Hx_out")]
    pub hx_out: ComplexTensorData,
    #[serde(rename = "Hy_out")]
    pub hy_out: ComplexTensorData,
    #[serde(rename = "Hz_out")]
    pub hz_out: ComplexTensorData,
    #[serde(rename = "Ex_i")]
    pub ex_i: ComplexTensorData,
    #[serde(rename = "Ey_i")]
    pub ey_i: ComplexTensorData,
    #[serde(rename = "Hx_i")]
    pub hx_i: ComplexTensorData,
    #[serde(rename = "Hy_i")]
    pub hy_i: ComplexTensorData,
    pub x_out: Vec<f64>,
    pub y_out: Vec<f64>,
    pub z_out: Vec<f64>,
    #[serde(rename = "Ex_interp")]
    pub ex_interp: ComplexTensorData,
    #[serde(rename = "Ey_interp")]
    pub ey_interp: ComplexTensorData,
    #[serde(rename = "Ez_interp")]
    pub ez_interp: ComplexTensorData,
    #[serde(rename = "Hx_interp")]
    pub hx_interp: ComplexTensorData,
    #[serde(rename = "Hy_interp")]
    pub hy_interp: ComplexTensorData,
    #[serde(rename = "Hz_interp")]
    pub hz_interp: ComplexTensorData,
    pub x_interp: Vec<f64>,
    pub y_interp: Vec<f64>,
    pub z_interp: Vec<f64>,
    pub vertices: Vec<[usize; 3]>,
    pub camplitudes: ComplexTensorData,
    pub facets: Vec<[usize; 3]>,
    pub maxresfield: f64,
    #[serde(rename = "Id")]
    pub id: Option<IdOutputData>,
    pub fieldsample: TensorData,
    pub campssample: ComplexTensorData,
}

impl OutputBundle {
    pub fn write(&self, path: impl AsRef<Path>) -> TdmsResult<()> {
        let path = path.as_ref();
        let rendered = serde_json::to_string(self).map_err(|error| {
            TdmsError::internal("OUTPUT.SERIALISE", format!("{}", error))
        })?;
        fs::write(path, rendered).map_err(|error| {
            TdmsError::io_system(
                "IO.OUTPUT_FILE",
                format!("failed to write '{}': {}", path.display(), error),
            )
        })
    }
}
