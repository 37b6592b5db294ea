//! Field storage and material description for the Yee grid.
//!
//! Each physical field component is split into two summands (`xy` + `xz`
//! recover `Ex` and so on) which evolve separately so that the PML and
//! dispersion bookkeeping stay local to one update. All twelve split
//! components are dense `(K_tot+1) x (J_tot+1) x (I_tot+1)` arrays indexed
//! `[k, j, i]`; component-specific loop bounds keep the unused edge cells at
//! zero.

use ndarray::Array3;

use crate::domain::{TdmsError, TdmsResult};
use crate::interpolation::{best_scheme, InterpolationMethod};

/// Labels one of the three grid axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxialDirection {
    X,
    Y,
    Z,
}

/// One `f64` vector per axis. Used for the background coefficient tables,
/// the PML conductivity profile and the multilayer kappa/sigma vectors.
#[derive(Debug, Clone, Default)]
pub struct XyzVectors {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

impl XyzVectors {
    pub fn component(&self, direction: AxialDirection) -> &[f64] {
        match direction {
            AxialDirection::X => &self.x,
            AxialDirection::Y => &self.y,
            AxialDirection::Z => &self.z,
        }
    }

    pub fn all_elements_less_than(&self, threshold: f64) -> bool {
        self.x
            .iter()
            .chain(self.y.iter())
            .chain(self.z.iter())
            .all(|value| value.abs() < threshold)
    }
}

/// Background update coefficients: `a` scales the previous field value, `b`
/// the curl term and `c` the (n-1) field value of the dispersive correction.
/// When multilayer-indexed, the per-axis vectors use the compound index
/// `(J_tot+1)*k + j` (and analogous for x).
#[derive(Debug, Clone, Default)]
pub struct CCollection {
    pub a: XyzVectors,
    pub b: XyzVectors,
    pub c: XyzVectors,
    pub is_multilayer: bool,
    pub is_disp_ml: bool,
}

/// Per-material update coefficients, indexed by material index minus one.
#[derive(Debug, Clone, Default)]
pub struct CMaterial {
    pub a: XyzVectors,
    pub b: XyzVectors,
    pub c: XyzVectors,
}

/// Background magnetic-update coefficients.
#[derive(Debug, Clone, Default)]
pub struct DCollection {
    pub a: XyzVectors,
    pub b: XyzVectors,
}

/// Per-material magnetic-update coefficients.
#[derive(Debug, Clone, Default)]
pub struct DMaterial {
    pub a: XyzVectors,
    pub b: XyzVectors,
}

/// Lorentz-model parameters of a dispersive multilayer background. `alpha`,
/// `beta` and `gamma` are indexed by the (structure-offset) k index; `kappa`
/// and `sigma` by the per-axis coefficient index.
#[derive(Debug, Clone, Default)]
pub struct DispersiveMultiLayer {
    pub alpha: Vec<f64>,
    pub beta: Vec<f64>,
    pub gamma: Vec<f64>,
    pub kappa: XyzVectors,
    pub sigma: XyzVectors,
}

impl DispersiveMultiLayer {
    /// A multilayer is dispersive when any gamma entry is non-zero.
    pub fn is_dispersive(&self) -> bool {
        self.gamma.iter().any(|gamma| gamma.abs() > 0.0)
    }
}

/// Vertical offset of the coefficient-table k index per i position. Allows a
/// grating profile to be carved out of an otherwise layered background.
#[derive(Debug, Clone, Default)]
pub struct GratingStructure {
    offsets: Vec<[i32; 2]>,
}

impl GratingStructure {
    pub fn new(offsets: Vec<[i32; 2]>) -> Self {
        Self { offsets }
    }

    pub fn has_elements(&self) -> bool {
        !self.offsets.is_empty()
    }

    pub fn offset(&self, i: usize) -> i32 {
        self.offsets[i][1]
    }
}

/// The six split half-components of one vector field.
#[derive(Debug, Clone)]
pub struct SplitField {
    pub xy: Array3<f64>,
    pub xz: Array3<f64>,
    pub yx: Array3<f64>,
    pub yz: Array3<f64>,
    pub zx: Array3<f64>,
    pub zy: Array3<f64>,
    pub i_tot: usize,
    pub j_tot: usize,
    pub k_tot: usize,
}

impl SplitField {
    pub fn zeros(i_tot: usize, j_tot: usize, k_tot: usize) -> Self {
        let shape = (k_tot + 1, j_tot + 1, i_tot + 1);
        Self {
            xy: Array3::zeros(shape),
            xz: Array3::zeros(shape),
            yx: Array3::zeros(shape),
            yz: Array3::zeros(shape),
            zx: Array3::zeros(shape),
            zy: Array3::zeros(shape),
            i_tot,
            j_tot,
            k_tot,
        }
    }

    pub fn components(&self) -> [&Array3<f64>; 6] {
        [&self.xy, &self.xz, &self.yx, &self.yz, &self.zx, &self.zy]
    }

    pub fn max_ijk_tot(&self) -> usize {
        self.i_tot.max(self.j_tot).max(self.k_tot)
    }

    /// Largest absolute value across all six split components.
    pub fn largest_field_value(&self) -> f64 {
        self.components()
            .iter()
            .flat_map(|component| component.iter())
            .fold(0.0_f64, |acc, value| acc.max(value.abs()))
    }

    /// Physical x component at `[k, j, i]`.
    pub fn x_sum(&self, k: usize, j: usize, i: usize) -> f64 {
        self.xy[[k, j, i]] + self.xz[[k, j, i]]
    }

    pub fn y_sum(&self, k: usize, j: usize, i: usize) -> f64 {
        self.yx[[k, j, i]] + self.yz[[k, j, i]]
    }

    pub fn z_sum(&self, k: usize, j: usize, i: usize) -> f64 {
        self.zx[[k, j, i]] + self.zy[[k, j, i]]
    }

    fn gather_line(
        &self,
        direction: AxialDirection,
        k: usize,
        j: usize,
        i: usize,
        start: isize,
        samples: &mut [f64; 8],
        first: usize,
        last: usize,
    ) {
        let clamp = |index: isize, upper: usize| -> usize {
            index.clamp(0, upper as isize) as usize
        };
        for ind in first..=last {
            let offset = start + ind as isize;
            samples[ind] = match direction {
                AxialDirection::X => {
                    let ic = clamp(offset, self.i_tot);
                    self.x_sum(k, j, ic)
                }
                AxialDirection::Y => {
                    let jc = clamp(offset, self.j_tot);
                    self.y_sum(k, jc, i)
                }
                AxialDirection::Z => {
                    let kc = clamp(offset, self.k_tot);
                    self.z_sum(kc, j, i)
                }
            };
        }
    }
}

/// Electric split field: interpolation to the centre of a Yee cell runs along
/// the component's own axis.
#[derive(Debug, Clone)]
pub struct ElectricSplitField {
    pub field: SplitField,
    pub interpolation_method: InterpolationMethod,
}

impl ElectricSplitField {
    pub fn zeros(i_tot: usize, j_tot: usize, k_tot: usize) -> Self {
        Self {
            field: SplitField::zeros(i_tot, j_tot, k_tot),
            interpolation_method: InterpolationMethod::BandLimited,
        }
    }

    pub fn interpolate_to_centre_of(
        &self,
        direction: AxialDirection,
        k: usize,
        j: usize,
        i: usize,
    ) -> f64 {
        let field = &self.field;
        let (extent, index) = match direction {
            AxialDirection::X => (field.i_tot, i),
            AxialDirection::Y => (field.j_tot, j),
            AxialDirection::Z => (field.k_tot, k),
        };
        if extent == 0 {
            // degenerate axis in 2-D mode: the raw sum is the centre value
            return match direction {
                AxialDirection::X => field.x_sum(k, j, i),
                AxialDirection::Y => field.y_sum(k, j, i),
                AxialDirection::Z => field.z_sum(k, j, i),
            };
        }
        let scheme = best_scheme(extent, index.min(extent), self.interpolation_method);
        let start = index as isize - scheme.datapoints_to_left() as isize;
        let mut samples = [0.0_f64; 8];
        field.gather_line(
            direction,
            k,
            j,
            i,
            start,
            &mut samples,
            scheme.first_nonzero_coeff(),
            scheme.last_nonzero_coeff(),
        );
        scheme.interpolate_real(&samples)
    }
}

/// Magnetic split field: face-centred components reach the cell centre by
/// interpolating along the two transverse axes in sequence.
#[derive(Debug, Clone)]
pub struct MagneticSplitField {
    pub field: SplitField,
    pub interpolation_method: InterpolationMethod,
}

impl MagneticSplitField {
    pub fn zeros(i_tot: usize, j_tot: usize, k_tot: usize) -> Self {
        Self {
            field: SplitField::zeros(i_tot, j_tot, k_tot),
            interpolation_method: InterpolationMethod::BandLimited,
        }
    }

    pub fn interpolate_to_centre_of(
        &self,
        direction: AxialDirection,
        k: usize,
        j: usize,
        i: usize,
    ) -> f64 {
        let (outer, inner) = match direction {
            AxialDirection::X => (AxialDirection::Z, AxialDirection::Y),
            AxialDirection::Y => (AxialDirection::Z, AxialDirection::X),
            AxialDirection::Z => (AxialDirection::Y, AxialDirection::X),
        };
        self.interpolate_two_axes(direction, outer, inner, k, j, i)
    }

    fn interpolate_two_axes(
        &self,
        component: AxialDirection,
        outer: AxialDirection,
        inner: AxialDirection,
        k: usize,
        j: usize,
        i: usize,
    ) -> f64 {
        let field = &self.field;
        let axis_extent = |direction: AxialDirection| match direction {
            AxialDirection::X => field.i_tot,
            AxialDirection::Y => field.j_tot,
            AxialDirection::Z => field.k_tot,
        };
        let axis_index = |direction: AxialDirection| match direction {
            AxialDirection::X => i,
            AxialDirection::Y => j,
            AxialDirection::Z => k,
        };

        let inner_value = |kc: usize, jc: usize, ic: usize| -> f64 {
            let extent = axis_extent(inner);
            if extent == 0 {
                return self.component_sum(component, kc, jc, ic);
            }
            let index = axis_index(inner).min(extent);
            let scheme = best_scheme(extent, index, self.interpolation_method);
            let start = index as isize - scheme.datapoints_to_left() as isize;
            let mut samples = [0.0_f64; 8];
            for ind in scheme.first_nonzero_coeff()..=scheme.last_nonzero_coeff() {
                let offset = (start + ind as isize).clamp(0, extent as isize) as usize;
                samples[ind] = match inner {
                    AxialDirection::X => self.component_sum(component, kc, jc, offset),
                    AxialDirection::Y => self.component_sum(component, kc, offset, ic),
                    AxialDirection::Z => self.component_sum(component, offset, jc, ic),
                };
            }
            scheme.interpolate_real(&samples)
        };

        let outer_extent = axis_extent(outer);
        if outer_extent == 0 {
            return inner_value(k, j, i);
        }
        let outer_index = axis_index(outer).min(outer_extent);
        let scheme = best_scheme(outer_extent, outer_index, self.interpolation_method);
        let start = outer_index as isize - scheme.datapoints_to_left() as isize;
        let mut samples = [0.0_f64; 8];
        for ind in scheme.first_nonzero_coeff()..=scheme.last_nonzero_coeff() {
            let offset = (start + ind as isize).clamp(0, outer_extent as isize) as usize;
            samples[ind] = match outer {
                AxialDirection::X => inner_value(k, j, offset),
                AxialDirection::Y => inner_value(k, offset, i),
                AxialDirection::Z => inner_value(offset, j, i),
            };
        }
        scheme.interpolate_real(&samples)
    }

    fn component_sum(&self, component: AxialDirection, k: usize, j: usize, i: usize) -> f64 {
        match component {
            AxialDirection::X => self.field.x_sum(k, j, i),
            AxialDirection::Y => self.field.y_sum(k, j, i),
            AxialDirection::Z => self.field.z_sum(k, j, i),
        }
    }
}

/// Auxiliary current densities and previous-step copies carrying the
/// dispersion and conductivity history. Allocated only when a dispersive
/// material or multilayer (`J_s`, `E_nm1`, `J_nm1`) or a conductive
/// background (`J_c`) is present.
#[derive(Debug, Default)]
pub struct AuxiliaryFields {
    pub e_nm1: Option<SplitField>,
    pub j_s: Option<SplitField>,
    pub j_nm1: Option<SplitField>,
    pub j_c: Option<SplitField>,
}

impl AuxiliaryFields {
    pub fn allocate(
        &mut self,
        i_tot: usize,
        j_tot: usize,
        k_tot: usize,
        is_dispersive: bool,
        is_conductive: bool,
    ) {
        if is_dispersive {
            self.e_nm1 = Some(SplitField::zeros(i_tot, j_tot, k_tot));
            self.j_s = Some(SplitField::zeros(i_tot, j_tot, k_tot));
            self.j_nm1 = Some(SplitField::zeros(i_tot, j_tot, k_tot));
        }
        if is_conductive {
            self.j_c = Some(SplitField::zeros(i_tot, j_tot, k_tot));
        }
    }
}

/// Validate a material index volume against the grid dimensions.
pub fn validate_material_volume(
    materials: &Array3<u8>,
    i_tot: usize,
    j_tot: usize,
    k_tot: usize,
) -> TdmsResult<()> {
    let expected = (k_tot + 1, j_tot + 1, i_tot + 1);
    if materials.dim() != expected {
        return Err(TdmsError::input_validation(
            "INPUT.MATERIALS",
            format!(
                "material index volume has shape {:?}, expected {:?}",
                materials.dim(),
                expected
            ),
        ));
    }
    Ok(())
}

/// True when any cell carries a dispersive material (`gamma/dt > 1e-15`).
pub fn has_dispersive_materials(materials: &Array3<u8>, gamma: &[f64], dt: f64) -> bool {
    materials.iter().any(|&material| {
        material != 0
            && gamma
                .get(material as usize - 1)
                .is_some_and(|g| (g / dt).abs() > 1.0e-15)
    })
}

/// The field state the update kernels read and mutate each half-step.
#[derive(Debug)]
pub struct GridStore {
    pub e: ElectricSplitField,
    pub h: MagneticSplitField,
    pub aux: AuxiliaryFields,
    pub i_tot: usize,
    pub j_tot: usize,
    pub k_tot: usize,
}

impl GridStore {
    pub fn new(i_tot: usize, j_tot: usize, k_tot: usize) -> Self {
        Self {
            e: ElectricSplitField::zeros(i_tot, j_tot, k_tot),
            h: MagneticSplitField::zeros(i_tot, j_tot, k_tot),
            aux: AuxiliaryFields::default(),
            i_tot,
            j_tot,
            k_tot,
        }
    }

    pub fn largest_split_field_value(&self) -> f64 {
        self.e
            .field
            .largest_field_value()
            .max(self.h.field.largest_field_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn split_sum_recovers_physical_components() {
        let mut field = SplitField::zeros(4, 4, 4);
        field.xy[[1, 2, 3]] = 0.25;
        field.xz[[1, 2, 3]] = 0.5;
        assert_eq!(field.x_sum(1, 2, 3), 0.75);
        assert_eq!(field.largest_field_value(), 0.5);
    }

    #[test]
    fn dispersive_material_detection_uses_gamma_over_dt() {
        let mut materials = Array3::zeros((3, 3, 3));
        materials[[1, 1, 1]] = 1u8;

        assert!(!has_dispersive_materials(&materials, &[0.0], 0.1));
        assert!(has_dispersive_materials(&materials, &[1.0e-3], 0.1));
    }

    #[test]
    fn mismatched_material_volume_is_rejected() {
        let materials = Array3::zeros((2, 2, 2));
        let error = validate_material_volume(&materials, 4, 4, 4)
            .expect_err("shape mismatch should fail");
        assert_eq!(error.label(), "INPUT.MATERIALS");
    }

    #[test]
    fn degenerate_axis_interpolation_returns_raw_sum() {
        let mut electric = ElectricSplitField::zeros(4, 0, 4);
        electric.field.yx[[2, 0, 2]] = 1.0;
        electric.field.yz[[2, 0, 2]] = 0.5;
        let value = electric.interpolate_to_centre_of(AxialDirection::Y, 2, 0, 2);
        assert_eq!(value, 1.5);
    }
}
