//! Complex phasor volumes accumulated over the PML-free interior.
//!
//! A running discrete Fourier sum turns the real split fields into complex
//! amplitudes: on each sample step the current field value is multiplied by
//! `exp(i*omega*t)/Nsamples` and added in. Electric samples are phased at
//! `(n+1)*dt`, magnetic ones at `(n+0.5)*dt`, matching the staggering of the
//! underlying leapfrog.

use ndarray::Array3;
use num_complex::Complex64;

use crate::constants::DCPI;
use crate::derivative::FieldKind;
use crate::grid::{AxialDirection, SplitField};
use crate::interpolation::{best_scheme, InterpolationMethod};
use crate::params::Dimension;

/// Interior bounds of the phasor volume within the full grid, inclusive.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeBounds {
    pub il: usize,
    pub iu: usize,
    pub jl: usize,
    pub ju: usize,
    pub kl: usize,
    pub ku: usize,
}

impl VolumeBounds {
    /// Phasors are extracted away from the PML cells; a face without PML
    /// keeps the full extent.
    pub fn pml_free(
        i_tot: usize,
        j_tot: usize,
        k_tot: usize,
        pml: &crate::params::PmlThickness,
    ) -> Self {
        let lower = |thickness: usize| if thickness > 0 { thickness + 2 } else { 0 };
        let upper = |total: usize, thickness: usize| {
            if thickness > 0 {
                total - thickness - 1
            } else {
                total
            }
        };
        Self {
            il: lower(pml.dxl),
            iu: upper(i_tot, pml.dxu),
            jl: lower(pml.dyl),
            ju: upper(j_tot, pml.dyu),
            kl: lower(pml.dzl),
            ku: upper(k_tot, pml.dzu),
        }
    }

    pub fn i_extent(&self) -> usize {
        self.iu - self.il + 1
    }

    pub fn j_extent(&self) -> usize {
        self.ju - self.jl + 1
    }

    pub fn k_extent(&self) -> usize {
        self.ku - self.kl + 1
    }
}

/// The three interpolated output tensors of one field.
#[derive(Debug, Clone)]
pub struct InterpolatedVolume {
    pub x: Array3<Complex64>,
    pub y: Array3<Complex64>,
    pub z: Array3<Complex64>,
}

#[derive(Debug, Clone)]
pub struct FieldVolume {
    pub kind: FieldKind,
    pub x: Array3<Complex64>,
    pub y: Array3<Complex64>,
    pub z: Array3<Complex64>,
    pub bounds: VolumeBounds,
    /// Source envelope sample for the current step, set by the TF/SF pass.
    pub ft: f64,
    /// Running source-phasor normaliser at the analysis frequency.
    pub angular_norm: Complex64,
}

impl FieldVolume {
    pub fn new(kind: FieldKind, bounds: VolumeBounds) -> Self {
        let shape = (bounds.k_extent(), bounds.j_extent(), bounds.i_extent());
        Self {
            kind,
            x: Array3::zeros(shape),
            y: Array3::zeros(shape),
            z: Array3::zeros(shape),
            bounds,
            ft: 0.0,
            angular_norm: Complex64::new(0.0, 0.0),
        }
    }

    pub fn zero(&mut self) {
        self.x.fill(Complex64::new(0.0, 0.0));
        self.y.fill(Complex64::new(0.0, 0.0));
        self.z.fill(Complex64::new(0.0, 0.0));
    }

    /// Sample time of step `n` under this field's staggering convention.
    pub fn phase(&self, n: i64, omega: f64, dt: f64) -> f64 {
        match self.kind {
            FieldKind::Electric => omega * (n as f64 + 1.0) * dt,
            FieldKind::Magnetic => omega * (n as f64 + 0.5) * dt,
        }
    }

    /// Add one DFT sample of the split field over the interior volume.
    pub fn set_phasors(
        &mut self,
        split: &SplitField,
        n: i64,
        omega: f64,
        dt: f64,
        n_samples: usize,
    ) {
        let phase = self.phase(n, omega, dt) % (2.0 * DCPI);
        let weight = Complex64::new(0.0, phase).exp() / n_samples as f64;
        let bounds = self.bounds;
        for k in bounds.kl..=bounds.ku {
            for j in bounds.jl..=bounds.ju {
                for i in bounds.il..=bounds.iu {
                    let out = [k - bounds.kl, j - bounds.jl, i - bounds.il];
                    self.x[out] += weight * split.x_sum(k, j, i);
                    self.y[out] += weight * split.y_sum(k, j, i);
                    self.z[out] += weight * split.z_sum(k, j, i);
                }
            }
        }
    }

    /// Advance the source-phasor normaliser by the current envelope sample.
    pub fn add_to_angular_norm(&mut self, n: i64, window: usize, omega_an: f64, dt: f64) {
        let phase = self.phase(n, omega_an, dt) % (2.0 * DCPI);
        self.angular_norm += self.ft * Complex64::new(0.0, phase).exp() / window as f64;
    }

    /// Divide the accumulated volume by the source-phasor normaliser.
    pub fn normalise_volume(&mut self) {
        let norm = self.angular_norm;
        let norm_sqr = norm.norm_sqr();
        if norm_sqr == 0.0 {
            return;
        }
        let inverse = norm.conj() / norm_sqr;
        for component in [&mut self.x, &mut self.y, &mut self.z] {
            component.mapv_inplace(|value| value * inverse);
        }
    }

    /// Convergence figure: the largest pointwise difference to `other`,
    /// divided by the largest absolute value of `self`.
    pub fn max_pointwise_difference_over_max_element(&self, other: &FieldVolume) -> f64 {
        let mut max_difference = 0.0_f64;
        let mut max_element = 0.0_f64;
        for (mine, theirs) in [
            (&self.x, &other.x),
            (&self.y, &other.y),
            (&self.z, &other.z),
        ] {
            for (a, b) in mine.iter().zip(theirs.iter()) {
                max_difference = max_difference.max((a - b).norm());
                max_element = max_element.max(a.norm());
            }
        }
        if max_element > 0.0 {
            max_difference / max_element
        } else {
            max_difference
        }
    }

    pub fn set_values_from(&mut self, other: &FieldVolume) {
        self.x.assign(&other.x);
        self.y.assign(&other.y);
        self.z.assign(&other.z);
    }

    /// Reconstruct the phasor volume at Yee cell centres over the inclusive
    /// index ranges given (in volume-local indices). Electric components
    /// interpolate along their own axis; magnetic components along the two
    /// transverse axes.
    pub fn interpolate_over_range(
        &self,
        i_range: (usize, usize),
        j_range: (usize, usize),
        k_range: (usize, usize),
        dimension: Dimension,
        method: InterpolationMethod,
    ) -> InterpolatedVolume {
        let shape = (
            k_range.1 - k_range.0 + 1,
            j_range.1 - j_range.0 + 1,
            i_range.1 - i_range.0 + 1,
        );
        let mut out = InterpolatedVolume {
            x: Array3::zeros(shape),
            y: Array3::zeros(shape),
            z: Array3::zeros(shape),
        };
        let (want_x, want_y, want_z) = component_mask(self.kind, dimension);

        for k in k_range.0..=k_range.1 {
            for j in j_range.0..=j_range.1 {
                for i in i_range.0..=i_range.1 {
                    let cell = [k - k_range.0, j - j_range.0, i - i_range.0];
                    if want_x {
                        out.x[cell] = self.centre_value(AxialDirection::X, k, j, i, method);
                    }
                    if want_y {
                        out.y[cell] = self.centre_value(AxialDirection::Y, k, j, i, method);
                    }
                    if want_z {
                        out.z[cell] = self.centre_value(AxialDirection::Z, k, j, i, method);
                    }
                }
            }
        }
        out
    }

    fn centre_value(
        &self,
        component: AxialDirection,
        k: usize,
        j: usize,
        i: usize,
        method: InterpolationMethod,
    ) -> Complex64 {
        match self.kind {
            FieldKind::Electric => self.interpolate_along(component, component, k, j, i, method),
            FieldKind::Magnetic => {
                let (outer, inner) = match component {
                    AxialDirection::X => (AxialDirection::Z, AxialDirection::Y),
                    AxialDirection::Y => (AxialDirection::Z, AxialDirection::X),
                    AxialDirection::Z => (AxialDirection::Y, AxialDirection::X),
                };
                self.interpolate_two_axes(component, outer, inner, k, j, i, method)
            }
        }
    }

    fn component_array(&self, component: AxialDirection) -> &Array3<Complex64> {
        match component {
            AxialDirection::X => &self.x,
            AxialDirection::Y => &self.y,
            AxialDirection::Z => &self.z,
        }
    }

    fn axis_extent(&self, axis: AxialDirection) -> usize {
        let dims = self.x.dim();
        match axis {
            AxialDirection::X => dims.2 - 1,
            AxialDirection::Y => dims.1 - 1,
            AxialDirection::Z => dims.0 - 1,
        }
    }

    fn sample(
        &self,
        component: AxialDirection,
        axis: AxialDirection,
        offset: usize,
        k: usize,
        j: usize,
        i: usize,
    ) -> Complex64 {
        let array = self.component_array(component);
        match axis {
            AxialDirection::X => array[[k, j, offset]],
            AxialDirection::Y => array[[k, offset, i]],
            AxialDirection::Z => array[[offset, j, i]],
        }
    }

    fn interpolate_along(
        &self,
        component: AxialDirection,
        axis: AxialDirection,
        k: usize,
        j: usize,
        i: usize,
        method: InterpolationMethod,
    ) -> Complex64 {
        let extent = self.axis_extent(axis);
        if extent == 0 {
            return self.sample(component, axis, 0, k, j, i);
        }
        let index = match axis {
            AxialDirection::X => i,
            AxialDirection::Y => j,
            AxialDirection::Z => k,
        }
        .min(extent);
        let scheme = best_scheme(extent, index, method);
        let start = index as isize - scheme.datapoints_to_left() as isize;
        let mut samples = [Complex64::new(0.0, 0.0); 8];
        for ind in scheme.first_nonzero_coeff()..=scheme.last_nonzero_coeff() {
            let offset = (start + ind as isize).clamp(0, extent as isize) as usize;
            samples[ind] = self.sample(component, axis, offset, k, j, i);
        }
        scheme.interpolate_complex(&samples)
    }

    fn interpolate_two_axes(
        &self,
        component: AxialDirection,
        outer: AxialDirection,
        inner: AxialDirection,
        k: usize,
        j: usize,
        i: usize,
        method: InterpolationMethod,
    ) -> Complex64 {
        let extent = self.axis_extent(outer);
        if extent == 0 {
            return self.interpolate_along(component, inner, k, j, i, method);
        }
        let index = match outer {
            AxialDirection::X => i,
            AxialDirection::Y => j,
            AxialDirection::Z => k,
        }
        .min(extent);
        let scheme = best_scheme(extent, index, method);
        let start = index as isize - scheme.datapoints_to_left() as isize;
        let mut samples = [Complex64::new(0.0, 0.0); 8];
        for ind in scheme.first_nonzero_coeff()..=scheme.last_nonzero_coeff() {
            let offset = (start + ind as isize).clamp(0, extent as isize) as usize;
            let (kc, jc, ic) = match outer {
                AxialDirection::X => (k, j, offset),
                AxialDirection::Y => (k, offset, i),
                AxialDirection::Z => (offset, j, i),
            };
            samples[ind] = self.interpolate_along(component, inner, kc, jc, ic, method);
        }
        scheme.interpolate_complex(&samples)
    }
}

/// Which components are meaningful for each dimension mode.
fn component_mask(kind: FieldKind, dimension: Dimension) -> (bool, bool, bool) {
    match (kind, dimension) {
        (_, Dimension::Three) => (true, true, true),
        (FieldKind::Electric, Dimension::TransverseElectric) => (true, true, false),
        (FieldKind::Electric, Dimension::TransverseMagnetic) => (false, false, true),
        (FieldKind::Magnetic, Dimension::TransverseElectric) => (true, false, true),
        (FieldKind::Magnetic, Dimension::TransverseMagnetic) => (false, true, false),
    }
}
