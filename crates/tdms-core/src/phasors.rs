//! Surface, vertex and plane phasor accumulators.
//!
//! Beyond the full-volume phasors, complex amplitudes are accumulated on the
//! vertices of the user's observation cuboid, at arbitrary vertex lists with
//! a chosen component subset, and on the plane one cell above the K0
//! interface (used to bootstrap subsequent runs). All share the running-DFT
//! form `sum += value * exp(i*omega*t) / Nsamples` and the end-of-run
//! normalisation `out = sample * conj(norm) / |norm|^2`.

use ndarray::{Array2, Array3};
use num_complex::Complex64;

use crate::constants::DCPI;
use crate::grid::{AxialDirection, ElectricSplitField, MagneticSplitField};
use crate::params::Dimension;

/// Divide one accumulated sample by the source-phasor normaliser.
pub fn normalise_sample(sample: Complex64, norm: Complex64) -> Complex64 {
    let norm_sqr = norm.norm_sqr();
    if norm_sqr == 0.0 {
        return sample;
    }
    sample * norm.conj() / norm_sqr
}

fn phase_factor(phase: f64, n_samples: usize) -> Complex64 {
    Complex64::new(0.0, phase % (2.0 * DCPI)).exp() / n_samples as f64
}

/// Accumulator over the vertices of the observation surface: six components
/// per vertex per extraction frequency.
#[derive(Debug)]
pub struct SurfacePhasors {
    pub vertices: Vec<[usize; 3]>,
    /// `(n_frequencies, n_vertices, 6)`; slots 0..3 are Ex, Ey, Ez and
    /// 3..6 are Hx, Hy, Hz.
    pub amplitudes: Array3<Complex64>,
}

impl SurfacePhasors {
    pub fn new(vertices: Vec<[usize; 3]>, n_frequencies: usize) -> Self {
        let n_vertices = vertices.len();
        Self {
            vertices,
            amplitudes: Array3::zeros((n_frequencies, n_vertices, 6)),
        }
    }

    pub fn n_surface_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn zero(&mut self) {
        self.amplitudes.fill(Complex64::new(0.0, 0.0));
    }

    /// Add one DFT sample at every surface vertex. When `interpolate` is
    /// unset the raw split-field sums at the vertex are used instead of the
    /// centre-of-cell reconstruction.
    #[allow(clippy::too_many_arguments)]
    pub fn extract(
        &mut self,
        frequency_index: usize,
        e_s: &ElectricSplitField,
        h_s: &MagneticSplitField,
        n: i64,
        omega: f64,
        dt: f64,
        n_samples: usize,
        interpolate: bool,
    ) {
        let e_weight = phase_factor(omega * (n as f64 + 1.0) * dt, n_samples);
        let h_weight = phase_factor(omega * (n as f64 + 0.5) * dt, n_samples);

        for (vertex_index, vertex) in self.vertices.iter().enumerate() {
            let [i, j, k] = *vertex;
            let (ex, ey, ez, hx, hy, hz) = if interpolate {
                (
                    e_s.interpolate_to_centre_of(AxialDirection::X, k, j, i),
                    e_s.interpolate_to_centre_of(AxialDirection::Y, k, j, i),
                    e_s.interpolate_to_centre_of(AxialDirection::Z, k, j, i),
                    h_s.interpolate_to_centre_of(AxialDirection::X, k, j, i),
                    h_s.interpolate_to_centre_of(AxialDirection::Y, k, j, i),
                    h_s.interpolate_to_centre_of(AxialDirection::Z, k, j, i),
                )
            } else {
                (
                    e_s.field.x_sum(k, j, i),
                    e_s.field.y_sum(k, j, i),
                    e_s.field.z_sum(k, j, i),
                    h_s.field.x_sum(k, j, i),
                    h_s.field.y_sum(k, j, i),
                    h_s.field.z_sum(k, j, i),
                )
            };

            for (slot, value, weight) in [
                (0, ex, e_weight),
                (1, ey, e_weight),
                (2, ez, e_weight),
                (3, hx, h_weight),
                (4, hy, h_weight),
                (5, hz, h_weight),
            ] {
                self.amplitudes[[frequency_index, vertex_index, slot]] += value * weight;
            }
        }
    }

    pub fn normalise(&mut self, e_norm: &[Complex64], h_norm: &[Complex64]) {
        for frequency_index in 0..self.amplitudes.dim().0 {
            for vertex_index in 0..self.amplitudes.dim().1 {
                for slot in 0..6 {
                    let norm = if slot < 3 {
                        e_norm[frequency_index]
                    } else {
                        h_norm[frequency_index]
                    };
                    let cell = [frequency_index, vertex_index, slot];
                    self.amplitudes[cell] = normalise_sample(self.amplitudes[cell], norm);
                }
            }
        }
    }
}

/// Field components selectable for the vertex-list accumulator, in the
/// input's 1-based encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldComponent {
    Ex = 1,
    Ey = 2,
    Ez = 3,
    Hx = 4,
    Hy = 5,
    Hz = 6,
}

/// Complex amplitudes at an arbitrary vertex list with an arbitrary
/// component subset.
#[derive(Debug)]
pub struct VertexPhasors {
    pub vertices: Vec<[usize; 3]>,
    pub components: Vec<u8>,
    /// `(n_frequencies, n_vertices, n_components)`.
    pub amplitudes: Array3<Complex64>,
}

impl VertexPhasors {
    pub fn new(vertices: Vec<[usize; 3]>, components: Vec<u8>, n_frequencies: usize) -> Self {
        let shape = (n_frequencies, vertices.len(), components.len());
        Self {
            vertices,
            components,
            amplitudes: Array3::zeros(shape),
        }
    }

    pub fn n_vertices(&self) -> usize {
        self.vertices.len()
    }

    fn component_slot(&self, component: FieldComponent) -> Option<usize> {
        self.components
            .iter()
            .position(|&value| value == component as u8)
    }

    /// Add one DFT sample at every requested vertex. Components outside the
    /// active dimension subcase contribute zero.
    #[allow(clippy::too_many_arguments)]
    pub fn extract(
        &mut self,
        frequency_index: usize,
        e_s: &ElectricSplitField,
        h_s: &MagneticSplitField,
        n: i64,
        omega: f64,
        dt: f64,
        n_samples: usize,
        dimension: Dimension,
        j_tot: usize,
    ) {
        let e_weight = phase_factor(omega * (n as f64 + 1.0) * dt, n_samples);
        let h_weight = phase_factor(omega * (n as f64 + 0.5) * dt, n_samples);

        for (vertex_index, vertex) in self.vertices.iter().enumerate() {
            let [i, j, k] = *vertex;
            let (ex, ey, ez, hx, hy, hz) = match dimension {
                Dimension::Three => {
                    let ey = if j_tot != 0 {
                        e_s.interpolate_to_centre_of(AxialDirection::Y, k, j, i)
                    } else {
                        e_s.field.y_sum(k, j, i)
                    };
                    (
                        e_s.interpolate_to_centre_of(AxialDirection::X, k, j, i),
                        ey,
                        e_s.interpolate_to_centre_of(AxialDirection::Z, k, j, i),
                        h_s.interpolate_to_centre_of(AxialDirection::X, k, j, i),
                        h_s.interpolate_to_centre_of(AxialDirection::Y, k, j, i),
                        h_s.interpolate_to_centre_of(AxialDirection::Z, k, j, i),
                    )
                }
                Dimension::TransverseElectric => (
                    e_s.interpolate_to_centre_of(AxialDirection::X, k, j, i),
                    e_s.interpolate_to_centre_of(AxialDirection::Y, k, j, i),
                    0.0,
                    0.0,
                    0.0,
                    h_s.interpolate_to_centre_of(AxialDirection::Z, k, j, i),
                ),
                Dimension::TransverseMagnetic => (
                    0.0,
                    0.0,
                    e_s.interpolate_to_centre_of(AxialDirection::Z, k, j, i),
                    h_s.interpolate_to_centre_of(AxialDirection::X, k, j, i),
                    h_s.interpolate_to_centre_of(AxialDirection::Y, k, j, i),
                    0.0,
                ),
            };

            for (component, value, weight) in [
                (FieldComponent::Ex, ex, e_weight),
                (FieldComponent::Ey, ey, e_weight),
                (FieldComponent::Ez, ez, e_weight),
                (FieldComponent::Hx, hx, h_weight),
                (FieldComponent::Hy, hy, h_weight),
                (FieldComponent::Hz, hz, h_weight),
            ] {
                if let Some(slot) = self.component_slot(component) {
                    self.amplitudes[[frequency_index, vertex_index, slot]] += value * weight;
                }
            }
        }
    }

    pub fn normalise(&mut self, e_norm: &[Complex64], h_norm: &[Complex64]) {
        let (n_frequencies, n_vertices, n_components) = self.amplitudes.dim();
        for frequency_index in 0..n_frequencies {
            for vertex_index in 0..n_vertices {
                for slot in 0..n_components {
                    let norm = if self.components[slot] <= 3 {
                        e_norm[frequency_index]
                    } else {
                        h_norm[frequency_index]
                    };
                    let cell = [frequency_index, vertex_index, slot];
                    self.amplitudes[cell] = normalise_sample(self.amplitudes[cell], norm);
                }
            }
        }
    }
}

/// Phasors of the transverse field on the plane one cell above the K0
/// interface, accumulated at the analysis frequency over the whole run.
#[derive(Debug)]
pub struct PlanePhasors {
    /// `(J_tot, I_tot+1)`.
    pub ey: Array2<Complex64>,
    pub hx: Array2<Complex64>,
    /// `(J_tot+1, I_tot)`.
    pub ex: Array2<Complex64>,
    pub hy: Array2<Complex64>,
}

impl PlanePhasors {
    pub fn new(i_tot: usize, j_tot: usize) -> Self {
        Self {
            ey: Array2::zeros((j_tot, i_tot + 1)),
            hx: Array2::zeros((j_tot, i_tot + 1)),
            ex: Array2::zeros((j_tot + 1, i_tot)),
            hy: Array2::zeros((j_tot + 1, i_tot)),
        }
    }

    /// Accumulate one sample at plane `k_plane` (the K0 interface plus one).
    #[allow(clippy::too_many_arguments)]
    pub fn extract(
        &mut self,
        e_s: &ElectricSplitField,
        h_s: &MagneticSplitField,
        k_plane: usize,
        n: i64,
        omega: f64,
        dt: f64,
        window: usize,
    ) {
        let weight = phase_factor(omega * n as f64 * dt, window);
        let (n_jd, n_id) = self.ey.dim();
        for j in 0..n_jd {
            for i in 0..n_id {
                self.ey[[j, i]] +=
                    (e_s.field.yz[[k_plane, j, i]] + e_s.field.yx[[k_plane, j, i]]) * weight;
                self.hx[[j, i]] += (h_s.field.xz[[k_plane - 1, j, i]]
                    + h_s.field.xy[[k_plane, j, i]])
                    * weight;
            }
        }
        let (n_ju, n_iu) = self.ex.dim();
        for j in 0..n_ju {
            for i in 0..n_iu {
                self.ex[[j, i]] +=
                    (e_s.field.xz[[k_plane, j, i]] + e_s.field.xy[[k_plane, j, i]]) * weight;
                self.hy[[j, i]] += (h_s.field.yz[[k_plane - 1, j, i]]
                    + h_s.field.yx[[k_plane, j, i]])
                    * weight;
            }
        }
    }
}

/// Per-frequency source-phasor normaliser accumulators.
#[derive(Debug, Default)]
pub struct PhasorNorms {
    pub e_norm: Vec<Complex64>,
    pub h_norm: Vec<Complex64>,
}

impl PhasorNorms {
    pub fn new(n_frequencies: usize) -> Self {
        Self {
            e_norm: vec![Complex64::new(0.0, 0.0); n_frequencies],
            h_norm: vec![Complex64::new(0.0, 0.0); n_frequencies],
        }
    }

    pub fn zero(&mut self) {
        self.e_norm.fill(Complex64::new(0.0, 0.0));
        self.h_norm.fill(Complex64::new(0.0, 0.0));
    }

    /// Advance both normalisers with the current envelope samples; the
    /// electric one is phased at `(n+1)*dt`, the magnetic at `(n+0.5)*dt`.
    pub fn accumulate(
        &mut self,
        fte: f64,
        fth: f64,
        n: i64,
        frequencies: &[f64],
        dt: f64,
        window: usize,
    ) {
        for (index, frequency) in frequencies.iter().enumerate() {
            let omega = frequency * 2.0 * DCPI;
            self.e_norm[index] += fte * phase_factor(omega * (n as f64 + 1.0) * dt, window);
            self.h_norm[index] += fth * phase_factor(omega * (n as f64 + 0.5) * dt, window);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalisation_is_idempotent_for_unit_norm() {
        let sample = Complex64::new(3.0, -4.0);
        let once = normalise_sample(sample, Complex64::new(1.0, 0.0));
        let twice = normalise_sample(once, Complex64::new(1.0, 0.0));
        assert!((once - sample).norm() < 1.0e-15);
        assert!((twice - once).norm() < 1.0e-15);
    }

    #[test]
    fn normalisation_divides_by_the_norm() {
        let sample = Complex64::new(4.0, 0.0);
        let norm = Complex64::new(0.0, 2.0);
        let out = normalise_sample(sample, norm);
        // 4 / (2i) = -2i
        assert!((out - Complex64::new(0.0, -2.0)).norm() < 1.0e-14);
    }

    #[test]
    fn resonant_norm_accumulation_has_unit_magnitude() {
        let n_samples = 60;
        let dt = 1.0 / n_samples as f64;
        let frequency = 1.0;
        let omega = 2.0 * DCPI * frequency;
        let mut norms = PhasorNorms::new(1);

        for n in 0..n_samples {
            let time_e = (n as f64 + 1.0) * dt;
            let time_h = (n as f64 + 0.5) * dt;
            // envelope that itself oscillates at the resonant frequency
            let fte = (omega * time_e).cos();
            let fth = (omega * time_h).cos();
            norms.accumulate(fte, fth, n as i64, &[frequency], dt, n_samples);
        }

        // cos against exp(i.) leaves magnitude 1/2 after a whole period
        assert!((norms.e_norm[0].norm() - 0.5).abs() < 10.0 * f64::EPSILON * n_samples as f64);
        assert!((norms.h_norm[0].norm() - 0.5).abs() < 10.0 * f64::EPSILON * n_samples as f64);
    }

    #[test]
    fn vertex_component_subset_is_respected() {
        let phasors = VertexPhasors::new(vec![[1, 1, 1]], vec![2, 5], 1);
        assert_eq!(phasors.component_slot(FieldComponent::Ey), Some(0));
        assert_eq!(phasors.component_slot(FieldComponent::Hy), Some(1));
        assert_eq!(phasors.component_slot(FieldComponent::Ex), None);
    }

    #[test]
    fn surface_accumulator_sums_raw_split_fields_when_not_interpolating() {
        let mut e_s = ElectricSplitField::zeros(4, 4, 4);
        let h_s = MagneticSplitField::zeros(4, 4, 4);
        e_s.field.xy[[2, 2, 2]] = 0.5;
        e_s.field.xz[[2, 2, 2]] = 0.25;

        let mut surface = SurfacePhasors::new(vec![[2, 2, 2]], 1);
        // n = -1 makes the electric phase zero: the weight is 1/Nsamples
        surface.extract(0, &e_s, &h_s, -1, 2.0 * DCPI, 0.1, 1, false);

        let ex = surface.amplitudes[[0, 0, 0]];
        assert!((ex.re - 0.75).abs() < 1.0e-15);
    }
}
