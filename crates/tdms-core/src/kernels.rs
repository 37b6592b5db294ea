//! Split-field update kernels.
//!
//! Each time step advances the six electric split components, then (after
//! the E-side interface corrections) the six magnetic ones. A component pass
//! walks the grid line by line along its differentiation axis: the two
//! magnetic (or electric) half-components feeding the curl are packed into a
//! per-thread line buffer, the derivative engine turns the line into
//! half-step derivative samples, and a shared cell update applies the
//! coefficient, dispersion and conductivity algebra. The derivative engine
//! is the only thing that differs between the finite-difference and
//! pseudo-spectral solvers.
//!
//! Passes are data parallel across one outer spatial index; the work is
//! split recursively over disjoint array views so no two threads ever write
//! the same cell.

use ndarray::{Array3, ArrayViewMut3, Axis};
use num_complex::Complex64;
use std::cell::RefCell;

use crate::constants::EPSILON0;
use crate::derivative::{Derivative, FieldKind};
use crate::grid::{
    AxialDirection, CCollection, CMaterial, DCollection, DMaterial, DispersiveMultiLayer,
    GratingStructure, GridStore, SplitField, XyzVectors,
};
use crate::params::{Dimension, SimulationParameters};

thread_local! {
    static LINE_SCRATCH: RefCell<(Vec<Complex64>, Vec<Complex64>)> =
        const { RefCell::new((Vec::new(), Vec::new())) };
}

/// Which coefficient table axis a pass draws from (the differentiation
/// axis of the component).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoeffAxis {
    X,
    Y,
    Z,
}

/// Material averaging looks at the next cell along the component's own axis.
#[derive(Debug, Clone, Copy)]
enum NeighbourAxis {
    I,
    J,
    K,
}

/// Per-cell update coefficients after material selection.
#[derive(Debug, Clone, Copy, Default)]
struct CellCoefficients {
    ca: f64,
    cb: f64,
    cc: f64,
    rho: f64,
    alpha: f64,
    beta: f64,
    gamma: f64,
    kappa: f64,
    sigma: f64,
}

/// Read-only state shared by all passes of one half-step.
pub struct UpdateContext<'a> {
    pub materials: &'a Array3<u8>,
    pub c: &'a CCollection,
    pub c_material: &'a CMaterial,
    pub d: &'a DCollection,
    pub d_material: &'a DMaterial,
    pub ml: &'a DispersiveMultiLayer,
    pub rho_cond: &'a XyzVectors,
    pub structure: &'a GratingStructure,
    pub material_alpha: &'a [f64],
    pub material_beta: &'a [f64],
    pub material_gamma: &'a [f64],
    pub params: &'a SimulationParameters,
    pub is_disp: bool,
    pub is_cond: bool,
    pub i_tot: usize,
    pub j_tot: usize,
    pub k_tot: usize,
    /// Non-PML vertical extent used by the grating-structure clamp.
    pub k_interior: usize,
    /// Upper j bound of the TE-involved component loops.
    pub j_bound: usize,
    /// Upper j bound of the TM-involved component loops.
    pub j_p1_bound: usize,
}

impl<'a> UpdateContext<'a> {
    /// Structure-offset coefficient-table k index, clamped to the non-PML
    /// interior.
    fn k_loc(&self, k: usize, i: usize) -> usize {
        if !self.params.is_structure {
            return k;
        }
        let dzl = self.params.pml.dzl as i64;
        let cap = self.k_interior as i64;
        let k = k as i64;
        if k > dzl && k < dzl + cap {
            let shifted = k - self.structure.offset(i) as i64;
            if shifted < cap + dzl && shifted > dzl {
                shifted as usize
            } else if shifted >= cap + dzl {
                (dzl + cap - 1) as usize
            } else {
                (dzl + 1) as usize
            }
        } else {
            k as usize
        }
    }

    fn coeff_index(&self, axis: CoeffAxis, k_loc: usize, j: usize, i: usize) -> usize {
        match axis {
            CoeffAxis::X => {
                if self.params.is_multilayer {
                    (self.i_tot + 1) * k_loc + i
                } else {
                    i
                }
            }
            CoeffAxis::Y => {
                if self.params.is_multilayer {
                    (self.j_tot + 1) * k_loc + j
                } else {
                    j
                }
            }
            CoeffAxis::Z => k_loc,
        }
    }

    fn background_triple(&self, axis: CoeffAxis, index: usize) -> (f64, f64, f64) {
        let (a, b, c) = match axis {
            CoeffAxis::X => (&self.c.a.x, &self.c.b.x, &self.c.c.x),
            CoeffAxis::Y => (&self.c.a.y, &self.c.b.y, &self.c.c.y),
            CoeffAxis::Z => (&self.c.a.z, &self.c.b.z, &self.c.c.z),
        };
        let cc = if self.params.is_disp_ml { c[index] } else { 0.0 };
        (a[index], b[index], cc)
    }

    fn material_triple(&self, axis: CoeffAxis, material: u8) -> (f64, f64, f64) {
        let index = material as usize - 1;
        let (a, b, c) = match axis {
            CoeffAxis::X => (&self.c_material.a.x, &self.c_material.b.x, &self.c_material.c.x),
            CoeffAxis::Y => (&self.c_material.a.y, &self.c_material.b.y, &self.c_material.c.y),
            CoeffAxis::Z => (&self.c_material.a.z, &self.c_material.b.z, &self.c_material.c.z),
        };
        (a[index], b[index], c[index])
    }

    fn neighbour_cell(&self, axis: NeighbourAxis, k: usize, j: usize, i: usize) -> [usize; 3] {
        match axis {
            NeighbourAxis::I => [k, j, (i + 1).min(self.i_tot)],
            NeighbourAxis::J => [k, (j + 1).min(self.j_tot), i],
            NeighbourAxis::K => [(k + 1).min(self.k_tot), j, i],
        }
    }

    fn dispersion_triple(&self, material: u8, k_loc: usize) -> (f64, f64, f64) {
        if material != 0 {
            let index = material as usize - 1;
            (
                self.material_alpha[index],
                self.material_beta[index],
                self.material_gamma[index],
            )
        } else {
            (
                self.ml.alpha[k_loc],
                self.ml.beta[k_loc],
                self.ml.gamma[k_loc],
            )
        }
    }

    /// Coefficient selection for an electric component at one interior cell.
    fn e_coefficients(
        &self,
        axis: CoeffAxis,
        neighbour_axis: NeighbourAxis,
        k: usize,
        j: usize,
        i: usize,
    ) -> CellCoefficients {
        let k_loc = self.k_loc(k, i);
        let index = self.coeff_index(axis, k_loc, j, i);
        let material = self.materials[[k, j, i]];
        let neighbour = self.materials[self.neighbour_cell(neighbour_axis, k, j, i)];

        let mut out = CellCoefficients {
            kappa: 1.0,
            ..CellCoefficients::default()
        };

        if material != 0 || neighbour != 0 {
            let (mut ca, mut cb, mut cc) = if material == 0 {
                self.background_triple(axis, index)
            } else {
                self.material_triple(axis, material)
            };
            if self.params.interp_mat_props {
                let (na, nb, nc) = if neighbour == 0 {
                    self.background_triple(axis, index)
                } else {
                    self.material_triple(axis, neighbour)
                };
                ca = (ca + na) / 2.0;
                cb = (cb + nb) / 2.0;
                cc = (cc + nc) / 2.0;
            }
            out.ca = ca;
            out.cb = cb;
            out.cc = cc;
        } else {
            let (ca, cb, cc) = self.background_triple(axis, index);
            out.ca = ca;
            out.cb = cb;
            out.cc = cc;
            if self.is_cond {
                out.rho = match axis {
                    CoeffAxis::X => self.rho_cond.x[index],
                    CoeffAxis::Y => self.rho_cond.y[index],
                    CoeffAxis::Z => self.rho_cond.z[index],
                };
            }
        }

        if self.is_disp || self.params.is_disp_ml {
            out.sigma = match axis {
                CoeffAxis::X => self.ml.sigma.x[index],
                CoeffAxis::Y => self.ml.sigma.y[index],
                CoeffAxis::Z => self.ml.sigma.z[index],
            };
            out.kappa = match axis {
                CoeffAxis::X => self.ml.kappa.x[index],
                CoeffAxis::Y => self.ml.kappa.y[index],
                CoeffAxis::Z => self.ml.kappa.z[index],
            };
            let (alpha, beta, gamma) = self.dispersion_triple(material, k_loc);
            out.alpha = alpha;
            out.beta = beta;
            out.gamma = gamma;
            if material != 0 || neighbour != 0 {
                let (na, nb, ng) = self.dispersion_triple(neighbour, k_loc);
                out.alpha = (out.alpha + na) / 2.0;
                out.beta = (out.beta + nb) / 2.0;
                out.gamma = (out.gamma + ng) / 2.0;
            }
        }

        out
    }

    /// Coefficient pair for a magnetic component at one cell.
    fn h_coefficients(&self, axis: CoeffAxis, k: usize, j: usize, i: usize) -> (f64, f64) {
        let k_loc = self.k_loc(k, i);
        let index = self.coeff_index(axis, k_loc, j, i);
        let material = self.materials[[k, j, i]];
        if material == 0 {
            match axis {
                CoeffAxis::X => (self.d.a.x[index], self.d.b.x[index]),
                CoeffAxis::Y => (self.d.a.y[index], self.d.b.y[index]),
                CoeffAxis::Z => (self.d.a.z[index], self.d.b.z[index]),
            }
        } else {
            let m = material as usize - 1;
            match axis {
                CoeffAxis::X => (self.d_material.a.x[m], self.d_material.b.x[m]),
                CoeffAxis::Y => (self.d_material.a.y[m], self.d_material.b.y[m]),
                CoeffAxis::Z => (self.d_material.a.z[m], self.d_material.b.z[m]),
            }
        }
    }
}

/// Mutable views a pass writes: the split component being advanced plus the
/// matching components of the auxiliary fields when they exist.
struct PassTargets<'a> {
    e: ArrayViewMut3<'a, f64>,
    e_nm1: Option<ArrayViewMut3<'a, f64>>,
    j_s: Option<ArrayViewMut3<'a, f64>>,
    j_nm1: Option<ArrayViewMut3<'a, f64>>,
    j_c: Option<ArrayViewMut3<'a, f64>>,
}

impl<'a> PassTargets<'a> {
    fn split_at(self, axis: Axis, mid: usize) -> (PassTargets<'a>, PassTargets<'a>) {
        let (e_lo, e_hi) = self.e.split_at(axis, mid);
        let split_option = |view: Option<ArrayViewMut3<'a, f64>>| match view {
            Some(view) => {
                let (lo, hi) = view.split_at(axis, mid);
                (Some(lo), Some(hi))
            }
            None => (None, None),
        };
        let (e_nm1_lo, e_nm1_hi) = split_option(self.e_nm1);
        let (j_s_lo, j_s_hi) = split_option(self.j_s);
        let (j_nm1_lo, j_nm1_hi) = split_option(self.j_nm1);
        let (j_c_lo, j_c_hi) = split_option(self.j_c);
        (
            PassTargets {
                e: e_lo,
                e_nm1: e_nm1_lo,
                j_s: j_s_lo,
                j_nm1: j_nm1_lo,
                j_c: j_c_lo,
            },
            PassTargets {
                e: e_hi,
                e_nm1: e_nm1_hi,
                j_s: j_s_hi,
                j_nm1: j_nm1_hi,
                j_c: j_c_hi,
            },
        )
    }
}

/// Recursive split over the outer axis; each leaf sees a one-thick slab.
fn par_over_outer<F>(targets: PassTargets<'_>, axis: Axis, offset: usize, body: &F)
where
    F: Fn(usize, PassTargets<'_>) + Sync,
{
    let len = targets.e.len_of(axis);
    if len == 0 {
        return;
    }
    if len == 1 {
        body(offset, targets);
        return;
    }
    let mid = len / 2;
    let (lower, upper) = targets.split_at(axis, mid);
    rayon::join(
        || par_over_outer(lower, axis, offset, body),
        || par_over_outer(upper, axis, offset + mid, body),
    );
}

/// Which grid axis the pass walks lines along, and which it parallelises.
#[derive(Debug, Clone, Copy)]
enum LineLayout {
    /// Lines along j; parallel over k; inner loop over i.
    JLinesOverK,
    /// Lines along k; parallel over i; inner loop over j.
    KLinesOverI,
    /// Lines along i; parallel over k; inner loop over j.
    ILinesOverK,
}

impl LineLayout {
    fn outer_axis(self) -> Axis {
        match self {
            LineLayout::JLinesOverK | LineLayout::ILinesOverK => Axis(0),
            LineLayout::KLinesOverI => Axis(2),
        }
    }

    fn line_axis(self) -> AxialDirection {
        match self {
            LineLayout::JLinesOverK => AxialDirection::Y,
            LineLayout::KLinesOverI => AxialDirection::Z,
            LineLayout::ILinesOverK => AxialDirection::X,
        }
    }

    /// Map (outer, inner, line) indices onto the grid cell.
    fn cell(self, outer: usize, inner: usize, m: usize) -> (usize, usize, usize) {
        match self {
            LineLayout::JLinesOverK => (outer, m, inner),
            LineLayout::KLinesOverI => (m, inner, outer),
            LineLayout::ILinesOverK => (outer, inner, m),
        }
    }

    /// Index into a one-thick view of the slab at the given cell.
    fn view_index(self, cell: (usize, usize, usize)) -> [usize; 3] {
        match self {
            LineLayout::JLinesOverK | LineLayout::ILinesOverK => [0, cell.1, cell.2],
            LineLayout::KLinesOverI => [cell.0, cell.1, 0],
        }
    }
}

struct ElectricPass {
    layout: LineLayout,
    coeff_axis: CoeffAxis,
    neighbour_axis: NeighbourAxis,
    sign: f64,
    delta: f64,
    line_len: usize,
    update: (usize, usize),
    outer: (usize, usize),
    inner: (usize, usize),
}

#[allow(clippy::too_many_arguments)]
fn run_electric_pass<C>(
    targets: PassTargets<'_>,
    pass: &ElectricPass,
    ctx: &UpdateContext<'_>,
    deriv: &dyn Derivative,
    curl_sum: C,
) where
    C: Fn(usize, usize, usize) -> f64 + Sync,
{
    if pass.update.1 <= pass.update.0 || pass.line_len == 0 {
        return;
    }
    let layout = pass.layout;
    let axis = layout.outer_axis();
    let dt = ctx.params.dt;

    par_over_outer(targets, axis, 0, &|outer, mut slab| {
        if outer < pass.outer.0 || outer >= pass.outer.1 {
            return;
        }
        LINE_SCRATCH.with(|scratch| {
            let (line, fft_scratch) = &mut *scratch.borrow_mut();
            line.resize(pass.line_len, Complex64::new(0.0, 0.0));
            fft_scratch.resize(deriv.scratch_len(), Complex64::new(0.0, 0.0));

            for inner in pass.inner.0..pass.inner.1 {
                for (m, slot) in line.iter_mut().enumerate() {
                    let (k, j, i) = layout.cell(outer, inner, m);
                    *slot = Complex64::new(curl_sum(k, j, i), 0.0);
                }
                deriv.apply(FieldKind::Electric, layout.line_axis(), line, fft_scratch);

                for m in pass.update.0..pass.update.1 {
                    let cell = layout.cell(outer, inner, m);
                    let (k, j, i) = cell;
                    let view = layout.view_index(cell);
                    let coeffs =
                        ctx.e_coefficients(pass.coeff_axis, pass.neighbour_axis, k, j, i);
                    let curl = pass.sign * line[m].re;

                    let dispersive =
                        (ctx.is_disp || ctx.params.is_disp_ml) && coeffs.gamma != 0.0;
                    let conductive = ctx.is_cond && coeffs.rho != 0.0;

                    let e_old = slab.e[view];
                    let mut e_new = coeffs.ca * e_old + coeffs.cb * curl;

                    if dispersive {
                        let e_nm1_old = slab.e_nm1.as_ref().map_or(0.0, |v| v[view]);
                        let j_s_old = slab.j_s.as_ref().map_or(0.0, |v| v[view]);
                        let j_nm1_old = slab.j_nm1.as_ref().map_or(0.0, |v| v[view]);
                        e_new += coeffs.cc * e_nm1_old
                            - 0.5
                                * coeffs.cb
                                * pass.delta
                                * ((1.0 + coeffs.alpha) * j_s_old + coeffs.beta * j_nm1_old);
                        if conductive {
                            if let Some(j_c) = slab.j_c.as_ref() {
                                e_new += coeffs.cb * pass.delta * j_c[view];
                            }
                        }
                        let j_new = coeffs.alpha * j_s_old
                            + coeffs.beta * j_nm1_old
                            + coeffs.kappa * coeffs.gamma / (2.0 * dt) * (e_new - e_nm1_old)
                            + coeffs.sigma / EPSILON0 * coeffs.gamma * e_old;
                        if let Some(e_nm1) = slab.e_nm1.as_mut() {
                            e_nm1[view] = e_old;
                        }
                        if let Some(j_nm1) = slab.j_nm1.as_mut() {
                            j_nm1[view] = j_s_old;
                        }
                        if let Some(j_s) = slab.j_s.as_mut() {
                            j_s[view] = j_new;
                        }
                    } else if conductive {
                        if let Some(j_c) = slab.j_c.as_ref() {
                            e_new += coeffs.cb * pass.delta * j_c[view];
                        }
                    }

                    if conductive {
                        if let Some(j_c) = slab.j_c.as_mut() {
                            j_c[view] -= coeffs.rho * (e_new + e_old);
                        }
                    }

                    slab.e[view] = e_new;
                }
            }
        });
    });
}

struct MagneticPass {
    layout: LineLayout,
    coeff_axis: CoeffAxis,
    sign: f64,
    line_len: usize,
    update: (usize, usize),
    outer: (usize, usize),
    inner: (usize, usize),
}

fn run_magnetic_pass<C>(
    view: ArrayViewMut3<'_, f64>,
    pass: &MagneticPass,
    ctx: &UpdateContext<'_>,
    deriv: &dyn Derivative,
    curl_sum: C,
) where
    C: Fn(usize, usize, usize) -> f64 + Sync,
{
    if pass.update.1 <= pass.update.0 || pass.line_len == 0 {
        return;
    }
    let layout = pass.layout;
    let targets = PassTargets {
        e: view,
        e_nm1: None,
        j_s: None,
        j_nm1: None,
        j_c: None,
    };

    par_over_outer(targets, layout.outer_axis(), 0, &|outer, mut slab| {
        if outer < pass.outer.0 || outer >= pass.outer.1 {
            return;
        }
        LINE_SCRATCH.with(|scratch| {
            let (line, fft_scratch) = &mut *scratch.borrow_mut();
            line.resize(pass.line_len, Complex64::new(0.0, 0.0));
            fft_scratch.resize(deriv.scratch_len(), Complex64::new(0.0, 0.0));

            for inner in pass.inner.0..pass.inner.1 {
                for (m, slot) in line.iter_mut().enumerate() {
                    let (k, j, i) = layout.cell(outer, inner, m);
                    *slot = Complex64::new(curl_sum(k, j, i), 0.0);
                }
                deriv.apply(FieldKind::Magnetic, layout.line_axis(), line, fft_scratch);

                for m in pass.update.0..pass.update.1 {
                    let cell = layout.cell(outer, inner, m);
                    let (k, j, i) = cell;
                    let view = layout.view_index(cell);
                    let (da, db) = ctx.h_coefficients(pass.coeff_axis, k, j, i);
                    slab.e[view] = da * slab.e[view] + pass.sign * db * line[m].re;
                }
            }
        });
    });
}

fn electric_targets<'a>(
    component: fn(&mut SplitField) -> &mut Array3<f64>,
    e: &'a mut SplitField,
    e_nm1: Option<&'a mut SplitField>,
    j_s: Option<&'a mut SplitField>,
    j_nm1: Option<&'a mut SplitField>,
    j_c: Option<&'a mut SplitField>,
) -> PassTargets<'a> {
    PassTargets {
        e: component(e).view_mut(),
        e_nm1: e_nm1.map(|f| component(f).view_mut()),
        j_s: j_s.map(|f| component(f).view_mut()),
        j_nm1: j_nm1.map(|f| component(f).view_mut()),
        j_c: j_c.map(|f| component(f).view_mut()),
    }
}

/// Advance all six electric split components by one half-step.
pub fn advance_electric(grid: &mut GridStore, ctx: &UpdateContext<'_>, deriv: &dyn Derivative) {
    let (i_tot, j_tot, k_tot) = (grid.i_tot, grid.j_tot, grid.k_tot);
    let tm = ctx.params.dimension == Dimension::TransverseMagnetic;
    let delta = ctx.params.delta;

    let GridStore { e, h, aux, .. } = grid;
    let h_field = &h.field;

    if !tm {
        // E_s.xy: d/dy of (Hzy + Hzx)
        run_electric_pass(
            electric_targets(
                |f| &mut f.xy,
                &mut e.field,
                aux.e_nm1.as_mut(),
                aux.j_s.as_mut(),
                aux.j_nm1.as_mut(),
                aux.j_c.as_mut(),
            ),
            &ElectricPass {
                layout: LineLayout::JLinesOverK,
                coeff_axis: CoeffAxis::Y,
                neighbour_axis: NeighbourAxis::I,
                sign: 1.0,
                delta: delta.dy,
                line_len: j_tot,
                update: (1, j_tot),
                outer: (0, k_tot + 1),
                inner: (0, i_tot),
            },
            ctx,
            deriv,
            |k, j, i| h_field.zy[[k, j, i]] + h_field.zx[[k, j, i]],
        );

        // E_s.xz: -d/dz of (Hyx + Hyz)
        run_electric_pass(
            electric_targets(
                |f| &mut f.xz,
                &mut e.field,
                aux.e_nm1.as_mut(),
                aux.j_s.as_mut(),
                aux.j_nm1.as_mut(),
                aux.j_c.as_mut(),
            ),
            &ElectricPass {
                layout: LineLayout::KLinesOverI,
                coeff_axis: CoeffAxis::Z,
                neighbour_axis: NeighbourAxis::I,
                sign: -1.0,
                delta: delta.dz,
                line_len: k_tot,
                update: (1, k_tot),
                outer: (0, i_tot),
                inner: (0, ctx.j_p1_bound),
            },
            ctx,
            deriv,
            |k, j, i| h_field.yx[[k, j, i]] + h_field.yz[[k, j, i]],
        );

        // E_s.yx: -d/dx of (Hzx + Hzy)
        run_electric_pass(
            electric_targets(
                |f| &mut f.yx,
                &mut e.field,
                aux.e_nm1.as_mut(),
                aux.j_s.as_mut(),
                aux.j_nm1.as_mut(),
                aux.j_c.as_mut(),
            ),
            &ElectricPass {
                layout: LineLayout::ILinesOverK,
                coeff_axis: CoeffAxis::X,
                neighbour_axis: NeighbourAxis::J,
                sign: -1.0,
                delta: delta.dx,
                line_len: i_tot,
                update: (1, i_tot),
                outer: (0, k_tot + 1),
                inner: (0, ctx.j_bound),
            },
            ctx,
            deriv,
            |k, j, i| h_field.zx[[k, j, i]] + h_field.zy[[k, j, i]],
        );

        // E_s.yz: d/dz of (Hxy + Hxz)
        run_electric_pass(
            electric_targets(
                |f| &mut f.yz,
                &mut e.field,
                aux.e_nm1.as_mut(),
                aux.j_s.as_mut(),
                aux.j_nm1.as_mut(),
                aux.j_c.as_mut(),
            ),
            &ElectricPass {
                layout: LineLayout::KLinesOverI,
                coeff_axis: CoeffAxis::Z,
                neighbour_axis: NeighbourAxis::J,
                sign: 1.0,
                delta: delta.dz,
                line_len: k_tot,
                update: (1, k_tot),
                outer: (0, i_tot + 1),
                inner: (0, ctx.j_bound),
            },
            ctx,
            deriv,
            |k, j, i| h_field.xy[[k, j, i]] + h_field.xz[[k, j, i]],
        );
    }

    // E_s.zx: d/dx of (Hyx + Hyz); the TM subcase runs the extended ranges
    let (zx_outer, zx_inner) = if tm {
        ((0, k_tot + 1), (0, j_tot + 1))
    } else {
        ((0, k_tot), (0, ctx.j_p1_bound))
    };
    run_electric_pass(
        electric_targets(
            |f| &mut f.zx,
            &mut e.field,
            aux.e_nm1.as_mut(),
            aux.j_s.as_mut(),
            aux.j_nm1.as_mut(),
            aux.j_c.as_mut(),
        ),
        &ElectricPass {
            layout: LineLayout::ILinesOverK,
            coeff_axis: CoeffAxis::X,
            neighbour_axis: NeighbourAxis::K,
            sign: 1.0,
            delta: delta.dx,
            line_len: i_tot,
            update: (1, i_tot),
            outer: zx_outer,
            inner: zx_inner,
        },
        ctx,
        deriv,
        |k, j, i| h_field.yx[[k, j, i]] + h_field.yz[[k, j, i]],
    );

    // E_s.zy: -d/dy of (Hxy + Hxz)
    let zy_outer = if tm { (0, k_tot + 1) } else { (0, k_tot) };
    run_electric_pass(
        electric_targets(
            |f| &mut f.zy,
            &mut e.field,
            aux.e_nm1.as_mut(),
            aux.j_s.as_mut(),
            aux.j_nm1.as_mut(),
            aux.j_c.as_mut(),
        ),
        &ElectricPass {
            layout: LineLayout::JLinesOverK,
            coeff_axis: CoeffAxis::Y,
            neighbour_axis: NeighbourAxis::K,
            sign: -1.0,
            delta: delta.dy,
            line_len: j_tot,
            update: (1, j_tot),
            outer: zy_outer,
            inner: (0, i_tot + 1),
        },
        ctx,
        deriv,
        |k, j, i| h_field.xy[[k, j, i]] + h_field.xz[[k, j, i]],
    );
}

/// Advance all six magnetic split components by one half-step.
pub fn advance_magnetic(grid: &mut GridStore, ctx: &UpdateContext<'_>, deriv: &dyn Derivative) {
    let (i_tot, j_tot, k_tot) = (grid.i_tot, grid.j_tot, grid.k_tot);
    let tm = ctx.params.dimension == Dimension::TransverseMagnetic;

    let GridStore { e, h, .. } = grid;
    let e_field = &e.field;

    if !tm {
        // H_s.xz: d/dz of (Eyx + Eyz)
        run_magnetic_pass(
            h.field.xz.view_mut(),
            &MagneticPass {
                layout: LineLayout::KLinesOverI,
                coeff_axis: CoeffAxis::Z,
                sign: 1.0,
                line_len: k_tot + 1,
                update: (0, k_tot),
                outer: (0, i_tot + 1),
                inner: (0, ctx.j_bound),
            },
            ctx,
            deriv,
            |k, j, i| e_field.yx[[k, j, i]] + e_field.yz[[k, j, i]],
        );
    } else {
        h.field.xz.fill(0.0);
    }

    // H_s.xy: -d/dy of (Ezy + Ezx)
    let xy_outer = if tm { (0, k_tot + 1) } else { (0, k_tot) };
    run_magnetic_pass(
        h.field.xy.view_mut(),
        &MagneticPass {
            layout: LineLayout::JLinesOverK,
            coeff_axis: CoeffAxis::Y,
            sign: -1.0,
            line_len: j_tot + 1,
            update: (0, j_tot),
            outer: xy_outer,
            inner: (0, i_tot + 1),
        },
        ctx,
        deriv,
        |k, j, i| e_field.zy[[k, j, i]] + e_field.zx[[k, j, i]],
    );

    // H_s.yx: d/dx of (Ezx + Ezy)
    let (yx_outer, yx_inner) = if tm {
        ((0, k_tot + 1), (0, j_tot + 1))
    } else {
        ((0, k_tot), (0, ctx.j_p1_bound))
    };
    run_magnetic_pass(
        h.field.yx.view_mut(),
        &MagneticPass {
            layout: LineLayout::ILinesOverK,
            coeff_axis: CoeffAxis::X,
            sign: 1.0,
            line_len: i_tot + 1,
            update: (0, i_tot),
            outer: yx_outer,
            inner: yx_inner,
        },
        ctx,
        deriv,
        |k, j, i| e_field.zx[[k, j, i]] + e_field.zy[[k, j, i]],
    );

    if !tm {
        // H_s.yz: -d/dz of (Exy + Exz)
        run_magnetic_pass(
            h.field.yz.view_mut(),
            &MagneticPass {
                layout: LineLayout::KLinesOverI,
                coeff_axis: CoeffAxis::Z,
                sign: -1.0,
                line_len: k_tot + 1,
                update: (0, k_tot),
                outer: (0, i_tot),
                inner: (0, ctx.j_p1_bound),
            },
            ctx,
            deriv,
            |k, j, i| e_field.xy[[k, j, i]] + e_field.xz[[k, j, i]],
        );

        // H_s.zx: -d/dx of (Eyx + Eyz)
        run_magnetic_pass(
            h.field.zx.view_mut(),
            &MagneticPass {
                layout: LineLayout::ILinesOverK,
                coeff_axis: CoeffAxis::X,
                sign: -1.0,
                line_len: i_tot + 1,
                update: (0, i_tot),
                outer: (0, k_tot + 1),
                inner: (0, ctx.j_bound),
            },
            ctx,
            deriv,
            |k, j, i| e_field.yx[[k, j, i]] + e_field.yz[[k, j, i]],
        );

        // H_s.zy: d/dy of (Exy + Exz)
        run_magnetic_pass(
            h.field.zy.view_mut(),
            &MagneticPass {
                layout: LineLayout::JLinesOverK,
                coeff_axis: CoeffAxis::Y,
                sign: 1.0,
                line_len: j_tot + 1,
                update: (0, j_tot),
                outer: (0, k_tot + 1),
                inner: (0, i_tot),
            },
            ctx,
            deriv,
            |k, j, i| e_field.xy[[k, j, i]] + e_field.xz[[k, j, i]],
        );
    } else {
        h.field.yz.fill(0.0);
    }
}

/// The j-loop bounds that restrict a degenerate `J_tot = 0` grid to its
/// TE-only or TM-only subcase. The subcase is decided by which K-plane
/// source polarisation slots (or broadband incident components) are
/// non-trivial.
pub fn transverse_bounds(
    j_tot: usize,
    te_active: bool,
    tm_active: bool,
) -> (usize, usize) {
    if j_tot == 0 {
        let j_bound = usize::from(te_active);
        let j_p1_bound = usize::from(tm_active);
        (j_bound, j_p1_bound)
    } else {
        (j_tot, j_tot + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derivative::FiniteDifference;
    use crate::grid::GridStore;
    use ndarray::Array3;

    fn uniform_context<'a>(
        materials: &'a Array3<u8>,
        c: &'a CCollection,
        c_material: &'a CMaterial,
        d: &'a DCollection,
        d_material: &'a DMaterial,
        ml: &'a DispersiveMultiLayer,
        rho: &'a XyzVectors,
        structure: &'a GratingStructure,
        params: &'a SimulationParameters,
        dims: (usize, usize, usize),
    ) -> UpdateContext<'a> {
        UpdateContext {
            materials,
            c,
            c_material,
            d,
            d_material,
            ml,
            rho_cond: rho,
            structure,
            material_alpha: &[],
            material_beta: &[],
            material_gamma: &[],
            params,
            is_disp: false,
            is_cond: false,
            i_tot: dims.0,
            j_tot: dims.1,
            k_tot: dims.2,
            k_interior: dims.2,
            j_bound: dims.1,
            j_p1_bound: dims.1 + 1,
        }
    }

    fn background(i_tot: usize, j_tot: usize, k_tot: usize, a: f64, b: f64) -> CCollection {
        CCollection {
            a: XyzVectors {
                x: vec![a; i_tot + 1],
                y: vec![a; j_tot + 1],
                z: vec![a; k_tot + 1],
            },
            b: XyzVectors {
                x: vec![b; i_tot + 1],
                y: vec![b; j_tot + 1],
                z: vec![b; k_tot + 1],
            },
            c: XyzVectors {
                x: vec![0.0; i_tot + 1],
                y: vec![0.0; j_tot + 1],
                z: vec![0.0; k_tot + 1],
            },
            is_multilayer: false,
            is_disp_ml: false,
        }
    }

    fn magnetic_background(i_tot: usize, j_tot: usize, k_tot: usize, a: f64, b: f64) -> DCollection {
        DCollection {
            a: XyzVectors {
                x: vec![a; i_tot + 1],
                y: vec![a; j_tot + 1],
                z: vec![a; k_tot + 1],
            },
            b: XyzVectors {
                x: vec![b; i_tot + 1],
                y: vec![b; j_tot + 1],
                z: vec![b; k_tot + 1],
            },
        }
    }

    #[test]
    fn zero_fields_stay_zero_under_both_half_steps() {
        let (i_tot, j_tot, k_tot) = (4, 4, 4);
        let materials = Array3::zeros((k_tot + 1, j_tot + 1, i_tot + 1));
        let mut grid = GridStore::new(i_tot, j_tot, k_tot);
        let c = background(i_tot, j_tot, k_tot, 1.0, 0.5);
        let d = magnetic_background(i_tot, j_tot, k_tot, 1.0, 0.5);
        let params = SimulationParameters {
            dt: 0.1,
            ..SimulationParameters::default()
        };
        let ml = DispersiveMultiLayer::default();
        let rho = XyzVectors::default();
        let structure = GratingStructure::default();
        let c_material = CMaterial::default();
        let d_material = DMaterial::default();
        let ctx = uniform_context(
            &materials,
            &c,
            &c_material,
            &d,
            &d_material,
            &ml,
            &rho,
            &structure,
            &params,
            (i_tot, j_tot, k_tot),
        );
        let deriv = FiniteDifference;

        advance_electric(&mut grid, &ctx, &deriv);
        advance_magnetic(&mut grid, &ctx, &deriv);

        assert_eq!(grid.largest_split_field_value(), 0.0);
    }

    #[test]
    fn single_h_impulse_drives_the_expected_e_components() {
        let (i_tot, j_tot, k_tot) = (6, 6, 6);
        let materials = Array3::zeros((k_tot + 1, j_tot + 1, i_tot + 1));
        let mut grid = GridStore::new(i_tot, j_tot, k_tot);
        let c = background(i_tot, j_tot, k_tot, 1.0, 0.5);
        let d = magnetic_background(i_tot, j_tot, k_tot, 1.0, 0.5);
        let params = SimulationParameters {
            dt: 0.1,
            ..SimulationParameters::default()
        };
        let ml = DispersiveMultiLayer::default();
        let rho = XyzVectors::default();
        let structure = GratingStructure::default();
        let c_material = CMaterial::default();
        let d_material = DMaterial::default();
        let ctx = uniform_context(
            &materials,
            &c,
            &c_material,
            &d,
            &d_material,
            &ml,
            &rho,
            &structure,
            &params,
            (i_tot, j_tot, k_tot),
        );
        let deriv = FiniteDifference;

        grid.h.field.zy[[3, 3, 3]] = 1.0;
        advance_electric(&mut grid, &ctx, &deriv);

        // Exy sees the backward y-difference of Hz at j = 3 and j = 4
        assert_eq!(grid.e.field.xy[[3, 3, 3]], 0.5);
        assert_eq!(grid.e.field.xy[[3, 4, 3]], -0.5);
        // Eyx sees the negative backward x-difference of Hz at i = 3 and 4
        assert_eq!(grid.e.field.yx[[3, 3, 3]], -0.5);
        assert_eq!(grid.e.field.yx[[3, 3, 4]], 0.5);
        // components fed by other curls stay zero
        assert_eq!(grid.e.field.xz[[3, 3, 3]], 0.0);
        assert_eq!(grid.e.field.zx[[3, 3, 3]], 0.0);
    }

    #[test]
    fn transverse_bounds_select_the_active_subcase() {
        assert_eq!(transverse_bounds(8, true, true), (8, 9));
        assert_eq!(transverse_bounds(0, true, false), (1, 0));
        assert_eq!(transverse_bounds(0, false, true), (0, 1));
        assert_eq!(transverse_bounds(0, false, false), (0, 0));
    }

    #[test]
    fn material_cells_use_their_own_coefficient_tables() {
        let (i_tot, j_tot, k_tot) = (4, 4, 4);
        let mut materials = Array3::zeros((k_tot + 1, j_tot + 1, i_tot + 1));
        materials[[2, 2, 2]] = 1u8;
        let c = background(i_tot, j_tot, k_tot, 1.0, 0.5);
        let c_material = CMaterial {
            a: XyzVectors {
                x: vec![0.25],
                y: vec![0.25],
                z: vec![0.25],
            },
            b: XyzVectors {
                x: vec![0.75],
                y: vec![0.75],
                z: vec![0.75],
            },
            c: XyzVectors {
                x: vec![0.0],
                y: vec![0.0],
                z: vec![0.0],
            },
        };
        let d = magnetic_background(i_tot, j_tot, k_tot, 1.0, 0.5);
        let params = SimulationParameters {
            dt: 0.1,
            ..SimulationParameters::default()
        };
        let ml = DispersiveMultiLayer::default();
        let rho = XyzVectors::default();
        let structure = GratingStructure::default();
        let d_material = DMaterial::default();
        let ctx = uniform_context(
            &materials,
            &c,
            &c_material,
            &d,
            &d_material,
            &ml,
            &rho,
            &structure,
            &params,
            (i_tot, j_tot, k_tot),
        );

        let coeffs = ctx.e_coefficients(CoeffAxis::Y, NeighbourAxis::I, 2, 2, 2);
        assert_eq!(coeffs.ca, 0.25);
        assert_eq!(coeffs.cb, 0.75);

        let background_coeffs = ctx.e_coefficients(CoeffAxis::Y, NeighbourAxis::I, 1, 1, 1);
        assert_eq!(background_coeffs.ca, 1.0);
        assert_eq!(background_coeffs.cb, 0.5);
    }
}
