//! Simulation setup and the main time-stepping loop.
//!
//! `Simulation::new` validates the input bundle and builds the engine
//! context: the grid store, material tables, derivative engine, interface
//! sources and every requested accumulator. `run` then executes the loop in
//! the fixed order
//!
//! > phasor accumulation -> E updates -> E-side interface -> H updates ->
//! > H-side interface -> source-phasor normaliser -> diagnostics
//!
//! and `output_bundle` assembles the named outputs, normalised by the
//! source phasors.

use ndarray::Array3;
use num_complex::Complex64;
use std::time::Instant;

use crate::bundle::{
    CCoefficientsData, ComplexTensorData, DCoefficientsData, IdOutputData, InputBundle,
    OutputBundle, TensorData,
};
use crate::constants::{DCPI, EPSILON0};
use crate::derivative::{Derivative, FieldKind, FiniteDifference, PseudoSpectral};
use crate::detector::{DetectorIntegrator, DetectorModes, FrequencyVectors};
use crate::domain::{TdmsError, TdmsResult};
use crate::export::{FieldSample, TdFieldExporter2d};
use crate::fields::{FieldVolume, VolumeBounds};
use crate::grid::{
    has_dispersive_materials, validate_material_volume, CCollection, CMaterial, DCollection,
    DMaterial, DispersiveMultiLayer, GratingStructure, GridStore, SplitField, XyzVectors,
};
use crate::interpolation::InterpolationMethod;
use crate::kernels::{advance_electric, advance_magnetic, transverse_bounds, UpdateContext};
use crate::mesh::{create_boundary_2d, triangulate_cuboid, Cuboid};
use crate::params::{
    Dimension, InterfaceBox, InterfacePlane, RunMode, SimulationParameters, SolverMethod,
    SourceMode,
};
use crate::phasors::{PhasorNorms, PlanePhasors, SurfacePhasors, VertexPhasors};
use crate::source::{
    apply_electric_interface, apply_magnetic_interface, IncidentField, SourcePlanes, TfsfInputs,
};

/// Convergence tolerance of the steady-state phasor monitor.
const TOL: f64 = 1.0e-6;

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    TimeStepping,
    SteadyStateConverged,
    Finished,
}

/// Post-run diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct RunDiagnostics {
    pub state: RunState,
    pub max_residual_field: f64,
    pub steps_completed: usize,
}

pub struct Simulation {
    grid: GridStore,
    materials: Array3<u8>,
    params: SimulationParameters,
    derivative: Box<dyn Derivative>,
    interpolation_method: InterpolationMethod,

    c: CCollection,
    c_material: CMaterial,
    d: DCollection,
    d_material: DMaterial,
    ml: DispersiveMultiLayer,
    rho_cond: XyzVectors,
    structure: GratingStructure,
    material_alpha: Vec<f64>,
    material_beta: Vec<f64>,
    material_gamma: Vec<f64>,
    is_disp: bool,
    is_cond: bool,

    interface: InterfaceBox,
    sources: SourcePlanes,
    incident: IncidentField,
    f_ex_vec: Vec<f64>,
    grid_labels_x: Vec<f64>,
    grid_labels_y: Vec<f64>,
    grid_labels_z: Vec<f64>,

    e: FieldVolume,
    h: FieldVolume,
    e_copy: Option<FieldVolume>,
    surface: Option<SurfacePhasors>,
    surface_cuboid: Option<Cuboid>,
    vertex_phasors: Option<VertexPhasors>,
    plane: Option<PlanePhasors>,
    norms: PhasorNorms,
    detector: Option<DetectorIntegrator>,
    field_sample: Option<FieldSample>,
    td_exporter: Option<TdFieldExporter2d>,

    nsteps: usize,
    j_bound: usize,
    j_p1_bound: usize,
    state: RunState,
    max_residual_field: f64,
    steps_completed: usize,
}

fn load_split_field(
    target: &mut SplitField,
    source: [&TensorData; 6],
    labels: [&'static str; 6],
) -> TdmsResult<()> {
    let expected = target.xy.dim();
    let components = [
        &mut target.xy,
        &mut target.xz,
        &mut target.yx,
        &mut target.yz,
        &mut target.zx,
        &mut target.zy,
    ];
    for ((component, tensor), label) in components.into_iter().zip(source).zip(labels) {
        let array = tensor.to_array3(label)?;
        if array.dim() != expected {
            return Err(TdmsError::input_validation(
                label,
                format!(
                    "split field tensor has shape {:?}, expected {:?}",
                    array.dim(),
                    expected
                ),
            ));
        }
        component.assign(&array);
    }
    Ok(())
}

fn coefficient_vectors(
    data: &CCoefficientsData,
    fill_c_to: (usize, usize, usize),
) -> (XyzVectors, XyzVectors, XyzVectors) {
    let a = XyzVectors {
        x: data.cax.clone(),
        y: data.cay.clone(),
        z: data.caz.clone(),
    };
    let b = XyzVectors {
        x: data.cbx.clone(),
        y: data.cby.clone(),
        z: data.cbz.clone(),
    };
    let mut c = XyzVectors {
        x: data.ccx.clone(),
        y: data.ccy.clone(),
        z: data.ccz.clone(),
    };
    if c.x.is_empty() {
        c.x = vec![0.0; fill_c_to.0];
    }
    if c.y.is_empty() {
        c.y = vec![0.0; fill_c_to.1];
    }
    if c.z.is_empty() {
        c.z = vec![0.0; fill_c_to.2];
    }
    (a, b, c)
}

fn magnetic_vectors(data: &DCoefficientsData) -> (XyzVectors, XyzVectors) {
    (
        XyzVectors {
            x: data.dax.clone(),
            y: data.day.clone(),
            z: data.daz.clone(),
        },
        XyzVectors {
            x: data.dbx.clone(),
            y: data.dby.clone(),
            z: data.dbz.clone(),
        },
    )
}

fn check_axis_length(
    label: &'static str,
    actual: usize,
    plain: usize,
    multilayer: usize,
) -> TdmsResult<bool> {
    if actual == plain {
        Ok(false)
    } else if actual == multilayer {
        Ok(true)
    } else {
        Err(TdmsError::input_validation(
            label,
            format!(
                "coefficient vector has length {}, expected {} or {} (multilayer)",
                actual, plain, multilayer
            ),
        ))
    }
}

impl Simulation {
    pub fn new(
        bundle: &InputBundle,
        solver_method: SolverMethod,
        interpolation_method: InterpolationMethod,
    ) -> TdmsResult<Self> {
        let materials_tensor = bundle.fdtdgrid.materials.to_array3("INPUT.MATERIALS")?;
        let (nk, nj, ni) = materials_tensor.dim();
        if ni < 2 || nk < 2 || nj < 1 {
            return Err(TdmsError::input_validation(
                "INPUT.GRID",
                format!("grid extents ({}, {}, {}) are too small", ni, nj, nk),
            ));
        }
        let (i_tot, j_tot, k_tot) = (ni - 1, nj - 1, nk - 1);
        let mut materials = Array3::<u8>::zeros((nk, nj, ni));
        for (target, &value) in materials.iter_mut().zip(materials_tensor.iter()) {
            if !(0.0..=255.0).contains(&value) || value.fract() != 0.0 {
                return Err(TdmsError::input_validation(
                    "INPUT.MATERIALS",
                    format!("material index {} is not an integer in 0..=255", value),
                ));
            }
            *target = value as u8;
        }
        validate_material_volume(&materials, i_tot, j_tot, k_tot)?;

        let mut params = SimulationParameters {
            omega_an: bundle.omega_an,
            to_l: bundle.to_l,
            hwhm: bundle.hwhm,
            dt: bundle.dt,
            nt: bundle.nt,
            start_tind: bundle.start_tind,
            source_mode: SourceMode::from_name(&bundle.sourcemode)?,
            run_mode: RunMode::from_name(&bundle.runmode)?,
            dimension: Dimension::from_name(&bundle.dimension)?,
            exphasorsvolume: bundle.exphasorsvolume,
            exphasorssurface: bundle.exphasorssurface,
            intphasorssurface: bundle.intphasorssurface,
            exdetintegral: bundle.exdetintegral,
            spacing_stride: bundle.phasorinc,
            interp_mat_props: bundle.intmatprops,
            air_interface: bundle.air_interface,
            ..SimulationParameters::default()
        };
        params.delta.dx = bundle.delta.x;
        params.delta.dy = bundle.delta.y;
        params.delta.dz = bundle.delta.z;
        params.pml.dxl = bundle.dxl;
        params.pml.dxu = bundle.dxu;
        params.pml.dyl = bundle.dyl;
        params.pml.dyu = bundle.dyu;
        params.pml.dzl = bundle.dzl;
        params.pml.dzu = bundle.dzu;

        if params.dt <= 0.0 {
            return Err(TdmsError::input_validation(
                "INPUT.DT",
                format!("time step must be positive, got {}", params.dt),
            ));
        }

        // the file-level intmethod entry overrides the caller's choice
        let interpolation_method = match bundle.intmethod {
            None => interpolation_method,
            Some(1) => InterpolationMethod::BandLimited,
            Some(2) => InterpolationMethod::Cubic,
            Some(other) => {
                return Err(TdmsError::input_validation(
                    "INPUT.INTMETHOD",
                    format!("intmethod must be 1 (band-limited) or 2 (cubic), got {}", other),
                ))
            }
        };

        let mut grid = GridStore::new(i_tot, j_tot, k_tot);
        let fg = &bundle.fdtdgrid;
        load_split_field(
            &mut grid.e.field,
            [&fg.exy, &fg.exz, &fg.eyx, &fg.eyz, &fg.ezx, &fg.ezy],
            [
                "INPUT.EXY",
                "INPUT.EXZ",
                "INPUT.EYX",
                "INPUT.EYZ",
                "INPUT.EZX",
                "INPUT.EZY",
            ],
        )?;
        load_split_field(
            &mut grid.h.field,
            [&fg.hxy, &fg.hxz, &fg.hyx, &fg.hyz, &fg.hzx, &fg.hzy],
            [
                "INPUT.HXY",
                "INPUT.HXZ",
                "INPUT.HYX",
                "INPUT.HYZ",
                "INPUT.HZX",
                "INPUT.HZY",
            ],
        )?;
        grid.e.interpolation_method = interpolation_method;
        grid.h.interpolation_method = interpolation_method;

        // Background coefficient collections; a longer-than-axis vector
        // marks a multilayer-indexed table.
        let fill = (
            (i_tot + 1) * (k_tot + 1),
            (j_tot + 1) * (k_tot + 1),
            k_tot + 1,
        );
        let (ca, cb, cc) = coefficient_vectors(&bundle.c_background, fill);
        let ml_x = check_axis_length(
            "INPUT.C",
            ca.x.len(),
            i_tot + 1,
            (i_tot + 1) * (k_tot + 1),
        )?;
        let ml_y = check_axis_length(
            "INPUT.C",
            ca.y.len(),
            j_tot + 1,
            (j_tot + 1) * (k_tot + 1),
        )?;
        check_axis_length("INPUT.C", ca.z.len(), k_tot + 1, k_tot + 1)?;
        let is_multilayer = ml_x || ml_y;
        params.is_multilayer = is_multilayer;

        let has_disp_background = !bundle.c_background.ccx.is_empty();
        let c = CCollection {
            a: ca,
            b: cb,
            c: cc,
            is_multilayer,
            is_disp_ml: has_disp_background,
        };
        let (da, db) = magnetic_vectors(&bundle.d_background);
        let d = DCollection { a: da, b: db };

        let (cma, cmb, cmc) = coefficient_vectors(
            &bundle.c_material,
            (
                bundle.c_material.cax.len(),
                bundle.c_material.cay.len(),
                bundle.c_material.caz.len(),
            ),
        );
        let c_material = CMaterial {
            a: cma,
            b: cmb,
            c: cmc,
        };
        let (dma, dmb) = magnetic_vectors(&bundle.d_material);
        let d_material = DMaterial { a: dma, b: dmb };

        let n_materials = c_material.a.x.len();
        if let Some(&max_material) = materials.iter().max() {
            if max_material as usize > n_materials {
                return Err(TdmsError::input_validation(
                    "INPUT.MATERIALS",
                    format!(
                        "material index {} exceeds the {} material coefficient entries",
                        max_material, n_materials
                    ),
                ));
            }
        }

        let rho_cond = XyzVectors {
            x: bundle.conductive_aux.rho_x.clone(),
            y: bundle.conductive_aux.rho_y.clone(),
            z: bundle.conductive_aux.rho_z.clone(),
        };
        let is_cond = !rho_cond.all_elements_less_than(1.0e-15);

        let ml = match &bundle.dispersive_aux {
            Some(aux) => DispersiveMultiLayer {
                alpha: aux.alpha.clone(),
                beta: aux.beta.clone(),
                gamma: aux.gamma.clone(),
                kappa: XyzVectors {
                    x: aux.kappa_x.clone(),
                    y: aux.kappa_y.clone(),
                    z: aux.kappa_z.clone(),
                },
                sigma: XyzVectors {
                    x: aux.sigma_x.clone(),
                    y: aux.sigma_y.clone(),
                    z: aux.sigma_z.clone(),
                },
            },
            None => DispersiveMultiLayer {
                alpha: vec![0.0; k_tot + 1],
                beta: vec![0.0; k_tot + 1],
                gamma: vec![0.0; k_tot + 1],
                kappa: XyzVectors {
                    x: vec![1.0; c.a.x.len()],
                    y: vec![1.0; c.a.y.len()],
                    z: vec![1.0; c.a.z.len()],
                },
                sigma: XyzVectors {
                    x: vec![0.0; c.a.x.len()],
                    y: vec![0.0; c.a.y.len()],
                    z: vec![0.0; c.a.z.len()],
                },
            },
        };
        params.is_disp_ml = c.is_disp_ml && ml.is_dispersive();

        if is_cond
            && (rho_cond.x.len() < c.a.x.len()
                || rho_cond.y.len() < c.a.y.len()
                || rho_cond.z.len() < c.a.z.len())
        {
            return Err(TdmsError::input_validation(
                "INPUT.CONDUCTIVE_AUX",
                "conductivity profile vectors are shorter than the coefficient tables",
            ));
        }
        let material_alpha = bundle.disp_params.alpha.clone();
        let material_beta = bundle.disp_params.beta.clone();
        let material_gamma = bundle.disp_params.gamma.clone();
        let is_disp = has_dispersive_materials(&materials, &material_gamma, params.dt);

        if (params.is_disp_ml || is_disp)
            && (ml.kappa.x.len() < c.a.x.len()
                || ml.kappa.y.len() < c.a.y.len()
                || ml.kappa.z.len() < c.a.z.len()
                || ml.sigma.x.len() < c.a.x.len()
                || ml.sigma.y.len() < c.a.y.len()
                || ml.sigma.z.len() < c.a.z.len()
                || ml.alpha.len() < k_tot + 1
                || ml.beta.len() < k_tot + 1
                || ml.gamma.len() < k_tot + 1)
        {
            return Err(TdmsError::input_validation(
                "INPUT.DISPERSIVE_AUX",
                "dispersive multilayer vectors are shorter than the coefficient tables",
            ));
        }

        grid.aux
            .allocate(i_tot, j_tot, k_tot, is_disp || params.is_disp_ml, is_cond);

        let structure = match &bundle.structure {
            Some(rows) => {
                if rows.len() != i_tot + 1 {
                    return Err(TdmsError::input_validation(
                        "INPUT.STRUCTURE",
                        format!(
                            "structure array has {} rows, expected {}",
                            rows.len(),
                            i_tot + 1
                        ),
                    ));
                }
                params.is_structure = true;
                GratingStructure::new(
                    rows.iter()
                        .map(|row| [row[0] as i32, row[1] as i32])
                        .collect(),
                )
            }
            None => GratingStructure::default(),
        };

        let plane = |entry: (usize, bool)| InterfacePlane {
            index: entry.0,
            apply: entry.1,
        };
        let interface = InterfaceBox {
            i0: plane(bundle.interface.i0),
            i1: plane(bundle.interface.i1),
            j0: plane(bundle.interface.j0),
            j1: plane(bundle.interface.j1),
            k0: plane(bundle.interface.k0),
            k1: plane(bundle.interface.k1),
        };
        for (label, plane, upper) in [
            ("INPUT.INTERFACE.I", (interface.i0, interface.i1), i_tot),
            ("INPUT.INTERFACE.J", (interface.j0, interface.j1), j_tot),
            ("INPUT.INTERFACE.K", (interface.k0, interface.k1), k_tot),
        ] {
            if plane.0.index > plane.1.index || plane.1.index > upper {
                return Err(TdmsError::input_validation(
                    "INPUT.INTERFACE",
                    format!(
                        "{} planes ({}, {}) are not ordered within 0..={}",
                        label, plane.0.index, plane.1.index, upper
                    ),
                ));
            }
        }
        if params.source_mode == SourceMode::Pulsed && interface.k0.index == 0 {
            return Err(TdmsError::input_validation(
                "INPUT.INTERFACE",
                "pulsed-mode K0 interface must leave one scattered-field cell below the plane",
            ));
        }

        let source_dims = |label: &'static str,
                           tensor: &Option<ComplexTensorData>,
                           n_a: usize,
                           n_b: usize|
         -> TdmsResult<Option<Array3<Complex64>>> {
            match tensor {
                None => Ok(None),
                Some(data) if data.dims.is_empty() => Ok(None),
                Some(data) => {
                    let array = data.to_array3(label)?;
                    let dims = array.dim();
                    if dims.0 != n_a || dims.1 != n_b || dims.2 != 8 {
                        return Err(TdmsError::input_validation(
                            label,
                            format!(
                                "source plane has shape {:?}, expected ({}, {}, 8)",
                                dims, n_a, n_b
                            ),
                        ));
                    }
                    Ok(Some(array))
                }
            }
        };
        let k_extent = interface.k1.index - interface.k0.index + 1;
        let j_extent = interface.j1.index - interface.j0.index + 1;
        let i_extent = interface.i1.index - interface.i0.index + 1;
        let sources = SourcePlanes {
            isource: source_dims("INPUT.ISOURCE", &bundle.isource, k_extent, j_extent)?,
            jsource: source_dims("INPUT.JSOURCE", &bundle.jsource, k_extent, i_extent)?,
            ksource: source_dims("INPUT.KSOURCE", &bundle.ksource, j_extent, i_extent)?,
        };

        let incident = match &bundle.tdfield {
            Some(data) => IncidentField {
                exi: data
                    .exi
                    .as_ref()
                    .filter(|tensor| !tensor.data.is_empty())
                    .map(|tensor| tensor.to_array3("INPUT.TDFIELD_EXI"))
                    .transpose()?,
                eyi: data
                    .eyi
                    .as_ref()
                    .filter(|tensor| !tensor.data.is_empty())
                    .map(|tensor| tensor.to_array3("INPUT.TDFIELD_EYI"))
                    .transpose()?,
            },
            None => IncidentField::default(),
        };
        for (label, tensor) in [
            ("INPUT.TDFIELD_EXI", &incident.exi),
            ("INPUT.TDFIELD_EYI", &incident.eyi),
        ] {
            if let Some(array) = tensor {
                let dims = array.dim();
                if dims.0 < params.nt || dims.1 < j_tot + 1 || dims.2 < i_tot + 1 {
                    return Err(TdmsError::input_validation(
                        label,
                        format!(
                            "incident field has shape {:?}, expected at least ({}, {}, {})",
                            dims,
                            params.nt,
                            j_tot + 1,
                            i_tot + 1
                        ),
                    ));
                }
            }
        }
        params.exi_present = incident.exi.is_some();
        params.eyi_present = incident.eyi.is_some();

        let f_ex_vec = if bundle.f_ex_vec.is_empty() {
            vec![params.omega_an / (2.0 * DCPI)]
        } else {
            bundle.f_ex_vec.clone()
        };

        for (label, labels, expected) in [
            ("INPUT.GRID_LABELS.X", &bundle.grid_labels.x_grid_labels, i_tot + 1),
            ("INPUT.GRID_LABELS.Y", &bundle.grid_labels.y_grid_labels, j_tot + 1),
            ("INPUT.GRID_LABELS.Z", &bundle.grid_labels.z_grid_labels, k_tot + 1),
        ] {
            if labels.len() < expected {
                return Err(TdmsError::input_validation(
                    label,
                    format!("expected at least {} axis labels, got {}", expected, labels.len()),
                ));
            }
        }

        // phasor sampling window before the steady-state dt adjustment
        params.set_phasor_window(&f_ex_vec);
        let nsteps = params.adjust_for_steady_state();

        let bounds = VolumeBounds::pml_free(i_tot, j_tot, k_tot, &params.pml);
        let e = FieldVolume::new(FieldKind::Electric, bounds);
        let h = FieldVolume::new(FieldKind::Magnetic, bounds);
        let e_copy = (params.source_mode == SourceMode::SteadyState
            && params.run_mode == RunMode::Complete
            && params.exphasorsvolume)
            .then(|| FieldVolume::new(FieldKind::Electric, bounds));

        let (surface, surface_cuboid) = if params.exphasorssurface
            && params.run_mode == RunMode::Complete
        {
            let Some(bounds) = bundle.phasorsurface else {
                return Err(TdmsError::input_validation(
                    "INPUT.PHASORSURFACE",
                    "exphasorssurface is set but no phasorsurface cuboid was supplied",
                ));
            };
            let cuboid = Cuboid::from_bounds(bounds);
            if cuboid.i1 > i_tot || cuboid.j1 > j_tot || cuboid.k1 > k_tot {
                return Err(TdmsError::input_validation(
                    "INPUT.PHASORSURFACE",
                    format!("phasorsurface cuboid {:?} exceeds the grid", bounds),
                ));
            }
            let mesh = if j_tot == 0 {
                create_boundary_2d(cuboid.i0, cuboid.i1, cuboid.k0, cuboid.k1)
            } else {
                triangulate_cuboid(&cuboid, params.spacing_stride)
            };
            (
                Some(SurfacePhasors::new(mesh.vertices, f_ex_vec.len())),
                Some(cuboid),
            )
        } else {
            (None, None)
        };

        let vertex_phasors = bundle
            .campssample
            .as_ref()
            .filter(|sample| !sample.vertices.is_empty())
            .map(|sample| -> TdmsResult<VertexPhasors> {
                for vertex in &sample.vertices {
                    if vertex[0] > i_tot || vertex[1] > j_tot || vertex[2] > k_tot {
                        return Err(TdmsError::input_validation(
                            "INPUT.CAMPSSAMPLE",
                            format!("vertex {:?} lies outside the grid", vertex),
                        ));
                    }
                }
                Ok(VertexPhasors::new(
                    sample.vertices.clone(),
                    sample.components.clone(),
                    f_ex_vec.len(),
                ))
            })
            .transpose()?;

        // Refractive index of the first layer (or homogeneous bulk),
        // deduced from the freespace curl coefficient.
        let cbx = bundle.freespace.cbx.first().copied().ok_or_else(|| {
            TdmsError::input_validation("INPUT.FREESPACE", "freespace Cbx must not be empty")
        })?;
        let refind = (1.0 / (cbx / params.dt * params.delta.dx) / EPSILON0).sqrt();

        let detector = if params.exdetintegral && params.run_mode == RunMode::Complete {
            let f_vec = bundle.f_vec.as_ref().ok_or_else(|| {
                TdmsError::input_validation("INPUT.F_VEC", "exdetintegral requires f_vec")
            })?;
            let pupil = bundle.pupil.as_ref().ok_or_else(|| {
                TdmsError::input_validation("INPUT.PUPIL", "exdetintegral requires Pupil")
            })?;
            let d_tilde = bundle.d_tilde.as_ref().ok_or_else(|| {
                TdmsError::input_validation("INPUT.D_TILDE", "exdetintegral requires D_tilde")
            })?;
            let k_det_obs = bundle.k_det_obs.ok_or_else(|| {
                TdmsError::input_validation("INPUT.K_DET_OBS", "exdetintegral requires k_det_obs")
            })?;
            if k_det_obs > k_tot {
                return Err(TdmsError::input_validation(
                    "INPUT.K_DET_OBS",
                    format!("observation plane {} lies outside the grid", k_det_obs),
                ));
            }
            params.k_det_obs = k_det_obs;
            params.z_obs = bundle.grid_labels.z_grid_labels[k_det_obs];

            let n0 = i_tot - params.pml.dxl - params.pml.dxu;
            let n1 = j_tot - params.pml.dyl - params.pml.dyu;
            Some(DetectorIntegrator::new(
                n0,
                n1,
                pupil.to_array2("INPUT.PUPIL")?,
                DetectorModes {
                    x: d_tilde.dx_tilde.to_array3("INPUT.D_TILDE")?,
                    y: d_tilde.dy_tilde.to_array3("INPUT.D_TILDE")?,
                },
                FrequencyVectors {
                    x: f_vec.fx_vec.clone(),
                    y: f_vec.fy_vec.clone(),
                },
                refind,
                f_ex_vec.len(),
            )?)
        } else {
            None
        };

        let plane_phasors = (params.dimension == Dimension::Three
            && params.run_mode == RunMode::Complete
            && interface.k0.index + 1 <= k_tot)
            .then(|| PlanePhasors::new(i_tot, j_tot));

        let field_sample = bundle
            .fieldsample
            .as_ref()
            .filter(|sample| sample.all_vectors_are_non_empty())
            .map(|sample| FieldSample::new(sample.clone()));

        let td_exporter = match &bundle.tdfdir {
            Some(folder) if !folder.is_empty() => {
                params.has_tdfdir = true;
                let stride = match solver_method {
                    SolverMethod::FiniteDifference => 6,
                    SolverMethod::PseudoSpectral => 1,
                };
                Some(TdFieldExporter2d::new(folder, stride, i_tot, k_tot))
            }
            _ => None,
        };

        let te_active = sources.ksource_slot_nonzero(2)
            || sources.ksource_slot_nonzero(1)
            || params.eyi_present;
        let tm_active = sources.ksource_slot_nonzero(3)
            || sources.ksource_slot_nonzero(0)
            || params.exi_present;
        let (j_bound, j_p1_bound) = transverse_bounds(j_tot, te_active, tm_active);

        let derivative: Box<dyn Derivative> = match solver_method {
            SolverMethod::FiniteDifference => Box::new(FiniteDifference),
            SolverMethod::PseudoSpectral => Box::new(PseudoSpectral::new(i_tot, j_tot, k_tot)),
        };

        let n_frequencies = f_ex_vec.len();
        Ok(Self {
            grid,
            materials,
            params,
            derivative,
            interpolation_method,
            c,
            c_material,
            d,
            d_material,
            ml,
            rho_cond,
            structure,
            material_alpha,
            material_beta,
            material_gamma,
            is_disp,
            is_cond,
            interface,
            sources,
            incident,
            f_ex_vec,
            grid_labels_x: bundle.grid_labels.x_grid_labels.clone(),
            grid_labels_y: bundle.grid_labels.y_grid_labels.clone(),
            grid_labels_z: bundle.grid_labels.z_grid_labels.clone(),
            e,
            h,
            e_copy,
            surface,
            surface_cuboid,
            vertex_phasors,
            plane: plane_phasors,
            norms: PhasorNorms::new(n_frequencies),
            detector,
            field_sample,
            td_exporter,
            nsteps,
            j_bound,
            j_p1_bound,
            state: RunState::Idle,
            max_residual_field: 0.0,
            steps_completed: 0,
        })
    }

    pub fn params(&self) -> &SimulationParameters {
        &self.params
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn electric_volume(&self) -> &FieldVolume {
        &self.e
    }

    pub fn magnetic_volume(&self) -> &FieldVolume {
        &self.h
    }

    /// Execute the time loop.
    pub fn run(&mut self) -> TdmsResult<RunDiagnostics> {
        let params = self.params.clone();
        let complete = params.run_mode == RunMode::Complete;
        let steady = params.source_mode == SourceMode::SteadyState;
        let any_phasors = params.exphasorssurface
            || params.exphasorsvolume
            || params.exdetintegral
            || self.vertex_phasors.is_some();

        self.state = RunState::TimeStepping;
        let mut dft_counter: usize = 0;
        let mut last_logged = Instant::now();
        log::debug!("Starting main loop");

        for tind in params.start_tind..params.nt {
            let time_e = (tind as f64 + 1.0) * params.dt;
            let time_h = time_e - params.dt / 2.0;

            // Convergence check on cycle boundaries; the previous complete
            // cycle is kept when the tolerance is met.
            if steady
                && complete
                && params.exphasorsvolume
                && dft_counter == self.nsteps
                && self.nsteps > 0
            {
                dft_counter = 0;
                if let Some(e_copy) = self.e_copy.as_mut() {
                    let figure = self.e.max_pointwise_difference_over_max_element(e_copy);
                    if figure < TOL {
                        log::info!(
                            "Phasor convergence reached at step {} ({:e} < {:e})",
                            tind,
                            figure,
                            TOL
                        );
                        self.state = RunState::SteadyStateConverged;
                        break;
                    }
                    log::debug!("Phasor convergence: {:e} (actual) > {:e} (required)", figure, TOL);
                    e_copy.set_values_from(&self.e);
                    self.e.zero();
                    self.h.zero();
                    if let Some(surface) = self.surface.as_mut() {
                        surface.zero();
                    }
                }
            }

            // Phasor accumulation observes the state left by step n-1.
            if steady && complete && params.exphasorsvolume {
                self.e.set_phasors(
                    &self.grid.e.field,
                    dft_counter as i64 - 1,
                    params.omega_an,
                    params.dt,
                    self.nsteps.max(1),
                );
                self.h.set_phasors(
                    &self.grid.h.field,
                    dft_counter as i64,
                    params.omega_an,
                    params.dt,
                    self.nsteps.max(1),
                );
                if let Some(surface) = self.surface.as_mut() {
                    for (ifx, frequency) in self.f_ex_vec.iter().enumerate() {
                        surface.extract(
                            ifx,
                            &self.grid.e,
                            &self.grid.h,
                            dft_counter as i64,
                            frequency * 2.0 * DCPI,
                            params.dt,
                            self.nsteps.max(1),
                            params.intphasorssurface,
                        );
                    }
                }
                dft_counter += 1;
            } else if !steady
                && complete
                && params.exphasorsvolume
                && (tind - params.start_tind).is_multiple_of(params.np)
            {
                self.e.set_phasors(
                    &self.grid.e.field,
                    tind as i64 - 1,
                    params.omega_an,
                    params.dt,
                    params.npe.max(1),
                );
                self.h.set_phasors(
                    &self.grid.h.field,
                    tind as i64,
                    params.omega_an,
                    params.dt,
                    params.npe.max(1),
                );
            }

            if let Some(sample) = self.field_sample.as_mut() {
                sample.accumulate(&self.grid.e, &params.pml, params.nt);
            }

            if !steady && complete && (tind - params.start_tind).is_multiple_of(params.np) {
                if let Some(surface) = self.surface.as_mut() {
                    for (ifx, frequency) in self.f_ex_vec.iter().enumerate() {
                        surface.extract(
                            ifx,
                            &self.grid.e,
                            &self.grid.h,
                            tind as i64,
                            frequency * 2.0 * DCPI,
                            params.dt,
                            params.npe.max(1),
                            params.intphasorssurface,
                        );
                    }
                }
                if let Some(vertices) = self.vertex_phasors.as_mut() {
                    for (ifx, frequency) in self.f_ex_vec.iter().enumerate() {
                        vertices.extract(
                            ifx,
                            &self.grid.e,
                            &self.grid.h,
                            tind as i64,
                            frequency * 2.0 * DCPI,
                            params.dt,
                            params.npe.max(1),
                            params.dimension,
                            self.grid.j_tot,
                        );
                    }
                }
                if let Some(detector) = self.detector.as_mut() {
                    detector.accumulate(
                        &self.grid.e,
                        &params,
                        &self.f_ex_vec,
                        tind,
                        params.dt,
                        params.npe.max(1),
                    );
                }
            }

            if let Some(plane) = self.plane.as_mut() {
                plane.extract(
                    &self.grid.e,
                    &self.grid.h,
                    self.interface.k0.index + 1,
                    tind as i64,
                    params.omega_an,
                    params.dt,
                    params.nt.max(1),
                );
            }

            // field updates; the context borrows only the read-only
            // material state, never the grid store being advanced
            let ctx = UpdateContext {
                materials: &self.materials,
                c: &self.c,
                c_material: &self.c_material,
                d: &self.d,
                d_material: &self.d_material,
                ml: &self.ml,
                rho_cond: &self.rho_cond,
                structure: &self.structure,
                material_alpha: &self.material_alpha,
                material_beta: &self.material_beta,
                material_gamma: &self.material_gamma,
                params: &params,
                is_disp: self.is_disp,
                is_cond: self.is_cond,
                i_tot: self.grid.i_tot,
                j_tot: self.grid.j_tot,
                k_tot: self.grid.k_tot,
                k_interior: self
                    .grid
                    .k_tot
                    .saturating_sub(params.pml.dzl + params.pml.dzu),
                j_bound: self.j_bound,
                j_p1_bound: self.j_p1_bound,
            };
            let tfsf = TfsfInputs {
                interface: &self.interface,
                sources: &self.sources,
                incident: &self.incident,
                c_b: &self.c.b,
                d_b: &self.d.b,
                rho_cond: &self.rho_cond,
                ml: &self.ml,
                params: &params,
                is_cond: self.is_cond,
            };

            advance_electric(&mut self.grid, &ctx, self.derivative.as_ref());
            self.h.ft = apply_electric_interface(&mut self.grid, &tfsf, tind, time_h);
            advance_magnetic(&mut self.grid, &ctx, self.derivative.as_ref());
            self.e.ft = apply_magnetic_interface(&mut self.grid, &tfsf, tind, time_e);

            // source-phasor normaliser shares the accumulation window of
            // the field phasors it normalises
            if any_phasors {
                if steady {
                    if self.nsteps > 0 && tind.is_multiple_of(self.nsteps) {
                        self.e.angular_norm = Complex64::new(0.0, 0.0);
                        self.h.angular_norm = Complex64::new(0.0, 0.0);
                        self.norms.zero();
                    }
                    self.e
                        .add_to_angular_norm(tind as i64, self.nsteps.max(1), params.omega_an, params.dt);
                    self.h
                        .add_to_angular_norm(tind as i64, self.nsteps.max(1), params.omega_an, params.dt);
                    self.norms.accumulate(
                        self.e.ft,
                        self.h.ft,
                        tind as i64,
                        &self.f_ex_vec,
                        params.dt,
                        self.nsteps.max(1),
                    );
                } else if (tind - params.start_tind).is_multiple_of(params.np) {
                    self.e
                        .add_to_angular_norm(tind as i64, params.npe.max(1), params.omega_an, params.dt);
                    self.h
                        .add_to_angular_norm(tind as i64, params.npe.max(1), params.omega_an, params.dt);
                    self.norms.accumulate(
                        self.e.ft,
                        self.h.ft,
                        tind as i64,
                        &self.f_ex_vec,
                        params.dt,
                        params.npe.max(1),
                    );
                }
            }

            if last_logged.elapsed().as_secs() >= 1 {
                self.max_residual_field = self.grid.largest_split_field_value();
                log::info!("Iterating: {} {:e}", tind, self.max_residual_field);
                last_logged = Instant::now();
            }

            if steady && tind == params.nt - 1 && complete && params.exphasorsvolume {
                log::info!("Iteration limit reached, setting output fields to last complete DFT");
                if let Some(e_copy) = self.e_copy.as_ref() {
                    self.e.set_values_from(e_copy);
                }
            }

            if params.has_tdfdir && tind.is_multiple_of(params.np) {
                if let Some(exporter) = self.td_exporter.as_ref() {
                    log::debug!("Saving field snapshot at step {}", tind);
                    exporter.export_field(&self.grid.e, tind)?;
                }
            }

            self.steps_completed = tind + 1 - params.start_tind;
        }

        // post-loop normalisation
        if complete && params.exphasorsvolume {
            self.e.normalise_volume();
            self.h.normalise_volume();
        }
        if complete {
            if let Some(surface) = self.surface.as_mut() {
                surface.normalise(&self.norms.e_norm, &self.norms.h_norm);
            }
            if let Some(vertices) = self.vertex_phasors.as_mut() {
                vertices.normalise(&self.norms.e_norm, &self.norms.h_norm);
            }
        }
        if !steady && complete {
            if let Some(detector) = self.detector.as_mut() {
                detector.normalise(&self.norms.e_norm);
            }
        }

        self.max_residual_field = self.grid.largest_split_field_value();
        let final_state = if self.state == RunState::SteadyStateConverged {
            RunState::SteadyStateConverged
        } else {
            RunState::Finished
        };
        self.state = RunState::Finished;
        Ok(RunDiagnostics {
            state: final_state,
            max_residual_field: self.max_residual_field,
            steps_completed: self.steps_completed,
        })
    }

    /// Interior index range the interpolated outputs cover, two cells in
    /// from each face of the phasor volume.
    fn interp_range(extent: usize) -> (usize, usize) {
        if extent == 0 {
            return (0, 0);
        }
        let lo = 2.min(extent - 1);
        let hi = extent.saturating_sub(2).max(lo).min(extent - 1);
        (lo, hi)
    }

    /// Assemble the named output bundle. `minimise_output` drops the vertex
    /// and facet arrays.
    pub fn output_bundle(&self, minimise_output: bool) -> OutputBundle {
        let params = &self.params;
        let complete = params.run_mode == RunMode::Complete;
        let mut out = OutputBundle {
            maxresfield: self.max_residual_field,
            ..OutputBundle::default()
        };

        if complete && params.exphasorsvolume {
            out.ex_out = ComplexTensorData::from_array3(&self.e.x);
            out.ey_out = ComplexTensorData::from_array3(&self.e.y);
            out.ez_out = ComplexTensorData::from_array3(&self.e.z);
            out.hx_out = ComplexTensorData::from_array3(&self.h.x);
            out.hy_out = ComplexTensorData::from_array3(&self.h.y);
            out.hz_out = ComplexTensorData::from_array3(&self.h.z);

            let bounds = self.e.bounds;
            out.x_out = self.grid_labels_x[bounds.il..=bounds.iu].to_vec();
            out.y_out = self.grid_labels_y[bounds.jl..=bounds.ju].to_vec();
            out.z_out = self.grid_labels_z[bounds.kl..=bounds.ku].to_vec();

            let (ilo, ihi) = Self::interp_range(bounds.i_extent());
            let (jlo, jhi) = Self::interp_range(bounds.j_extent());
            let (klo, khi) = if params.dimension == Dimension::Three {
                Self::interp_range(bounds.k_extent())
            } else {
                (0, 0)
            };
            let e_interp = self.e.interpolate_over_range(
                (ilo, ihi),
                (jlo, jhi),
                (klo, khi),
                params.dimension,
                self.interpolation_method,
            );
            let h_interp = self.h.interpolate_over_range(
                (ilo, ihi),
                (jlo, jhi),
                (klo, khi),
                params.dimension,
                self.interpolation_method,
            );
            out.ex_interp = ComplexTensorData::from_array3(&e_interp.x);
            out.ey_interp = ComplexTensorData::from_array3(&e_interp.y);
            out.ez_interp = ComplexTensorData::from_array3(&e_interp.z);
            out.hx_interp = ComplexTensorData::from_array3(&h_interp.x);
            out.hy_interp = ComplexTensorData::from_array3(&h_interp.y);
            out.hz_interp = ComplexTensorData::from_array3(&h_interp.z);
            out.x_interp = out.x_out[ilo..=ihi].to_vec();
            out.y_interp = out.y_out[jlo..=jhi].to_vec();
            out.z_interp = if params.dimension == Dimension::Three {
                out.z_out[klo..=khi].to_vec()
            } else {
                vec![out.z_out.first().copied().unwrap_or(0.0)]
            };
        }

        if let Some(plane) = self.plane.as_ref() {
            out.ex_i = ComplexTensorData::from_array2(&plane.ex);
            out.ey_i = ComplexTensorData::from_array2(&plane.ey);
            out.hx_i = ComplexTensorData::from_array2(&plane.hx);
            out.hy_i = ComplexTensorData::from_array2(&plane.hy);
        }

        if let Some(surface) = self.surface.as_ref() {
            out.camplitudes = ComplexTensorData::from_array3(&surface.amplitudes);
            if !minimise_output {
                out.vertices = surface.vertices.clone();
                if let Some(cuboid) = self.surface_cuboid.as_ref() {
                    if self.grid.j_tot != 0 {
                        out.facets =
                            triangulate_cuboid(cuboid, params.spacing_stride).facets;
                    }
                }
            }
        }

        if let Some(detector) = self.detector.as_ref() {
            out.id = Some(IdOutputData {
                idx: ComplexTensorData {
                    dims: vec![detector.idx.dim().0, detector.idx.dim().1],
                    real: detector.idx.iter().map(|value| value.re).collect(),
                    imag: detector.idx.iter().map(|value| value.im).collect(),
                },
                idy: ComplexTensorData {
                    dims: vec![detector.idy.dim().0, detector.idy.dim().1],
                    real: detector.idy.iter().map(|value| value.re).collect(),
                    imag: detector.idy.iter().map(|value| value.im).collect(),
                },
            });
        }

        if let Some(sample) = self.field_sample.as_ref() {
            out.fieldsample = TensorData {
                dims: sample.tensor.shape().to_vec(),
                data: sample.tensor.iter().copied().collect(),
            };
        }

        if let Some(vertices) = self.vertex_phasors.as_ref() {
            out.campssample = ComplexTensorData::from_array3(&vertices.amplitudes);
        }

        out
    }
}
