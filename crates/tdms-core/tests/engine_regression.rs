//! End-to-end engine scenarios on small grids.

use tdms_core::bundle::{
    CCoefficientsData, ComplexTensorData, ConductiveAuxData, DCoefficientsData, DeltaData,
    DispParamsData, FdtdGridData, FreespaceData, GridLabelsData, InputBundle, InterfaceData,
    TensorData,
};
use tdms_core::constants::{DCPI, EPSILON0, MU0};
use tdms_core::interpolation::InterpolationMethod;
use tdms_core::params::SolverMethod;
use tdms_core::simulation::RunState;
use tdms_core::Simulation;

const DT: f64 = 1.0e-16;
const SPACING: f64 = 1.0e-7;

fn zero_tensor(i_tot: usize, j_tot: usize, k_tot: usize) -> TensorData {
    let dims = vec![k_tot + 1, j_tot + 1, i_tot + 1];
    let len = dims.iter().product();
    TensorData {
        dims,
        data: vec![0.0; len],
    }
}

fn axis_labels(extent: usize) -> Vec<f64> {
    (0..=extent).map(|index| index as f64 * SPACING).collect()
}

/// A free-space bundle with zero fields and no sources; the electric curl
/// coefficient makes the deduced refractive index exactly one.
fn base_bundle(i_tot: usize, j_tot: usize, k_tot: usize) -> InputBundle {
    let grid_tensor = || zero_tensor(i_tot, j_tot, k_tot);
    let cb = DT / (EPSILON0 * SPACING);
    let db = DT / (MU0 * SPACING);

    InputBundle {
        fdtdgrid: FdtdGridData {
            exy: grid_tensor(),
            exz: grid_tensor(),
            eyx: grid_tensor(),
            eyz: grid_tensor(),
            ezx: grid_tensor(),
            ezy: grid_tensor(),
            hxy: grid_tensor(),
            hxz: grid_tensor(),
            hyx: grid_tensor(),
            hyz: grid_tensor(),
            hzx: grid_tensor(),
            hzy: grid_tensor(),
            materials: grid_tensor(),
        },
        c_material: CCoefficientsData::default(),
        d_material: DCoefficientsData::default(),
        c_background: CCoefficientsData {
            cax: vec![1.0; i_tot + 1],
            cay: vec![1.0; j_tot + 1],
            caz: vec![1.0; k_tot + 1],
            cbx: vec![cb; i_tot + 1],
            cby: vec![cb; j_tot + 1],
            cbz: vec![cb; k_tot + 1],
            ccx: Vec::new(),
            ccy: Vec::new(),
            ccz: Vec::new(),
        },
        d_background: DCoefficientsData {
            dax: vec![1.0; i_tot + 1],
            day: vec![1.0; j_tot + 1],
            daz: vec![1.0; k_tot + 1],
            dbx: vec![db; i_tot + 1],
            dby: vec![db; j_tot + 1],
            dbz: vec![db; k_tot + 1],
        },
        freespace: FreespaceData { cbx: vec![cb] },
        disp_params: DispParamsData::default(),
        delta: DeltaData {
            x: SPACING,
            y: SPACING,
            z: SPACING,
        },
        interface: InterfaceData {
            i0: (0, false),
            i1: (i_tot, false),
            j0: (0, false),
            j1: (j_tot, false),
            k0: (1, false),
            k1: (k_tot.saturating_sub(1).max(1), false),
        },
        isource: None,
        jsource: None,
        ksource: None,
        grid_labels: GridLabelsData {
            x_grid_labels: axis_labels(i_tot),
            y_grid_labels: axis_labels(j_tot),
            z_grid_labels: axis_labels(k_tot),
        },
        omega_an: 2.0 * DCPI * 3.0e14,
        to_l: 1.0e-15,
        hwhm: 5.0e-16,
        dxl: 0,
        dxu: 0,
        dyl: 0,
        dyu: 0,
        dzl: 0,
        dzu: 0,
        nt: 2,
        dt: DT,
        start_tind: 0,
        sourcemode: "pulsed".to_string(),
        runmode: "complete".to_string(),
        exphasorsvolume: true,
        exphasorssurface: false,
        intphasorssurface: false,
        phasorsurface: None,
        phasorinc: [1, 1, 1],
        dimension: "3".to_string(),
        conductive_aux: ConductiveAuxData {
            rho_x: vec![0.0; i_tot + 1],
            rho_y: vec![0.0; j_tot + 1],
            rho_z: vec![0.0; k_tot + 1],
        },
        dispersive_aux: None,
        structure: None,
        f_ex_vec: vec![3.0e14],
        exdetintegral: false,
        f_vec: None,
        pupil: None,
        d_tilde: None,
        k_det_obs: None,
        air_interface: None,
        intmatprops: false,
        intmethod: None,
        tdfield: None,
        tdfdir: None,
        fieldsample: None,
        campssample: None,
        use_pstd: None,
        use_bli: None,
    }
}

fn ksource_with_slot(
    j_extent: usize,
    i_extent: usize,
    slot: usize,
    value: f64,
) -> ComplexTensorData {
    let dims = vec![j_extent, i_extent, 8];
    let len: usize = dims.iter().product();
    let mut real = vec![0.0; len];
    for j in 0..j_extent {
        for i in 0..i_extent {
            real[(j * i_extent + i) * 8 + slot] = value;
        }
    }
    ComplexTensorData {
        dims,
        real,
        imag: vec![0.0; len],
    }
}

#[test]
fn empty_simulation_leaves_fields_and_phasors_zero() {
    let bundle = base_bundle(4, 4, 4);
    let mut simulation = Simulation::new(
        &bundle,
        SolverMethod::FiniteDifference,
        InterpolationMethod::BandLimited,
    )
    .expect("simulation setup");

    let diagnostics = simulation.run().expect("run");
    assert_eq!(diagnostics.state, RunState::Finished);
    assert_eq!(diagnostics.max_residual_field, 0.0);

    let output = simulation.output_bundle(false);
    for (name, tensor) in [
        ("Ex_out", &output.ex_out),
        ("Ey_out", &output.ey_out),
        ("Ez_out", &output.ez_out),
        ("Hx_out", &output.hx_out),
        ("Hy_out", &output.hy_out),
        ("Hz_out", &output.hz_out),
    ] {
        assert!(
            tensor.real.iter().chain(&tensor.imag).all(|&v| v == 0.0),
            "{name} should be identically zero"
        );
    }
    assert!(output.ex_i.real.iter().all(|&v| v == 0.0));
    assert!(output.hy_i.real.iter().all(|&v| v == 0.0));
}

#[test]
fn two_dimensional_te_run_keeps_tm_components_zero() {
    let (i_tot, j_tot, k_tot) = (8, 0, 8);
    let mut bundle = base_bundle(i_tot, j_tot, k_tot);
    bundle.interface = InterfaceData {
        i0: (0, false),
        i1: (i_tot, false),
        j0: (0, false),
        j1: (0, false),
        k0: (2, true),
        k1: (6, false),
    };
    // slot 2 drives Ey: the TE subcase
    bundle.ksource = Some(ksource_with_slot(1, i_tot + 1, 2, 1.0));
    bundle.nt = 20;

    let mut simulation = Simulation::new(
        &bundle,
        SolverMethod::FiniteDifference,
        InterpolationMethod::BandLimited,
    )
    .expect("simulation setup");
    let diagnostics = simulation.run().expect("run");

    assert!(diagnostics.max_residual_field > 0.0, "source must excite the grid");

    let output = simulation.output_bundle(false);
    for (name, tensor) in [
        ("Ex_out", &output.ex_out),
        ("Ez_out", &output.ez_out),
        ("Hy_out", &output.hy_out),
    ] {
        assert!(
            tensor.real.iter().chain(&tensor.imag).all(|&v| v == 0.0),
            "{name} must stay zero in a TE-only 2-D run"
        );
    }
    assert!(
        output.ey_out.real.iter().chain(&output.ey_out.imag).any(|&v| v != 0.0),
        "Ey must be excited in a TE-only 2-D run"
    );
    for value in output.ey_out.real.iter().chain(&output.ey_out.imag) {
        assert!(value.is_finite());
    }
}

#[test]
fn steady_state_monitor_terminates_early_on_a_constant_field() {
    let mut bundle = base_bundle(5, 5, 5);
    bundle.sourcemode = "steadystate".to_string();
    bundle.omega_an = 2.0 * DCPI * 1.0e14;
    bundle.f_ex_vec = vec![1.0e14];
    // many acquisition windows; the constant (zero) field converges at the
    // first cycle boundary
    bundle.nt = 4000;

    let mut simulation = Simulation::new(
        &bundle,
        SolverMethod::FiniteDifference,
        InterpolationMethod::BandLimited,
    )
    .expect("simulation setup");
    let diagnostics = simulation.run().expect("run");

    assert_eq!(diagnostics.state, RunState::SteadyStateConverged);
    assert!(
        diagnostics.steps_completed < 4000,
        "monitor must terminate the loop early, ran {} steps",
        diagnostics.steps_completed
    );
}

#[test]
fn pulsed_injection_produces_finite_nonzero_phasors() {
    let (i_tot, j_tot, k_tot) = (8, 8, 8);
    let mut bundle = base_bundle(i_tot, j_tot, k_tot);
    bundle.interface = InterfaceData {
        i0: (1, false),
        i1: (7, false),
        j0: (1, false),
        j1: (7, false),
        k0: (2, true),
        k1: (6, true),
    };
    // slots 2 and 3 drive Ey and Ex at the K0 plane
    let mut ksource = ksource_with_slot(7, 7, 2, 1.0);
    for j in 0..7 {
        for i in 0..7 {
            ksource.real[(j * 7 + i) * 8 + 3] = 0.5;
        }
    }
    bundle.ksource = Some(ksource);
    bundle.nt = 30;
    bundle.exphasorssurface = true;
    bundle.phasorsurface = Some([2, 6, 2, 6, 3, 5]);

    let mut simulation = Simulation::new(
        &bundle,
        SolverMethod::FiniteDifference,
        InterpolationMethod::BandLimited,
    )
    .expect("simulation setup");
    let diagnostics = simulation.run().expect("run");
    assert!(diagnostics.max_residual_field > 0.0);
    assert!(diagnostics.max_residual_field.is_finite());

    let output = simulation.output_bundle(false);
    assert!(
        output.ey_out.real.iter().chain(&output.ey_out.imag).any(|&v| v != 0.0),
        "the K-plane source must excite Ey"
    );
    for tensor in [&output.ex_out, &output.ey_out, &output.hz_out] {
        assert!(tensor.real.iter().chain(&tensor.imag).all(|v| v.is_finite()));
    }

    // surface accumulator carries six components per vertex per frequency
    assert!(!output.vertices.is_empty());
    assert_eq!(output.camplitudes.dims[0], 1);
    assert_eq!(output.camplitudes.dims[1], output.vertices.len());
    assert_eq!(output.camplitudes.dims[2], 6);

    // minimised output drops the mesh arrays but keeps the amplitudes
    let minimised = simulation.output_bundle(true);
    assert!(minimised.vertices.is_empty());
    assert!(minimised.facets.is_empty());
    assert_eq!(minimised.camplitudes.dims, output.camplitudes.dims);
}

#[test]
fn pseudo_spectral_and_finite_difference_agree_on_an_empty_grid() {
    let bundle = base_bundle(4, 4, 4);
    for method in [SolverMethod::FiniteDifference, SolverMethod::PseudoSpectral] {
        let mut simulation =
            Simulation::new(&bundle, method, InterpolationMethod::BandLimited)
                .expect("simulation setup");
        let diagnostics = simulation.run().expect("run");
        assert_eq!(diagnostics.max_residual_field, 0.0);
    }
}

#[test]
fn setup_rejects_inconsistent_bundles() {
    // mismatched split-field tensor
    let mut bundle = base_bundle(4, 4, 4);
    bundle.fdtdgrid.exy = zero_tensor(3, 4, 4);
    assert!(Simulation::new(
        &bundle,
        SolverMethod::FiniteDifference,
        InterpolationMethod::BandLimited,
    )
    .is_err());

    // interface planes out of order
    let mut bundle = base_bundle(4, 4, 4);
    bundle.interface.i0 = (3, false);
    bundle.interface.i1 = (1, false);
    assert!(Simulation::new(
        &bundle,
        SolverMethod::FiniteDifference,
        InterpolationMethod::BandLimited,
    )
    .is_err());

    // source plane with the wrong transverse extents
    let mut bundle = base_bundle(4, 4, 4);
    bundle.ksource = Some(ksource_with_slot(2, 2, 0, 1.0));
    assert!(Simulation::new(
        &bundle,
        SolverMethod::FiniteDifference,
        InterpolationMethod::BandLimited,
    )
    .is_err());

    // surface extraction without a cuboid
    let mut bundle = base_bundle(4, 4, 4);
    bundle.exphasorssurface = true;
    bundle.phasorsurface = None;
    assert!(Simulation::new(
        &bundle,
        SolverMethod::FiniteDifference,
        InterpolationMethod::BandLimited,
    )
    .is_err());
}
