//! Physical and mathematical constants shared across the solver.

use num_complex::Complex64;

pub const DCPI: f64 = std::f64::consts::PI;
pub const IMAGINARY_UNIT: Complex64 = Complex64::new(0.0, 1.0);

/// Free-space electric permittivity.
pub const EPSILON0: f64 = 8.85400e-12;
/// Free-space magnetic permeability.
pub const MU0: f64 = 4.0 * DCPI * 1.0e-7;

/// Free-space light velocity.
pub fn light_v() -> f64 {
    1.0 / (MU0 * EPSILON0).sqrt()
}
