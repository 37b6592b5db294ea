//! Argument parsing and run dispatch.
//!
//! ```text
//! tdms [options] infile outfile
//! tdms [options] infile gridfile outfile
//! ```
//!
//! The solver and interpolation choices default to finite differences with
//! band-limited interpolation; `-pstd`/`-fd` and `-bli`/`-cubic` select the
//! alternatives, and the optional file-level flags `use_pstd`/`use_bli`
//! override the command line when present.

use std::fmt::{Display, Formatter};

use tdms_core::bundle::InputBundle;
use tdms_core::interpolation::InterpolationMethod;
use tdms_core::params::SolverMethod;
use tdms_core::{Simulation, TdmsError};

/// Exit status used for malformed command lines.
pub const ARGUMENT_ERROR_EXIT_CODE: i32 = -1;

#[derive(Debug)]
pub enum CliError {
    Usage(String),
    Compute(TdmsError),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usage(message) => f.write_str(message),
            Self::Compute(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for CliError {}

impl From<TdmsError> for CliError {
    fn from(error: TdmsError) -> Self {
        Self::Compute(error)
    }
}

pub fn help_text() -> &'static str {
    "Usage:
tdms [options] infile outfile
tdms [options] infile gridfile outfile

Options:
-h:\tDisplay this help message
-m:\tMinimise output file size by not saving vertex and facet information
-fd:\tUse the finite-difference solver (default)
-pstd:\tUse the pseudo-spectral solver
-bli:\tUse band-limited interpolation where possible (default)
-cubic:\tRestrict to cubic interpolation"
}

/// Parsed command line.
#[derive(Debug, Clone)]
pub struct Arguments {
    pub input_filename: String,
    pub grid_filename: Option<String>,
    pub output_filename: String,
    pub minimise_output: bool,
    pub solver_method: SolverMethod,
    pub interpolation_method: InterpolationMethod,
}

pub fn parse_arguments<I, S>(args: I) -> Result<Option<Arguments>, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    let mut minimise_output = false;
    let mut solver_method = SolverMethod::FiniteDifference;
    let mut interpolation_method = InterpolationMethod::BandLimited;
    let mut filenames: Vec<String> = Vec::new();

    for arg in &args {
        match arg.as_str() {
            "-h" => return Ok(None),
            "-m" => minimise_output = true,
            "-fd" => solver_method = SolverMethod::FiniteDifference,
            "-pstd" => solver_method = SolverMethod::PseudoSpectral,
            "-cubic" => interpolation_method = InterpolationMethod::Cubic,
            "-bli" => interpolation_method = InterpolationMethod::BandLimited,
            other if other.starts_with('-') => {
                return Err(CliError::Usage(format!(
                    "Unknown option '{}'. See below for help\n\n{}",
                    other,
                    help_text()
                )));
            }
            filename => filenames.push(filename.to_string()),
        }
    }

    match filenames.len() {
        2 => Ok(Some(Arguments {
            input_filename: filenames[0].clone(),
            grid_filename: None,
            output_filename: filenames[1].clone(),
            minimise_output,
            solver_method,
            interpolation_method,
        })),
        3 => Ok(Some(Arguments {
            input_filename: filenames[0].clone(),
            grid_filename: Some(filenames[1].clone()),
            output_filename: filenames[2].clone(),
            minimise_output,
            solver_method,
            interpolation_method,
        })),
        _ => Err(CliError::Usage(format!(
            "Incorrect number of arguments. See below for help\n\n{}",
            help_text()
        ))),
    }
}

/// Run the solver for a parsed command line. Returns the process exit code.
pub fn execute(arguments: &Arguments) -> Result<i32, CliError> {
    let bundle = match &arguments.grid_filename {
        Some(grid_filename) => {
            InputBundle::load_with_grid(&arguments.input_filename, grid_filename)?
        }
        None => InputBundle::load(&arguments.input_filename)?,
    };

    // file-level flags take precedence over the command line
    let solver_method = match bundle.scalar_flag("use_pstd")? {
        Some(true) => SolverMethod::PseudoSpectral,
        Some(false) => SolverMethod::FiniteDifference,
        None => arguments.solver_method,
    };
    let interpolation_method = match bundle.scalar_flag("use_bli")? {
        Some(true) => InterpolationMethod::BandLimited,
        Some(false) => InterpolationMethod::Cubic,
        None => arguments.interpolation_method,
    };

    match solver_method {
        SolverMethod::FiniteDifference => log::info!("Using finite-difference method (FDTD)"),
        SolverMethod::PseudoSpectral => log::info!("Using pseudospectral method (PSTD)"),
    }
    match interpolation_method {
        InterpolationMethod::BandLimited => {
            log::info!("Using band-limited interpolation where possible")
        }
        InterpolationMethod::Cubic => log::info!("Restricting to cubic interpolation"),
    }

    let mut simulation = Simulation::new(&bundle, solver_method, interpolation_method)?;
    let diagnostics = simulation.run()?;
    log::info!(
        "Completed {} steps; max residual split field {:e}",
        diagnostics.steps_completed,
        diagnostics.max_residual_field
    );

    let output = simulation.output_bundle(arguments.minimise_output);
    output.write(&arguments.output_filename)?;
    Ok(0)
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    match parse_arguments(args)? {
        None => {
            println!("{}", help_text());
            Ok(0)
        }
        Some(arguments) => execute(&arguments),
    }
}

pub fn run_from_env() -> i32 {
    match run(std::env::args().skip(1)) {
        Ok(code) => code,
        Err(CliError::Usage(message)) => {
            eprintln!("{}", message);
            ARGUMENT_ERROR_EXIT_CODE
        }
        Err(CliError::Compute(error)) => {
            eprintln!("{}", error.diagnostic_line());
            if let Some(line) = error.fatal_exit_line() {
                eprintln!("{}", line);
            }
            error.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_filenames_select_the_plain_form() {
        let arguments = parse_arguments(["in.json", "out.json"])
            .expect("parse")
            .expect("arguments");
        assert_eq!(arguments.input_filename, "in.json");
        assert_eq!(arguments.grid_filename, None);
        assert_eq!(arguments.output_filename, "out.json");
        assert!(!arguments.minimise_output);
        assert_eq!(arguments.solver_method, SolverMethod::FiniteDifference);
    }

    #[test]
    fn three_filenames_include_the_grid_file() {
        let arguments = parse_arguments(["-m", "in.json", "grid.json", "out.json"])
            .expect("parse")
            .expect("arguments");
        assert_eq!(arguments.grid_filename.as_deref(), Some("grid.json"));
        assert!(arguments.minimise_output);
    }

    #[test]
    fn solver_and_interpolation_flags_are_recognised() {
        let arguments = parse_arguments(["-pstd", "-cubic", "in.json", "out.json"])
            .expect("parse")
            .expect("arguments");
        assert_eq!(arguments.solver_method, SolverMethod::PseudoSpectral);
        assert_eq!(arguments.interpolation_method, InterpolationMethod::Cubic);
    }

    #[test]
    fn help_flag_short_circuits() {
        assert!(parse_arguments(["-h"]).expect("parse").is_none());
        assert!(parse_arguments(["-h", "in.json", "out.json"])
            .expect("parse")
            .is_none());
    }

    #[test]
    fn wrong_filename_count_is_a_usage_error() {
        assert!(matches!(
            parse_arguments(["in.json"]),
            Err(CliError::Usage(_))
        ));
        assert!(matches!(
            parse_arguments(["a", "b", "c", "d"]),
            Err(CliError::Usage(_))
        ));
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(matches!(
            parse_arguments(["-q", "in.json", "out.json"]),
            Err(CliError::Usage(_))
        ));
    }
}
