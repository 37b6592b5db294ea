use tdms_cli::cli;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let exit_code = cli::run_from_env();
    std::process::exit(exit_code);
}
