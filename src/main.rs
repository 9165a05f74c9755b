use kestrel_lockstep::cli::CliOverrides;
use kestrel_lockstep::run_with_overrides;

fn main() {
    kestrel_lockstep::logging::init();
    let cli = match CliOverrides::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("[cli] {err}");
            std::process::exit(2);
        }
    };
    let config_path = cli.config_path().cloned();
    if let Err(err) = run_with_overrides(config_path.as_deref(), cli.into_config_overrides()) {
        log::error!("Application error: {err:?}");
        std::process::exit(1);
    }
}
