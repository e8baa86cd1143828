use campus_client::{
    actions::execute_command,
    commands::{create_cli_commands, params::PARAMETER_VERBOSE},
};
use color_print::ceprintln;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Main entry point for the program
#[tokio::main]
async fn main() {
    let matches = create_cli_commands();

    // RUST_LOG wins over --verbose
    let default_level = if matches.get_flag(PARAMETER_VERBOSE) {
        "debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = execute_command(matches).await {
        let exit_code = e.exit_code();
        ceprintln!("<red,bold>ERROR:</> {}", e);
        debug!("Exiting with status {} ({})", exit_code.code(), exit_code);
        std::process::exit(exit_code.code());
    }
}
