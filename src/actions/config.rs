use clap::ArgMatches;
use tracing::trace;

use crate::actions::{extract_subcommand_name, print_formatted};
use crate::commands::{COMMAND_GET, COMMAND_PATH};
use crate::configuration::ClientConfig;
use crate::error::CliError;
use crate::format::OutputFormat;

pub fn execute(
    sub_matches: &ArgMatches,
    configuration: &ClientConfig,
    format: &OutputFormat,
) -> Result<(), CliError> {
    match sub_matches.subcommand() {
        Some((COMMAND_GET, _)) => {
            trace!("Executing \"config get\" command...");
            print_formatted(configuration, format)
        }
        Some((COMMAND_PATH, _)) => {
            trace!("Executing \"config path\" command...");
            let path = ClientConfig::get_default_configuration_file_path()?;
            println!("{}", path.display());
            Ok(())
        }
        _ => Err(CliError::UnsupportedSubcommand(extract_subcommand_name(
            sub_matches,
        ))),
    }
}
