use clap::ArgMatches;
use tracing::trace;

use crate::actions::{extract_subcommand_name, print_formatted};
use crate::client::ApiClient;
use crate::commands::params::{PARAMETER_ID, PARAMETER_NAME, PARAMETER_PERMISSION};
use crate::commands::{COMMAND_CLEAR, COMMAND_GET, COMMAND_SET};
use crate::error::CliError;
use crate::format::OutputFormat;
use crate::model::ProgramContext;

pub fn execute(
    client: &ApiClient,
    sub_matches: &ArgMatches,
    format: &OutputFormat,
) -> Result<(), CliError> {
    match sub_matches.subcommand() {
        Some((COMMAND_SET, sub_matches)) => {
            trace!("Executing \"context set\" command...");
            let program_id = sub_matches
                .get_one::<String>(PARAMETER_ID)
                .cloned()
                .ok_or_else(|| CliError::InvalidArgument {
                    name: PARAMETER_ID.to_string(),
                    reason: "a program ID is required".to_string(),
                })?;
            let program_name = sub_matches
                .get_one::<String>(PARAMETER_NAME)
                .cloned()
                .unwrap_or_else(|| program_id.clone());
            let permissions = sub_matches
                .get_many::<String>(PARAMETER_PERMISSION)
                .map(|values| values.cloned().collect())
                .unwrap_or_default();

            let context = ProgramContext {
                program_id,
                program_name,
                permissions,
            };
            client.set_full_program_context(context.clone());
            print_formatted(&context, format)
        }
        Some((COMMAND_GET, _)) => {
            trace!("Executing \"context get\" command...");
            match client.program_context() {
                Some(context) => print_formatted(&context, format),
                None => Ok(()),
            }
        }
        Some((COMMAND_CLEAR, _)) => {
            trace!("Executing \"context clear\" command...");
            client.clear_program_context();
            Ok(())
        }
        _ => Err(CliError::UnsupportedSubcommand(extract_subcommand_name(
            sub_matches,
        ))),
    }
}
