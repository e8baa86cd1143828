use clap::ArgMatches;
use tracing::trace;

use crate::actions::{extract_subcommand_name, print_formatted};
use crate::client::ApiClient;
use crate::commands::{COMMAND_FLUSH, COMMAND_LIST};
use crate::error::CliError;
use crate::format::OutputFormat;

pub async fn execute(
    client: &ApiClient,
    sub_matches: &ArgMatches,
    format: &OutputFormat,
) -> Result<(), CliError> {
    match sub_matches.subcommand() {
        Some((COMMAND_LIST, _)) => {
            trace!("Executing \"queue list\" command...");
            print_formatted(&client.pending_requests(), format)
        }
        Some((COMMAND_FLUSH, _)) => {
            trace!("Executing \"queue flush\" command...");
            let reports = client.flush_offline_queue().await;
            print_formatted(&reports, format)
        }
        _ => Err(CliError::UnsupportedSubcommand(extract_subcommand_name(
            sub_matches,
        ))),
    }
}
