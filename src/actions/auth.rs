use clap::ArgMatches;
use serde::Serialize;
use tracing::trace;

use crate::actions::{extract_subcommand_name, print_formatted};
use crate::client::ApiClient;
use crate::commands::params::{PARAMETER_EMAIL, PARAMETER_PASSWORD};
use crate::commands::{COMMAND_LOGIN, COMMAND_LOGOUT, COMMAND_STATUS};
use crate::error::CliError;
use crate::format::OutputFormat;

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

fn required<'a>(sub_matches: &'a ArgMatches, name: &str) -> Result<&'a String, CliError> {
    sub_matches
        .get_one::<String>(name)
        .ok_or_else(|| CliError::InvalidArgument {
            name: name.to_string(),
            reason: "a value is required".to_string(),
        })
}

pub async fn execute(
    client: &ApiClient,
    sub_matches: &ArgMatches,
    format: &OutputFormat,
) -> Result<(), CliError> {
    match sub_matches.subcommand() {
        Some((COMMAND_LOGIN, sub_matches)) => {
            trace!("Executing \"auth login\" command...");
            let credentials = Credentials {
                email: required(sub_matches, PARAMETER_EMAIL)?,
                password: required(sub_matches, PARAMETER_PASSWORD)?,
            };
            let state = client.login(&credentials).await?;
            print_formatted(&state, format)
        }
        Some((COMMAND_LOGOUT, _)) => {
            trace!("Executing \"auth logout\" command...");
            client.clear_auth();
            Ok(())
        }
        Some((COMMAND_STATUS, _)) => {
            trace!("Executing \"auth status\" command...");
            print_formatted(&client.auth_state(), format)
        }
        _ => Err(CliError::UnsupportedSubcommand(extract_subcommand_name(
            sub_matches,
        ))),
    }
}
