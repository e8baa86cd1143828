//! Command implementations for the `campus` binary.

use clap::ArgMatches;
use std::sync::Arc;
use tracing::debug;

use crate::client::ApiClient;
use crate::commands::params::{get_format_parameter_value, PARAMETER_OFFLINE};
use crate::commands::{COMMAND_AUTH, COMMAND_CONFIG, COMMAND_CONTEXT, COMMAND_QUEUE, COMMAND_REQUEST};
use crate::configuration::ClientConfig;
use crate::error::CliError;
use crate::file_store::FileStore;
use crate::format::{Formattable, OutputFormat};
use crate::network::ManualNetworkStatus;
use crate::storage::{SplitStore, StateStore};

pub mod auth;
pub mod config;
pub mod context;
pub mod queue;
pub mod request;

pub(crate) fn extract_subcommand_name(sub_matches: &ArgMatches) -> String {
    match sub_matches.subcommand() {
        Some((name, _)) => name.to_string(),
        None => "unknown".to_string(),
    }
}

pub(crate) fn print_formatted<T: Formattable + ?Sized>(
    value: &T,
    format: &OutputFormat,
) -> Result<(), CliError> {
    let output = value.format(format)?;
    if output.ends_with('\n') {
        print!("{}", output);
    } else {
        println!("{}", output);
    }
    Ok(())
}

#[cfg(feature = "dev-keyring")]
fn secrets_store(state: &Arc<FileStore>) -> Arc<dyn StateStore> {
    tracing::trace!("Keeping secrets in the state directory (dev-keyring)");
    state.clone()
}

#[cfg(not(feature = "dev-keyring"))]
fn secrets_store(_state: &Arc<FileStore>) -> Arc<dyn StateStore> {
    Arc::new(crate::keyring::KeyringStore::default())
}

/// Build the client the CLI uses: persistent state, and a network provider
/// that reflects `--offline`.
pub fn build_client(configuration: ClientConfig, offline: bool) -> Result<ApiClient, CliError> {
    let state = Arc::new(FileStore::default_location()?);
    debug!("Using state directory {:?}", state.directory());
    let store = Arc::new(SplitStore::new(secrets_store(&state), state));

    let network = if offline {
        ManualNetworkStatus::offline()
    } else {
        ManualNetworkStatus::online()
    };

    Ok(ApiClient::builder(configuration)
        .store(store)
        .network(Arc::new(network))
        .build()?)
}

/// Dispatch the parsed command line.
pub async fn execute_command(matches: ArgMatches) -> Result<(), CliError> {
    let format = get_format_parameter_value(&matches)?;
    let configuration = ClientConfig::load_or_create_default()?;

    let (name, sub_matches) = match matches.subcommand() {
        Some(subcommand) => subcommand,
        None => return Err(CliError::UnsupportedSubcommand(extract_subcommand_name(&matches))),
    };

    if name == COMMAND_CONFIG {
        return config::execute(sub_matches, &configuration, &format);
    }

    let client = build_client(configuration, matches.get_flag(PARAMETER_OFFLINE))?;
    let result = match name {
        COMMAND_AUTH => auth::execute(&client, sub_matches, &format).await,
        COMMAND_CONTEXT => context::execute(&client, sub_matches, &format),
        COMMAND_REQUEST => request::execute(&client, sub_matches, &format).await,
        COMMAND_QUEUE => queue::execute(&client, sub_matches, &format).await,
        other => Err(CliError::UnsupportedSubcommand(other.to_string())),
    };
    client.shutdown().await;
    result
}
