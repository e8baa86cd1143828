//! CLI command definitions and argument parsing.
//!
//! The command tree is built with clap's builder API, one module per command
//! group.

use clap::{ArgMatches, Command};

pub mod auth;
pub mod config;
pub mod context;
pub mod params;
pub mod queue;
pub mod request;

pub use params::{
    COMMAND_AUTH, COMMAND_CLEAR, COMMAND_CONFIG, COMMAND_CONTEXT, COMMAND_FLUSH, COMMAND_GET,
    COMMAND_LIST, COMMAND_LOGIN, COMMAND_LOGOUT, COMMAND_PATH, COMMAND_QUEUE, COMMAND_REQUEST,
    COMMAND_SET, COMMAND_STATUS,
};

/// The full `campus` command tree.
pub fn cli_command() -> Command {
    Command::new("campus")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .propagate_version(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(params::verbose_parameter())
        .arg(params::offline_parameter())
        .arg(params::format_parameter())
        .arg(params::format_pretty_parameter())
        .arg(params::format_with_headers_parameter())
        .subcommand(auth::auth_command())
        .subcommand(context::context_command())
        .subcommand(request::request_command())
        .subcommand(queue::queue_command())
        .subcommand(config::config_command())
}

/// Parse the process arguments.
pub fn create_cli_commands() -> ArgMatches {
    cli_command().get_matches()
}
