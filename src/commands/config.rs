//! Configuration command definitions.

use crate::commands::params::{COMMAND_CONFIG, COMMAND_GET, COMMAND_PATH};
use clap::Command;

/// Create the config command with all its subcommands.
pub fn config_command() -> Command {
    Command::new(COMMAND_CONFIG)
        .about("Configuration management")
        .subcommand_required(true)
        .subcommand(Command::new(COMMAND_GET).about("Show the effective configuration"))
        .subcommand(Command::new(COMMAND_PATH).about("Show the configuration file path"))
}
