//! Program context command definitions.

use crate::commands::params::{
    COMMAND_CLEAR, COMMAND_CONTEXT, COMMAND_GET, COMMAND_SET, PARAMETER_ID, PARAMETER_NAME,
    PARAMETER_PERMISSION,
};
use clap::{Arg, ArgAction, Command};

/// Create the context command with all its subcommands.
pub fn context_command() -> Command {
    Command::new(COMMAND_CONTEXT)
        .about("Active program selection")
        .subcommand_required(true)
        .subcommand(
            Command::new(COMMAND_SET)
                .about("Select the program sent with every request")
                .arg(
                    Arg::new(PARAMETER_ID)
                        .long(PARAMETER_ID)
                        .num_args(1)
                        .required(true)
                        .help("Program ID"),
                )
                .arg(
                    Arg::new(PARAMETER_NAME)
                        .long(PARAMETER_NAME)
                        .num_args(1)
                        .required(false)
                        .help("Program display name"),
                )
                .arg(
                    Arg::new(PARAMETER_PERMISSION)
                        .long(PARAMETER_PERMISSION)
                        .action(ArgAction::Append)
                        .help("Permission granted within the program (repeatable)"),
                ),
        )
        .subcommand(Command::new(COMMAND_GET).about("Show the active program"))
        .subcommand(Command::new(COMMAND_CLEAR).about("Clear the active program"))
}
