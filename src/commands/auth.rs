//! Authentication command definitions.

use crate::commands::params::{
    COMMAND_AUTH, COMMAND_LOGIN, COMMAND_LOGOUT, COMMAND_STATUS, PARAMETER_EMAIL,
    PARAMETER_PASSWORD,
};
use clap::{Arg, Command};

/// Create the authentication command with all its subcommands.
pub fn auth_command() -> Command {
    Command::new(COMMAND_AUTH)
        .about("Authentication operations")
        .subcommand_required(true)
        .subcommand(
            Command::new(COMMAND_LOGIN)
                .about("Sign in and store the session tokens")
                .arg(
                    Arg::new(PARAMETER_EMAIL)
                        .long(PARAMETER_EMAIL)
                        .num_args(1)
                        .required(true)
                        .env("CAMPUS_EMAIL")
                        .help("Account email"),
                )
                .arg(
                    Arg::new(PARAMETER_PASSWORD)
                        .long(PARAMETER_PASSWORD)
                        .num_args(1)
                        .required(true)
                        .env("CAMPUS_PASSWORD")
                        .hide_env_values(true)
                        .help("Account password"),
                ),
        )
        .subcommand(Command::new(COMMAND_LOGOUT).about("Sign out and clear the stored session"))
        .subcommand(Command::new(COMMAND_STATUS).about("Show whether a session is active"))
}
