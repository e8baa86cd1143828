//! Offline queue command definitions.

use crate::commands::params::{COMMAND_FLUSH, COMMAND_LIST, COMMAND_QUEUE};
use clap::Command;

/// Create the queue command with all its subcommands.
pub fn queue_command() -> Command {
    Command::new(COMMAND_QUEUE)
        .about("Requests deferred while offline")
        .subcommand_required(true)
        .subcommand(
            Command::new(COMMAND_LIST)
                .about("List queued requests")
                .visible_alias("ls"),
        )
        .subcommand(Command::new(COMMAND_FLUSH).about("Replay queued requests now"))
}
