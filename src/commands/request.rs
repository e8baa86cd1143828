//! Raw API request command definition.

use crate::commands::params::{
    header_pair_parser, query_pair_parser, COMMAND_REQUEST, METHOD_DELETE, METHOD_GET,
    METHOD_PATCH, METHOD_POST, METHOD_PUT, PARAMETER_DATA, PARAMETER_HEADER, PARAMETER_METHOD,
    PARAMETER_NO_AUTH, PARAMETER_NO_CACHE, PARAMETER_NO_CONTEXT, PARAMETER_NO_RETRY,
    PARAMETER_PATH, PARAMETER_QUERY,
};
use clap::{Arg, ArgAction, Command};

fn flag(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).long(name).action(ArgAction::SetTrue).help(help)
}

/// Create the request command.
pub fn request_command() -> Command {
    Command::new(COMMAND_REQUEST)
        .about("Send a request through the client pipeline")
        .arg(
            Arg::new(PARAMETER_METHOD)
                .required(true)
                .value_parser([METHOD_GET, METHOD_POST, METHOD_PUT, METHOD_PATCH, METHOD_DELETE])
                .help("HTTP method"),
        )
        .arg(
            Arg::new(PARAMETER_PATH)
                .required(true)
                .help("Path relative to the versioned base URL, e.g. /students"),
        )
        .arg(
            Arg::new(PARAMETER_QUERY)
                .short('q')
                .long(PARAMETER_QUERY)
                .action(ArgAction::Append)
                .value_parser(query_pair_parser)
                .help("Query parameter KEY=VALUE (repeatable, GET only)"),
        )
        .arg(
            Arg::new(PARAMETER_HEADER)
                .short('H')
                .long(PARAMETER_HEADER)
                .action(ArgAction::Append)
                .value_parser(header_pair_parser)
                .help("Extra header NAME:VALUE (repeatable)"),
        )
        .arg(
            Arg::new(PARAMETER_DATA)
                .short('d')
                .long(PARAMETER_DATA)
                .num_args(1)
                .help("JSON request body"),
        )
        .arg(flag(PARAMETER_NO_CACHE, "Bypass the response cache"))
        .arg(flag(PARAMETER_NO_AUTH, "Send without the bearer token"))
        .arg(flag(PARAMETER_NO_CONTEXT, "Send without the program context header"))
        .arg(flag(PARAMETER_NO_RETRY, "Do not retry transient failures"))
}
