//! Shared command parameters for all CLI commands.
//!
//! Parameter names live here together with the argument definitions that are
//! reused across command modules.

use crate::error::CliError;
use crate::format::{OutputFormat, OutputFormatOptions};
use clap::{Arg, ArgAction, ArgMatches};
use tracing::trace;

// Command groups
pub const COMMAND_AUTH: &str = "auth";
pub const COMMAND_CONTEXT: &str = "context";
pub const COMMAND_REQUEST: &str = "request";
pub const COMMAND_QUEUE: &str = "queue";
pub const COMMAND_CONFIG: &str = "config";

// Subcommands
pub const COMMAND_LOGIN: &str = "login";
pub const COMMAND_LOGOUT: &str = "logout";
pub const COMMAND_STATUS: &str = "status";
pub const COMMAND_SET: &str = "set";
pub const COMMAND_GET: &str = "get";
pub const COMMAND_CLEAR: &str = "clear";
pub const COMMAND_LIST: &str = "list";
pub const COMMAND_FLUSH: &str = "flush";
pub const COMMAND_PATH: &str = "path";

// HTTP methods accepted by `request`
pub const METHOD_GET: &str = "get";
pub const METHOD_POST: &str = "post";
pub const METHOD_PUT: &str = "put";
pub const METHOD_PATCH: &str = "patch";
pub const METHOD_DELETE: &str = "delete";

// Parameter names
pub const PARAMETER_VERBOSE: &str = "verbose";
pub const PARAMETER_OFFLINE: &str = "offline";
pub const PARAMETER_FORMAT: &str = "format";
pub const PARAMETER_PRETTY: &str = "pretty";
pub const PARAMETER_HEADERS: &str = "headers";
pub const PARAMETER_EMAIL: &str = "email";
pub const PARAMETER_PASSWORD: &str = "password";
pub const PARAMETER_ID: &str = "id";
pub const PARAMETER_NAME: &str = "name";
pub const PARAMETER_PERMISSION: &str = "permission";
pub const PARAMETER_METHOD: &str = "method";
pub const PARAMETER_PATH: &str = "path";
pub const PARAMETER_QUERY: &str = "query";
pub const PARAMETER_HEADER: &str = "header";
pub const PARAMETER_DATA: &str = "data";
pub const PARAMETER_NO_CACHE: &str = "no-cache";
pub const PARAMETER_NO_AUTH: &str = "no-auth";
pub const PARAMETER_NO_CONTEXT: &str = "no-context";
pub const PARAMETER_NO_RETRY: &str = "no-retry";

pub fn verbose_parameter() -> Arg {
    Arg::new(PARAMETER_VERBOSE)
        .short('v')
        .long(PARAMETER_VERBOSE)
        .action(ArgAction::SetTrue)
        .global(true)
        .help("Enable verbose output for debugging")
}

/// Treat the network as unavailable; mutating requests are queued.
pub fn offline_parameter() -> Arg {
    Arg::new(PARAMETER_OFFLINE)
        .long(PARAMETER_OFFLINE)
        .action(ArgAction::SetTrue)
        .global(true)
        .help("Work offline: queue writes instead of sending them")
}

/// Create the global format parameter.
pub fn format_parameter() -> Arg {
    Arg::new(PARAMETER_FORMAT)
        .short('f')
        .long(PARAMETER_FORMAT)
        .num_args(1)
        .required(false)
        .env("CAMPUS_FORMAT")
        .default_value("json")
        .global(true)
        .help("Output data format")
        .value_parser(OutputFormat::names())
}

pub fn format_pretty_parameter() -> Arg {
    Arg::new(PARAMETER_PRETTY)
        .long(PARAMETER_PRETTY)
        .action(ArgAction::SetTrue)
        .global(true)
        .help("Format the output pretty")
}

pub fn format_with_headers_parameter() -> Arg {
    Arg::new(PARAMETER_HEADERS)
        .long(PARAMETER_HEADERS)
        .action(ArgAction::SetTrue)
        .global(true)
        .env("CAMPUS_HEADERS")
        .help("Include a header row in CSV output")
}

/// Parse `key=value` (or `key:value` when `separator` is ':').
pub fn parse_pair(raw: &str, separator: char) -> Option<(String, String)> {
    let (key, value) = raw.split_once(separator)?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

pub fn query_pair_parser(raw: &str) -> Result<(String, String), String> {
    parse_pair(raw, '=').ok_or_else(|| format!("expected KEY=VALUE, got {:?}", raw))
}

pub fn header_pair_parser(raw: &str) -> Result<(String, String), String> {
    parse_pair(raw, ':').ok_or_else(|| format!("expected NAME:VALUE, got {:?}", raw))
}

/// Resolve the output format from the global format flags.
pub fn get_format_parameter_value(matches: &ArgMatches) -> Result<OutputFormat, CliError> {
    let format = matches
        .get_one::<String>(PARAMETER_FORMAT)
        .map(String::as_str)
        .unwrap_or(crate::format::JSON);
    let options = OutputFormatOptions {
        with_headers: matches.get_flag(PARAMETER_HEADERS),
        pretty: matches.get_flag(PARAMETER_PRETTY),
    };
    trace!("Format: {} {:?}", format, options);
    Ok(OutputFormat::from_string_with_options(format, options)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        assert_eq!(
            parse_pair("page=2", '='),
            Some(("page".to_string(), "2".to_string()))
        );
        assert_eq!(
            parse_pair("X-Trace: a:b", ':'),
            Some(("X-Trace".to_string(), "a:b".to_string()))
        );
        assert_eq!(parse_pair("=oops", '='), None);
        assert!(query_pair_parser("novalue").is_err());
    }
}
