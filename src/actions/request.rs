use clap::ArgMatches;
use reqwest::Method;
use tracing::trace;

use crate::actions::print_formatted;
use crate::client::ApiClient;
use crate::commands::params::{
    PARAMETER_DATA, PARAMETER_HEADER, PARAMETER_METHOD, PARAMETER_NO_AUTH, PARAMETER_NO_CACHE,
    PARAMETER_NO_CONTEXT, PARAMETER_NO_RETRY, PARAMETER_PATH, PARAMETER_QUERY,
};
use crate::error::CliError;
use crate::format::OutputFormat;
use crate::model::RequestSpec;

fn invalid(name: &str, reason: impl Into<String>) -> CliError {
    CliError::InvalidArgument {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Translate the `request` arguments into a [`RequestSpec`].
pub fn request_spec_from_args(sub_matches: &ArgMatches) -> Result<RequestSpec, CliError> {
    let method = sub_matches
        .get_one::<String>(PARAMETER_METHOD)
        .ok_or_else(|| invalid(PARAMETER_METHOD, "a method is required"))?;
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| invalid(PARAMETER_METHOD, e.to_string()))?;

    let mut spec = RequestSpec::new(method);
    if let Some(pairs) = sub_matches.get_many::<(String, String)>(PARAMETER_QUERY) {
        for (key, value) in pairs {
            spec = spec.query(key, value);
        }
    }
    if let Some(pairs) = sub_matches.get_many::<(String, String)>(PARAMETER_HEADER) {
        for (name, value) in pairs {
            spec = spec.header(name, value);
        }
    }
    if let Some(data) = sub_matches.get_one::<String>(PARAMETER_DATA) {
        let body = serde_json::from_str(data)
            .map_err(|e| invalid(PARAMETER_DATA, format!("not valid JSON: {}", e)))?;
        spec = spec.body(body);
    }
    if sub_matches.get_flag(PARAMETER_NO_CACHE) {
        spec = spec.no_cache();
    }
    if sub_matches.get_flag(PARAMETER_NO_AUTH) {
        spec = spec.skip_auth();
    }
    if sub_matches.get_flag(PARAMETER_NO_CONTEXT) {
        spec = spec.skip_program_context();
    }
    if sub_matches.get_flag(PARAMETER_NO_RETRY) {
        spec = spec.no_retry();
    }
    Ok(spec)
}

pub async fn execute(
    client: &ApiClient,
    sub_matches: &ArgMatches,
    format: &OutputFormat,
) -> Result<(), CliError> {
    trace!("Executing \"request\" command...");
    let path = sub_matches
        .get_one::<String>(PARAMETER_PATH)
        .ok_or_else(|| invalid(PARAMETER_PATH, "a path is required"))?;
    let spec = request_spec_from_args(sub_matches)?;
    let response = client.request(path, spec).await?;
    print_formatted(&response, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::cli_command;

    fn spec_for(args: &[&str]) -> Result<RequestSpec, CliError> {
        let matches = cli_command().try_get_matches_from(args).unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        request_spec_from_args(sub)
    }

    #[test]
    fn test_spec_from_args() {
        let spec = spec_for(&[
            "campus", "request", "patch", "/students/4", "-d", r#"{"name":"Ada"}"#, "--no-context",
        ])
        .unwrap();
        assert_eq!(spec.method, Method::PATCH);
        assert_eq!(spec.body, Some(serde_json::json!({"name": "Ada"})));
        assert!(spec.skip_program_context);
        assert!(!spec.skip_auth);
    }

    #[test]
    fn test_invalid_body_is_rejected() {
        let result = spec_for(&["campus", "request", "post", "/students", "-d", "{nope"]);
        assert!(matches!(result, Err(CliError::InvalidArgument { .. })));
    }
}
