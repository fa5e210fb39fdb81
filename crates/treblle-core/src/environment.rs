//! Runtime environment detection for gating.

/// Variables naming the current environment, highest priority first.
pub const ENVIRONMENT_VARIABLES: &[&str] = &["TREBLLE_ENV", "APP_ENV", "RUST_ENV", "ENVIRONMENT"];

/// Environments where nothing is captured unless configured otherwise.
pub const DEFAULT_IGNORED_ENVIRONMENTS: &[&str] = &["local", "dev", "development"];

/// Name of the current environment, from the first non-empty variable.
pub fn current_environment() -> Option<String> {
    ENVIRONMENT_VARIABLES
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

/// Whether `environment` appears in `ignored`, ignoring case.
pub fn is_ignored(environment: Option<&str>, ignored: &[String]) -> bool {
    match environment {
        Some(env) => ignored.iter().any(|i| i.trim().eq_ignore_ascii_case(env)),
        None => false,
    }
}
