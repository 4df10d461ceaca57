use std::env;
use std::str::FromStr;

/// Parse an envvar as `T`. Returns `fallback` if the variable is missing or
/// fails to parse.
pub fn parse_env_or<T: FromStr>(envvar: &str, fallback: T) -> T {
    env::var(envvar)
        .map(|s| T::from_str(&s).ok())
        .ok()
        .flatten()
        .unwrap_or(fallback)
}
