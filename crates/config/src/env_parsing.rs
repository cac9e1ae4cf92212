use anyhow::{anyhow, Result};
use std::env;
use std::str::FromStr;

pub(crate) fn parse_env_bool(value: String) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Present-but-malformed numeric overrides are rejected rather than ignored.
pub(crate) fn parse_env_number<T>(env_name: &str) -> Result<Option<T>>
where
    T: FromStr,
{
    let Ok(raw) = env::var(env_name) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|_| anyhow!("{env_name} must be an integer, got {trimmed:?}"))
}

pub(crate) fn non_empty_env(env_name: &str) -> Option<String> {
    env::var(env_name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn parse_csv_list(csv: &str) -> Vec<String> {
    csv.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .split(',')
        .map(str::trim)
        .map(|value| value.trim_matches('"').trim_matches('\''))
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .collect()
}
