// Argument value parsing.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parse an update interval: bare seconds (`300`) or unit-suffixed parts
/// (`250ms`, `90s`, `5m`, `1h30m`).
pub fn parse_interval(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("interval is empty".into());
    }

    let total = match input.parse::<u64>() {
        Ok(seconds) => Duration::from_secs(seconds),
        Err(_) => parse_parts(input)?,
    };

    if total.is_zero() {
        return Err("interval must be greater than zero".into());
    }
    Ok(total)
}

fn parse_parts(input: &str) -> Result<Duration, String> {
    let invalid = || format!("invalid interval `{input}`");
    let mut total = Duration::ZERO;
    let mut rest = input;

    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(3600)),
            "" => return Err(format!("missing unit in interval `{input}`")),
            unit => return Err(format!("unknown unit `{unit}` in interval `{input}`")),
        };
        rest = &rest[unit_len..];
        total = total.saturating_add(part);
    }

    Ok(total)
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
