use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::errors::SandflowError;

static EXPIRATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*([smhdw]?)\s*$").expect("valid expiration regex")
});

/// Parse a cache expiration such as `30s`, `5m`, `2h`, `1d` or `1w`.
/// A bare number is read as seconds.
pub fn parse_expiration(text: &str) -> Result<Duration, SandflowError> {
    let caps = EXPIRATION_RE
        .captures(text)
        .ok_or_else(|| SandflowError::Config(format!("Invalid cache expiration: '{}'", text)))?;

    let amount: u64 = caps[1]
        .parse()
        .map_err(|_| SandflowError::Config(format!("Cache expiration out of range: '{}'", text)))?;

    let unit_secs = match &caps[2] {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        other => {
            return Err(SandflowError::Config(format!("Unknown expiration unit '{}'", other)));
        }
    };

    amount
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| SandflowError::Config(format!("Cache expiration out of range: '{}'", text)))
}
