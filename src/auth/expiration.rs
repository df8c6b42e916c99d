/// Token lifetime strings
///
/// Lifetimes are configured as `<number><unit>` where unit is `m` (minutes)
/// or `d` (days). Anything else is a configuration error.

use chrono::{Duration, Utc};

use crate::error::ConfigError;

pub fn parse_expiration(value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    let invalid = || ConfigError::InvalidValue(format!("unsupported token expiration '{}'", value));

    let unit = value.chars().last().ok_or_else(invalid)?;
    let amount: i64 = value[..value.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| invalid())?;
    if amount <= 0 {
        return Err(invalid());
    }

    let lifetime = match unit {
        'm' => Duration::try_minutes(amount),
        'd' => Duration::try_days(amount),
        _ => None,
    }
    .ok_or_else(invalid)?;

    // Tokens issued from now on must have a representable expiry.
    Utc::now().checked_add_signed(lifetime).ok_or_else(invalid)?;

    Ok(lifetime)
}
