use std::str::FromStr;

/// Parse a boolean flag from a string value, or return the given default value otherwise.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    let value = match value {
        Some(v) => v,
        None => return default,
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Parse a strictly positive number from a string value. Missing, unparseable and zero values are reported as `Err`
/// with a human-readable reason so that callers can log it before falling back to a default.
pub fn parse_positive<T>(value: Option<String>) -> Result<T, String>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let value = value.ok_or_else(|| "not set".to_string())?;
    let parsed = value.trim().parse::<T>().map_err(|e| format!("'{value}' is invalid. {e}"))?;
    if parsed <= T::default() {
        return Err(format!("'{value}' must be greater than zero"));
    }
    Ok(parsed)
}
