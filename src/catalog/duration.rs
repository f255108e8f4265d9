//! # Repeat Interval Durations
//!
//! Parses and formats Kubernetes-style duration strings.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static DURATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d+[smhd])+$").expect("duration regex is valid - this should never happen")
});

static COMPONENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<number>\d+)(?P<unit>[smhd])")
        .expect("duration component regex is valid - this should never happen")
});

/// Parse a duration string into `std::time::Duration`
/// Supports single and compound forms: "30s", "5m", "1h", "7d", "1h30m"
/// A zero total is rejected; a scan schedule must make progress
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration, String> {
    let duration_trimmed = duration_str.trim();

    if duration_trimmed.is_empty() {
        return Err("duration string cannot be empty".to_string());
    }

    let interval_lower = duration_trimmed.to_lowercase();
    if !DURATION_REGEX.is_match(&interval_lower) {
        return Err(format!(
            "invalid duration format '{duration_trimmed}'. Expected format: <number><unit>[<number><unit>...] (e.g., '30m', '1h', '1h30m')"
        ));
    }

    let mut total_seconds: u64 = 0;
    for captures in COMPONENT_REGEX.captures_iter(&interval_lower) {
        let number: u64 = captures["number"]
            .parse()
            .map_err(|e| format!("invalid duration number in '{duration_trimmed}': {e}"))?;

        let multiplier = match &captures["unit"] {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            "d" => 86400,
            unit => {
                return Err(format!(
                    "invalid unit '{unit}' in duration '{duration_trimmed}'. Expected: s, m, h, or d"
                ));
            }
        };

        total_seconds = number
            .checked_mul(multiplier)
            .and_then(|seconds| total_seconds.checked_add(seconds))
            .ok_or_else(|| format!("duration '{duration_trimmed}' is too large"))?;
    }

    if total_seconds == 0 {
        return Err(format!(
            "duration must be greater than 0, got '{duration_trimmed}'"
        ));
    }

    Ok(Duration::from_secs(total_seconds))
}

/// Format a duration using the largest unit that divides it exactly
#[must_use]
pub fn format_kubernetes_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds == 0 {
        return "0s".to_string();
    }
    for (unit, size) in [("d", 86400), ("h", 3600), ("m", 60)] {
        if seconds % size == 0 {
            return format!("{}{unit}", seconds / size);
        }
    }
    format!("{seconds}s")
}
