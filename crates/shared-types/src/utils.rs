//! Small validation and formatting helpers.

use std::time::Duration;

/// Fresh UUID v4 string.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A topic or queue name is usable when it is non-empty and carries no
/// whitespace or control characters.
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty() && !topic.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Replace a secret with asterisks, keeping at most the first two characters.
pub fn mask_password(password: &str) -> String {
    let count = password.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let prefix: String = password.chars().take(2).collect();
    format!("{}{}", prefix, "*".repeat(count - 2))
}

/// Cut `s` to `max` characters, appending `...` when shortened.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Human-readable duration: `850ms`, `2.50s`, `3m5s`.
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis < 1_000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.2}s", d.as_secs_f64())
    } else {
        let secs = d.as_secs();
        format!("{}m{}s", secs / 60, secs % 60)
    }
}

/// Parse `10ms`, `2s`, `1m` or a bare millisecond count.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Some(ms) = raw.strip_suffix("ms") {
        return ms.trim().parse().ok().map(Duration::from_millis);
    }
    if let Some(s) = raw.strip_suffix('s') {
        return s.trim().parse::<f64>().ok().filter(|v| *v >= 0.0).map(Duration::from_secs_f64);
    }
    if let Some(m) = raw.strip_suffix('m') {
        return m.trim().parse::<u64>().ok().map(|v| Duration::from_secs(v * 60));
    }
    raw.parse().ok().map(Duration::from_millis)
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_comma_separated(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
