//! Number and bar formatting.

/// Format a usage percentage. Whole numbers drop the decimal.
#[must_use]
pub fn format_percent(value: f64) -> String {
    if (value - value.round()).abs() < 0.05 {
        format!("{value:.0}%")
    } else {
        format!("{value:.1}%")
    }
}

/// Format a token count compactly (`1.5M`, `12.5K`).
#[must_use]
pub fn format_tokens(value: u64) -> String {
    fn compact(value: u64, divisor: u64, suffix: &str) -> String {
        let major = value / divisor;
        let minor = (value % divisor) / (divisor / 10);
        format!("{major}.{minor}{suffix}")
    }

    if value >= 1_000_000 {
        compact(value, 1_000_000, "M")
    } else if value >= 1_000 {
        compact(value, 1_000, "K")
    } else {
        value.to_string()
    }
}

/// Fixed-width usage bar. Values above 100% fill the bar.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn usage_bar(percent: f64, width: usize) -> String {
    let ratio = (percent / 100.0).clamp(0.0, 1.0);
    let filled = ((ratio * width as f64).round() as usize).min(width);
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_drops_whole_decimals() {
        assert_eq!(format_percent(47.0), "47%");
        assert_eq!(format_percent(12.5), "12.5%");
        assert_eq!(format_percent(134.0), "134%");
    }

    #[test]
    fn tokens_compact() {
        assert_eq!(format_tokens(1_500_000), "1.5M");
        assert_eq!(format_tokens(12_500), "12.5K");
        assert_eq!(format_tokens(500), "500");
    }

    #[test]
    fn bar_is_clamped() {
        assert_eq!(usage_bar(50.0, 4), "██░░");
        assert_eq!(usage_bar(134.0, 4), "████");
        assert_eq!(usage_bar(0.0, 3), "░░░");
    }
}
