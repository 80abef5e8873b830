//! Calendar factors for the A-share market.
//!
//! Documented seasonal patterns mapped to a small confidence modifier. Only
//! equity/index signals are adjusted, and the final value is clamped to
//! [-0.2, 0.2].

use chrono::{Datelike, NaiveDate};

/// Seasonal confidence modifier and the reasons behind it.
pub fn seasonal_modifier(date: NaiveDate) -> (f64, String) {
    let month = date.month();
    let day = date.day();

    let mut modifier: f64 = 0.0;
    let mut reasons: Vec<&str> = Vec::new();

    // Pre-Spring-Festival rally (approximated late Jan to early Feb).
    if (month == 1 && day >= 20) || (month == 2 && day <= 10) {
        modifier += 0.1;
        reasons.push("pre-Spring-Festival rally window");
    }

    // Early-March policy-meeting stability window.
    if month == 3 && day <= 15 {
        modifier += 0.05;
        reasons.push("March policy-meeting stability window");
    }

    // Earnings season volatility.
    if matches!(month, 4 | 8 | 10) && (10..=30).contains(&day) {
        modifier -= 0.1;
        reasons.push("earnings season volatility");
    }

    // December window dressing.
    if month == 12 && day >= 15 {
        modifier += 0.05;
        reasons.push("year-end window dressing");
    }

    // Month-end funding squeeze.
    if day >= 28 {
        modifier -= 0.05;
        reasons.push("month-end funding squeeze");
    }

    // First trading week of the year.
    if month == 1 && day <= 7 {
        modifier += 0.05;
        reasons.push("new-year opening strength");
    }

    // Post National-Day rebound.
    if month == 10 && day <= 12 {
        modifier += 0.05;
        reasons.push("post-holiday rebound");
    }

    // Historically weak May-June stretch.
    if matches!(month, 5 | 6) {
        modifier -= 0.05;
        reasons.push("seasonally weak May-June");
    }

    let reason = if reasons.is_empty() {
        "no seasonal factor".to_string()
    } else {
        reasons.join("; ")
    };
    (((modifier.clamp(-0.2, 0.2)) * 100.0).round() / 100.0, reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn spring_festival_window_is_positive() {
        let (m, reason) = seasonal_modifier(day("2026-01-25"));
        assert!(m > 0.0);
        assert!(reason.contains("Spring-Festival"));
    }

    #[test]
    fn earnings_season_is_negative() {
        let (m, _) = seasonal_modifier(day("2026-04-15"));
        assert!(m < 0.0);
    }

    #[test]
    fn quiet_day_is_zero() {
        let (m, reason) = seasonal_modifier(day("2026-07-15"));
        assert_eq!(m, 0.0);
        assert_eq!(reason, "no seasonal factor");
    }

    #[test]
    fn modifier_stays_clamped() {
        // Jan 28-31 stacks opening strength, festival window and month-end.
        let (m, _) = seasonal_modifier(day("2026-01-28"));
        assert!((-0.2..=0.2).contains(&m));
    }
}
