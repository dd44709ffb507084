// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Patient vital-sign reading.

use chrono::NaiveDateTime;

/// Canonical text form of `recorded_time` (fraction printed only when non-zero).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Accepted input forms for `recorded_time`.
const ACCEPTED_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// One patient vital-sign record.
///
/// Readings are never mutated after decoding; they only move between the
/// row, struct and payload representations.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Opaque patient identifier (non-empty)
    pub patient_id: String,

    /// Measurement time
    pub recorded_time: NaiveDateTime,

    /// Beats per minute
    pub heart_rate: i32,

    /// Oxygen saturation (percent)
    pub spo2: i32,

    /// Systolic blood pressure (mmHg)
    pub systolic_bp: i32,

    /// Diastolic blood pressure (mmHg)
    pub diastolic_bp: i32,

    /// Body temperature (degrees Celsius)
    pub body_temperature: f64,

    /// Alert tag, e.g. "normal", "warning", "critical"
    pub alert_flag: String,
}

impl Reading {
    /// `recorded_time` in its canonical text form.
    pub fn recorded_time_text(&self) -> String {
        format_timestamp(&self.recorded_time)
    }
}

/// Parse a `recorded_time` value.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    ACCEPTED_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

/// Format a `recorded_time` value.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_timestamp_forms() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();

        assert_eq!(parse_timestamp("2024-01-01 10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T10:00:00"), Some(expected));
        assert_eq!(parse_timestamp(" 2024-01-01 10:00:00 "), Some(expected));
        assert!(parse_timestamp("2024-13-01 10:00:00").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_format_timestamp_keeps_fraction() {
        let ts = parse_timestamp("2024-01-01 10:00:00.250").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-01-01 10:00:00.250");

        let ts = parse_timestamp("2024-01-01 10:00:00").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-01-01 10:00:00");
    }
}
