// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Source feed and record decoder.
//!
//! The feed is a delimited text file: one header line, then one reading per
//! line with exactly eight fields in fixed order. Quoting and escaping are
//! not supported, so a field containing the delimiter is malformed by
//! definition.

use crate::error::{PipelineError, Result};
use crate::reading::{parse_timestamp, Reading};
use csv::StringRecord;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Number of fields in a source line.
pub const FIELD_COUNT: usize = 8;

/// Column order of the source feed.
pub const FIELD_NAMES: [&str; FIELD_COUNT] = [
    "patient_id",
    "recorded_time",
    "heart_rate",
    "spo2",
    "systolic_bp",
    "diastolic_bp",
    "body_temperature",
    "alert_flag",
];

/// Decode one source record into a reading.
///
/// `line` is the 1-based line number in the source, used for diagnostics.
pub fn decode_record(record: &StringRecord, line: u64) -> Result<Reading> {
    if record.len() != FIELD_COUNT {
        return Err(malformed(
            line,
            format!("expected {} fields, found {}", FIELD_COUNT, record.len()),
        ));
    }

    let patient_id = record[0].trim();
    if patient_id.is_empty() {
        return Err(malformed(line, "empty patient_id".to_string()));
    }

    let recorded_time = parse_timestamp(&record[1])
        .ok_or_else(|| malformed(line, format!("invalid recorded_time '{}'", &record[1])))?;

    let body_temperature: f64 = parse_field(record, 6, line)?;
    if !body_temperature.is_finite() {
        return Err(malformed(
            line,
            format!("non-finite body_temperature '{}'", &record[6]),
        ));
    }

    Ok(Reading {
        patient_id: patient_id.to_string(),
        recorded_time,
        heart_rate: parse_field(record, 2, line)?,
        spo2: parse_field(record, 3, line)?,
        systolic_bp: parse_field(record, 4, line)?,
        diastolic_bp: parse_field(record, 5, line)?,
        body_temperature,
        alert_flag: record[7].trim().to_string(),
    })
}

/// Decode a raw line split on `delimiter`.
pub fn decode_line(line: &str, delimiter: u8, line_no: u64) -> Result<Reading> {
    let record: StringRecord = line
        .trim_end_matches(['\r', '\n'])
        .split(char::from(delimiter))
        .collect();
    decode_record(&record, line_no)
}

fn parse_field<T: FromStr>(record: &StringRecord, idx: usize, line: u64) -> Result<T> {
    record[idx].trim().parse().map_err(|_| {
        malformed(
            line,
            format!("invalid {} '{}'", FIELD_NAMES[idx], &record[idx]),
        )
    })
}

fn malformed(line: u64, reason: String) -> PipelineError {
    PipelineError::MalformedRecord { line, reason }
}

/// Sequential reader over the source feed.
///
/// The header line is consumed unconditionally before the first record.
pub struct SourceFeed<R: Read> {
    reader: csv::Reader<R>,
    record: StringRecord,
    header_skipped: bool,
    has_header: bool,
}

impl SourceFeed<File> {
    /// Open a source file.
    pub fn open<P: AsRef<Path>>(path: P, delimiter: u8, has_header: bool) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::from_reader(file, delimiter, has_header))
    }
}

impl<R: Read> SourceFeed<R> {
    /// Wrap any reader (used by tests with in-memory bytes).
    pub fn from_reader(inner: R, delimiter: u8, has_header: bool) -> Self {
        let reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false) // header handled here
            .flexible(true) // field count checked by the decoder
            .quoting(false)
            .trim(csv::Trim::None)
            .from_reader(inner);

        Self {
            reader,
            record: StringRecord::new(),
            header_skipped: false,
            has_header,
        }
    }

    /// Read the next record.
    ///
    /// Returns `None` at end of input. The inner `Result` carries the
    /// per-line decode outcome so callers can skip malformed lines.
    pub fn next_reading(&mut self) -> Result<Option<(u64, Result<Reading>)>> {
        loop {
            if !self.reader.read_record(&mut self.record)? {
                return Ok(None);
            }

            let line = self
                .record
                .position()
                .map(|p| p.line())
                .unwrap_or_default();

            if self.has_header && !self.header_skipped {
                self.header_skipped = true;
                tracing::debug!("Skipping header: {:?}", self.record);
                continue;
            }

            // Whitespace-only lines (csv already drops empty ones).
            if self.record.len() == 1 && self.record[0].trim().is_empty() {
                continue;
            }

            return Ok(Some((line, decode_record(&self.record, line))));
        }
    }
}
