// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire payload codec.
//!
//! Readings travel as JSON objects keyed by field name, so producer and
//! consumer never depend on field order.
//!
//! ```text
//! {"patient_id":"P001","recorded_time":"2024-01-01 10:00:00","heart_rate":88,
//!  "spo2":97,"systolic_bp":120,"diastolic_bp":80,"body_temperature":36.6,
//!  "alert_flag":"normal"}
//! ```

use crate::error::{PipelineError, Result};
use crate::reading::{parse_timestamp, Reading};
use serde_json::{json, Map, Value};

/// Encode a reading as a JSON payload. Total for every valid reading.
pub fn encode(reading: &Reading) -> String {
    json!({
        "patient_id": reading.patient_id,
        "recorded_time": reading.recorded_time_text(),
        "heart_rate": reading.heart_rate,
        "spo2": reading.spo2,
        "systolic_bp": reading.systolic_bp,
        "diastolic_bp": reading.diastolic_bp,
        "body_temperature": reading.body_temperature,
        "alert_flag": reading.alert_flag,
    })
    .to_string()
}

/// Decode a JSON payload into a reading.
///
/// Integers also accept numeric strings, mirroring lenient JSON readers.
/// Unknown keys are ignored.
pub fn decode(payload: &[u8]) -> Result<Reading> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| PipelineError::InvalidPayload(e.to_string()))?;

    let obj = value
        .as_object()
        .ok_or_else(|| PipelineError::InvalidPayload("payload is not a JSON object".into()))?;

    let patient_id = text_field(obj, "patient_id")?;
    if patient_id.is_empty() {
        return Err(PipelineError::TypeMismatch {
            field: "patient_id",
            expected: "non-empty string",
        });
    }

    let recorded_time =
        parse_timestamp(&text_field(obj, "recorded_time")?).ok_or(PipelineError::TypeMismatch {
            field: "recorded_time",
            expected: "date-time",
        })?;

    Ok(Reading {
        patient_id,
        recorded_time,
        heart_rate: int_field(obj, "heart_rate")?,
        spo2: int_field(obj, "spo2")?,
        systolic_bp: int_field(obj, "systolic_bp")?,
        diastolic_bp: int_field(obj, "diastolic_bp")?,
        body_temperature: float_field(obj, "body_temperature")?,
        alert_flag: text_field(obj, "alert_flag")?,
    })
}

fn field<'a>(obj: &'a Map<String, Value>, name: &'static str) -> Result<&'a Value> {
    match obj.get(name) {
        Some(Value::Null) | None => Err(PipelineError::MissingField(name)),
        Some(v) => Ok(v),
    }
}

fn text_field(obj: &Map<String, Value>, name: &'static str) -> Result<String> {
    match field(obj, name)? {
        Value::String(s) => Ok(s.clone()),
        _ => Err(PipelineError::TypeMismatch {
            field: name,
            expected: "string",
        }),
    }
}

fn int_field(obj: &Map<String, Value>, name: &'static str) -> Result<i32> {
    let mismatch = PipelineError::TypeMismatch {
        field: name,
        expected: "integer",
    };

    let wide = match field(obj, name)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    wide.and_then(|v| i32::try_from(v).ok()).ok_or(mismatch)
}

fn float_field(obj: &Map<String, Value>, name: &'static str) -> Result<f64> {
    let value = match field(obj, name)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    value
        .filter(|v| v.is_finite())
        .ok_or(PipelineError::TypeMismatch {
            field: name,
            expected: "number",
        })
}
