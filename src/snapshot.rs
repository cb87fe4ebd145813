use crate::error::FieldError;
use chrono::{DateTime, Utc};
use register_map::Measurement;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;

/// Outcome of reading one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldResult {
    Value(Measurement),
    Unavailable(FieldError),
}

impl FieldResult {
    pub fn value(&self) -> Option<Measurement> {
        match self {
            FieldResult::Value(v) => Some(*v),
            FieldResult::Unavailable(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, FieldResult::Value(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldReading {
    pub name: String,
    pub unit: Option<String>,
    pub result: FieldResult,
}

/// Every field of one poll cycle, in table order.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    model: String,
    captured_at: DateTime<Utc>,
    readings: Vec<FieldReading>,
}

impl TelemetrySnapshot {
    pub(crate) fn new(model: &str, captured_at: DateTime<Utc>, readings: Vec<FieldReading>) -> Self {
        Self {
            model: model.to_string(),
            captured_at,
            readings,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn readings(&self) -> &[FieldReading] {
        &self.readings
    }

    pub fn get(&self, name: &str) -> Option<&FieldResult> {
        self.readings
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.result)
    }

    pub fn value(&self, name: &str) -> Option<Measurement> {
        self.get(name).and_then(FieldResult::value)
    }

    pub fn available_count(&self) -> usize {
        self.readings.iter().filter(|r| r.result.is_available()).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Rendered as a flat object; unavailable fields are omitted.
impl Serialize for TelemetrySnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("timestamp", &self.captured_at)?;
        for reading in &self.readings {
            if let FieldResult::Value(value) = &reading.result {
                map.serialize_entry(&reading.name, value)?;
            }
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldFailure {
    pub field: String,
    pub error: FieldError,
}

/// Per-field failures gathered while building one snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccumulatedError {
    failures: Vec<FieldFailure>,
}

impl AccumulatedError {
    pub(crate) fn push(&mut self, field: &str, error: FieldError) {
        self.failures.push(FieldFailure {
            field: field.to_string(),
            error,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldFailure> {
        self.failures.iter()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.field.as_str())
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for AccumulatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} field(s) unavailable", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.field, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AccumulatedError {}

/// Result of one poll cycle: the snapshot and the fields that failed.
#[derive(Debug, Clone)]
pub struct PollReport {
    pub snapshot: TelemetrySnapshot,
    pub errors: AccumulatedError,
}
