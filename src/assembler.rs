//! Field scan: one read per descriptor, failures isolated per field.

use crate::error::{FieldError, PollError};
use crate::reader::RegisterReader;
use crate::snapshot::{AccumulatedError, FieldReading, FieldResult, PollReport, TelemetrySnapshot};
use chrono::Utc;
use log::{debug, warn};
use register_map::{DecodeError, DerivedField, FieldDescriptor, Measurement, RegisterMap, WordOrder};
use std::sync::atomic::{AtomicBool, Ordering};

/// Read and decode a single field.
pub async fn read_field<R>(
    reader: &mut R,
    unit_id: u8,
    field: &FieldDescriptor,
    order: WordOrder,
) -> Result<Measurement, FieldError>
where
    R: RegisterReader + ?Sized,
{
    let bytes = reader.read(unit_id, field.address, field.word_count()).await?;
    let expected = 2 * field.word_count() as usize;
    if bytes.len() != expected {
        return Err(DecodeError::LengthMismatch {
            encoding: field.encoding,
            expected,
            actual: bytes.len(),
        }
        .into());
    }
    let raw = field.encoding.decode(&bytes, order)?;
    Ok(match field.scale {
        Some(factor) => raw.scaled(factor),
        None => raw,
    })
}

/// Builds one [`TelemetrySnapshot`] per call from a [`RegisterMap`].
pub struct SnapshotAssembler<'a> {
    map: &'a RegisterMap,
    unit_id: u8,
}

impl<'a> SnapshotAssembler<'a> {
    pub fn new(map: &'a RegisterMap, unit_id: u8) -> Self {
        Self { map, unit_id }
    }

    /// Scan every field of the table in order.
    ///
    /// Field failures end up in the report, never in the returned error.
    /// `cancel` is checked before each read; once set, the partial snapshot
    /// is dropped and [`PollError::Cancelled`] is returned.
    pub async fn assemble<R>(&self, reader: &mut R, cancel: &AtomicBool) -> Result<PollReport, PollError>
    where
        R: RegisterReader + ?Sized,
    {
        let captured_at = Utc::now();
        let mut readings = Vec::with_capacity(self.map.fields().len() + self.map.derived().len());
        let mut errors = AccumulatedError::default();

        for field in self.map.fields() {
            if cancel.load(Ordering::Relaxed) {
                debug!(target: "modbus:holding", "{}: scan cancelled before {}", self.map.model(), field.name);
                return Err(PollError::Cancelled);
            }
            let result = match read_field(&mut *reader, self.unit_id, field, self.map.word_order()).await {
                Ok(value) => {
                    debug!(target: "modbus:holding", "{} reg {}={}", field.name, field.address, value);
                    FieldResult::Value(value)
                }
                Err(err) => {
                    warn!(target: "modbus:holding", "{} reg {}: {}", field.name, field.address, err);
                    errors.push(&field.name, err.clone());
                    FieldResult::Unavailable(err)
                }
            };
            readings.push(FieldReading {
                name: field.name.clone(),
                unit: field.unit.clone(),
                result,
            });
        }

        for derived in self.map.derived() {
            let result = derive(derived, &readings);
            readings.push(FieldReading {
                name: derived.name.clone(),
                unit: derived.unit.clone(),
                result,
            });
        }

        Ok(PollReport {
            snapshot: TelemetrySnapshot::new(self.map.model(), captured_at, readings),
            errors,
        })
    }
}

fn derive(derived: &DerivedField, readings: &[FieldReading]) -> FieldResult {
    let mut values = Vec::with_capacity(derived.inputs.len());
    for input in &derived.inputs {
        let value = readings
            .iter()
            .find(|r| &r.name == input)
            .and_then(|r| r.result.value());
        match value {
            Some(v) => values.push(v.as_f64()),
            None => return FieldResult::Unavailable(FieldError::MissingInput(input.clone())),
        }
    }
    FieldResult::Value(Measurement::Real(derived.op.apply(&values)))
}
