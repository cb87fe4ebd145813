//! Register maps for Modbus telemetry devices.
//!
//! A [`RegisterMap`] is an ordered table of [`FieldDescriptor`]s, each naming
//! one physical signal together with its holding register address, binary
//! [`Encoding`] and optional scale factor. Tables are plain values: several
//! device models can coexist in one process, and a table can be compiled in
//! (see [`builtin`]) or loaded from JSON:
//!
//! ```json
//! {
//!   "model": "PM2120",
//!   "word_order": "big_endian",
//!   "fields": [
//!     { "name": "frequency", "address": 3109, "type": "f32", "unit": "Hz" },
//!     { "name": "daily_energy", "address": 10, "type": "u16", "unit": "kWh", "scale": 0.1 }
//!   ],
//!   "derived": [
//!     { "name": "voltage_ll_mean", "op": "mean", "inputs": ["voltage_ab", "voltage_bc", "voltage_ca"] }
//!   ]
//! }
//! ```

pub mod builtin;
pub mod codec;

pub use codec::{DecodeError, Encoding, Measurement, Word, WordOrder};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("duplicate field name `{0}`")]
    DuplicateName(String),
    #[error("fields `{first}` and `{second}` overlap")]
    Overlap { first: String, second: String },
    #[error("field `{0}` runs past the end of the register space")]
    OutOfRange(String),
    #[error("derived field `{field}` refers to unknown field `{input}`")]
    UnknownInput { field: String, input: String },
    #[error("derived field `{0}` has no inputs")]
    NoInputs(String),
    #[error("scale override for unknown field `{0}`")]
    UnknownOverride(String),
    #[error("unable to read register map file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid register map: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One register-mapped signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub address: u16,
    #[serde(rename = "type")]
    pub encoding: Encoding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    /// Allowed to share registers with other descriptors.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub alias: bool,
}

impl FieldDescriptor {
    pub fn new(name: &str, address: u16, encoding: Encoding) -> Self {
        Self {
            name: name.to_string(),
            address,
            encoding,
            unit: None,
            scale: None,
            alias: false,
        }
    }

    pub fn unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn scale(mut self, factor: f64) -> Self {
        self.scale = Some(factor);
        self
    }

    pub fn alias(mut self) -> Self {
        self.alias = true;
        self
    }

    pub fn word_count(&self) -> u16 {
        self.encoding.word_count()
    }

    /// One past the last register covered by this descriptor.
    fn end(&self) -> u32 {
        u32::from(self.address) + u32::from(self.word_count())
    }

    fn overlaps(&self, other: &FieldDescriptor) -> bool {
        u32::from(self.address) < other.end() && u32::from(other.address) < self.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Derivation {
    Mean,
    Sum,
    /// First input minus the sum of the others.
    Difference,
}

impl Derivation {
    pub fn apply(self, values: &[f64]) -> f64 {
        match self {
            Derivation::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Derivation::Sum => values.iter().sum(),
            Derivation::Difference => match values.split_first() {
                Some((first, rest)) => first - rest.iter().sum::<f64>(),
                None => 0.0,
            },
        }
    }
}

/// A value computed from other fields of the same table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedField {
    pub name: String,
    pub op: Derivation,
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl DerivedField {
    pub fn new(name: &str, op: Derivation, inputs: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            op,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            unit: None,
        }
    }

    pub fn unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }
}

#[derive(Debug, Deserialize)]
struct RegisterMapFile {
    model: String,
    #[serde(default)]
    word_order: WordOrder,
    fields: Vec<FieldDescriptor>,
    #[serde(default)]
    derived: Vec<DerivedField>,
}

/// Validated, ordered field table of one device model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterMap {
    model: String,
    word_order: WordOrder,
    fields: Vec<FieldDescriptor>,
    derived: Vec<DerivedField>,
}

impl RegisterMap {
    pub fn new(
        model: &str,
        fields: Vec<FieldDescriptor>,
        derived: Vec<DerivedField>,
    ) -> Result<Self, MapError> {
        let map = Self {
            model: model.to_string(),
            word_order: WordOrder::default(),
            fields,
            derived,
        };
        map.validate()?;
        Ok(map)
    }

    pub fn from_json(json: &str) -> Result<Self, MapError> {
        let file: RegisterMapFile = serde_json::from_str(json)?;
        Ok(Self::new(&file.model, file.fields, file.derived)?.with_word_order(file.word_order))
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, MapError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn with_word_order(mut self, order: WordOrder) -> Self {
        self.word_order = order;
        self
    }

    /// Replace the scale factor of the named fields.
    pub fn with_scale_overrides(mut self, overrides: &HashMap<String, f64>) -> Result<Self, MapError> {
        for (name, factor) in overrides {
            let field = self
                .fields
                .iter_mut()
                .find(|f| &f.name == name)
                .ok_or_else(|| MapError::UnknownOverride(name.clone()))?;
            field.scale = Some(*factor);
        }
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn word_order(&self) -> WordOrder {
        self.word_order
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn derived(&self) -> &[DerivedField] {
        &self.derived
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn validate(&self) -> Result<(), MapError> {
        let mut names = HashSet::new();
        let all_names = self
            .fields
            .iter()
            .map(|f| &f.name)
            .chain(self.derived.iter().map(|d| &d.name));
        for name in all_names {
            if !names.insert(name.as_str()) {
                return Err(MapError::DuplicateName(name.clone()));
            }
        }

        for (i, field) in self.fields.iter().enumerate() {
            if field.end() > 0x1_0000 {
                return Err(MapError::OutOfRange(field.name.clone()));
            }
            if field.alias {
                continue;
            }
            if let Some(other) = self.fields[i + 1..]
                .iter()
                .find(|other| !other.alias && field.overlaps(other))
            {
                return Err(MapError::Overlap {
                    first: field.name.clone(),
                    second: other.name.clone(),
                });
            }
        }

        for derived in &self.derived {
            if derived.inputs.is_empty() {
                return Err(MapError::NoInputs(derived.name.clone()));
            }
            if let Some(input) = derived.inputs.iter().find(|i| self.field(i).is_none()) {
                return Err(MapError::UnknownInput {
                    field: derived.name.clone(),
                    input: input.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("a", 0, Encoding::UInt16),
            FieldDescriptor::new("b", 1, Encoding::UInt16),
        ]
    }

    #[test]
    fn word_count_follows_encoding() {
        assert_eq!(FieldDescriptor::new("x", 0, Encoding::UInt16).word_count(), 1);
        assert_eq!(FieldDescriptor::new("x", 0, Encoding::Float32).word_count(), 2);
        assert_eq!(FieldDescriptor::new("x", 0, Encoding::Int64).word_count(), 4);
    }

    #[test]
    fn adjacent_fields_are_accepted() {
        let map = RegisterMap::new("test", pair(), vec![]).unwrap();
        assert_eq!(map.fields().len(), 2);
        assert_eq!(map.word_order(), WordOrder::BigEndian);
    }

    #[test]
    fn overlapping_fields_are_rejected() {
        let fields = vec![
            FieldDescriptor::new("wide", 10, Encoding::Float32),
            FieldDescriptor::new("inside", 11, Encoding::UInt16),
        ];
        let err = RegisterMap::new("test", fields, vec![]).unwrap_err();
        assert!(matches!(err, MapError::Overlap { ref first, ref second } if first == "wide" && second == "inside"));
    }

    #[test]
    fn aliased_sub_range_is_accepted() {
        let fields = vec![
            FieldDescriptor::new("energy", 100, Encoding::Int64),
            FieldDescriptor::new("energy_low_word", 103, Encoding::UInt16).alias(),
        ];
        assert!(RegisterMap::new("test", fields, vec![]).is_ok());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let fields = vec![
            FieldDescriptor::new("a", 0, Encoding::UInt16),
            FieldDescriptor::new("a", 5, Encoding::UInt16),
        ];
        assert!(matches!(
            RegisterMap::new("test", fields, vec![]),
            Err(MapError::DuplicateName(name)) if name == "a"
        ));

        let derived = vec![DerivedField::new("b", Derivation::Sum, &["a"])];
        assert!(matches!(
            RegisterMap::new("test", pair(), derived),
            Err(MapError::DuplicateName(_))
        ));
    }

    #[test]
    fn field_must_fit_register_space() {
        let fields = vec![FieldDescriptor::new("tail", 0xffff, Encoding::Float32)];
        assert!(matches!(
            RegisterMap::new("test", fields, vec![]),
            Err(MapError::OutOfRange(_))
        ));
    }

    #[test]
    fn derived_inputs_must_exist() {
        let derived = vec![DerivedField::new("total", Derivation::Sum, &["a", "c"])];
        let err = RegisterMap::new("test", pair(), derived).unwrap_err();
        assert!(matches!(err, MapError::UnknownInput { ref input, .. } if input == "c"));

        let derived = vec![DerivedField::new("total", Derivation::Sum, &[])];
        assert!(matches!(
            RegisterMap::new("test", pair(), derived),
            Err(MapError::NoInputs(_))
        ));
    }

    #[test]
    fn derivations() {
        assert_eq!(Derivation::Mean.apply(&[399.0, 400.0, 401.0]), 400.0);
        assert_eq!(Derivation::Sum.apply(&[1.0, 2.0, 3.0]), 6.0);
        assert_eq!(Derivation::Difference.apply(&[10.0, 3.0, 2.0]), 5.0);
    }

    #[test]
    fn scale_overrides() {
        let map = RegisterMap::new("test", pair(), vec![]).unwrap();
        let overrides = HashMap::from([("b".to_string(), 0.5)]);
        let map = map.with_scale_overrides(&overrides).unwrap();
        assert_eq!(map.field("a").unwrap().scale, None);
        assert_eq!(map.field("b").unwrap().scale, Some(0.5));

        let overrides = HashMap::from([("missing".to_string(), 2.0)]);
        assert!(matches!(
            map.with_scale_overrides(&overrides),
            Err(MapError::UnknownOverride(name)) if name == "missing"
        ));
    }

    #[test]
    fn load_from_json() {
        let json = r#"{
            "model": "bench",
            "word_order": "little_endian",
            "fields": [
                { "name": "status", "address": 0, "type": "u16" },
                { "name": "power", "address": 1, "type": "f32", "unit": "kW", "scale": 0.001 },
                { "name": "energy", "address": 3, "type": "i64", "unit": "Wh" }
            ],
            "derived": [
                { "name": "power_doubled", "op": "sum", "inputs": ["power", "power"] }
            ]
        }"#;
        let map = RegisterMap::from_json(json).unwrap();
        assert_eq!(map.model(), "bench");
        assert_eq!(map.word_order(), WordOrder::LittleEndian);
        assert_eq!(
            map.field("power").unwrap(),
            &FieldDescriptor::new("power", 1, Encoding::Float32)
                .unit("kW")
                .scale(0.001)
        );
        assert_eq!(map.derived()[0].op, Derivation::Sum);
    }

    #[test]
    fn json_is_validated() {
        let json = r#"{
            "model": "broken",
            "fields": [
                { "name": "a", "address": 0, "type": "f32" },
                { "name": "b", "address": 1, "type": "u16" }
            ]
        }"#;
        assert!(matches!(RegisterMap::from_json(json), Err(MapError::Overlap { .. })));
        assert!(matches!(
            RegisterMap::from_json(r#"{ "model": "x", "fields": [ { "name": "a", "address": 0, "type": "u8" } ] }"#),
            Err(MapError::Parse(_))
        ));
    }
}
