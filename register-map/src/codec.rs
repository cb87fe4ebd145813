use serde::{Deserialize, Serialize};
use std::fmt;

/// 16-bit value stored in a Modbus register.
pub type Word = u16;

/// Binary encoding of a register-mapped value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    #[serde(rename = "u16")]
    UInt16,
    #[serde(rename = "f32")]
    Float32,
    #[serde(rename = "i64")]
    Int64,
}

impl Encoding {
    /// Number of registers the encoding spans.
    pub const fn word_count(self) -> u16 {
        match self {
            Encoding::UInt16 => 1,
            Encoding::Float32 => 2,
            Encoding::Int64 => 4,
        }
    }

    pub const fn byte_len(self) -> usize {
        self.word_count() as usize * 2
    }

    /// Decode `bytes` as read from the device.
    ///
    /// The length is checked before any decoder runs; multi-register values
    /// are put back into big-endian word order first.
    pub fn decode(self, bytes: &[u8], order: WordOrder) -> Result<Measurement, DecodeError> {
        if bytes.len() != self.byte_len() {
            return Err(DecodeError::LengthMismatch {
                encoding: self,
                expected: self.byte_len(),
                actual: bytes.len(),
            });
        }
        let ordered = order.to_big_endian(bytes);
        let value = match self {
            Encoding::UInt16 => Measurement::UInt16(decode_uint16(fixed(&ordered, self)?)),
            Encoding::Float32 => Measurement::Float32(decode_float32(fixed(&ordered, self)?)),
            Encoding::Int64 => Measurement::Int64(decode_int64(fixed(&ordered, self)?)),
        };
        Ok(value)
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Encoding::UInt16 => "u16",
            Encoding::Float32 => "f32",
            Encoding::Int64 => "i64",
        };
        f.write_str(name)
    }
}

/// Order of the 16-bit words inside a multi-register value.
///
/// Bytes within a word are always big-endian on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

impl WordOrder {
    fn to_big_endian(self, bytes: &[u8]) -> Vec<u8> {
        match self {
            WordOrder::BigEndian => bytes.to_vec(),
            WordOrder::LittleEndian => bytes.chunks(2).rev().flatten().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("{encoding} needs {expected} bytes, device returned {actual}")]
    LengthMismatch {
        encoding: Encoding,
        expected: usize,
        actual: usize,
    },
    /// Reserved for encodings that can hold invalid bit patterns (BCD, strings).
    #[error("malformed {encoding} value: {reason}")]
    Malformed { encoding: Encoding, reason: String },
}

/// A decoded register value.
///
/// Raw values keep the type of their encoding; scaled and derived values
/// are `Real`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Measurement {
    UInt16(u16),
    Float32(f32),
    Int64(i64),
    Real(f64),
}

impl Measurement {
    pub fn as_f64(self) -> f64 {
        match self {
            Measurement::UInt16(v) => f64::from(v),
            Measurement::Float32(v) => f64::from(v),
            Measurement::Int64(v) => v as f64,
            Measurement::Real(v) => v,
        }
    }

    pub fn scaled(self, factor: f64) -> Measurement {
        Measurement::Real(self.as_f64() * factor)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measurement::UInt16(v) => write!(f, "{v}"),
            Measurement::Float32(v) => write!(f, "{v}"),
            Measurement::Int64(v) => write!(f, "{v}"),
            Measurement::Real(v) => write!(f, "{v}"),
        }
    }
}

fn fixed<const N: usize>(bytes: &[u8], encoding: Encoding) -> Result<[u8; N], DecodeError> {
    bytes.try_into().map_err(|_| DecodeError::LengthMismatch {
        encoding,
        expected: N,
        actual: bytes.len(),
    })
}

pub fn decode_uint16(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

pub fn decode_float32(bytes: [u8; 4]) -> f32 {
    f32::from_bits(u32::from_be_bytes(bytes))
}

pub fn decode_int64(bytes: [u8; 8]) -> i64 {
    u64::from_be_bytes(bytes) as i64
}

/// Flatten register words into the big-endian byte stream a device sends.
pub fn words_to_bytes(words: &[Word]) -> Vec<u8> {
    words.iter().copied().flat_map(u16::to_be_bytes).collect()
}
