//! Core types for value conversion
//!
//! Data types, conversion methods and display formats as they appear in an
//! A2L-style measurement/calibration description.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConvError;

/// Tolerance used when checking coefficients for the linear form
pub const COEFF_EPSILON: f64 = 1e-6;

/// Primitive data type of an ECU variable
///
/// Multi-byte values are big-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum DataType {
    Ubyte,
    Sbyte,
    Uword,
    Sword,
    Ulong,
    Slong,
    Float32Ieee,
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DataType::Ubyte => "UBYTE",
            DataType::Sbyte => "SBYTE",
            DataType::Uword => "UWORD",
            DataType::Sword => "SWORD",
            DataType::Ulong => "ULONG",
            DataType::Slong => "SLONG",
            DataType::Float32Ieee => "FLOAT32_IEEE",
        };
        f.write_str(s)
    }
}

impl FromStr for DataType {
    type Err = ConvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UBYTE" => Ok(DataType::Ubyte),
            "SBYTE" => Ok(DataType::Sbyte),
            "UWORD" => Ok(DataType::Uword),
            "SWORD" => Ok(DataType::Sword),
            "ULONG" => Ok(DataType::Ulong),
            "SLONG" => Ok(DataType::Slong),
            "FLOAT32_IEEE" => Ok(DataType::Float32Ieee),
            _ => Err(ConvError::UnsupportedDataType(s.to_string())),
        }
    }
}

impl TryFrom<String> for DataType {
    type Error = ConvError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl DataType {
    /// Byte width of one element
    pub fn byte_size(&self) -> usize {
        match self {
            DataType::Ubyte | DataType::Sbyte => 1,
            DataType::Uword | DataType::Sword => 2,
            DataType::Ulong | DataType::Slong | DataType::Float32Ieee => 4,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, DataType::Sbyte | DataType::Sword | DataType::Slong)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32Ieee)
    }

    /// Inclusive raw range representable by this type
    pub fn raw_range(&self) -> (f64, f64) {
        match self {
            DataType::Ubyte => (u8::MIN as f64, u8::MAX as f64),
            DataType::Sbyte => (i8::MIN as f64, i8::MAX as f64),
            DataType::Uword => (u16::MIN as f64, u16::MAX as f64),
            DataType::Sword => (i16::MIN as f64, i16::MAX as f64),
            DataType::Ulong => (u32::MIN as f64, u32::MAX as f64),
            DataType::Slong => (i32::MIN as f64, i32::MAX as f64),
            DataType::Float32Ieee => (f32::MIN as f64, f32::MAX as f64),
        }
    }
}

/// RAT_FUNC coefficients: `raw = (A·x² + B·x + C) / (D·x² + E·x + F)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coefficients {
    #[serde(default)]
    pub a: f64,
    #[serde(default = "default_one")]
    pub b: f64,
    #[serde(default)]
    pub c: f64,
    #[serde(default)]
    pub d: f64,
    #[serde(default)]
    pub e: f64,
    #[serde(default = "default_one")]
    pub f: f64,
}

fn default_one() -> f64 {
    1.0
}

impl Default for Coefficients {
    fn default() -> Self {
        Self::identity()
    }
}

impl Coefficients {
    /// `raw = x`
    pub fn identity() -> Self {
        Self::linear(1.0, 0.0)
    }

    /// `raw = b·x + c`
    pub fn linear(b: f64, c: f64) -> Self {
        Self {
            a: 0.0,
            b,
            c,
            d: 0.0,
            e: 0.0,
            f: 1.0,
        }
    }

    /// True for the degenerate form `raw = B·x + C` (A, D, E ≈ 0, F ≈ 1, B ≠ 0).
    ///
    /// Only this form is supported; true rational functions are rejected.
    pub fn is_linear(&self) -> bool {
        self.a.abs() < COEFF_EPSILON
            && self.d.abs() < COEFF_EPSILON
            && self.e.abs() < COEFF_EPSILON
            && (self.f - 1.0).abs() < COEFF_EPSILON
            && self.b.abs() >= COEFF_EPSILON
    }

    /// Physical resolution of one raw count
    pub fn scale(&self) -> f64 {
        1.0 / self.b
    }
}

/// One row of a TAB_VERB table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub raw: i64,
    pub label: String,
}

/// Conversion method from raw to physical
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conversion {
    /// Rational function, only the linear form is supported
    RatFunc(Coefficients),
    /// Verbal table lookup
    TabVerb(Vec<TableEntry>),
    /// Any other A2L method (TAB_INTP, FORM, ...), always rejected
    Other(String),
}

impl Default for Conversion {
    fn default() -> Self {
        Conversion::RatFunc(Coefficients::identity())
    }
}

impl Conversion {
    pub fn method_name(&self) -> &str {
        match self {
            Conversion::RatFunc(_) => "RAT_FUNC",
            Conversion::TabVerb(_) => "TAB_VERB",
            Conversion::Other(name) => name,
        }
    }

    pub fn coefficients(&self) -> Option<&Coefficients> {
        match self {
            Conversion::RatFunc(c) => Some(c),
            _ => None,
        }
    }
}

/// Display format from an A2L `%<integer>.<fraction>` string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DisplayFormat {
    /// Total field width
    pub integer_digits: u8,
    pub fraction_digits: u8,
}

impl FromStr for DisplayFormat {
    type Err = ConvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.trim().trim_start_matches('%');
        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, "0"));
        let integer_digits = int_part
            .parse()
            .map_err(|_| ConvError::InvalidFormat(s.to_string()))?;
        let fraction_digits = frac_part
            .parse()
            .map_err(|_| ConvError::InvalidFormat(s.to_string()))?;
        Ok(Self {
            integer_digits,
            fraction_digits,
        })
    }
}

impl TryFrom<String> for DisplayFormat {
    type Error = ConvError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DisplayFormat> for String {
    fn from(format: DisplayFormat) -> Self {
        format!("%{}.{}", format.integer_digits, format.fraction_digits)
    }
}
