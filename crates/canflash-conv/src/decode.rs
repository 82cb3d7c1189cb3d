//! Decoding raw bytes to physical values
//!
//! Converts ECU memory bytes (upload results or DAQ slices) to display strings.

use crate::error::{ConvError, ConvResult};
use crate::item::ItemDescriptor;
use crate::precision::format_physical;
use crate::types::{Conversion, DataType};

/// Decode raw bytes to a display string
pub fn decode(item: &ItemDescriptor, data: &[u8]) -> ConvResult<String> {
    match &item.conversion {
        Conversion::RatFunc(coeffs) => {
            if !coeffs.is_linear() {
                return Err(unsupported_coefficients(item));
            }
            let raw = read_raw_value(item, data)?;
            let physical = (raw - coeffs.c) / coeffs.b;
            Ok(format_physical(
                physical,
                item.format.as_ref(),
                coeffs.scale(),
                item.data_type.is_float(),
            ))
        }
        Conversion::TabVerb(entries) => {
            let raw = read_raw_value(item, data)?;
            entries
                .iter()
                .find(|entry| entry.raw as f64 == raw)
                .map(|entry| entry.label.clone())
                .ok_or_else(|| ConvError::TableValueNotFound {
                    item: item.name.clone(),
                    raw,
                })
        }
        Conversion::Other(method) => Err(ConvError::UnsupportedConversion {
            item: item.name.clone(),
            reason: format!("conversion method {} is not supported", method),
        }),
    }
}

/// Decode to a number, for callers that need the physical value itself
pub fn decode_physical(item: &ItemDescriptor, data: &[u8]) -> ConvResult<f64> {
    match &item.conversion {
        Conversion::RatFunc(coeffs) if coeffs.is_linear() => {
            let raw = read_raw_value(item, data)?;
            Ok((raw - coeffs.c) / coeffs.b)
        }
        Conversion::RatFunc(_) => Err(unsupported_coefficients(item)),
        other => Err(ConvError::UnsupportedConversion {
            item: item.name.clone(),
            reason: format!("{} has no numeric physical value", other.method_name()),
        }),
    }
}

pub(crate) fn unsupported_coefficients(item: &ItemDescriptor) -> ConvError {
    ConvError::UnsupportedConversion {
        item: item.name.clone(),
        reason: "only linear RAT_FUNC coefficients (A, D, E = 0, F = 1) are supported"
            .to_string(),
    }
}

/// Read the big-endian raw value of the item's data type
pub fn read_raw_value(item: &ItemDescriptor, data: &[u8]) -> ConvResult<f64> {
    let size = item.data_type.byte_size();
    if data.len() < size {
        return Err(ConvError::DataTooShort {
            item: item.name.clone(),
            expected: size,
            actual: data.len(),
        });
    }

    let raw = match item.data_type {
        DataType::Ubyte => data[0] as f64,
        DataType::Sbyte => data[0] as i8 as f64,
        DataType::Uword => u16::from_be_bytes([data[0], data[1]]) as f64,
        DataType::Sword => i16::from_be_bytes([data[0], data[1]]) as f64,
        DataType::Ulong => u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as f64,
        DataType::Slong => i32::from_be_bytes([data[0], data[1], data[2], data[3]]) as f64,
        DataType::Float32Ieee => f32::from_be_bytes([data[0], data[1], data[2], data[3]]) as f64,
    };
    Ok(raw)
}
