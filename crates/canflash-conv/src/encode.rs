//! Encoding physical values to raw bytes
//!
//! Inverse of [`crate::decode`]: converts a user-entered display string into the
//! bytes written to ECU memory.

use crate::decode::unsupported_coefficients;
use crate::error::{ConvError, ConvResult};
use crate::item::ItemDescriptor;
use crate::types::{Conversion, DataType};

/// Tolerance applied to the limit check
pub const LIMIT_TOLERANCE: f64 = 1e-6;

/// Encode a physical value, checking it against explicit limits
pub fn encode(
    item: &ItemDescriptor,
    physical: &str,
    lower_limit: f64,
    upper_limit: f64,
) -> ConvResult<Vec<u8>> {
    match &item.conversion {
        Conversion::TabVerb(entries) => {
            let label = physical.trim();
            let entry = entries
                .iter()
                .find(|entry| entry.label == label)
                .ok_or_else(|| ConvError::TableLabelNotFound {
                    item: item.name.clone(),
                    label: label.to_string(),
                })?;
            write_raw_value(item, entry.raw as f64)
        }
        Conversion::RatFunc(coeffs) => {
            if !coeffs.is_linear() {
                return Err(unsupported_coefficients(item));
            }
            let value: f64 =
                physical
                    .trim()
                    .parse()
                    .map_err(|_| ConvError::InvalidNumber {
                        item: item.name.clone(),
                        value: physical.to_string(),
                    })?;

            if value < lower_limit - LIMIT_TOLERANCE || value > upper_limit + LIMIT_TOLERANCE {
                return Err(ConvError::OutOfRange {
                    item: item.name.clone(),
                    value,
                    lower: lower_limit,
                    upper: upper_limit,
                });
            }

            let raw = value * coeffs.b + coeffs.c;
            write_raw_value(item, raw)
        }
        Conversion::Other(method) => Err(ConvError::UnsupportedConversion {
            item: item.name.clone(),
            reason: format!("conversion method {} is not supported", method),
        }),
    }
}

/// Encode a physical value against the item's own limits
pub fn encode_within_limits(item: &ItemDescriptor, physical: &str) -> ConvResult<Vec<u8>> {
    encode(item, physical, item.lower_limit, item.upper_limit)
}

/// Write a raw value as big-endian bytes of the item's data type
pub fn write_raw_value(item: &ItemDescriptor, raw: f64) -> ConvResult<Vec<u8>> {
    let data_type = item.data_type;
    if data_type.is_float() {
        let (min, max) = data_type.raw_range();
        if !raw.is_finite() || raw < min || raw > max {
            return Err(raw_out_of_range(item, raw));
        }
        return Ok((raw as f32).to_be_bytes().to_vec());
    }

    let raw = raw.round();
    let (min, max) = data_type.raw_range();
    if !raw.is_finite() || raw < min || raw > max {
        return Err(raw_out_of_range(item, raw));
    }

    let bytes = match data_type {
        DataType::Ubyte => vec![raw as u8],
        DataType::Sbyte => vec![raw as i8 as u8],
        DataType::Uword => (raw as u16).to_be_bytes().to_vec(),
        DataType::Sword => (raw as i16).to_be_bytes().to_vec(),
        DataType::Ulong => (raw as u32).to_be_bytes().to_vec(),
        DataType::Slong => (raw as i32).to_be_bytes().to_vec(),
        DataType::Float32Ieee => (raw as f32).to_be_bytes().to_vec(),
    };
    Ok(bytes)
}

fn raw_out_of_range(item: &ItemDescriptor, raw: f64) -> ConvError {
    ConvError::RawOutOfRange {
        item: item.name.clone(),
        raw,
        data_type: item.data_type.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{decode, decode_physical};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(DataType::Ubyte, 0.5, 0.0, 0.0, 127.5)]
    #[case(DataType::Sbyte, 1.0, 0.0, -128.0, 127.0)]
    #[case(DataType::Uword, 10.0, 400.0, -40.0, 215.0)]
    #[case(DataType::Sword, 100.0, 0.0, -300.0, 300.0)]
    #[case(DataType::Ulong, 1.0, 0.0, 0.0, 4_000_000_000.0)]
    #[case(DataType::Slong, 4.0, -8.0, -1000.0, 1000.0)]
    #[case(DataType::Float32Ieee, 1.0, 0.0, -50.0, 50.0)]
    fn test_round_trip_within_limits(
        #[case] data_type: DataType,
        #[case] b: f64,
        #[case] c: f64,
        #[case] lower: f64,
        #[case] upper: f64,
    ) {
        let item = ItemDescriptor::linear("v", data_type, 0, b, c);
        let resolution = 1.0 / b;
        for step in 0..=10 {
            let value = lower + (upper - lower) * step as f64 / 10.0;
            let bytes = encode(&item, &value.to_string(), lower, upper).unwrap();
            assert_eq!(bytes.len(), data_type.byte_size());
            let decoded = decode_physical(&item, &bytes).unwrap();
            let tolerance = if data_type.is_float() {
                value.abs() * 1e-6 + 1e-6
            } else {
                resolution / 2.0 + 1e-9
            };
            assert!(
                (decoded - value).abs() <= tolerance,
                "{:?}: {} decoded as {}",
                data_type,
                value,
                decoded
            );
        }
    }

    #[test]
    fn test_encode_rejects_out_of_limits() {
        let item = ItemDescriptor::linear("t", DataType::Uword, 0, 10.0, 400.0);
        assert!(encode(&item, "215.0000005", -40.0, 215.0).is_ok());
        let err = encode(&item, "215.01", -40.0, 215.0).unwrap_err();
        assert!(matches!(err, ConvError::OutOfRange { .. }));
        assert!(err.to_string().contains("[-40, 215]"));
        assert!(encode(&item, "-40.1", -40.0, 215.0).is_err());
    }

    #[test]
    fn test_encode_raw_overflow() {
        let item = ItemDescriptor::new("b", DataType::Ubyte, 0);
        assert!(matches!(
            encode(&item, "256", 0.0, 1000.0),
            Err(ConvError::RawOutOfRange { .. })
        ));
    }

    #[test]
    fn test_encode_not_a_number() {
        let item = ItemDescriptor::new("b", DataType::Ubyte, 0);
        assert!(matches!(
            encode(&item, "abc", 0.0, 10.0),
            Err(ConvError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn test_encode_table() {
        let item = ItemDescriptor::table("mode", DataType::Uword, 0, [(0, "OFF"), (258, "ON")]);
        let bytes = encode(&item, "ON", 0.0, 0.0).unwrap();
        assert_eq!(bytes, vec![0x01, 0x02]);
        assert_eq!(decode(&item, &bytes).unwrap(), "ON");
        assert!(matches!(
            encode(&item, "AUTO", 0.0, 0.0),
            Err(ConvError::TableLabelNotFound { .. })
        ));
    }

    #[test]
    fn test_encode_signed_big_endian() {
        let item = ItemDescriptor::new("s", DataType::Sword, 0);
        assert_eq!(encode(&item, "-2", -10.0, 10.0).unwrap(), vec![0xFF, 0xFE]);
    }

    #[test]
    fn test_encode_within_item_limits() {
        let item = ItemDescriptor::new("l", DataType::Ubyte, 0).with_limits(0.0, 100.0);
        assert_eq!(encode_within_limits(&item, "100").unwrap(), vec![100]);
        assert!(encode_within_limits(&item, "101").is_err());
    }
}
