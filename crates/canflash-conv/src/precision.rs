//! Floating point precision handling
//!
//! Avoids ugly values like 13.000000001 by rounding to the resolution of the
//! conversion, or to the item's declared display format.

use crate::types::DisplayFormat;

/// Determine appropriate decimal places from the physical resolution
///
/// # Examples
/// - scale 1.0 → 0 decimal places (integers)
/// - scale 0.1 → 1 decimal place
/// - scale 0.25 → 2 decimal places (1/4 needs 2 places)
pub fn precision_from_scale(scale: f64) -> u8 {
    let abs_scale = scale.abs();
    if abs_scale == 0.0 || !abs_scale.is_finite() {
        return 4;
    }
    if abs_scale >= 1.0 && (abs_scale - abs_scale.round()).abs() < 1e-9 {
        return 0;
    }

    // Scale by 10 until we get an integer (or close enough)
    let mut temp = abs_scale;
    let mut precision = 0u8;
    while precision < 6 {
        if (temp - temp.round()).abs() < 1e-9 {
            break;
        }
        temp *= 10.0;
        precision += 1;
    }

    precision
}

/// Round a value to the specified number of decimal places
pub fn round_to_precision(value: f64, precision: u8) -> f64 {
    if precision == 0 {
        value.round()
    } else {
        let factor = 10_f64.powi(precision as i32);
        (value * factor).round() / factor
    }
}

/// Format a physical value for display.
///
/// An explicit display format wins; otherwise integer-backed values are
/// rounded to the resolution of one raw count and floats keep up to six
/// decimals with trailing zeros dropped.
pub fn format_physical(
    value: f64,
    format: Option<&DisplayFormat>,
    scale: f64,
    is_float: bool,
) -> String {
    if let Some(format) = format {
        return format!("{:.*}", format.fraction_digits as usize, value);
    }

    let precision = if is_float {
        6
    } else {
        precision_from_scale(scale)
    };
    let rounded = round_to_precision(value, precision);
    if rounded == 0.0 {
        // avoid "-0"
        return "0".to_string();
    }
    let text = format!("{:.*}", precision as usize, rounded);
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}
