//! Lossless numeric conversion.
//!
//! One rule set shared by the `get_*` accessors, schema type adjustment and
//! string parsing:
//! - integer widening always succeeds;
//! - integer narrowing succeeds iff the value fits the destination range;
//! - integer → float succeeds iff the float round-trips to the same integer;
//! - float → integer succeeds iff the fractional part is zero and the value
//!   fits the destination range;
//! - `float32 → float64` always succeeds, the reverse iff `|x| ≤ f32::MAX`.

use crate::error::Error;
use crate::value::{Value, ValueType};

/// Canonical widened view of a numeric value.
enum Num {
    Int(i64),
    Uint(u64),
    Float(f64),
    /// Kept separate from `Float` so that f32 → f64 widening is exact and
    /// f32 → f32 identity never re-checks anything.
    Float32(f32),
}

fn as_num(value: &Value) -> Option<Num> {
    match *value {
        Value::Int8(v) => Some(Num::Int(v as i64)),
        Value::Int16(v) => Some(Num::Int(v as i64)),
        Value::Int32(v) => Some(Num::Int(v as i64)),
        Value::Int64(v) => Some(Num::Int(v)),
        Value::Uint8(v) => Some(Num::Uint(v as u64)),
        Value::Uint16(v) => Some(Num::Uint(v as u64)),
        Value::Uint32(v) => Some(Num::Uint(v as u64)),
        Value::Uint64(v) => Some(Num::Uint(v)),
        Value::Float32(v) => Some(Num::Float32(v)),
        Value::Float64(v) => Some(Num::Float(v)),
        _ => None,
    }
}

fn out_of_range(value: &Value, target: ValueType) -> Error {
    Error::invalid_argument(format!(
        "value out of range converting [{}] to [{}]",
        value.value_type(),
        target
    ))
}

fn unsupported(value: &Value, target: ValueType) -> Error {
    Error::unsupported_conversion(format!(
        "unsupported conversion from [{}] to [{}]",
        value.value_type(),
        target
    ))
}

/// Widened integer view, or an error when the numeric value carries a
/// fractional part or falls outside i128 (never happens for f64 with zero
/// fraction below 2^127).
fn to_i128(num: &Num) -> Option<i128> {
    match *num {
        Num::Int(v) => Some(v as i128),
        Num::Uint(v) => Some(v as i128),
        Num::Float(f) => {
            if f.is_finite() && f.fract() == 0.0 && f.abs() < (i128::MAX as f64) {
                Some(f as i128)
            } else {
                None
            }
        }
        Num::Float32(f) => to_i128(&Num::Float(f as f64)),
    }
}

fn int_in_range(v: i128, target: ValueType) -> bool {
    match target {
        ValueType::Int8 => v >= i8::MIN as i128 && v <= i8::MAX as i128,
        ValueType::Int16 => v >= i16::MIN as i128 && v <= i16::MAX as i128,
        ValueType::Int32 => v >= i32::MIN as i128 && v <= i32::MAX as i128,
        ValueType::Int64 => v >= i64::MIN as i128 && v <= i64::MAX as i128,
        ValueType::Uint8 => v >= 0 && v <= u8::MAX as i128,
        ValueType::Uint16 => v >= 0 && v <= u16::MAX as i128,
        ValueType::Uint32 => v >= 0 && v <= u32::MAX as i128,
        ValueType::Uint64 => v >= 0 && v <= u64::MAX as i128,
        _ => false,
    }
}

fn int_value(v: i128, target: ValueType) -> Value {
    match target {
        ValueType::Int8 => Value::Int8(v as i8),
        ValueType::Int16 => Value::Int16(v as i16),
        ValueType::Int32 => Value::Int32(v as i32),
        ValueType::Int64 => Value::Int64(v as i64),
        ValueType::Uint8 => Value::Uint8(v as u8),
        ValueType::Uint16 => Value::Uint16(v as u16),
        ValueType::Uint32 => Value::Uint32(v as u32),
        ValueType::Uint64 => Value::Uint64(v as u64),
        _ => unreachable!("int_value called with non-integer target"),
    }
}

/// Convert a numeric `value` to the numeric `target` tag without loss.
///
/// Fails with `UnsupportedTypeConversion` when `value` is non-numeric and
/// with `InvalidArgument` when the conversion would overflow or truncate.
pub fn convert_numeric(value: &Value, target: ValueType) -> Result<Value, Error> {
    if value.value_type() == target {
        return Ok(value.clone());
    }

    let num = as_num(value).ok_or_else(|| unsupported(value, target))?;

    match target {
        ValueType::Int8
        | ValueType::Int16
        | ValueType::Int32
        | ValueType::Int64
        | ValueType::Uint8
        | ValueType::Uint16
        | ValueType::Uint32
        | ValueType::Uint64 => {
            let wide = to_i128(&num).ok_or_else(|| out_of_range(value, target))?;
            if !int_in_range(wide, target) {
                return Err(out_of_range(value, target));
            }
            Ok(int_value(wide, target))
        }

        ValueType::Float32 => match num {
            Num::Float32(f) => Ok(Value::Float32(f)),
            Num::Float(f) => {
                if f.is_finite() && f.abs() > f32::MAX as f64 {
                    Err(out_of_range(value, target))
                } else {
                    Ok(Value::Float32(f as f32))
                }
            }
            // Round-trip through i128: a saturating cast back to the
            // source type would wrongly accept values near its maximum.
            Num::Int(v) => {
                let f = v as f32;
                if f.is_finite() && (f as f64) as i128 == v as i128 {
                    Ok(Value::Float32(f))
                } else {
                    Err(out_of_range(value, target))
                }
            }
            Num::Uint(v) => {
                let f = v as f32;
                if f.is_finite() && (f as f64) as i128 == v as i128 {
                    Ok(Value::Float32(f))
                } else {
                    Err(out_of_range(value, target))
                }
            }
        },

        ValueType::Float64 => match num {
            Num::Float32(f) => Ok(Value::Float64(f as f64)),
            Num::Float(f) => Ok(Value::Float64(f)),
            Num::Int(v) => {
                let f = v as f64;
                if f as i128 == v as i128 {
                    Ok(Value::Float64(f))
                } else {
                    Err(out_of_range(value, target))
                }
            }
            Num::Uint(v) => {
                let f = v as f64;
                if f as i128 == v as i128 {
                    Ok(Value::Float64(f))
                } else {
                    Err(out_of_range(value, target))
                }
            }
        },

        _ => Err(unsupported(value, target)),
    }
}

macro_rules! numeric_getter {
    ($fn_name:ident, $ty:ty, $target:expr, $variant:path) => {
        /// Coerce the numeric value losslessly. Non-numeric tags fail with
        /// `UnsupportedTypeConversion`; out-of-range with `InvalidArgument`.
        pub fn $fn_name(&self) -> Result<$ty, Error> {
            match convert_numeric(self, $target)? {
                $variant(v) => Ok(v),
                _ => unreachable!(),
            }
        }
    };
}

impl Value {
    numeric_getter!(get_int8, i8, ValueType::Int8, Value::Int8);
    numeric_getter!(get_int16, i16, ValueType::Int16, Value::Int16);
    numeric_getter!(get_int32, i32, ValueType::Int32, Value::Int32);
    numeric_getter!(get_int64, i64, ValueType::Int64, Value::Int64);
    numeric_getter!(get_uint8, u8, ValueType::Uint8, Value::Uint8);
    numeric_getter!(get_uint16, u16, ValueType::Uint16, Value::Uint16);
    numeric_getter!(get_uint32, u32, ValueType::Uint32, Value::Uint32);
    numeric_getter!(get_uint64, u64, ValueType::Uint64, Value::Uint64);
    numeric_getter!(get_float32, f32, ValueType::Float32, Value::Float32);
    numeric_getter!(get_float64, f64, ValueType::Float64, Value::Float64);

    /// Convert this value in place so its tag becomes `target`, using the
    /// lossless numeric rules. Identity when the tag already matches.
    pub fn convert_to(&mut self, target: ValueType) -> Result<(), Error> {
        if self.value_type() == target {
            return Ok(());
        }
        *self = convert_numeric(self, target)?;
        Ok(())
    }

    /// Parse `text` under the `target` tag.
    ///
    /// Numeric tags parse as i64/u64/f64 and then convert via the lossless
    /// rules; `bool` accepts exactly `true`/`false`; `string` is identity;
    /// `null` accepts `null` or the empty string.
    pub fn from_type_and_string(target: ValueType, text: &str) -> Result<Value, Error> {
        match target {
            ValueType::String => Ok(Value::String(text.to_string())),

            ValueType::Bool => match text {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(Error::invalid_argument(format!(
                    "invalid bool literal '{text}'"
                ))),
            },

            ValueType::Null => {
                if text.is_empty() || text == "null" {
                    Ok(Value::Null)
                } else {
                    Err(Error::invalid_argument(format!(
                        "invalid null literal '{text}'"
                    )))
                }
            }

            t if t.is_number() => {
                let parsed = if let Ok(v) = text.parse::<i64>() {
                    Value::Int64(v)
                } else if let Ok(v) = text.parse::<u64>() {
                    Value::Uint64(v)
                } else if let Ok(v) = text.parse::<f64>() {
                    Value::Float64(v)
                } else {
                    return Err(Error::invalid_argument(format!(
                        "invalid numeric literal '{text}'"
                    )));
                };
                convert_numeric(&parsed, target)
            }

            t => Err(Error::unsupported_conversion(format!(
                "cannot parse a [{t}] from a string"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn widening_always_succeeds() {
        assert_eq!(Value::Int8(-5).get_int64().unwrap(), -5);
        assert_eq!(Value::Uint8(7).get_uint64().unwrap(), 7);
        assert_eq!(Value::Uint16(300).get_int32().unwrap(), 300);
        assert_eq!(Value::Float32(1.5).get_float64().unwrap(), 1.5);
    }

    #[test]
    fn narrowing_checks_range() {
        assert_eq!(Value::Int32(127).get_int8().unwrap(), 127);

        let err = Value::Int32(300).get_uint8().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        let err = Value::Int32(-1).get_uint32().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        let err = Value::Uint64(u64::MAX).get_int64().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn non_numeric_source_is_unsupported() {
        let err = Value::from("12").get_int32().unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedTypeConversion);

        let err = Value::Null.get_float64().unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedTypeConversion);
    }

    #[test]
    fn int_to_float_requires_exact_representation() {
        // 2^24 + 1 is the first integer f32 cannot represent.
        assert!(Value::Int32((1 << 24) + 1).get_float32().is_err());
        assert_eq!(Value::Int32(1 << 24).get_float32().unwrap(), 16_777_216.0);

        // 2^53 + 1 is the first integer f64 cannot represent.
        assert!(Value::Int64((1i64 << 53) + 1).get_float64().is_err());
        assert_eq!(
            Value::Int64(1i64 << 53).get_float64().unwrap(),
            9_007_199_254_740_992.0
        );
    }

    #[test]
    fn int_type_maxima_are_not_float_representable() {
        // These round to 2^63 / 2^64 in floating point; a saturating cast
        // back would hide the loss.
        assert!(Value::Int64(i64::MAX).get_float64().is_err());
        assert!(Value::Int64(i64::MAX).get_float32().is_err());
        assert!(Value::Uint64(u64::MAX).get_float64().is_err());
    }

    #[test]
    fn float_to_int_requires_zero_fraction() {
        assert_eq!(Value::Float64(42.0).get_int16().unwrap(), 42);
        assert!(Value::Float64(42.5).get_int64().is_err());
        assert!(Value::Float64(1e300).get_int64().is_err());
    }

    #[test]
    fn float_narrowing_checks_magnitude() {
        assert!(Value::Float64(1e300).get_float32().is_err());
        assert_eq!(Value::Float64(0.5).get_float32().unwrap(), 0.5);
    }

    #[test]
    fn conversion_soundness_round_trip() {
        // get_<T>(create_<U>(x)) succeeds iff x fits T, and equals x.
        for x in [0i64, 1, 127, 128, 255, 256, 65_535, 65_536, -1, -128, -129] {
            let v = Value::Int64(x);
            match v.get_int8() {
                Ok(got) => {
                    assert!(x >= i8::MIN as i64 && x <= i8::MAX as i64);
                    assert_eq!(got as i64, x);
                }
                Err(_) => assert!(x < i8::MIN as i64 || x > i8::MAX as i64),
            }
            match v.get_uint16() {
                Ok(got) => {
                    assert!(x >= 0 && x <= u16::MAX as i64);
                    assert_eq!(got as i64, x);
                }
                Err(_) => assert!(x < 0 || x > u16::MAX as i64),
            }
        }
    }

    #[test]
    fn parse_from_string() {
        assert_eq!(
            Value::from_type_and_string(ValueType::Int16, "300").unwrap(),
            Value::Int16(300)
        );
        assert_eq!(
            Value::from_type_and_string(ValueType::Uint64, "18446744073709551615").unwrap(),
            Value::Uint64(u64::MAX)
        );
        assert_eq!(
            Value::from_type_and_string(ValueType::Float64, "2.25").unwrap(),
            Value::Float64(2.25)
        );
        assert_eq!(
            Value::from_type_and_string(ValueType::Bool, "true").unwrap(),
            Value::Bool(true)
        );
        assert!(Value::from_type_and_string(ValueType::Bool, "TRUE").is_err());
        assert!(Value::from_type_and_string(ValueType::Uint8, "300").is_err());
        assert!(Value::from_type_and_string(ValueType::Object, "{}").is_err());
    }
}
