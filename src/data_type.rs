//! Scalar data types stored in particle channels.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The scalar type of every component of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 8-bit integer.
    UInt8,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Unsigned 64-bit integer.
    UInt64,
    /// IEEE binary16, converted through f32 on access.
    Float16,
    /// IEEE binary32.
    Float32,
    /// IEEE binary64.
    Float64,
}

impl DataType {
    /// Every supported data type, in declaration order.
    pub const ALL: [DataType; 11] = [
        DataType::Int8,
        DataType::Int16,
        DataType::Int32,
        DataType::Int64,
        DataType::UInt8,
        DataType::UInt16,
        DataType::UInt32,
        DataType::UInt64,
        DataType::Float16,
        DataType::Float32,
        DataType::Float64,
    ];

    /// Size of one scalar in bytes. Also its natural alignment.
    pub fn size(self) -> usize {
        match self {
            DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 | DataType::Float16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::Float16 | DataType::Float32 | DataType::Float64)
    }

    pub fn is_signed(self) -> bool {
        !matches!(
            self,
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64
        )
    }

    /// Canonical lowercase name, e.g. `"float32"`.
    pub fn name(self) -> &'static str {
        match self {
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Float16 => "float16",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        }
    }

    /// Reads one scalar from the front of `bytes` as f64.
    ///
    /// 64-bit integers beyond 2^53 lose precision; use [`DataType::read_i64`]
    /// where exact integer values matter.
    pub fn read_f64(self, bytes: &[u8]) -> f64 {
        let n = self.size();
        let b = &bytes[..n];
        match self {
            DataType::Int8 => bytemuck::pod_read_unaligned::<i8>(b) as f64,
            DataType::Int16 => bytemuck::pod_read_unaligned::<i16>(b) as f64,
            DataType::Int32 => bytemuck::pod_read_unaligned::<i32>(b) as f64,
            DataType::Int64 => bytemuck::pod_read_unaligned::<i64>(b) as f64,
            DataType::UInt8 => bytemuck::pod_read_unaligned::<u8>(b) as f64,
            DataType::UInt16 => bytemuck::pod_read_unaligned::<u16>(b) as f64,
            DataType::UInt32 => bytemuck::pod_read_unaligned::<u32>(b) as f64,
            DataType::UInt64 => bytemuck::pod_read_unaligned::<u64>(b) as f64,
            DataType::Float16 => f16_to_f32(bytemuck::pod_read_unaligned::<u16>(b)) as f64,
            DataType::Float32 => bytemuck::pod_read_unaligned::<f32>(b) as f64,
            DataType::Float64 => bytemuck::pod_read_unaligned::<f64>(b),
        }
    }

    /// Reads one scalar as i64. Floats truncate toward zero (saturating, NaN is 0).
    pub fn read_i64(self, bytes: &[u8]) -> i64 {
        let n = self.size();
        let b = &bytes[..n];
        match self {
            DataType::Int8 => bytemuck::pod_read_unaligned::<i8>(b) as i64,
            DataType::Int16 => bytemuck::pod_read_unaligned::<i16>(b) as i64,
            DataType::Int32 => bytemuck::pod_read_unaligned::<i32>(b) as i64,
            DataType::Int64 => bytemuck::pod_read_unaligned::<i64>(b),
            DataType::UInt8 => bytemuck::pod_read_unaligned::<u8>(b) as i64,
            DataType::UInt16 => bytemuck::pod_read_unaligned::<u16>(b) as i64,
            DataType::UInt32 => bytemuck::pod_read_unaligned::<u32>(b) as i64,
            DataType::UInt64 => bytemuck::pod_read_unaligned::<u64>(b) as i64,
            DataType::Float16 | DataType::Float32 | DataType::Float64 => {
                self.read_f64(bytes) as i64
            }
        }
    }

    /// Writes `value` into the front of `bytes`, converting to this type.
    ///
    /// Integer targets use Rust's saturating float-to-int cast.
    pub fn write_f64(self, bytes: &mut [u8], value: f64) {
        let n = self.size();
        let b = &mut bytes[..n];
        match self {
            DataType::Int8 => b.copy_from_slice(bytemuck::bytes_of(&(value as i8))),
            DataType::Int16 => b.copy_from_slice(bytemuck::bytes_of(&(value as i16))),
            DataType::Int32 => b.copy_from_slice(bytemuck::bytes_of(&(value as i32))),
            DataType::Int64 => b.copy_from_slice(bytemuck::bytes_of(&(value as i64))),
            DataType::UInt8 => b.copy_from_slice(bytemuck::bytes_of(&(value as u8))),
            DataType::UInt16 => b.copy_from_slice(bytemuck::bytes_of(&(value as u16))),
            DataType::UInt32 => b.copy_from_slice(bytemuck::bytes_of(&(value as u32))),
            DataType::UInt64 => b.copy_from_slice(bytemuck::bytes_of(&(value as u64))),
            DataType::Float16 => {
                b.copy_from_slice(bytemuck::bytes_of(&f32_to_f16(value as f32)))
            }
            DataType::Float32 => b.copy_from_slice(bytemuck::bytes_of(&(value as f32))),
            DataType::Float64 => b.copy_from_slice(bytemuck::bytes_of(&value)),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a data type name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown data type \"{0}\"")]
pub struct UnknownDataType(pub String);

impl FromStr for DataType {
    type Err = UnknownDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let found = match lower.as_str() {
            // Host scripts spell the common ones without a width.
            "float" => Some(DataType::Float32),
            "int" | "integer" => Some(DataType::Int32),
            "double" => Some(DataType::Float64),
            "half" => Some(DataType::Float16),
            _ => DataType::ALL.iter().copied().find(|t| t.name() == lower),
        };
        found.ok_or_else(|| UnknownDataType(s.to_string()))
    }
}

/// Decodes IEEE binary16 bits.
pub fn f16_to_f32(half: u16) -> f32 {
    let sign = ((half & 0x8000) as u32) << 16;
    let exp = ((half >> 10) & 0x1f) as u32;
    let mant = (half & 0x3ff) as u32;

    let bits = if exp == 0 {
        if mant == 0 {
            sign
        } else {
            // Subnormal: shift the mantissa up until the implicit bit appears.
            let mut e: u32 = 127 - 15 + 1;
            let mut m = mant;
            while m & 0x400 == 0 {
                m <<= 1;
                e -= 1;
            }
            sign | (e << 23) | ((m & 0x3ff) << 13)
        }
    } else if exp == 0x1f {
        sign | 0x7f80_0000 | (mant << 13)
    } else {
        sign | ((exp + 127 - 15) << 23) | (mant << 13)
    };
    f32::from_bits(bits)
}

/// Encodes an f32 as IEEE binary16 bits, rounding to nearest even.
pub fn f32_to_f16(value: f32) -> u16 {
    let x = value.to_bits();
    let sign = ((x >> 16) & 0x8000) as u16;
    let exp = ((x >> 23) & 0xff) as i32;
    let mant = x & 0x007f_ffff;

    if exp == 0xff {
        let nan_bit = if mant != 0 { 0x200 } else { 0 };
        return sign | 0x7c00 | nan_bit;
    }

    let e = exp - 127 + 15;
    if e >= 0x1f {
        return sign | 0x7c00;
    }
    if e <= 0 {
        if e < -10 {
            return sign;
        }
        let m = mant | 0x0080_0000;
        let shift = (14 - e) as u32;
        let mut r = m >> shift;
        let rem = m & ((1 << shift) - 1);
        let halfway = 1 << (shift - 1);
        if rem > halfway || (rem == halfway && r & 1 == 1) {
            r += 1;
        }
        return sign | r as u16;
    }

    let mut r = ((e as u32) << 10) | (mant >> 13);
    let rem = mant & 0x1fff;
    if rem > 0x1000 || (rem == 0x1000 && r & 1 == 1) {
        // A carry into the exponent is the correct rounding, up to infinity.
        r += 1;
    }
    sign | r as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_and_names() {
        assert_eq!(DataType::Float16.size(), 2);
        assert_eq!(DataType::UInt64.size(), 8);
        for t in DataType::ALL {
            assert_eq!(t.name().parse::<DataType>().unwrap(), t);
        }
        assert_eq!("float".parse::<DataType>().unwrap(), DataType::Float32);
        assert!("vector3".parse::<DataType>().is_err());
    }

    #[test]
    fn half_float_known_values() {
        assert_eq!(f32_to_f16(1.0), 0x3c00);
        assert_eq!(f32_to_f16(-2.0), 0xc000);
        assert_eq!(f32_to_f16(65504.0), 0x7bff);
        assert_eq!(f32_to_f16(1.0e6), 0x7c00);
        assert_eq!(f16_to_f32(0x3555), 0.333_251_95);
        assert_eq!(f16_to_f32(0x0001), 2.0f32.powi(-24));
        assert!(f16_to_f32(f32_to_f16(f32::NAN)).is_nan());
    }

    #[test]
    fn write_then_read_converts() {
        let mut buf = [0u8; 8];
        DataType::Int16.write_f64(&mut buf, -3.7);
        assert_eq!(DataType::Int16.read_f64(&buf), -3.0);
        DataType::UInt8.write_f64(&mut buf, 300.0);
        assert_eq!(DataType::UInt8.read_f64(&buf), 255.0);
        DataType::Float16.write_f64(&mut buf, 0.5);
        assert_eq!(DataType::Float16.read_f64(&buf), 0.5);
        DataType::Int64.write_f64(&mut buf, 42.0);
        assert_eq!(DataType::Int64.read_i64(&buf), 42);
    }
}
