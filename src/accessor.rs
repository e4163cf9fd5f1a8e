//! Typed and untyped views of one channel inside a record.

use crate::channel_map::{Channel, ChannelError, ChannelMap};
use crate::data_type::DataType;
use glam::{Vec2, Vec3, Vec4};
use std::marker::PhantomData;

/// A scalar that can live in a channel.
pub trait Scalar: bytemuck::Pod {
    const DATA_TYPE: DataType;
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_scalar {
    ($($t:ty => $dt:ident),* $(,)?) => {
        $(
            impl Scalar for $t {
                const DATA_TYPE: DataType = DataType::$dt;
                fn to_f64(self) -> f64 {
                    self as f64
                }
                fn from_f64(value: f64) -> Self {
                    value as $t
                }
            }
        )*
    };
}

impl_scalar!(
    i8 => Int8, i16 => Int16, i32 => Int32, i64 => Int64,
    u8 => UInt8, u16 => UInt16, u32 => UInt32, u64 => UInt64,
    f32 => Float32, f64 => Float64,
);

/// A value with a fixed number of scalar components.
pub trait ChannelValue: Copy {
    type Scalar: Scalar;
    const ARITY: usize;
    fn component(&self, i: usize) -> Self::Scalar;
    fn from_fn<F: FnMut(usize) -> Self::Scalar>(f: F) -> Self;
}

macro_rules! impl_scalar_value {
    ($($t:ty),*) => {
        $(
            impl ChannelValue for $t {
                type Scalar = $t;
                const ARITY: usize = 1;
                fn component(&self, _i: usize) -> $t {
                    *self
                }
                fn from_fn<F: FnMut(usize) -> $t>(mut f: F) -> Self {
                    f(0)
                }
            }
        )*
    };
}

impl_scalar_value!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl<S: Scalar, const N: usize> ChannelValue for [S; N] {
    type Scalar = S;
    const ARITY: usize = N;
    fn component(&self, i: usize) -> S {
        self[i]
    }
    fn from_fn<F: FnMut(usize) -> S>(f: F) -> Self {
        std::array::from_fn(f)
    }
}

impl ChannelValue for Vec2 {
    type Scalar = f32;
    const ARITY: usize = 2;
    fn component(&self, i: usize) -> f32 {
        self[i]
    }
    fn from_fn<F: FnMut(usize) -> f32>(mut f: F) -> Self {
        let x = f(0);
        Vec2::new(x, f(1))
    }
}

impl ChannelValue for Vec3 {
    type Scalar = f32;
    const ARITY: usize = 3;
    fn component(&self, i: usize) -> f32 {
        self[i]
    }
    fn from_fn<F: FnMut(usize) -> f32>(mut f: F) -> Self {
        let x = f(0);
        let y = f(1);
        Vec3::new(x, y, f(2))
    }
}

impl ChannelValue for Vec4 {
    type Scalar = f32;
    const ARITY: usize = 4;
    fn component(&self, i: usize) -> f32 {
        self[i]
    }
    fn from_fn<F: FnMut(usize) -> f32>(mut f: F) -> Self {
        let x = f(0);
        let y = f(1);
        let z = f(2);
        Vec4::new(x, y, z, f(3))
    }
}

fn mismatch(channel: &Channel, expected: DataType, expected_arity: usize) -> ChannelError {
    ChannelError::TypeMismatch {
        channel: channel.name().to_string(),
        expected,
        expected_arity,
        found: channel.data_type(),
        found_arity: channel.arity(),
    }
}

/// Reads and writes a channel whose stored type is exactly `T`.
#[derive(Debug, Clone, Copy)]
pub struct ChannelAccessor<T> {
    offset: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ChannelValue> ChannelAccessor<T> {
    pub fn get(&self, record: &[u8]) -> T {
        let size = std::mem::size_of::<T::Scalar>();
        T::from_fn(|i| {
            let start = self.offset + i * size;
            bytemuck::pod_read_unaligned(&record[start..start + size])
        })
    }

    pub fn set(&self, record: &mut [u8], value: T) {
        let size = std::mem::size_of::<T::Scalar>();
        for i in 0..T::ARITY {
            let start = self.offset + i * size;
            record[start..start + size].copy_from_slice(bytemuck::bytes_of(&value.component(i)));
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Reads and writes a channel of any scalar type as `T`, converting each
/// component through f64.
#[derive(Debug, Clone, Copy)]
pub struct ConvertAccessor<T> {
    offset: usize,
    data_type: DataType,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ChannelValue> ConvertAccessor<T> {
    pub fn get(&self, record: &[u8]) -> T {
        let size = self.data_type.size();
        T::from_fn(|i| {
            let value = self.data_type.read_f64(&record[self.offset + i * size..]);
            <T::Scalar as Scalar>::from_f64(value)
        })
    }

    pub fn set(&self, record: &mut [u8], value: T) {
        let size = self.data_type.size();
        for i in 0..T::ARITY {
            self.data_type
                .write_f64(&mut record[self.offset + i * size..], value.component(i).to_f64());
        }
    }
}

/// Untyped component access used where the arity is only known at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawAccessor {
    offset: usize,
    data_type: DataType,
    arity: usize,
}

impl RawAccessor {
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn read(&self, record: &[u8], component: usize) -> f64 {
        self.data_type
            .read_f64(&record[self.offset + component * self.data_type.size()..])
    }

    pub fn read_i64(&self, record: &[u8], component: usize) -> i64 {
        self.data_type
            .read_i64(&record[self.offset + component * self.data_type.size()..])
    }

    pub fn write(&self, record: &mut [u8], component: usize, value: f64) {
        self.data_type
            .write_f64(&mut record[self.offset + component * self.data_type.size()..], value);
    }

    /// Reads up to `out.len()` components; missing ones become zero.
    pub fn read_f32s(&self, record: &[u8], out: &mut [f32]) {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = if i < self.arity {
                self.read(record, i) as f32
            } else {
                0.0
            };
        }
    }

    /// Multiplies every component in place.
    pub fn scale(&self, record: &mut [u8], factor: f64) {
        for i in 0..self.arity {
            let v = self.read(record, i);
            self.write(record, i, v * factor);
        }
    }
}

impl ChannelMap {
    /// Strict accessor: the channel's arity and type must match `T` exactly.
    pub fn accessor<T: ChannelValue>(&self, name: &str) -> Result<ChannelAccessor<T>, ChannelError> {
        let channel = self.channel(name)?;
        let expected = <T::Scalar as Scalar>::DATA_TYPE;
        if channel.arity() != T::ARITY || channel.data_type() != expected {
            return Err(mismatch(channel, expected, T::ARITY));
        }
        Ok(ChannelAccessor {
            offset: channel.offset(),
            _marker: PhantomData,
        })
    }

    /// Converting accessor: only the arity must match.
    pub fn convert_accessor<T: ChannelValue>(
        &self,
        name: &str,
    ) -> Result<ConvertAccessor<T>, ChannelError> {
        let channel = self.channel(name)?;
        if channel.arity() != T::ARITY {
            return Err(mismatch(channel, <T::Scalar as Scalar>::DATA_TYPE, T::ARITY));
        }
        Ok(ConvertAccessor {
            offset: channel.offset(),
            data_type: channel.data_type(),
            _marker: PhantomData,
        })
    }

    pub fn raw_accessor(&self, name: &str) -> Result<RawAccessor, ChannelError> {
        let channel = self.channel(name)?;
        Ok(RawAccessor {
            offset: channel.offset(),
            data_type: channel.data_type(),
            arity: channel.arity(),
        })
    }
}
