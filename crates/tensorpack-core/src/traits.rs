//! Traits at the boundary between the codec and tensor representations.
//!
//! ## Trait Overview
//!
//! ```text
//! Encodable  (anything the encoder can lay out: shape + dtype + bytes)
//! Scalar     (element types with a fixed little-endian encoding)
//! ```

use std::borrow::Cow;

use half::f16;

use crate::error::{Error, Result};
use crate::types::{checked_byte_len, element_count, DType};

/// A tensor the encoder can write.
///
/// The codec depends only on this capability, never on a concrete array
/// type. Adapter failures surface as errors and abort the encode.
pub trait Encodable {
    /// Element type of the tensor.
    fn dtype(&self) -> Result<DType>;

    /// Dimensions, outermost first.
    fn shape(&self) -> &[usize];

    /// Contiguous little-endian contents in row-major order.
    fn data(&self) -> Result<Cow<'_, [u8]>>;

    /// Number of scalars.
    fn element_count(&self) -> usize {
        element_count(self.shape())
    }

    /// Number of bytes the tensor occupies in the data segment.
    fn byte_len(&self) -> Result<usize> {
        let dtype = self.dtype()?;
        checked_byte_len(dtype, self.shape()).ok_or_else(|| {
            Error::MalformedRange(format!(
                "byte length of {dtype} tensor with shape {:?} overflows",
                self.shape()
            ))
        })
    }
}

impl<T: Encodable + ?Sized> Encodable for &T {
    fn dtype(&self) -> Result<DType> {
        (**self).dtype()
    }

    fn shape(&self) -> &[usize] {
        (**self).shape()
    }

    fn data(&self) -> Result<Cow<'_, [u8]>> {
        (**self).data()
    }

    fn byte_len(&self) -> Result<usize> {
        (**self).byte_len()
    }
}

impl<T: Encodable + ?Sized> Encodable for Box<T> {
    fn dtype(&self) -> Result<DType> {
        (**self).dtype()
    }

    fn shape(&self) -> &[usize] {
        (**self).shape()
    }

    fn data(&self) -> Result<Cow<'_, [u8]>> {
        (**self).data()
    }

    fn byte_len(&self) -> Result<usize> {
        (**self).byte_len()
    }
}

/// Element types with a fixed-width little-endian representation.
pub trait Scalar: Copy + Sized {
    /// The dtype tag matching this type.
    const DTYPE: DType;

    /// Appends the little-endian bytes of `self`.
    fn write_le(self, out: &mut Vec<u8>);

    /// Reads one value from exactly `DTYPE.size()` bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($ty:ty => $dtype:expr),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const DTYPE: DType = $dtype;

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(buf)
                }
            }
        )*
    };
}

impl_scalar! {
    f64 => DType::F64,
    f32 => DType::F32,
    f16 => DType::F16,
    i32 => DType::I32,
    u32 => DType::U32,
    i16 => DType::I16,
    u16 => DType::U16,
    i8 => DType::I8,
    u8 => DType::U8,
}

impl Scalar for bool {
    const DTYPE: DType = DType::Bool;

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(u8::from(self));
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}
