//! Framework-independent tensor adapters.
//!
//! [`TensorView`] borrows its bytes from a [`Container`](crate::Container)
//! and cannot outlive it. [`TensorBuffer`] owns a copy. Both implement
//! [`Encodable`], so a decoded file can be re-encoded or re-sharded without
//! an intermediate copy.

use std::borrow::Cow;

use tensorpack_core::{checked_byte_len, DType, Encodable, Error, Result, Scalar};

fn check_len(dtype: DType, shape: &[usize], actual: usize, name: &str) -> Result<()> {
    let expected = checked_byte_len(dtype, shape).ok_or_else(|| {
        Error::MalformedRange(format!("byte length of shape {shape:?} overflows"))
    })?;
    if expected != actual {
        return Err(Error::TensorSizeMismatch {
            name: name.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Decodes typed values. A zero-length range yields no values whatever the
/// shape; any other length must match `shape * width` exactly.
fn decode_values<T: Scalar>(dtype: DType, shape: &[usize], data: &[u8]) -> Result<Vec<T>> {
    if T::DTYPE != dtype {
        return Err(Error::DataTypeMismatch {
            expected: T::DTYPE,
            actual: dtype,
        });
    }
    if !data.is_empty() {
        check_len(dtype, shape, data.len(), "<view>")?;
    }
    Ok(data.chunks_exact(dtype.size()).map(T::read_le).collect())
}

/// Zero-copy view of a tensor inside a decoded container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorView<'data> {
    dtype: DType,
    shape: &'data [usize],
    data: &'data [u8],
}

impl<'data> TensorView<'data> {
    /// Creates a view over borrowed bytes.
    ///
    /// The byte length must equal `shape * dtype width`.
    pub fn new(dtype: DType, shape: &'data [usize], data: &'data [u8]) -> Result<Self> {
        check_len(dtype, shape, data.len(), "<view>")?;
        Ok(Self { dtype, shape, data })
    }

    /// View over a validated container range. The container does not enforce
    /// the shape/length invariant, so neither does this constructor.
    pub(crate) fn from_parts(dtype: DType, shape: &'data [usize], data: &'data [u8]) -> Self {
        Self { dtype, shape, data }
    }

    /// Element type.
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Dimensions.
    #[must_use]
    pub fn shape(&self) -> &'data [usize] {
        self.shape
    }

    /// Borrowed bytes.
    #[must_use]
    pub fn data(&self) -> &'data [u8] {
        self.data
    }

    /// Decodes the elements as `T`.
    ///
    /// Fails with `TensorSizeMismatch` when a non-empty byte range does not
    /// match the shape.
    pub fn to_vec<T: Scalar>(&self) -> Result<Vec<T>> {
        decode_values(self.dtype, self.shape, self.data)
    }

    /// Copies the view into an owned buffer.
    #[must_use]
    pub fn to_owned_buffer(&self) -> TensorBuffer {
        TensorBuffer {
            dtype: self.dtype,
            shape: self.shape.to_vec(),
            data: self.data.to_vec(),
        }
    }
}

impl Encodable for TensorView<'_> {
    fn dtype(&self) -> Result<DType> {
        Ok(self.dtype)
    }

    fn shape(&self) -> &[usize] {
        self.shape
    }

    fn data(&self) -> Result<Cow<'_, [u8]>> {
        Ok(Cow::Borrowed(self.data))
    }
}

/// Owned tensor: dtype, shape and little-endian bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorBuffer {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl TensorBuffer {
    /// Creates a buffer from raw bytes.
    ///
    /// The byte length must equal `shape * dtype width`.
    pub fn new(dtype: DType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        check_len(dtype, &shape, data.len(), "<buffer>")?;
        Ok(Self { dtype, shape, data })
    }

    /// Creates a buffer from typed values.
    pub fn from_values<T: Scalar>(shape: Vec<usize>, values: &[T]) -> Result<Self> {
        let mut data = Vec::with_capacity(values.len() * T::DTYPE.size());
        for &value in values {
            value.write_le(&mut data);
        }
        Self::new(T::DTYPE, shape, data)
    }

    /// A zero-filled buffer.
    pub fn zeros(dtype: DType, shape: Vec<usize>) -> Result<Self> {
        let len = checked_byte_len(dtype, &shape).ok_or_else(|| {
            Error::MalformedRange(format!("byte length of shape {shape:?} overflows"))
        })?;
        Ok(Self {
            dtype,
            shape,
            data: vec![0; len],
        })
    }

    /// Element type.
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Dimensions.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Raw bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the buffer, returning its bytes.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Borrows the buffer as a view.
    #[must_use]
    pub fn view(&self) -> TensorView<'_> {
        TensorView::from_parts(self.dtype, &self.shape, &self.data)
    }

    /// Decodes the elements as `T`.
    pub fn to_vec<T: Scalar>(&self) -> Result<Vec<T>> {
        decode_values(self.dtype, &self.shape, &self.data)
    }
}

impl Encodable for TensorBuffer {
    fn dtype(&self) -> Result<DType> {
        Ok(self.dtype)
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn data(&self) -> Result<Cow<'_, [u8]>> {
        Ok(Cow::Borrowed(&self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    #[test]
    fn test_from_values_roundtrip() {
        let buffer = TensorBuffer::from_values(vec![2, 2], &[1i32, -2, 3, -4]).unwrap();
        assert_eq!(buffer.dtype(), DType::I32);
        assert_eq!(buffer.data().len(), 16);
        assert_eq!(buffer.to_vec::<i32>().unwrap(), vec![1, -2, 3, -4]);
    }

    #[test]
    fn test_f16_and_bool_values() {
        let halves = [f16::from_f32(1.0), f16::from_f32(-0.5)];
        let buffer = TensorBuffer::from_values(vec![2], &halves).unwrap();
        assert_eq!(buffer.dtype(), DType::F16);
        assert_eq!(buffer.to_vec::<f16>().unwrap(), halves.to_vec());

        let flags = TensorBuffer::from_values(vec![3], &[true, false, true]).unwrap();
        assert_eq!(flags.data(), &[1, 0, 1]);
        assert_eq!(flags.to_vec::<bool>().unwrap(), vec![true, false, true]);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let err = TensorBuffer::from_values(vec![3], &[1.0f32, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            Error::TensorSizeMismatch {
                expected: 12,
                actual: 8,
                ..
            }
        ));
        assert!(TensorView::new(DType::U16, &[2], &[0u8; 3]).is_err());
    }

    #[test]
    fn test_view_to_vec_rejects_partial_elements() {
        let data = [0u8; 5];
        let view = TensorView::from_parts(DType::F32, &[2], &data);
        assert!(matches!(
            view.to_vec::<f32>(),
            Err(Error::TensorSizeMismatch {
                expected: 8,
                actual: 5,
                ..
            })
        ));

        let data = [0u8; 8];
        let view = TensorView::from_parts(DType::F32, &[3], &data);
        assert!(matches!(
            view.to_vec::<f32>(),
            Err(Error::TensorSizeMismatch {
                expected: 12,
                actual: 8,
                ..
            })
        ));

        let view = TensorView::from_parts(DType::F32, &[], &[]);
        assert!(view.to_vec::<f32>().unwrap().is_empty());
    }

    #[test]
    fn test_dtype_mismatch() {
        let buffer = TensorBuffer::from_values(vec![1], &[1.0f32]).unwrap();
        let err = buffer.to_vec::<i32>().unwrap_err();
        assert!(matches!(
            err,
            Error::DataTypeMismatch {
                expected: DType::I32,
                actual: DType::F32
            }
        ));
    }

    #[test]
    fn test_scalar_and_empty_shapes() {
        let scalar = TensorBuffer::from_values(vec![], &[7.5f64]).unwrap();
        assert_eq!(scalar.data().len(), 8);

        let empty = TensorBuffer::zeros(DType::F32, vec![4, 0]).unwrap();
        assert!(empty.data().is_empty());
        assert!(empty.to_vec::<f32>().unwrap().is_empty());
    }

    #[test]
    fn test_view_copy_and_encodable() {
        let buffer = TensorBuffer::from_values(vec![3], &[1u16, 2, 3]).unwrap();
        let view = buffer.view();
        assert_eq!(view.to_vec::<u16>().unwrap(), vec![1, 2, 3]);
        assert_eq!(view.to_owned_buffer(), buffer);

        assert_eq!(Encodable::byte_len(&view).unwrap(), 6);
        assert!(matches!(Encodable::data(&view).unwrap(), Cow::Borrowed(_)));
    }
}
