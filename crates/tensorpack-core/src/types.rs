//! Core value types of the safetensors header.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Header key reserved for free-form string metadata.
pub const METADATA_KEY: &str = "__metadata__";

/// Free-form string metadata stored under [`METADATA_KEY`].
pub type Metadata = BTreeMap<String, String>;

/// Scalar element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DType {
    /// 64-bit float.
    F64,
    /// 32-bit float.
    F32,
    /// 16-bit IEEE half float.
    F16,
    /// 32-bit signed integer.
    I32,
    /// 32-bit unsigned integer.
    U32,
    /// 16-bit signed integer.
    I16,
    /// 16-bit unsigned integer.
    U16,
    /// 8-bit signed integer.
    I8,
    /// 8-bit unsigned integer.
    U8,
    /// Boolean, one byte per element.
    Bool,
}

/// Wire tag and element width for every dtype.
const DTYPE_TABLE: [(DType, &str, usize); 10] = [
    (DType::F64, "F64", 8),
    (DType::F32, "F32", 4),
    (DType::F16, "F16", 2),
    (DType::I32, "I32", 4),
    (DType::U32, "U32", 4),
    (DType::I16, "I16", 2),
    (DType::U16, "U16", 2),
    (DType::I8, "I8", 1),
    (DType::U8, "U8", 1),
    (DType::Bool, "BOOL", 1),
];

impl DType {
    /// All supported dtypes, widest first.
    pub const ALL: [DType; 10] = [
        DType::F64,
        DType::F32,
        DType::F16,
        DType::I32,
        DType::U32,
        DType::I16,
        DType::U16,
        DType::I8,
        DType::U8,
        DType::Bool,
    ];

    fn entry(self) -> &'static (DType, &'static str, usize) {
        // Table order matches declaration order.
        &DTYPE_TABLE[self as usize]
    }

    /// Returns the size of one element in bytes.
    #[must_use]
    pub fn size(self) -> usize {
        self.entry().2
    }

    /// Returns the wire tag (e.g. `"F32"`, `"BOOL"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.entry().1
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        DTYPE_TABLE
            .iter()
            .find(|(_, name, _)| *name == tag)
            .map(|(dtype, _, _)| *dtype)
            .ok_or_else(|| Error::UnsupportedDataType(tag.to_string()))
    }
}

impl Serialize for DType {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        tag.parse().map_err(de::Error::custom)
    }
}

/// Dtype tag as stored in a header.
///
/// Tags outside the [`DType`] table (`BF16`, `I64`, `F8_E4M3`, ...) are kept
/// verbatim, so containers holding them still decode and validate. Only
/// typed access needs a known width.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DTypeTag {
    /// A tag from the dtype table.
    Known(DType),
    /// Any other tag.
    Unknown(String),
}

impl DTypeTag {
    /// The wire tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            DTypeTag::Known(dtype) => dtype.as_str(),
            DTypeTag::Unknown(tag) => tag,
        }
    }

    /// Resolves the tag, failing with `UnsupportedDataType` for unknown tags.
    pub fn known(&self) -> Result<DType> {
        match self {
            DTypeTag::Known(dtype) => Ok(*dtype),
            DTypeTag::Unknown(tag) => Err(Error::UnsupportedDataType(tag.clone())),
        }
    }

    /// Element width, `None` for unknown tags.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        match self {
            DTypeTag::Known(dtype) => Some(dtype.size()),
            DTypeTag::Unknown(_) => None,
        }
    }
}

impl From<DType> for DTypeTag {
    fn from(dtype: DType) -> Self {
        DTypeTag::Known(dtype)
    }
}

impl From<&str> for DTypeTag {
    fn from(tag: &str) -> Self {
        match tag.parse() {
            Ok(dtype) => DTypeTag::Known(dtype),
            Err(_) => DTypeTag::Unknown(tag.to_string()),
        }
    }
}

impl PartialEq<DType> for DTypeTag {
    fn eq(&self, other: &DType) -> bool {
        matches!(self, DTypeTag::Known(dtype) if dtype == other)
    }
}

impl fmt::Display for DTypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DTypeTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DTypeTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(DTypeTag::from(tag.as_str()))
    }
}

/// Number of scalars described by `shape`. An empty shape is a scalar.
#[must_use]
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Byte length of a tensor, or `None` if it overflows `usize`.
#[must_use]
pub fn checked_byte_len(dtype: DType, shape: &[usize]) -> Option<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))?
        .checked_mul(dtype.size())
}

/// Half-open byte interval `[start, end)` relative to the data segment.
///
/// Serialized as a two-element JSON array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OffsetRange {
    start: usize,
    end: usize,
}

impl OffsetRange {
    /// Creates a range, rejecting `start > end`.
    pub fn new(start: usize, end: usize) -> Result<Self> {
        if start > end {
            return Err(Error::MalformedRange(format!(
                "start {start} is past end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Inclusive start offset.
    #[must_use]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Exclusive end offset.
    #[must_use]
    pub fn end(&self) -> usize {
        self.end
    }

    /// Number of bytes covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// True for a zero-length range.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl TryFrom<&[usize]> for OffsetRange {
    type Error = Error;

    fn try_from(values: &[usize]) -> Result<Self> {
        match *values {
            [start, end] => OffsetRange::new(start, end),
            _ => Err(Error::MalformedRange(format!(
                "expected [start, end], got {} elements",
                values.len()
            ))),
        }
    }
}

impl Serialize for OffsetRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.start)?;
        tuple.serialize_element(&self.end)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for OffsetRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        struct RangeVisitor;

        impl<'de> Visitor<'de> for RangeVisitor {
            type Value = OffsetRange;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a [start, end] array")
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> core::result::Result<OffsetRange, A::Error> {
                let mut values = Vec::with_capacity(2);
                while let Some(value) = seq.next_element::<usize>()? {
                    values.push(value);
                }
                OffsetRange::try_from(values.as_slice()).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_seq(RangeVisitor)
    }
}

/// Placement of one tensor inside the data segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDescriptor {
    /// Element type tag, possibly one without a known width.
    pub dtype: DTypeTag,
    /// Dimensions, outermost first.
    pub shape: Vec<usize>,
    /// Byte range relative to the end of the header.
    pub data_offsets: OffsetRange,
}

impl TensorDescriptor {
    /// Creates a descriptor.
    pub fn new(dtype: impl Into<DTypeTag>, shape: Vec<usize>, data_offsets: OffsetRange) -> Self {
        Self {
            dtype: dtype.into(),
            shape,
            data_offsets,
        }
    }

    /// Number of scalars.
    #[must_use]
    pub fn element_count(&self) -> usize {
        element_count(&self.shape)
    }

    /// Number of bytes in the data segment.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.data_offsets.len()
    }

    /// True when `shape * dtype width` equals the length of the byte range.
    /// Always false for an unknown dtype tag.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match &self.dtype {
            DTypeTag::Known(dtype) => {
                checked_byte_len(*dtype, &self.shape) == Some(self.data_offsets.len())
            }
            DTypeTag::Unknown(_) => false,
        }
    }
}

/// One value of the header map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HeaderElement {
    /// String metadata, `None` when the header holds JSON `null`.
    Metadata(Option<Metadata>),
    /// A tensor entry.
    Tensor(TensorDescriptor),
}

impl HeaderElement {
    /// Returns the descriptor if this is a tensor entry.
    #[must_use]
    pub fn as_tensor(&self) -> Option<&TensorDescriptor> {
        match self {
            HeaderElement::Tensor(descriptor) => Some(descriptor),
            HeaderElement::Metadata(_) => None,
        }
    }

    /// Returns the metadata map if this is a non-null metadata entry.
    #[must_use]
    pub fn as_metadata(&self) -> Option<&Metadata> {
        match self {
            HeaderElement::Metadata(metadata) => metadata.as_ref(),
            HeaderElement::Tensor(_) => None,
        }
    }
}
