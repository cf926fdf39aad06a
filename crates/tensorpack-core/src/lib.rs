//! # Tensorpack Core
//!
//! Core types, traits and errors for the tensorpack safetensors codec.
//!
//! A safetensors file is an 8-byte little-endian header length, a JSON header
//! describing every tensor, and one contiguous data segment:
//!
//! ```text
//! [0..8)    u64 header length N (little-endian)
//! [8..8+N)  {"name": {"dtype": "F32", "shape": [..], "data_offsets": [s, e]},
//!            "__metadata__": {"key": "value"}}
//! [8+N..)   raw tensor bytes
//! ```
//!
//! This crate holds the pieces shared by every layer: the [`DType`] table and
//! the open [`DTypeTag`] stored in headers,
//! [`OffsetRange`], [`TensorDescriptor`], [`HeaderElement`], the
//! [`Encodable`] and [`Scalar`] traits, and the [`Error`] taxonomy.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{Encodable, Scalar};
pub use types::{
    checked_byte_len, element_count, DType, DTypeTag, HeaderElement, Metadata, OffsetRange,
    TensorDescriptor, METADATA_KEY,
};
