//! # Tensorpack
//!
//! Validating encoder/decoder for safetensors containers, with sharded
//! output and index files.
//!
//! # Architecture
//!
//! ```text
//!  bytes / file ──► header::decode ──► validate ──► Container ──► TensorView
//!                                                       │
//!  tensors ──► encode ──► write ─────────────────────────┘
//!     │
//!     └──► plan_shards ──► write_sharded ──► shards + <stem>.index.json
//!                                                  │
//!                                   read_index ──► ShardIndex::container
//! ```
//!
//! Decoding never trusts the header: every tensor range must tile the data
//! segment exactly before a [`Container`] is handed out.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use tensorpack::{read, write, TensorBuffer};
//!
//! # fn main() -> tensorpack::Result<()> {
//! let mut tensors = BTreeMap::new();
//! tensors.insert("weight", TensorBuffer::from_values(vec![2, 2], &[1.0f32, 2.0, 3.0, 4.0])?);
//! write(&tensors, None, "model.safetensors")?;
//!
//! let container = read("model.safetensors")?;
//! let weight = container.tensor("weight")?.to_vec::<f32>()?;
//! assert_eq!(weight, vec![1.0, 2.0, 3.0, 4.0]);
//! # Ok(())
//! # }
//! ```

pub mod header;

mod config;
mod container;
mod encode;
mod index;
mod shard;
mod tensor;
mod validate;

pub use config::CodecConfig;
pub use container::{decode, read, read_with_config, Container};
pub use encode::{encode, write, write_with_config};
pub use header::{Header, HEADER_PREFIX_LEN};
pub use index::{decode_index, encode_index, read_index, IndexDocument, IndexMetadata, ShardIndex};
pub use shard::{
    index_file_name, plan_shards, shard_file_name, write_sharded, write_sharded_with_config,
    ShardGroup, ShardedWrite,
};
pub use tensor::{TensorBuffer, TensorView};
pub use validate::validate;

pub use tensorpack_core::{
    checked_byte_len, element_count, DType, DTypeTag, Encodable, Error, HeaderElement, Metadata,
    OffsetRange, Result, Scalar, TensorDescriptor, METADATA_KEY,
};

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        decode, encode, read, read_index, write, write_sharded, CodecConfig, Container, DType,
        Encodable, Error, Metadata, Result, TensorBuffer, TensorView,
    };
}
