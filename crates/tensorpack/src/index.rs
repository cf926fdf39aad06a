//! Shard index documents (`<stem>.index.json`).
//!
//! The index maps every tensor name to the shard file that holds it:
//!
//! ```text
//! {"metadata": {"total_size": 3632},
//!  "weight_map": {"large1": "model-00001-of-00003.safetensors", ...}}
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use tensorpack_core::{Error, Result, TensorDescriptor};

use crate::container::{read, Container};
use crate::tensor::TensorBuffer;

/// Index-level metadata. Unknown fields are ignored on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Sum of the byte lengths of all tensors across all shards.
    pub total_size: u64,
}

/// Decoded index document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IndexMetadata>,
    /// Tensor name to shard file name.
    pub weight_map: BTreeMap<String, String>,
}

/// Shard names are `/`-separated relative paths that stay inside the index
/// directory.
fn check_shard_name(tensor: &str, file: &str) -> Result<()> {
    let inside = !file.is_empty()
        && !file.ends_with('/')
        && !file.contains('\\')
        && Path::new(file)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !inside {
        return Err(Error::MalformedIndex(format!(
            "shard '{file}' for tensor '{tensor}' is not a relative path inside the index directory"
        )));
    }
    Ok(())
}

/// Decodes an index document from JSON bytes.
///
/// Shard file names may name a subdirectory (`part1/model.safetensors`) but
/// must not be absolute or contain `..`, so every shard resolves inside the
/// index directory.
pub fn decode_index(bytes: &[u8]) -> Result<IndexDocument> {
    let document: IndexDocument =
        serde_json::from_slice(bytes).map_err(|e| Error::MalformedIndex(e.to_string()))?;
    for (tensor, file) in &document.weight_map {
        check_shard_name(tensor, file)?;
    }
    Ok(document)
}

/// Encodes an index document as pretty-printed JSON.
pub fn encode_index(document: &IndexDocument) -> Result<Vec<u8>> {
    to_json(document, true)
}

pub(crate) fn to_json(document: &IndexDocument, pretty: bool) -> Result<Vec<u8>> {
    let encoded = if pretty {
        serde_json::to_vec_pretty(document)
    } else {
        serde_json::to_vec(document)
    };
    encoded.map_err(|e| Error::MalformedIndex(format!("failed to serialize index: {e}")))
}

/// An index bound to the directory its shards live in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardIndex {
    pub metadata: Option<IndexMetadata>,
    pub weight_map: BTreeMap<String, String>,
    pub base_dir: PathBuf,
}

impl ShardIndex {
    /// Binds a decoded document to `base_dir`.
    pub fn new(document: IndexDocument, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            metadata: document.metadata,
            weight_map: document.weight_map,
            base_dir: base_dir.into(),
        }
    }

    /// Shard file name holding `name`.
    pub fn shard_file(&self, name: &str) -> Result<&str> {
        self.weight_map
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::MissingTensor(name.to_string()))
    }

    /// Opens the shard holding `name`.
    ///
    /// The shard path is resolved against `base_dir` when given, otherwise
    /// against the directory the index was read from.
    pub fn container(&self, name: &str, base_dir: Option<&Path>) -> Result<Container<'static>> {
        let file = self.shard_file(name)?;
        let dir = base_dir.unwrap_or(&self.base_dir);
        read(dir.join(file))
    }

    /// Descriptor of `name`, read from its shard.
    pub fn descriptor(&self, name: &str, base_dir: Option<&Path>) -> Result<TensorDescriptor> {
        self.container(name, base_dir)?.descriptor(name).cloned()
    }

    /// Owned copy of `name`, read from its shard.
    pub fn tensor(&self, name: &str, base_dir: Option<&Path>) -> Result<TensorBuffer> {
        self.container(name, base_dir)?.tensor_owned(name)
    }

    /// Distinct shard file names in order.
    #[must_use]
    pub fn shard_files(&self) -> Vec<&str> {
        self.weight_map
            .values()
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Tensor names in order.
    pub fn tensor_names(&self) -> impl Iterator<Item = &str> {
        self.weight_map.keys().map(String::as_str)
    }
}

/// Reads an index file, binding it to the file's parent directory.
pub fn read_index(path: impl AsRef<Path>) -> Result<ShardIndex> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    let document = decode_index(&bytes)?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    debug!(
        path = %path.display(),
        tensors = document.weight_map.len(),
        "read shard index"
    );
    Ok(ShardIndex::new(document, base_dir))
}
