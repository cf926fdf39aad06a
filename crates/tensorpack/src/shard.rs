//! Splitting a tensor set across several container files.
//!
//! Grouping is a greedy first-fit-descending heuristic: it is not optimal
//! bin-packing, but it is deterministic, so re-sharding the same tensors
//! always reproduces the same files and index.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use tensorpack_core::{Encodable, Error, Metadata, Result, METADATA_KEY};

use crate::config::CodecConfig;
use crate::encode::{write_file, write_with_config};
use crate::index::{self, IndexDocument, IndexMetadata};

/// Minimum digit count of shard numbers in file names.
const SHARD_NUMBER_WIDTH: usize = 5;

/// Tensors assigned to one shard file.
pub struct ShardGroup<'a, E: ?Sized> {
    tensors: BTreeMap<String, &'a E>,
    byte_len: u64,
}

impl<'a, E: ?Sized> ShardGroup<'a, E> {
    fn new() -> Self {
        Self {
            tensors: BTreeMap::new(),
            byte_len: 0,
        }
    }

    fn push(&mut self, name: String, tensor: &'a E, size: u64) {
        self.tensors.insert(name, tensor);
        self.byte_len += size;
    }

    /// Total tensor bytes in the group.
    #[must_use]
    pub fn byte_len(&self) -> u64 {
        self.byte_len
    }

    /// Number of tensors in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Tensor names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tensors.keys().map(String::as_str).collect()
    }

    /// Looks up a tensor of this group.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'a E> {
        self.tensors.get(name).copied()
    }

    /// Iterates over `(name, tensor)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &'a E)> + '_ {
        self.tensors.iter().map(|(name, &tensor)| (name.as_str(), tensor))
    }
}

impl<E: ?Sized> fmt::Debug for ShardGroup<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardGroup")
            .field("tensors", &self.tensors.keys().collect::<Vec<_>>())
            .field("byte_len", &self.byte_len)
            .finish()
    }
}

/// Groups tensors so each group fits in `max_shard_bytes` where possible.
///
/// Tensors are visited by byte size, largest first, ties broken by name.
/// A tensor larger than the budget gets a group of its own; otherwise it
/// joins the current group, which is closed first if the tensor would push
/// it past the budget. Tensors are never split or copied.
///
/// Every tensor's bytes are checked against its shape here, so a sharded
/// write fails before the first shard reaches the disk.
pub fn plan_shards<'a, I, K, E>(tensors: I, max_shard_bytes: u64) -> Result<Vec<ShardGroup<'a, E>>>
where
    I: IntoIterator<Item = (K, &'a E)>,
    K: AsRef<str>,
    E: Encodable + ?Sized + 'a,
{
    let mut seen = BTreeSet::new();
    let mut sized = Vec::new();
    for (name, tensor) in tensors {
        let name = name.as_ref();
        if name == METADATA_KEY {
            return Err(Error::ReservedName);
        }
        if !seen.insert(name.to_string()) {
            return Err(Error::DuplicateTensor(name.to_string()));
        }
        let size = tensor.byte_len()?;
        let actual = tensor.data()?.len();
        if actual != size {
            return Err(Error::TensorSizeMismatch {
                name: name.to_string(),
                expected: size,
                actual,
            });
        }
        sized.push((name.to_string(), tensor, size as u64));
    }
    sized.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));

    let mut groups = Vec::new();
    let mut current = ShardGroup::new();

    for (name, tensor, size) in sized {
        if size > max_shard_bytes {
            warn!(
                "Tensor {} ({} bytes) exceeds the shard budget of {} bytes, placing it alone",
                name, size, max_shard_bytes
            );
            let mut single = ShardGroup::new();
            single.push(name, tensor, size);
            groups.push(single);
            continue;
        }
        if current.byte_len.saturating_add(size) > max_shard_bytes {
            groups.push(std::mem::replace(&mut current, ShardGroup::new()));
        }
        current.push(name, tensor, size);
    }
    if !current.is_empty() {
        groups.push(current);
    }

    debug!(
        "Planned {} shards with a budget of {} bytes",
        groups.len(),
        max_shard_bytes
    );
    Ok(groups)
}

fn split_base(base: &Path) -> Result<(&str, Option<&str>)> {
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::NotAFile(base.to_path_buf()))?;
    let ext = base.extension().and_then(|e| e.to_str());
    Ok((stem, ext))
}

/// Path of shard `index` (1-based) of `count` next to `base`.
///
/// `model.safetensors` becomes `model-00001-of-00003.safetensors`. Shard
/// numbers are zero padded to at least five digits.
pub fn shard_file_name(base: impl AsRef<Path>, index: usize, count: usize) -> Result<PathBuf> {
    let base = base.as_ref();
    let (stem, ext) = split_base(base)?;
    let width = SHARD_NUMBER_WIDTH.max(count.to_string().len());
    let name = match ext {
        Some(ext) => format!("{stem}-{index:0width$}-of-{count:0width$}.{ext}"),
        None => format!("{stem}-{index:0width$}-of-{count:0width$}"),
    };
    Ok(base.with_file_name(name))
}

/// Path of the index file next to `base`: `model.safetensors` becomes
/// `model.index.json`.
pub fn index_file_name(base: impl AsRef<Path>) -> Result<PathBuf> {
    let base = base.as_ref();
    let (stem, _) = split_base(base)?;
    Ok(base.with_file_name(format!("{stem}.index.json")))
}

/// Files produced by a sharded write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardedWrite {
    /// Shard paths in shard-number order.
    pub shard_paths: Vec<PathBuf>,
    pub index_path: PathBuf,
    pub index: IndexDocument,
}

/// Writes tensors as shards plus an index, with the default configuration.
pub fn write_sharded<'a, I, K, E>(
    tensors: I,
    metadata: Option<&Metadata>,
    base_path: impl AsRef<Path>,
    max_shard_bytes: u64,
) -> Result<ShardedWrite>
where
    I: IntoIterator<Item = (K, &'a E)>,
    K: AsRef<str>,
    E: Encodable + ?Sized + 'a,
{
    write_sharded_with_config(
        tensors,
        metadata,
        base_path,
        Some(max_shard_bytes),
        &CodecConfig::default(),
    )
}

/// Writes tensors as shards next to `base_path`, then writes the index.
///
/// Every shard carries the full `metadata`. When `max_shard_bytes` is
/// `None` the budget comes from `config`. The index is written last; a
/// failure part way through can leave earlier shards behind.
pub fn write_sharded_with_config<'a, I, K, E>(
    tensors: I,
    metadata: Option<&Metadata>,
    base_path: impl AsRef<Path>,
    max_shard_bytes: Option<u64>,
    config: &CodecConfig,
) -> Result<ShardedWrite>
where
    I: IntoIterator<Item = (K, &'a E)>,
    K: AsRef<str>,
    E: Encodable + ?Sized + 'a,
{
    let base_path = base_path.as_ref();
    let budget = max_shard_bytes.unwrap_or(config.max_shard_bytes);
    let index_path = index_file_name(base_path)?;
    let groups = plan_shards(tensors, budget)?;
    let count = groups.len();

    let mut shard_paths = Vec::with_capacity(count);
    let mut weight_map = BTreeMap::new();
    let mut total_size = 0u64;

    for (i, group) in groups.iter().enumerate() {
        let shard_path = shard_file_name(base_path, i + 1, count)?;
        let file_name = shard_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::NotAFile(shard_path.clone()))?
            .to_string();

        write_with_config(group.iter(), metadata, &shard_path, config)?;
        info!(
            "Wrote shard {}/{}: {} ({} tensors, {} bytes)",
            i + 1,
            count,
            file_name,
            group.len(),
            group.byte_len()
        );

        for name in group.names() {
            weight_map.insert(name.to_string(), file_name.clone());
        }
        total_size += group.byte_len();
        shard_paths.push(shard_path);
    }

    let document = IndexDocument {
        metadata: Some(IndexMetadata { total_size }),
        weight_map,
    };
    let bytes = index::to_json(&document, config.pretty_index)?;
    write_file(&index_path, &bytes, config.atomic_writes)?;
    info!(
        "Wrote index {} ({} tensors, {} bytes total)",
        index_path.display(),
        document.weight_map.len(),
        total_size
    );

    Ok(ShardedWrite {
        shard_paths,
        index_path,
        index: document,
    })
}
