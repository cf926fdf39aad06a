//! Encoding tensors into a single container, in memory or on disk.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use tensorpack_core::{
    Encodable, Error, Metadata, OffsetRange, Result, TensorDescriptor, METADATA_KEY,
};

use crate::config::CodecConfig;
use crate::header::{self, Header};

/// Encodes tensors and optional metadata into container bytes.
///
/// Tensors are laid out in lexicographic name order regardless of the input
/// order, so the same set of tensors always produces the same bytes.
/// Adapter failures abort the encode.
pub fn encode<'a, I, K, E>(tensors: I, metadata: Option<&Metadata>) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (K, &'a E)>,
    K: AsRef<str>,
    E: Encodable + ?Sized + 'a,
{
    let mut sorted: BTreeMap<String, &E> = BTreeMap::new();
    for (name, tensor) in tensors {
        let name = name.as_ref();
        if name == METADATA_KEY {
            return Err(Error::ReservedName);
        }
        if sorted.insert(name.to_string(), tensor).is_some() {
            return Err(Error::DuplicateTensor(name.to_string()));
        }
    }

    let mut header = Header::new();
    let mut data = Vec::new();

    for (name, tensor) in sorted {
        let dtype = tensor.dtype()?;
        let expected = tensor.byte_len()?;
        let bytes = tensor.data()?;
        if bytes.len() != expected {
            return Err(Error::TensorSizeMismatch {
                name,
                expected,
                actual: bytes.len(),
            });
        }

        let start = data.len();
        data.extend_from_slice(&bytes);
        let range = OffsetRange::new(start, data.len())?;
        header.insert_tensor(name, TensorDescriptor::new(dtype, tensor.shape().to_vec(), range))?;
    }

    if let Some(metadata) = metadata {
        header.set_metadata(Some(metadata.clone()));
    }

    let mut out = header::encode(&header)?;
    out.reserve(data.len());
    out.extend_from_slice(&data);
    Ok(out)
}

/// Encodes and writes a container with the default configuration.
pub fn write<'a, I, K, E>(
    tensors: I,
    metadata: Option<&Metadata>,
    path: impl AsRef<Path>,
) -> Result<()>
where
    I: IntoIterator<Item = (K, &'a E)>,
    K: AsRef<str>,
    E: Encodable + ?Sized + 'a,
{
    write_with_config(tensors, metadata, path, &CodecConfig::default())
}

/// Encodes fully in memory, then writes to `path`.
///
/// A failed encode never touches the filesystem.
pub fn write_with_config<'a, I, K, E>(
    tensors: I,
    metadata: Option<&Metadata>,
    path: impl AsRef<Path>,
    config: &CodecConfig,
) -> Result<()>
where
    I: IntoIterator<Item = (K, &'a E)>,
    K: AsRef<str>,
    E: Encodable + ?Sized + 'a,
{
    let bytes = encode(tensors, metadata)?;
    write_file(path.as_ref(), &bytes, config.atomic_writes)
}

/// Temp file next to `path`, named after the full file name.
fn temp_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::NotAFile(path.to_path_buf()))?;
    let mut temp = name.to_os_string();
    temp.push(".tmp");
    Ok(path.with_file_name(temp))
}

/// Writes `bytes` to `path`, through a temp file and rename when `atomic`.
pub(crate) fn write_file(path: &Path, bytes: &[u8], atomic: bool) -> Result<()> {
    if !atomic {
        fs::write(path, bytes).map_err(|e| Error::io(path, e))?;
        debug!(path = %path.display(), bytes = bytes.len(), "wrote file");
        return Ok(());
    }

    let temp = temp_path(path)?;

    let file = File::create(&temp).map_err(|e| Error::io(&temp, e))?;
    let mut writer = BufWriter::new(file);
    let written = writer
        .write_all(bytes)
        .and_then(|()| writer.flush())
        .and_then(|()| writer.get_ref().sync_all());
    drop(writer);

    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(Error::io(&temp, e));
    }

    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(Error::io(path, e));
    }

    debug!(path = %path.display(), bytes = bytes.len(), "wrote file atomically");
    Ok(())
}
