//! Parsed, validated safetensors containers.
//!
//! A [`Container`] is built only after the header decodes and the validator
//! accepts it. Its backing bytes are either borrowed from the caller, owned,
//! or a read-only memory map of a file.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use memmap2::Mmap;
use tracing::debug;

use tensorpack_core::{Error, Metadata, Result, TensorDescriptor};

use crate::config::CodecConfig;
use crate::header::{self, Header};
use crate::tensor::{TensorBuffer, TensorView};
use crate::validate::validate;

/// Backing bytes of a container.
enum Storage<'data> {
    Borrowed(&'data [u8]),
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Storage<'_> {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Borrowed(bytes) => bytes,
            Storage::Owned(bytes) => bytes,
            Storage::Mapped(mmap) => mmap,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Storage::Borrowed(_) => "borrowed",
            Storage::Owned(_) => "owned",
            Storage::Mapped(_) => "mapped",
        }
    }
}

/// A decoded and validated safetensors container.
pub struct Container<'data> {
    header_len: usize,
    header: Header,
    storage: Storage<'data>,
}

impl fmt::Debug for Container<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("header_len", &self.header_len)
            .field("header", &self.header)
            .field("storage", &self.storage.kind())
            .field("len", &self.storage.as_slice().len())
            .finish()
    }
}

impl<'data> Container<'data> {
    fn from_storage(storage: Storage<'data>) -> Result<Self> {
        let bytes = storage.as_slice();
        let (header_len, header) = header::decode(bytes)?;
        validate(&header, bytes.len() - header_len)?;

        debug!(
            tensors = header.tensor_count(),
            header_len,
            data_len = bytes.len() - header_len,
            storage = storage.kind(),
            "decoded container"
        );

        Ok(Self {
            header_len,
            header,
            storage,
        })
    }

    /// Number of bytes before the data segment (length prefix + JSON).
    #[must_use]
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Size of the data segment.
    #[must_use]
    pub fn data_len(&self) -> usize {
        self.storage.as_slice().len() - self.header_len
    }

    /// The decoded header.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The complete backing buffer.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.storage.as_slice()
    }

    /// True if the bytes come from a memory-mapped file.
    #[must_use]
    pub fn is_memory_mapped(&self) -> bool {
        matches!(self.storage, Storage::Mapped(_))
    }

    /// Tensor names in order. Never yields the metadata key.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.header.tensor_names()
    }

    /// Number of tensors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.header.tensor_count()
    }

    /// Always false for a validated container; kept for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// String metadata, `None` if absent or null.
    #[must_use]
    pub fn metadata(&self) -> Option<&Metadata> {
        self.header.metadata()
    }

    /// Descriptor of the named tensor.
    pub fn descriptor(&self, name: &str) -> Result<&TensorDescriptor> {
        self.header
            .tensor(name)
            .ok_or_else(|| Error::MissingTensor(name.to_string()))
    }

    /// Bytes covered by `descriptor`, offset by the header length.
    ///
    /// Works for any descriptor, including ones with an unknown dtype tag.
    pub fn data_for(&self, descriptor: &TensorDescriptor) -> Result<&[u8]> {
        slice_range(self.storage.as_slice(), self.header_len, descriptor)
    }

    /// Zero-copy view of the named tensor.
    ///
    /// Fails with `UnsupportedDataType` when the stored dtype tag has no
    /// known width.
    pub fn tensor(&self, name: &str) -> Result<TensorView<'_>> {
        let descriptor = self.descriptor(name)?;
        view(self.storage.as_slice(), self.header_len, descriptor)
    }

    /// Owned copy of the named tensor.
    pub fn tensor_owned(&self, name: &str) -> Result<TensorBuffer> {
        Ok(self.tensor(name)?.to_owned_buffer())
    }

    /// Iterates over all tensors as zero-copy views, in name order.
    ///
    /// A tensor with an unknown dtype tag yields `UnsupportedDataType`.
    pub fn tensors(&self) -> impl Iterator<Item = Result<(&str, TensorView<'_>)>> {
        let bytes = self.storage.as_slice();
        let header_len = self.header_len;
        self.header
            .tensors()
            .map(move |(name, descriptor)| {
                view(bytes, header_len, descriptor).map(|tensor| (name, tensor))
            })
    }
}

fn slice_range<'b>(
    bytes: &'b [u8],
    header_len: usize,
    descriptor: &TensorDescriptor,
) -> Result<&'b [u8]> {
    let range = descriptor.data_offsets;
    header_len
        .checked_add(range.start())
        .zip(header_len.checked_add(range.end()))
        .and_then(|(start, end)| bytes.get(start..end))
        .ok_or_else(|| {
            Error::incomplete(format!(
                "range {}..{} past a {header_len}-byte header is outside the {}-byte buffer",
                range.start(),
                range.end(),
                bytes.len()
            ))
        })
}

fn view<'b>(
    bytes: &'b [u8],
    header_len: usize,
    descriptor: &'b TensorDescriptor,
) -> Result<TensorView<'b>> {
    let dtype = descriptor.dtype.known()?;
    let data = slice_range(bytes, header_len, descriptor)?;
    Ok(TensorView::from_parts(dtype, &descriptor.shape, data))
}

impl Container<'static> {
    /// Decodes an owned buffer.
    pub fn from_vec(bytes: Vec<u8>) -> Result<Self> {
        Self::from_storage(Storage::Owned(bytes))
    }
}

/// Decodes and validates a borrowed buffer.
pub fn decode(buffer: &[u8]) -> Result<Container<'_>> {
    Container::from_storage(Storage::Borrowed(buffer))
}

/// Reads a file with the default configuration (memory-mapped).
pub fn read(path: impl AsRef<Path>) -> Result<Container<'static>> {
    read_with_config(path, &CodecConfig::default())
}

/// Reads a file, memory-mapping it when `config.memory_map` is set.
///
/// The caller must not modify or truncate a mapped file while the container
/// is alive.
pub fn read_with_config(
    path: impl AsRef<Path>,
    config: &CodecConfig,
) -> Result<Container<'static>> {
    let path = path.as_ref();
    let meta = std::fs::metadata(path).map_err(|e| Error::io(path, e))?;
    if !meta.is_file() {
        return Err(Error::NotAFile(path.to_path_buf()));
    }

    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;

    // Zero-length files cannot be mapped on every platform.
    let storage = if config.memory_map && meta.len() > 0 {
        // SAFETY: the map is read-only and callers are documented not to
        // mutate the file while the container is alive.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::io(path, e))?;
        Storage::Mapped(mmap)
    } else {
        let mut bytes = Vec::with_capacity(meta.len() as usize);
        file.read_to_end(&mut bytes)
            .map_err(|e| Error::io(path, e))?;
        Storage::Owned(bytes)
    };

    debug!(path = %path.display(), bytes = meta.len(), storage = storage.kind(), "opened container");
    Container::from_storage(storage)
}
