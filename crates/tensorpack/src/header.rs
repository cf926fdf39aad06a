//! Header codec: 8-byte little-endian length prefix followed by a JSON object.
//!
//! Decoding is schema-driven. The reserved `__metadata__` key is checked
//! explicitly and every other key must hold a tensor descriptor, so a
//! metadata-shaped value can never be silently accepted as something else.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tensorpack_core::{
    DTypeTag, Error, HeaderElement, Metadata, OffsetRange, Result, TensorDescriptor, METADATA_KEY,
};

/// Size of the little-endian length prefix.
pub const HEADER_PREFIX_LEN: usize = 8;

/// Decoded header: tensor name to header element, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Header {
    entries: BTreeMap<String, HeaderElement>,
}

impl Header {
    /// Creates an empty header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tensor entry.
    ///
    /// Rejects the reserved metadata key and names already present.
    pub fn insert_tensor(
        &mut self,
        name: impl Into<String>,
        descriptor: TensorDescriptor,
    ) -> Result<()> {
        let name = name.into();
        if name == METADATA_KEY {
            return Err(Error::ReservedName);
        }
        if self.entries.contains_key(&name) {
            return Err(Error::DuplicateTensor(name));
        }
        self.entries.insert(name, HeaderElement::Tensor(descriptor));
        Ok(())
    }

    /// Stores metadata under the reserved key, replacing any previous value.
    pub fn set_metadata(&mut self, metadata: Option<Metadata>) {
        self.entries
            .insert(METADATA_KEY.to_string(), HeaderElement::Metadata(metadata));
    }

    /// Raw lookup of a header element, including the metadata entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&HeaderElement> {
        self.entries.get(key)
    }

    /// Looks up a tensor descriptor by name.
    #[must_use]
    pub fn tensor(&self, name: &str) -> Option<&TensorDescriptor> {
        self.entries.get(name).and_then(HeaderElement::as_tensor)
    }

    /// Metadata map, `None` if absent or null.
    #[must_use]
    pub fn metadata(&self) -> Option<&Metadata> {
        self.entries
            .get(METADATA_KEY)
            .and_then(HeaderElement::as_metadata)
    }

    /// Iterates over tensor entries in name order.
    pub fn tensors(&self) -> impl Iterator<Item = (&str, &TensorDescriptor)> {
        self.entries
            .iter()
            .filter_map(|(name, element)| element.as_tensor().map(|d| (name.as_str(), d)))
    }

    /// Iterates over tensor names in order.
    pub fn tensor_names(&self) -> impl Iterator<Item = &str> {
        self.tensors().map(|(name, _)| name)
    }

    /// Number of tensor entries.
    #[must_use]
    pub fn tensor_count(&self) -> usize {
        self.tensors().count()
    }

    /// Iterates over every element, metadata included.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderElement)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn from_entries(raw: Vec<(String, Value)>) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (key, value) in raw {
            if entries.contains_key(&key) {
                return Err(Error::malformed_header(format!("duplicate key '{key}'")));
            }
            let element = classify(&key, value)?;
            entries.insert(key, element);
        }
        Ok(Self { entries })
    }
}

/// Top-level JSON object kept as ordered pairs so duplicates stay visible.
struct RawEntries(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for RawEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RawEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> core::result::Result<RawEntries, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, Value>()? {
                    entries.push(entry);
                }
                Ok(RawEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Wire form of a descriptor before range checks.
#[derive(Deserialize)]
struct RawDescriptor {
    dtype: String,
    shape: Vec<usize>,
    data_offsets: Vec<usize>,
}

/// Returns the map if `value` is an object whose values are all strings.
fn string_map(value: &Value) -> Option<Metadata> {
    value
        .as_object()?
        .iter()
        .map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
        .collect()
}

fn classify(key: &str, value: Value) -> Result<HeaderElement> {
    if key == METADATA_KEY {
        if value.is_null() {
            return Ok(HeaderElement::Metadata(None));
        }
        return string_map(&value)
            .map(|metadata| HeaderElement::Metadata(Some(metadata)))
            .ok_or_else(|| {
                Error::malformed_header(format!(
                    "'{METADATA_KEY}' must be an object of strings or null"
                ))
            });
    }

    if value.is_null() || string_map(&value).is_some() {
        return Err(Error::MisplacedMetadata(key.to_string()));
    }

    let raw: RawDescriptor = serde_json::from_value(value)
        .map_err(|e| Error::json(&format!("invalid descriptor for '{key}'"), e))?;
    let dtype = DTypeTag::from(raw.dtype.as_str());
    let data_offsets = OffsetRange::try_from(raw.data_offsets.as_slice())?;

    Ok(HeaderElement::Tensor(TensorDescriptor::new(
        dtype,
        raw.shape,
        data_offsets,
    )))
}

/// Decodes the length prefix and JSON header.
///
/// Returns the total header length (`8 + N`), i.e. the offset where the data
/// segment starts, together with the decoded header.
pub fn decode(buffer: &[u8]) -> Result<(usize, Header)> {
    let prefix: [u8; HEADER_PREFIX_LEN] = buffer
        .get(..HEADER_PREFIX_LEN)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(Error::InvalidHeaderSize { len: buffer.len() })?;
    let declared = u64::from_le_bytes(prefix);

    let header_end = usize::try_from(declared)
        .ok()
        .and_then(|n| n.checked_add(HEADER_PREFIX_LEN))
        .filter(|&end| end <= buffer.len())
        .ok_or(Error::InvalidHeaderData {
            declared,
            available: buffer.len() - HEADER_PREFIX_LEN,
        })?;

    let RawEntries(raw) = serde_json::from_slice(&buffer[HEADER_PREFIX_LEN..header_end])
        .map_err(|e| Error::json("invalid JSON header", e))?;
    let header = Header::from_entries(raw)?;

    Ok((header_end, header))
}

/// Serializes a header with its 8-byte little-endian length prefix.
pub fn encode(header: &Header) -> Result<Vec<u8>> {
    let json =
        serde_json::to_vec(header).map_err(|e| Error::json("failed to serialize header", e))?;

    let mut out = Vec::with_capacity(HEADER_PREFIX_LEN + json.len());
    out.extend_from_slice(&(json.len() as u64).to_le_bytes());
    out.extend_from_slice(&json);
    Ok(out)
}
