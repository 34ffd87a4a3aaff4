//====================================================================

use std::path::Path;

use bincode::{config, Decode, Encode};

use crate::manifest::DependencyGraph;

//====================================================================

pub const BUNDLE_MAGIC: u32 = u32::from_le_bytes(*b"STOW");
pub const BUNDLE_VERSION: u16 = 1;

/// Name and kind of the entry in the root package that holds the dependency graph.
pub const MANIFEST_ENTRY: &str = "AssetBundleManifest";
pub const MANIFEST_KIND: &str = "manifest";

/// Upper bound on what a single decode may claim. Length prefixes beyond it
/// are rejected before anything is allocated.
pub const MAX_DECODE_BYTES: usize = 256 * 1024 * 1024;

pub(crate) fn decode_config() -> impl config::Config {
    config::standard().with_limit::<MAX_DECODE_BYTES>()
}

//====================================================================

#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("decode failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("bad magic {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported bundle version {found} (expected {expected})")]
    UnsupportedVersion { found: u16, expected: u16 },
}

//====================================================================

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
struct BundleHeader {
    magic: u32,
    version: u16,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    pub name: String,
    pub kind: String,
    pub data: Vec<u8>,
}

#[derive(Encode, Decode, Debug)]
struct BundleFile {
    header: BundleHeader,
    entries: Vec<BundleEntry>,
}

pub(crate) fn decode_entries(bytes: &[u8]) -> Result<Vec<BundleEntry>, FormatError> {
    let (file, _): (BundleFile, usize) = bincode::decode_from_slice(bytes, decode_config())?;

    if file.header.magic != BUNDLE_MAGIC {
        return Err(FormatError::BadMagic(file.header.magic));
    }

    if file.header.version != BUNDLE_VERSION {
        return Err(FormatError::UnsupportedVersion {
            found: file.header.version,
            expected: BUNDLE_VERSION,
        });
    }

    Ok(file.entries)
}

//====================================================================

/// Packs named entries into the on-disk bundle format.
#[derive(Default, Debug, Clone)]
pub struct BundleWriter {
    entries: Vec<BundleEntry>,
}

impl BundleWriter {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, replacing any previous entry with the same name.
    pub fn add(mut self, name: impl Into<String>, kind: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let entry = BundleEntry {
            name: name.into(),
            kind: kind.into(),
            data: data.into(),
        };

        match self.entries.iter_mut().find(|existing| existing.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }

        self
    }

    #[inline]
    pub fn add_text(self, name: impl Into<String>, text: &str) -> Self {
        self.add(name, "text", text.as_bytes())
    }

    pub fn add_manifest(self, graph: &DependencyGraph) -> Result<Self, bincode::error::EncodeError> {
        let data = graph.to_bytes()?;
        Ok(self.add(MANIFEST_ENTRY, MANIFEST_KIND, data))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::error::EncodeError> {
        let file = BundleFile {
            header: BundleHeader {
                magic: BUNDLE_MAGIC,
                version: BUNDLE_VERSION,
            },
            entries: self.entries.clone(),
        };

        bincode::encode_to_vec(&file, config::standard())
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let bytes = self.to_bytes().map_err(std::io::Error::other)?;
        std::fs::write(path, bytes)
    }
}

//====================================================================


//====================================================================
