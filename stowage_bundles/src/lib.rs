//====================================================================

use std::hash::BuildHasherDefault;

use rustc_hash::FxHasher;

pub mod bundle;
pub mod bundle_loader;
pub mod error;
pub mod format;
pub mod manifest;
pub mod source;

pub use bundle::Bundle;
pub use bundle_loader::{BundleLoader, BundleState, BundleUnload, ChainEvent, ChainId};
pub use error::BundleError;
pub use format::{
    BundleEntry, BundleWriter, FormatError, MANIFEST_ENTRY, MANIFEST_KIND, MAX_DECODE_BYTES,
};
pub use manifest::{DependencyGraph, ManifestResolver};
pub use source::{BundleSource, FileSource, MemorySource};

//====================================================================

pub(crate) type Hasher = BuildHasherDefault<FxHasher>;

//====================================================================
