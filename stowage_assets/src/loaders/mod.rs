//====================================================================

use stowage_bundles::BundleEntry;

use crate::{asset_loader::AssetLoader, Asset};

//====================================================================

impl Asset for String {}

pub struct TextLoader;

impl AssetLoader<String> for TextLoader {
    fn kinds(&self) -> &[&str] {
        &["text"]
    }

    fn load(&self, entry: &BundleEntry) -> anyhow::Result<String> {
        Ok(String::from_utf8(entry.data.clone())?)
    }
}

//====================================================================

impl Asset for Vec<u8> {}

/// Raw entry bytes. Accepts text entries as well.
pub struct BytesLoader;

impl AssetLoader<Vec<u8>> for BytesLoader {
    fn kinds(&self) -> &[&str] {
        &["bytes", "text"]
    }

    fn load(&self, entry: &BundleEntry) -> anyhow::Result<Vec<u8>> {
        Ok(entry.data.clone())
    }
}

//====================================================================
