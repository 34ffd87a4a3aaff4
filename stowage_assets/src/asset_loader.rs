//====================================================================

use std::{marker::PhantomData, sync::Arc};

use stowage_bundles::{Bundle, BundleEntry};

use crate::{error::AssetError, handle::AssetKey, Asset};

//====================================================================

/// Decodes bundle entries into assets of type `A`.
pub trait AssetLoader<A: Asset>: 'static + Send + Sync {
    /// Entry kinds this loader accepts.
    fn kinds(&self) -> &[&str];
    fn load(&self, entry: &BundleEntry) -> anyhow::Result<A>;
}

//====================================================================

pub(crate) trait ErasedLoader: 'static + Send + Sync {
    fn extract(&self, bundle: &Bundle, key: &AssetKey) -> Result<Arc<dyn Asset>, AssetError>;
}

struct TypedLoader<A, L> {
    loader: L,
    phantom: PhantomData<fn() -> A>,
}

impl<A, L> ErasedLoader for TypedLoader<A, L>
where
    A: Asset,
    L: AssetLoader<A>,
{
    fn extract(&self, bundle: &Bundle, key: &AssetKey) -> Result<Arc<dyn Asset>, AssetError> {
        let entry = bundle
            .entry(key.asset())
            .ok_or_else(|| AssetError::NotFoundInBundle(key.clone()))?;

        if !self.loader.kinds().contains(&entry.kind.as_str()) {
            return Err(AssetError::TypeMismatch {
                key: key.clone(),
                stored: entry.kind.clone(),
            });
        }

        log::trace!("Extracting asset {} from bundle '{}'", key, bundle.name());

        let asset = self.loader.load(entry).map_err(|e| AssetError::Decode {
            key: key.clone(),
            reason: format!("{:#}", e),
        })?;

        Ok(Arc::new(asset))
    }
}

#[inline]
pub(crate) fn erase<A: Asset, L: AssetLoader<A>>(loader: L) -> Arc<dyn ErasedLoader> {
    Arc::new(TypedLoader {
        loader,
        phantom: PhantomData::<fn() -> A>,
    })
}

//====================================================================
