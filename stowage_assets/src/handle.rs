//====================================================================

use std::{
    any::TypeId,
    hash::{Hash, Hasher},
    ops::Deref,
    sync::Arc,
};

use crate::{error::AssetError, Asset};

//====================================================================

/// Cache identity of an asset: owning bundle, name inside the bundle and
/// the Rust type it is decoded into.
#[derive(Clone, Debug)]
pub struct AssetKey {
    bundle: String,
    asset: String,
    type_id: TypeId,
    type_name: &'static str,
}

impl AssetKey {
    pub fn of<A: Asset>(bundle: impl Into<String>, asset: impl Into<String>) -> Self {
        Self {
            bundle: bundle.into(),
            asset: asset.into(),
            type_id: TypeId::of::<A>(),
            type_name: std::any::type_name::<A>(),
        }
    }

    #[inline]
    pub fn bundle(&self) -> &str {
        &self.bundle
    }

    #[inline]
    pub fn asset(&self) -> &str {
        &self.asset
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl Hash for AssetKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bundle.hash(state);
        self.asset.hash(state);
        self.type_id.hash(state);
    }
}

impl PartialEq for AssetKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.bundle == other.bundle && self.asset == other.asset
    }
}

impl Eq for AssetKey {}

impl std::fmt::Display for AssetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}/{}' ({})", self.bundle, self.asset, self.type_name)
    }
}

//====================================================================

/// Identifies one asynchronous request so its callback can be withdrawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub(crate) u64);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ticket {
    key: AssetKey,
    id: RequestId,
}

impl Ticket {
    #[inline]
    pub(crate) fn new(key: AssetKey, id: RequestId) -> Self {
        Self { key, id }
    }

    #[inline]
    pub fn key(&self) -> &AssetKey {
        &self.key
    }

    #[inline]
    pub fn id(&self) -> RequestId {
        self.id
    }
}

//====================================================================

/// Typed view of a cached asset. Holding a handle keeps the data alive but
/// does not count as a reference: pair every request with a release.
pub struct Handle<A: Asset> {
    key: AssetKey,
    asset: Arc<A>,
}

impl<A: Asset> Handle<A> {
    pub(crate) fn from_erased(key: AssetKey, asset: Arc<dyn Asset>) -> Result<Self, AssetError> {
        match asset.downcast_arc::<A>() {
            Ok(asset) => Ok(Self { key, asset }),
            Err(_) => Err(AssetError::TypeMismatch {
                stored: "a different asset type".into(),
                key,
            }),
        }
    }

    #[inline]
    pub fn key(&self) -> &AssetKey {
        &self.key
    }

    #[inline]
    pub fn inner(&self) -> &A {
        self.asset.as_ref()
    }

    #[inline]
    pub fn arc(&self) -> &Arc<A> {
        &self.asset
    }
}

impl<A: Asset> Clone for Handle<A> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            asset: self.asset.clone(),
        }
    }
}

impl<A: Asset> Deref for Handle<A> {
    type Target = A;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.asset.as_ref()
    }
}

impl<A: Asset> PartialEq for Handle<A> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.asset, &other.asset)
    }
}

impl<A: Asset> std::fmt::Debug for Handle<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle").field("key", &self.key).finish()
    }
}

impl<A> std::fmt::Display for Handle<A>
where
    A: Asset + std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle {}: {}", self.key, self.asset)
    }
}

//====================================================================


//====================================================================
