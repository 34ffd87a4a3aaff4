//====================================================================

use stowage_bundles::BundleError;

use crate::handle::AssetKey;

//====================================================================

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("Asset {0} was not found in its bundle")]
    NotFoundInBundle(AssetKey),

    #[error("Asset {key} is stored as '{stored}', which does not match the requested type")]
    TypeMismatch { key: AssetKey, stored: String },

    #[error("No loader registered for asset type '{0}'")]
    NoLoader(&'static str),

    #[error("Failed to decode asset {key}: {reason}")]
    Decode { key: AssetKey, reason: String },

    #[error("Load of asset {0} was cancelled")]
    Cancelled(AssetKey),
}

//====================================================================
