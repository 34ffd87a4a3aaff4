//====================================================================

//====================================================================

/// Failures of the manifest and bundle layer. `Clone` so a single failure
/// can be handed to every chain waiting on the same bundle.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BundleError {
    #[error("Root package '{root}' is unavailable: {reason}")]
    ManifestUnavailable { root: String, reason: String },

    #[error("Failed to load bundle '{name}': {reason}")]
    LoadFailed { name: String, reason: String },

    #[error("Dependency cycle between bundles: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Load of bundle '{0}' was cancelled")]
    Cancelled(String),
}

impl BundleError {
    #[inline]
    pub(crate) fn load_failed(name: &str, reason: impl ToString) -> Self {
        Self::LoadFailed {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for errors that make the whole loading subsystem unusable.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, BundleError::ManifestUnavailable { .. })
    }
}

//====================================================================
