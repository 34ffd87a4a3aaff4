//====================================================================

use stowage_shipyard::Plugin;

//====================================================================

pub mod assets {
    pub use stowage_assets::{
        loaders, AssetCache, AssetError, AssetKey, AssetLoader, AssetsPlugin, BackgroundCollector,
        CollectReport, DeferredJobs, EntryInfo, EntryState, Handle, RegisterAssetLoader, Sweeper,
        Ticket, UnusedCollector,
    };
}

pub mod bundles {
    pub use stowage_bundles::{
        Bundle, BundleEntry, BundleError, BundleLoader, BundleSource, BundleState, BundleUnload,
        BundleWriter, ChainEvent, ChainId, DependencyGraph, FileSource, FormatError,
        ManifestResolver, MemorySource, MANIFEST_ENTRY, MANIFEST_KIND, MAX_DECODE_BYTES,
    };
}

pub mod common {
    pub use stowage_common::{
        CancelToken, DeferredSpawner, LoadTask, LoaderConfig, Platform, TaskPoll, TaskSpawner,
        WorkerPool,
    };
}

pub mod runner {
    pub use stowage_runner::{Frame, FramePlugin, Runner};
}

pub mod shipyard_tools {
    pub use stowage_shipyard::{
        prelude, Plugin, Res, ResMut, Stages, UniqueTools, WorkloadBuilder,
    };
}

pub use stowage_assets::Asset;

//====================================================================

/// Asset loading on worker threads.
pub struct DefaultPlugins;

impl Plugin for DefaultPlugins {
    fn build(
        self,
        workload_builder: stowage_shipyard::WorkloadBuilder,
    ) -> stowage_shipyard::WorkloadBuilder {
        workload_builder.add_plugin(assets::AssetsPlugin::new())
    }
}

//====================================================================
