//====================================================================

use std::{hash::BuildHasherDefault, sync::Arc};

use downcast_rs::{impl_downcast, DowncastSync};
use rustc_hash::FxHasher;
use shipyard::{AllStoragesView, IntoWorkload, SystemModificator, Unique};
use stowage_bundles::BundleLoader;
use stowage_common::{DeferredSpawner, LoaderConfig, TaskSpawner, WorkerPool};
use stowage_shipyard::{prelude::*, UniqueTools};

pub mod asset_cache;
pub mod asset_loader;
pub mod error;
pub mod handle;
pub mod loaders;
pub mod sweeper;

pub use asset_cache::{AssetCache, EntryInfo, EntryState};
pub use asset_loader::AssetLoader;
pub use error::AssetError;
pub use handle::{AssetKey, Handle, RequestId, Ticket};
pub use sweeper::{BackgroundCollector, CollectReport, Sweeper, UnusedCollector};

//====================================================================

pub(crate) type Hasher = BuildHasherDefault<FxHasher>;

pub trait Asset: Send + Sync + DowncastSync {}
impl_downcast!(sync Asset);

//====================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Scheduling {
    #[default]
    Workers,
    Deferred,
}

/// Creates the loading tables in dependency order (config, bundle loader,
/// asset cache, sweeper) and drives them from the frame stages.
///
/// Uniques already present in the world are kept, so a host can insert its
/// own [`LoaderConfig`] or [`BundleLoader`] before adding the plugin.
#[derive(Default)]
pub struct AssetsPlugin {
    scheduling: Scheduling,
}

impl AssetsPlugin {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Background jobs run at the start of each frame on the owning thread
    /// instead of on worker threads.
    #[inline]
    pub fn deferred() -> Self {
        Self {
            scheduling: Scheduling::Deferred,
        }
    }
}

#[derive(Unique)]
pub struct DeferredJobs(Arc<DeferredSpawner>);

impl DeferredJobs {
    #[inline]
    pub fn spawner(&self) -> &Arc<DeferredSpawner> {
        &self.0
    }
}

impl Plugin for AssetsPlugin {
    fn build(self, builder: WorkloadBuilder) -> WorkloadBuilder {
        let world = builder.world();

        world.insert_if_missing(LoaderConfig::default);
        let config = world.run(|config: Res<LoaderConfig>| (*config).clone());

        let deferred = || {
            let spawner = Arc::new(DeferredSpawner::new());
            world.insert(DeferredJobs(spawner.clone()));
            spawner as Arc<dyn TaskSpawner>
        };

        let spawner = match self.scheduling {
            Scheduling::Workers => match WorkerPool::new(config.worker_threads()) {
                Ok(pool) => Arc::new(pool) as Arc<dyn TaskSpawner>,
                Err(e) => {
                    log::error!("Failed to start worker pool, running jobs per frame: {}", e);
                    deferred()
                }
            },
            Scheduling::Deferred => deferred(),
        };

        world.insert_if_missing(|| BundleLoader::from_config(&config, spawner.clone()));
        world.insert_if_missing(|| AssetCache::new(spawner.clone()));
        world.insert_if_missing(|| Sweeper::background(spawner.clone()));

        let update = match world.contains_unique::<DeferredJobs>() {
            true => (
                sys_run_deferred_jobs,
                sys_update_loading.after_all(sys_run_deferred_jobs),
            )
                .into_workload(),
            false => (sys_update_loading).into_workload(),
        };

        builder
            .register_loader(loaders::TextLoader)
            .register_loader(loaders::BytesLoader)
            .add_workload(Stages::First, update)
            .add_workload(Stages::Last, (sys_update_sweeper).into_workload())
            .add_workload(Stages::Shutdown, (sys_teardown_loading).into_workload())
    }
}

fn sys_run_deferred_jobs(jobs: Res<DeferredJobs>) {
    jobs.0.run_pending();
}

fn sys_update_loading(mut cache: ResMut<AssetCache>, mut bundles: ResMut<BundleLoader>) {
    cache.update(&mut bundles);
}

fn sys_update_sweeper(mut sweeper: ResMut<Sweeper>) {
    sweeper.update();
}

fn sys_teardown_loading(all_storages: AllStoragesView) {
    let cache = all_storages.remove_unique::<AssetCache>();
    let bundles = all_storages.remove_unique::<BundleLoader>();

    match (cache, bundles) {
        (Ok(mut cache), Ok(mut bundles)) => {
            let dropped = cache.clear(&mut bundles);
            bundles.unload_all();

            log::debug!("Loading torn down, dropped {} cached assets", dropped.len());
        }
        _ => log::warn!("Loading tables were already removed before teardown"),
    }

    all_storages.remove_unique::<Sweeper>().ok();
    all_storages.remove_unique::<DeferredJobs>().ok();
}

//====================================================================

pub trait RegisterAssetLoader {
    fn register_loader<A: Asset>(self, loader: impl AssetLoader<A>) -> Self;
}

impl RegisterAssetLoader for WorkloadBuilder<'_> {
    fn register_loader<A: Asset>(self, loader: impl AssetLoader<A>) -> Self {
        match self.world().borrow::<ResMut<AssetCache>>() {
            Ok(mut cache) => cache.register_loader(loader),
            Err(e) => log::error!(
                "Cannot register loader for '{}' without an asset cache: {:?}",
                std::any::type_name::<A>(),
                e
            ),
        };

        self
    }
}

//====================================================================


//====================================================================
