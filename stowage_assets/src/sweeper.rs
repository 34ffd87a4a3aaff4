//====================================================================

use std::sync::Arc;

use shipyard::Unique;
use stowage_bundles::BundleLoader;
use stowage_common::{LoadTask, TaskPoll, TaskSpawner};

use crate::{asset_cache::AssetCache, Asset};

//====================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectReport {
    /// Assets whose memory was freed by the collection.
    pub released: usize,
    /// Assets still alive through handles held outside the cache.
    pub shared: usize,
}

/// Reclaims assets the cache no longer tracks.
pub trait UnusedCollector: 'static + Send + Sync {
    fn collect(&self, garbage: Vec<Arc<dyn Asset>>) -> LoadTask<CollectReport>;
}

/// Drops swept assets on a spawner thread so large frees stay off the
/// owning thread.
pub struct BackgroundCollector {
    spawner: Arc<dyn TaskSpawner>,
}

impl BackgroundCollector {
    #[inline]
    pub fn new(spawner: Arc<dyn TaskSpawner>) -> Self {
        Self { spawner }
    }
}

impl UnusedCollector for BackgroundCollector {
    fn collect(&self, garbage: Vec<Arc<dyn Asset>>) -> LoadTask<CollectReport> {
        LoadTask::spawn(self.spawner.as_ref(), move |_| {
            garbage
                .into_iter()
                .fold(CollectReport::default(), |mut report, asset| {
                    match Arc::strong_count(&asset) {
                        1 => report.released += 1,
                        _ => report.shared += 1,
                    }
                    report
                })
        })
    }
}

//====================================================================

type DoneCallback = Box<dyn FnOnce(CollectReport) + Send + Sync>;

#[derive(Unique)]
pub struct Sweeper {
    collector: Box<dyn UnusedCollector>,
    running: Vec<(LoadTask<CollectReport>, DoneCallback)>,
}

impl Sweeper {
    #[inline]
    pub fn new(collector: impl UnusedCollector) -> Self {
        Self {
            collector: Box::new(collector),
            running: Vec::new(),
        }
    }

    #[inline]
    pub fn background(spawner: Arc<dyn TaskSpawner>) -> Self {
        Self::new(BackgroundCollector::new(spawner))
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.running.is_empty()
    }

    /// Drops every unreferenced cache entry and collects what they held.
    /// Bundle chains of dropped entries are cancelled. `on_done` runs from a
    /// later [`Sweeper::update`].
    pub fn sweep_unused<F>(&mut self, cache: &mut AssetCache, bundles: &mut BundleLoader, on_done: F)
    where
        F: FnOnce(CollectReport) + Send + Sync + 'static,
    {
        let garbage = cache.remove_unreferenced(bundles);
        self.start(garbage, Box::new(on_done));
    }

    /// Empties the cache regardless of references and collects the result.
    pub fn clear_all<F>(&mut self, cache: &mut AssetCache, bundles: &mut BundleLoader, on_done: F)
    where
        F: FnOnce(CollectReport) + Send + Sync + 'static,
    {
        let garbage = cache.clear(bundles);
        self.start(garbage, Box::new(on_done));
    }

    /// Clears the cache, then unloads every bundle and the manifest.
    pub fn unload_everything<F>(&mut self, cache: &mut AssetCache, bundles: &mut BundleLoader, on_done: F)
    where
        F: FnOnce(CollectReport) + Send + Sync + 'static,
    {
        let garbage = cache.clear(bundles);
        bundles.unload_all();
        self.start(garbage, Box::new(on_done));
    }

    fn start(&mut self, garbage: Vec<Arc<dyn Asset>>, on_done: DoneCallback) {
        log::debug!("Collecting {} swept assets", garbage.len());

        let task = self.collector.collect(garbage);
        self.running.push((task, on_done));
    }

    /// Reports finished collections. Returns how many finished.
    pub fn update(&mut self) -> usize {
        let mut finished = 0;

        std::mem::take(&mut self.running)
            .into_iter()
            .for_each(|(mut task, on_done)| match task.poll() {
                TaskPoll::Pending => self.running.push((task, on_done)),
                TaskPoll::Ready(report) => {
                    log::debug!(
                        "Collection done: {} released, {} still shared",
                        report.released,
                        report.shared
                    );
                    finished += 1;
                    on_done(report);
                }
                TaskPoll::Cancelled => {
                    log::warn!("Collection ended without a report");
                    finished += 1;
                    on_done(CollectReport::default());
                }
            });

        finished
    }
}

//====================================================================

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use stowage_bundles::{BundleState, BundleWriter, DependencyGraph, MemorySource};
    use stowage_common::DeferredSpawner;

    use super::*;
    use crate::{handle::AssetKey, loaders::TextLoader};

    fn setup() -> (Arc<DeferredSpawner>, BundleLoader, AssetCache) {
        let graph = DependencyGraph::new().with_bundle("ui", ["common"]);
        let root = BundleWriter::new().add_manifest(&graph).unwrap();
        let ui = BundleWriter::new()
            .add_text("MainMenu", "menu")
            .add_text("Options", "options");

        let source = Arc::new(
            MemorySource::new()
                .with("PC", root.to_bytes().unwrap())
                .with("common", BundleWriter::new().to_bytes().unwrap())
                .with("ui", ui.to_bytes().unwrap()),
        );
        let spawner = Arc::new(DeferredSpawner::new());

        let bundles = BundleLoader::new(source, spawner.clone(), "PC");
        let mut cache = AssetCache::new(spawner.clone());
        cache.register_loader(TextLoader);

        (spawner, bundles, cache)
    }

    fn report_into(slot: &Arc<Mutex<Option<CollectReport>>>) -> impl FnOnce(CollectReport) + Send + Sync + 'static {
        let slot = slot.clone();
        move |report| *slot.lock() = Some(report)
    }

    #[test]
    fn sweep_removes_only_unreferenced_entries() {
        let (spawner, mut bundles, mut cache) = setup();
        let mut sweeper = Sweeper::background(spawner.clone());
        let report = Arc::new(Mutex::new(None));

        cache.request_sync::<String>(&mut bundles, "ui", "MainMenu").unwrap();
        cache.release::<String>("ui", "MainMenu", false);

        cache.request_sync::<String>(&mut bundles, "ui", "Options").unwrap();
        cache.request_sync::<String>(&mut bundles, "ui", "Options").unwrap();

        sweeper.sweep_unused(&mut cache, &mut bundles, report_into(&report));

        assert!(!cache.contains(&AssetKey::of::<String>("ui", "MainMenu")));
        assert_eq!(
            cache.entry_info(&AssetKey::of::<String>("ui", "Options")).unwrap().ref_count,
            2
        );

        assert_eq!(sweeper.update(), 0);
        assert!(report.lock().is_none());

        spawner.run_pending();
        assert_eq!(sweeper.update(), 1);
        assert_eq!(
            *report.lock(),
            Some(CollectReport {
                released: 1,
                shared: 0
            })
        );
        assert!(sweeper.is_idle());
    }

    #[test]
    fn assets_held_outside_are_counted_as_shared() {
        let (spawner, mut bundles, mut cache) = setup();
        let mut sweeper = Sweeper::background(spawner.clone());
        let report = Arc::new(Mutex::new(None));

        let held = cache.request_sync::<String>(&mut bundles, "ui", "MainMenu").unwrap();
        cache.request_sync::<String>(&mut bundles, "ui", "Options").unwrap();

        sweeper.clear_all(&mut cache, &mut bundles, report_into(&report));
        assert!(cache.is_empty());

        spawner.run_pending();
        sweeper.update();

        assert_eq!(
            *report.lock(),
            Some(CollectReport {
                released: 1,
                shared: 1
            })
        );
        assert_eq!(held.as_str(), "menu");
    }

    #[test]
    fn sweep_stops_loads_nobody_waits_for() {
        let (spawner, mut bundles, mut cache) = setup();
        let mut sweeper = Sweeper::background(spawner.clone());
        let report = Arc::new(Mutex::new(None));

        let ticket = cache.request_async::<String, _>(&mut bundles, "ui", "MainMenu", |_| {});
        cache.release_ticket(ticket, false);

        sweeper.sweep_unused(&mut cache, &mut bundles, report_into(&report));
        assert!(cache.is_empty());

        for _ in 0..4 {
            spawner.run_pending();
            cache.update(&mut bundles);
            sweeper.update();
        }

        assert_eq!(bundles.state("ui"), BundleState::Unloaded);
        assert!(bundles.is_idle());
        assert_eq!(*report.lock(), Some(CollectReport::default()));
    }

    #[test]
    fn unload_everything_drops_bundles() {
        let (spawner, mut bundles, mut cache) = setup();
        let mut sweeper = Sweeper::background(spawner.clone());
        let report = Arc::new(Mutex::new(None));

        cache.request_sync::<String>(&mut bundles, "ui", "MainMenu").unwrap();
        assert_eq!(bundles.state("ui"), BundleState::Loaded);

        sweeper.unload_everything(&mut cache, &mut bundles, report_into(&report));

        assert!(cache.is_empty());
        assert_eq!(bundles.state("ui"), BundleState::Unloaded);
        assert_eq!(bundles.loaded_count(), 0);

        spawner.run_pending();
        sweeper.update();
        assert_eq!(report.lock().map(|report| report.released), Some(1));
    }
}

//====================================================================
