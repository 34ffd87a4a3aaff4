//====================================================================

use std::{any::TypeId, collections::HashMap, sync::Arc};

use shipyard::Unique;
use stowage_bundles::{Bundle, BundleLoader, ChainEvent, ChainId};
use stowage_common::{LoadTask, TaskPoll, TaskSpawner};

use crate::{
    asset_loader::{self, AssetLoader, ErasedLoader},
    error::AssetError,
    handle::{AssetKey, Handle, RequestId, Ticket},
    Asset, Hasher,
};

//====================================================================

pub(crate) type ErasedResult = Result<Arc<dyn Asset>, AssetError>;

type Callback = Box<dyn FnOnce(ErasedResult) + Send + Sync>;

fn typed_callback<A, F>(key: AssetKey, on_ready: F) -> Callback
where
    A: Asset,
    F: FnOnce(Result<Handle<A>, AssetError>) + Send + Sync + 'static,
{
    Box::new(move |result: ErasedResult| {
        on_ready(result.and_then(|asset| Handle::from_erased(key, asset)))
    })
}

struct PendingCallback {
    id: RequestId,
    callback: Callback,
}

//====================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryState {
    Unloaded,
    Loading,
    Loaded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryInfo {
    pub state: EntryState,
    pub ref_count: u32,
    pub pending_callbacks: usize,
    pub marked_for_deletion: bool,
}

/// Work an entry is waiting on: its bundle chain first, then extraction.
enum InFlight {
    Bundle(ChainId),
    Extract(LoadTask<ErasedResult>),
}

enum EntrySlot {
    Unloaded,
    Loading(InFlight),
    Loaded(Arc<dyn Asset>),
}

struct CacheEntry {
    slot: EntrySlot,
    ref_count: u32,
    pending: Vec<PendingCallback>,
    marked_for_deletion: bool,
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            slot: EntrySlot::Unloaded,
            ref_count: 0,
            pending: Vec::new(),
            marked_for_deletion: false,
        }
    }

    #[inline]
    fn state(&self) -> EntryState {
        match self.slot {
            EntrySlot::Unloaded => EntryState::Unloaded,
            EntrySlot::Loading(_) => EntryState::Loading,
            EntrySlot::Loaded(_) => EntryState::Loaded,
        }
    }

    #[inline]
    fn loaded(&self) -> Option<Arc<dyn Asset>> {
        match &self.slot {
            EntrySlot::Loaded(asset) => Some(asset.clone()),
            _ => None,
        }
    }

    #[inline]
    fn should_evict(&self) -> bool {
        self.state() == EntryState::Loaded && self.ref_count == 0 && self.marked_for_deletion
    }

    fn info(&self) -> EntryInfo {
        EntryInfo {
            state: self.state(),
            ref_count: self.ref_count,
            pending_callbacks: self.pending.len(),
            marked_for_deletion: self.marked_for_deletion,
        }
    }
}

fn run_callbacks(pending: Vec<PendingCallback>, result: ErasedResult) {
    pending
        .into_iter()
        .for_each(|pending| (pending.callback)(result.clone()));
}

//====================================================================

/// Reference counted table of typed assets extracted from bundles.
///
/// Every mutation happens on the thread that owns the cache. Background
/// work (bundle reads, extraction) only produces results that
/// [`AssetCache::update`] picks up.
#[derive(Unique)]
pub struct AssetCache {
    spawner: Arc<dyn TaskSpawner>,
    loaders: HashMap<TypeId, Arc<dyn ErasedLoader>, Hasher>,

    entries: HashMap<AssetKey, CacheEntry, Hasher>,
    chain_owners: HashMap<ChainId, AssetKey, Hasher>,
    next_request: u64,
}

impl AssetCache {
    pub fn new(spawner: Arc<dyn TaskSpawner>) -> Self {
        Self {
            spawner,
            loaders: HashMap::default(),

            entries: HashMap::default(),
            chain_owners: HashMap::default(),
            next_request: 0,
        }
    }

    pub fn register_loader<A: Asset, L: AssetLoader<A>>(&mut self, loader: L) {
        log::trace!(
            "Registering loader '{}' for asset type '{}'",
            std::any::type_name::<L>(),
            std::any::type_name::<A>()
        );

        if self
            .loaders
            .insert(TypeId::of::<A>(), asset_loader::erase(loader))
            .is_some()
        {
            log::warn!(
                "Replaced existing loader for asset type '{}'",
                std::any::type_name::<A>()
            );
        }
    }

    #[inline]
    pub fn has_loader<A: Asset>(&self) -> bool {
        self.loaders.contains_key(&TypeId::of::<A>())
    }

    fn loader_for(&self, key: &AssetKey) -> Result<Arc<dyn ErasedLoader>, AssetError> {
        self.loaders
            .get(&key.type_id())
            .cloned()
            .ok_or(AssetError::NoLoader(key.type_name()))
    }

    fn next_request_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request);
        self.next_request += 1;
        id
    }
}

//--------------------------------------------------

impl AssetCache {
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn contains(&self, key: &AssetKey) -> bool {
        self.entries.contains_key(key)
    }

    #[inline]
    pub fn entry_info(&self, key: &AssetKey) -> Option<EntryInfo> {
        self.entries.get(key).map(CacheEntry::info)
    }

    /// Loaded asset without touching its reference count.
    pub fn peek<A: Asset>(&self, bundle: &str, asset: &str) -> Option<Handle<A>> {
        let key = AssetKey::of::<A>(bundle, asset);
        let asset = self.entries.get(&key)?.loaded()?;

        Handle::from_erased(key, asset).ok()
    }

    /// No entry is waiting on a bundle or an extraction.
    pub fn is_idle(&self) -> bool {
        self.chain_owners.is_empty()
            && self
                .entries
                .values()
                .all(|entry| entry.state() != EntryState::Loading)
    }
}

//--------------------------------------------------

impl AssetCache {
    /// Takes a reference on the asset and reports it through `on_ready`,
    /// immediately when cached, otherwise from a later [`AssetCache::update`].
    /// Requests made while a load is in flight share that load.
    pub fn request_async<A, F>(
        &mut self,
        bundles: &mut BundleLoader,
        bundle: &str,
        asset: &str,
        on_ready: F,
    ) -> Ticket
    where
        A: Asset,
        F: FnOnce(Result<Handle<A>, AssetError>) + Send + Sync + 'static,
    {
        let key = AssetKey::of::<A>(bundle, asset);
        let id = self.next_request_id();
        let ticket = Ticket::new(key.clone(), id);
        let callback = typed_callback::<A, F>(key.clone(), on_ready);

        if let Err(error) = self.loader_for(&key) {
            log::error!("Cannot load asset {}: {}", key, error);
            callback(Err(error));
            return ticket;
        }

        let entry = self.entries.entry(key.clone()).or_insert_with(CacheEntry::new);
        entry.ref_count += 1;

        if let Some(asset) = entry.loaded() {
            log::trace!("Asset {} already loaded ({} refs)", key, entry.ref_count);
            callback(Ok(asset));
            return ticket;
        }

        entry.pending.push(PendingCallback { id, callback });

        if entry.state() == EntryState::Unloaded {
            self.dispatch(bundles, key);
        }

        ticket
    }

    /// Loads the asset on the calling thread and takes a reference on it.
    /// A load already in flight for the same key is cancelled and replaced;
    /// its waiting callbacks receive the result of this load.
    pub fn request_sync<A: Asset>(
        &mut self,
        bundles: &mut BundleLoader,
        bundle: &str,
        asset: &str,
    ) -> Result<Handle<A>, AssetError> {
        let key = AssetKey::of::<A>(bundle, asset);
        let loader = self.loader_for(&key)?;

        if let Some(entry) = self.entries.get_mut(&key) {
            if let Some(asset) = entry.loaded() {
                entry.ref_count += 1;
                return Handle::from_erased(key, asset);
            }
        }

        self.cancel_in_flight(bundles, &key);

        log::debug!("Loading asset {} (blocking)", key);

        let result = bundles
            .load_blocking(key.bundle())
            .map_err(AssetError::from)
            .and_then(|bundle| loader.extract(&bundle, &key));

        match result {
            Ok(asset) => {
                let entry = self.entries.entry(key.clone()).or_insert_with(CacheEntry::new);
                entry.slot = EntrySlot::Loaded(asset.clone());
                entry.ref_count += 1;

                let pending = std::mem::take(&mut entry.pending);
                if !pending.is_empty() {
                    log::trace!("Flushing {} waiting callbacks for {}", pending.len(), key);
                }

                run_callbacks(pending, Ok(asset.clone()));
                Handle::from_erased(key, asset)
            }

            Err(error) => {
                self.fail_entry(&key, error.clone());
                Err(error)
            }
        }
    }

    /// Single entry point for collaborators: blocking requests report
    /// through `on_ready` before returning.
    pub fn load<A, F>(
        &mut self,
        bundles: &mut BundleLoader,
        bundle: &str,
        asset: &str,
        blocking: bool,
        on_ready: F,
    ) -> Ticket
    where
        A: Asset,
        F: FnOnce(Result<Handle<A>, AssetError>) + Send + Sync + 'static,
    {
        match blocking {
            true => {
                let id = self.next_request_id();
                on_ready(self.request_sync::<A>(bundles, bundle, asset));
                Ticket::new(AssetKey::of::<A>(bundle, asset), id)
            }
            false => self.request_async(bundles, bundle, asset, on_ready),
        }
    }

    fn dispatch(&mut self, bundles: &mut BundleLoader, key: AssetKey) {
        match bundles.begin_load(key.bundle()) {
            Ok(chain) => {
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.slot = EntrySlot::Loading(InFlight::Bundle(chain));
                }
                self.chain_owners.insert(chain, key);
            }
            Err(error) => self.fail_entry(&key, error.into()),
        }
    }

    fn cancel_in_flight(&mut self, bundles: &mut BundleLoader, key: &AssetKey) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };

        match std::mem::replace(&mut entry.slot, EntrySlot::Unloaded) {
            EntrySlot::Loading(InFlight::Bundle(chain)) => {
                log::debug!("Cancelling bundle chain of asset {}", key);
                bundles.cancel_chain(chain);
                self.chain_owners.remove(&chain);
            }
            EntrySlot::Loading(InFlight::Extract(task)) => {
                log::debug!("Cancelling extraction of asset {}", key);
                task.cancel();
            }
            other => entry.slot = other,
        }
    }
}

//--------------------------------------------------

impl AssetCache {
    #[inline]
    pub fn release<A: Asset>(&mut self, bundle: &str, asset: &str, mark_for_deletion: bool) -> bool {
        self.release_key(&AssetKey::of::<A>(bundle, asset), mark_for_deletion)
    }

    #[inline]
    pub fn release_handle<A: Asset>(&mut self, handle: Handle<A>, mark_for_deletion: bool) -> bool {
        self.release_inner(handle.key(), mark_for_deletion, None)
    }

    /// Releases the reference taken by an asynchronous request. If the
    /// asset is still loading, that request's callback is withdrawn.
    #[inline]
    pub fn release_ticket(&mut self, ticket: Ticket, mark_for_deletion: bool) -> bool {
        self.release_inner(ticket.key(), mark_for_deletion, Some(ticket.id()))
    }

    #[inline]
    pub fn release_key(&mut self, key: &AssetKey, mark_for_deletion: bool) -> bool {
        self.release_inner(key, mark_for_deletion, None)
    }

    /// Returns true if the entry was evicted.
    fn release_inner(&mut self, key: &AssetKey, mark_for_deletion: bool, request: Option<RequestId>) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            log::trace!("Released asset {} which is not cached", key);
            return false;
        };

        match entry.ref_count {
            0 => log::warn!("Reference count underflow on asset {}, clamping at zero", key),
            _ => entry.ref_count -= 1,
        }

        if mark_for_deletion {
            entry.marked_for_deletion = true;
        }

        if entry.should_evict() {
            self.evict(key);
            return true;
        }

        if let (Some(id), false) = (request, entry.state() == EntryState::Loaded) {
            let before = entry.pending.len();
            entry.pending.retain(|pending| pending.id != id);

            if entry.pending.len() != before {
                log::trace!("Withdrew callback {:?} from asset {}", id, key);
            }
        }

        false
    }

    fn evict(&mut self, key: &AssetKey) -> Option<Arc<dyn Asset>> {
        let entry = self.entries.remove(key)?;
        log::debug!("Evicted asset {}", key);

        entry.loaded()
    }
}

//--------------------------------------------------

impl AssetCache {
    /// Steps bundle loading, starts extraction for bundles that arrived and
    /// completes finished extractions.
    pub fn update(&mut self, bundles: &mut BundleLoader) {
        bundles.update().into_iter().for_each(|event| {
            let Some(key) = self.chain_owners.remove(&event.chain()) else {
                log::trace!("Dropping event for unowned chain {:?}", event.chain());
                return;
            };

            match event {
                ChainEvent::Ready { bundle, .. } => self.start_extract(key, bundle),
                ChainEvent::Failed { error, .. } => self.fail_entry(&key, error.into()),
            }
        });

        let finished = self
            .entries
            .iter_mut()
            .filter_map(|(key, entry)| match &mut entry.slot {
                EntrySlot::Loading(InFlight::Extract(task)) => match task.poll() {
                    TaskPoll::Pending => None,
                    TaskPoll::Ready(result) => Some((key.clone(), result)),
                    TaskPoll::Cancelled => Some((key.clone(), Err(AssetError::Cancelled(key.clone())))),
                },
                _ => None,
            })
            .collect::<Vec<_>>();

        finished.into_iter().for_each(|(key, result)| match result {
            Ok(asset) => self.complete_entry(&key, asset),
            Err(error) => self.fail_entry(&key, error),
        });
    }

    fn start_extract(&mut self, key: AssetKey, bundle: Arc<Bundle>) {
        let loader = match self.loader_for(&key) {
            Ok(loader) => loader,
            Err(error) => return self.fail_entry(&key, error),
        };

        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };

        log::trace!("Bundle '{}' ready, extracting {}", bundle.name(), key);

        let job_key = key.clone();
        let task = LoadTask::spawn(self.spawner.as_ref(), move |_| {
            loader.extract(&bundle, &job_key)
        });

        entry.slot = EntrySlot::Loading(InFlight::Extract(task));
    }

    fn complete_entry(&mut self, key: &AssetKey, asset: Arc<dyn Asset>) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };

        entry.slot = EntrySlot::Loaded(asset.clone());
        let pending = std::mem::take(&mut entry.pending);
        let evict = entry.should_evict();

        log::debug!("Asset {} loaded, notifying {} callbacks", key, pending.len());

        run_callbacks(pending, Ok(asset));

        if evict {
            self.evict(key);
        }
    }

    /// Removes the entry and reports `error` to every waiting callback.
    fn fail_entry(&mut self, key: &AssetKey, error: AssetError) {
        let Some(entry) = self.entries.remove(key) else {
            return;
        };

        log::error!("Failed to load asset {}: {}", key, error);

        match entry.slot {
            EntrySlot::Loading(InFlight::Bundle(chain)) => {
                self.chain_owners.remove(&chain);
            }
            EntrySlot::Loading(InFlight::Extract(task)) => task.cancel(),
            _ => {}
        }

        run_callbacks(entry.pending, Err(error));
    }

    /// Drops the entry. Loads in flight are cancelled and their callbacks
    /// receive [`AssetError::Cancelled`].
    fn discard(&mut self, bundles: &mut BundleLoader, key: &AssetKey) -> Option<Arc<dyn Asset>> {
        let entry = self.entries.remove(key)?;

        let asset = match entry.slot {
            EntrySlot::Loaded(asset) => Some(asset),
            EntrySlot::Loading(InFlight::Bundle(chain)) => {
                bundles.cancel_chain(chain);
                self.chain_owners.remove(&chain);
                None
            }
            EntrySlot::Loading(InFlight::Extract(task)) => {
                task.cancel();
                None
            }
            EntrySlot::Unloaded => None,
        };

        run_callbacks(entry.pending, Err(AssetError::Cancelled(key.clone())));

        asset
    }
}

//--------------------------------------------------

impl AssetCache {
    /// Removes every entry nobody holds a reference on, loaded or not.
    /// Returns the removed assets so the caller decides where they drop.
    pub fn remove_unreferenced(&mut self, bundles: &mut BundleLoader) -> Vec<Arc<dyn Asset>> {
        let keys = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.ref_count == 0)
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();

        log::debug!("Removing {} unreferenced assets", keys.len());

        keys.iter().filter_map(|key| self.discard(bundles, key)).collect()
    }

    /// Empties the table regardless of reference counts.
    pub fn clear(&mut self, bundles: &mut BundleLoader) -> Vec<Arc<dyn Asset>> {
        let keys = self.entries.keys().cloned().collect::<Vec<_>>();

        log::debug!("Clearing {} cached assets", keys.len());

        keys.iter().filter_map(|key| self.discard(bundles, key)).collect()
    }
}

//====================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use stowage_bundles::{
        BundleEntry, BundleError, BundleState, BundleWriter, DependencyGraph, MemorySource,
    };
    use stowage_common::DeferredSpawner;

    use super::*;
    use crate::loaders::{BytesLoader, TextLoader};

    //--------------------------------------------------

    #[derive(Debug)]
    struct Prefab(String);
    impl Asset for Prefab {}

    struct PrefabLoader(Arc<AtomicUsize>);

    impl AssetLoader<Prefab> for PrefabLoader {
        fn kinds(&self) -> &[&str] {
            &["prefab"]
        }

        fn load(&self, entry: &BundleEntry) -> anyhow::Result<Prefab> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Prefab(String::from_utf8(entry.data.clone())?))
        }
    }

    struct Unregistered;
    impl Asset for Unregistered {}

    type Results<A> = Arc<Mutex<Vec<Result<Handle<A>, AssetError>>>>;

    fn results<A: Asset>() -> Results<A> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn record<A: Asset>(results: &Results<A>) -> impl FnOnce(Result<Handle<A>, AssetError>) + Send + Sync + 'static {
        let results = results.clone();
        move |result| results.lock().push(result)
    }

    struct Fixture {
        source: Arc<MemorySource>,
        spawner: Arc<DeferredSpawner>,
        bundles: BundleLoader,
        cache: AssetCache,
        loads: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new() -> Self {
            let graph = DependencyGraph::new().with_bundle("ui", ["common"]);
            let root = BundleWriter::new().add_manifest(&graph).unwrap();

            let common = BundleWriter::new().add_text("Font", "mono");
            let ui = BundleWriter::new()
                .add("MainMenu", "prefab", "menu")
                .add("Options", "prefab", "options")
                .add("Click", "bytes", vec![1u8, 2, 3]);

            let source = Arc::new(
                MemorySource::new()
                    .with("PC", root.to_bytes().unwrap())
                    .with("common", common.to_bytes().unwrap())
                    .with("ui", ui.to_bytes().unwrap()),
            );
            let spawner = Arc::new(DeferredSpawner::new());
            let loads = Arc::new(AtomicUsize::new(0));

            let bundles = BundleLoader::new(source.clone(), spawner.clone(), "PC");
            let mut cache = AssetCache::new(spawner.clone());
            cache.register_loader(TextLoader);
            cache.register_loader(BytesLoader);
            cache.register_loader(PrefabLoader(loads.clone()));

            Self {
                source,
                spawner,
                bundles,
                cache,
                loads,
            }
        }

        fn step(&mut self) {
            self.spawner.run_pending();
            self.cache.update(&mut self.bundles);
        }

        fn pump(&mut self) {
            for _ in 0..16 {
                self.step();

                if self.cache.is_idle() && self.bundles.is_idle() && self.spawner.pending() == 0 {
                    break;
                }
            }
        }

        fn request_async(&mut self, asset: &str, results: &Results<Prefab>) -> Ticket {
            self.cache
                .request_async(&mut self.bundles, "ui", asset, record(results))
        }

        fn request_sync(&mut self, asset: &str) -> Result<Handle<Prefab>, AssetError> {
            self.cache.request_sync(&mut self.bundles, "ui", asset)
        }

        fn info(&self, asset: &str) -> Option<EntryInfo> {
            self.cache.entry_info(&AssetKey::of::<Prefab>("ui", asset))
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    //--------------------------------------------------

    #[test]
    fn sync_request_loads_dependencies_first() {
        let mut fixture = Fixture::new();

        let menu = fixture.request_sync("MainMenu").unwrap();

        assert_eq!(menu.0, "menu");
        assert_eq!(fixture.source.read_log(), vec!["PC", "common", "ui"]);
        assert_eq!(fixture.cache.len(), 1);
        assert_eq!(
            fixture.info("MainMenu"),
            Some(EntryInfo {
                state: EntryState::Loaded,
                ref_count: 1,
                pending_callbacks: 0,
                marked_for_deletion: false,
            })
        );
    }

    #[test]
    fn async_requests_share_one_load() {
        let mut fixture = Fixture::new();
        let results = results::<Prefab>();

        (0..3).for_each(|_| {
            fixture.request_async("MainMenu", &results);
        });

        let info = fixture.info("MainMenu").unwrap();
        assert_eq!(info.state, EntryState::Loading);
        assert_eq!(info.ref_count, 3);
        assert_eq!(info.pending_callbacks, 3);

        fixture.pump();

        let results = results.lock();
        assert_eq!(results.len(), 3);

        let first = results[0].as_ref().unwrap();
        assert!(results.iter().all(|result| result.as_ref().unwrap() == first));

        assert_eq!(fixture.loads(), 1);
        assert_eq!(fixture.source.read_count("ui"), 1);
        assert_eq!(fixture.info("MainMenu").unwrap().ref_count, 3);
    }

    #[test]
    fn request_for_loaded_asset_answers_immediately() {
        let mut fixture = Fixture::new();
        let results = results::<Prefab>();

        fixture.request_sync("MainMenu").unwrap();
        fixture.request_async("MainMenu", &results);

        assert_eq!(results.lock().len(), 1);
        assert_eq!(fixture.info("MainMenu").unwrap().ref_count, 2);
        assert_eq!(fixture.loads(), 1);
    }

    #[test]
    fn release_while_loading_keeps_callbacks() {
        let mut fixture = Fixture::new();
        let results = results::<Prefab>();

        fixture.request_async("MainMenu", &results);
        fixture.request_async("MainMenu", &results);
        assert!(!fixture.cache.release::<Prefab>("ui", "MainMenu", true));

        fixture.pump();

        assert_eq!(results.lock().len(), 2);
        let info = fixture.info("MainMenu").unwrap();
        assert_eq!(info.ref_count, 1);
        assert!(info.marked_for_deletion);

        assert!(fixture.cache.release::<Prefab>("ui", "MainMenu", false));
        assert!(fixture.cache.is_empty());
    }

    #[test]
    fn released_ticket_withdraws_only_its_callback() {
        let mut fixture = Fixture::new();
        let first = results::<Prefab>();
        let second = results::<Prefab>();

        let ticket = fixture.request_async("MainMenu", &first);
        fixture.request_async("MainMenu", &second);

        fixture.cache.release_ticket(ticket, false);
        assert_eq!(fixture.info("MainMenu").unwrap().pending_callbacks, 1);

        fixture.pump();

        assert!(first.lock().is_empty());
        assert_eq!(second.lock().len(), 1);
        assert_eq!(fixture.info("MainMenu").unwrap().ref_count, 1);
    }

    #[test]
    fn sync_request_preempts_bundle_chain() {
        let mut fixture = Fixture::new();
        let results = results::<Prefab>();

        fixture.request_async("MainMenu", &results);
        let menu = fixture.request_sync("MainMenu").unwrap();

        let results = results.lock();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap(), &menu);
        drop(results);

        fixture.pump();

        assert_eq!(fixture.loads(), 1);
        assert_eq!(fixture.source.read_count("common"), 1);
        assert_eq!(fixture.source.read_count("ui"), 1);
        assert_eq!(fixture.info("MainMenu").unwrap().ref_count, 2);
    }

    #[test]
    fn sync_request_preempts_extraction() {
        let mut fixture = Fixture::new();
        let results = results::<Prefab>();

        fixture.request_async("MainMenu", &results);

        // common, then ui. The finished chain starts extraction.
        fixture.step();
        fixture.step();
        assert_eq!(fixture.info("MainMenu").unwrap().state, EntryState::Loading);
        assert_eq!(fixture.spawner.pending(), 1);

        let menu = fixture.request_sync("MainMenu").unwrap();
        assert_eq!(results.lock()[0].as_ref().unwrap(), &menu);

        fixture.pump();

        assert_eq!(fixture.loads(), 1);
        assert_eq!(results.lock().len(), 1);
        assert_eq!(fixture.info("MainMenu").unwrap().ref_count, 2);
    }

    #[test]
    fn request_release_round_trip() {
        let mut fixture = Fixture::new();

        for _ in 0..5 {
            fixture.request_sync("MainMenu").unwrap();
            assert!(!fixture.cache.release::<Prefab>("ui", "MainMenu", false));
        }

        assert_eq!(fixture.cache.len(), 1);
        assert_eq!(fixture.info("MainMenu").unwrap().ref_count, 0);
        assert_eq!(fixture.loads(), 1);
    }

    #[test]
    fn eviction_needs_mark_and_zero_references() {
        let mut fixture = Fixture::new();

        let first = fixture.request_sync("MainMenu").unwrap();
        fixture.request_sync("MainMenu").unwrap();

        assert!(!fixture.cache.release_handle(first, true));
        assert!(fixture.cache.contains(&AssetKey::of::<Prefab>("ui", "MainMenu")));

        assert!(fixture.cache.release::<Prefab>("ui", "MainMenu", false));
        assert!(fixture.cache.is_empty());
    }

    #[test]
    fn marked_unreferenced_asset_is_evicted_on_completion() {
        let mut fixture = Fixture::new();
        let results = results::<Prefab>();

        let ticket = fixture.request_async("MainMenu", &results);
        fixture.cache.release_ticket(ticket, true);

        let info = fixture.info("MainMenu").unwrap();
        assert_eq!(info.ref_count, 0);
        assert_eq!(info.state, EntryState::Loading);

        fixture.pump();

        assert!(results.lock().is_empty());
        assert!(fixture.cache.is_empty());
        assert_eq!(fixture.loads(), 1);
    }

    #[test]
    fn underflow_is_clamped() {
        let mut fixture = Fixture::new();

        fixture.request_sync("MainMenu").unwrap();
        fixture.cache.release::<Prefab>("ui", "MainMenu", false);
        fixture.cache.release::<Prefab>("ui", "MainMenu", false);

        assert_eq!(fixture.info("MainMenu").unwrap().ref_count, 0);
        assert_eq!(fixture.cache.len(), 1);
    }

    #[test]
    fn missing_asset_is_reported() {
        let mut fixture = Fixture::new();

        assert!(matches!(
            fixture.request_sync("Credits"),
            Err(AssetError::NotFoundInBundle(key)) if key.asset() == "Credits"
        ));
        assert!(fixture.cache.is_empty());
    }

    #[test]
    fn wrong_entry_kind_is_a_type_mismatch() {
        let mut fixture = Fixture::new();

        let result = fixture
            .cache
            .request_sync::<String>(&mut fixture.bundles, "ui", "Click");

        assert!(matches!(
            result,
            Err(AssetError::TypeMismatch { stored, .. }) if stored == "bytes"
        ));
        assert!(fixture.cache.is_empty());

        let bytes = fixture
            .cache
            .request_sync::<Vec<u8>>(&mut fixture.bundles, "ui", "Click")
            .unwrap();
        assert_eq!(*bytes, vec![1, 2, 3]);
    }

    #[test]
    fn type_without_loader_fails_immediately() {
        let mut fixture = Fixture::new();
        let results = results::<Unregistered>();

        fixture
            .cache
            .request_async(&mut fixture.bundles, "ui", "MainMenu", record(&results));

        assert!(matches!(
            results.lock()[0],
            Err(AssetError::NoLoader(_))
        ));
        assert!(fixture.cache.is_empty());
        assert!(fixture.source.read_log().is_empty());
    }

    #[test]
    fn bundle_failure_reaches_every_waiter() {
        let mut fixture = Fixture::new();
        fixture.source.remove("ui");
        let results = results::<Prefab>();

        fixture.request_async("MainMenu", &results);
        fixture.request_async("Options", &results);
        fixture.pump();

        let results = results.lock();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|result| matches!(
            result,
            Err(AssetError::Bundle(BundleError::LoadFailed { name, .. })) if name == "ui"
        )));
        assert!(fixture.cache.is_empty());
        assert_eq!(fixture.source.read_count("ui"), 1);
    }

    #[test]
    fn missing_manifest_fails_request() {
        let mut fixture = Fixture::new();
        fixture.source.remove("PC");
        let results = results::<Prefab>();

        fixture.request_async("MainMenu", &results);

        assert!(matches!(
            &results.lock()[0],
            Err(AssetError::Bundle(error)) if error.is_fatal()
        ));
        assert!(fixture.cache.is_empty());
    }

    #[test]
    fn remove_unreferenced_keeps_held_entries() {
        let mut fixture = Fixture::new();

        fixture.request_sync("MainMenu").unwrap();
        fixture.cache.release::<Prefab>("ui", "MainMenu", false);

        fixture.request_sync("Options").unwrap();
        fixture.request_sync("Options").unwrap();

        let removed = fixture.cache.remove_unreferenced(&mut fixture.bundles);

        assert_eq!(removed.len(), 1);
        assert!(fixture.info("MainMenu").is_none());
        assert_eq!(fixture.info("Options").unwrap().ref_count, 2);
    }

    #[test]
    fn clear_cancels_pending_callbacks() {
        let mut fixture = Fixture::new();
        let results = results::<Prefab>();

        fixture.request_sync("Options").unwrap();
        fixture.request_async("MainMenu", &results);

        let removed = fixture.cache.clear(&mut fixture.bundles);
        assert_eq!(removed.len(), 1);
        assert!(fixture.cache.is_empty());
        assert!(matches!(results.lock()[0], Err(AssetError::Cancelled(_))));

        fixture.pump();
        assert!(fixture.cache.is_empty());
        assert_eq!(fixture.loads(), 1);
    }

    #[test]
    fn clear_cancels_bundle_chains() {
        let mut fixture = Fixture::new();
        let results = results::<Prefab>();

        fixture.request_async("MainMenu", &results);
        assert_eq!(fixture.bundles.state("common"), BundleState::Loading);

        assert!(fixture.cache.clear(&mut fixture.bundles).is_empty());
        assert!(matches!(results.lock()[0], Err(AssetError::Cancelled(_))));

        fixture.pump();

        assert_eq!(fixture.bundles.state("ui"), BundleState::Unloaded);
        assert!(fixture.bundles.is_idle());
        assert_eq!(fixture.source.read_count("ui"), 0);
        assert_eq!(results.lock().len(), 1);
        assert_eq!(fixture.loads(), 0);
    }

    #[test]
    fn removing_unreferenced_loading_entry_cancels_its_chain() {
        let mut fixture = Fixture::new();
        let results = results::<Prefab>();

        let ticket = fixture.request_async("MainMenu", &results);
        fixture.cache.release_ticket(ticket, false);

        assert!(fixture.cache.remove_unreferenced(&mut fixture.bundles).is_empty());
        assert!(fixture.cache.is_empty());

        fixture.pump();

        assert_eq!(fixture.bundles.state("ui"), BundleState::Unloaded);
        assert!(fixture.bundles.is_idle());
        assert_eq!(fixture.source.read_count("ui"), 0);
    }

    #[test]
    fn corrupt_bundle_fails_sync_request() {
        let mut fixture = Fixture::new();
        let bytes = fixture.source.remove("ui").unwrap();
        fixture.source.insert("ui", bytes[..bytes.len() / 2].to_vec());

        assert!(matches!(
            fixture.request_sync("MainMenu"),
            Err(AssetError::Bundle(BundleError::LoadFailed { name, .. })) if name == "ui"
        ));
        assert!(fixture.cache.is_empty());
        assert_eq!(fixture.bundles.state("ui"), BundleState::Unloaded);
    }

    #[test]
    fn corrupt_root_package_fails_sync_request() {
        let mut fixture = Fixture::new();
        fixture.source.insert("PC", b"STOW but not really".to_vec());

        assert!(matches!(
            fixture.request_sync("MainMenu"),
            Err(AssetError::Bundle(error @ BundleError::ManifestUnavailable { .. })) if error.is_fatal()
        ));
        assert!(fixture.cache.is_empty());
    }

    #[test]
    fn blocking_load_reports_before_returning() {
        let mut fixture = Fixture::new();
        let results = results::<Prefab>();

        let ticket = fixture.cache.load(
            &mut fixture.bundles,
            "ui",
            "MainMenu",
            true,
            record(&results),
        );

        assert_eq!(results.lock().len(), 1);
        assert!(!fixture.cache.release_ticket(ticket, false));
        assert_eq!(fixture.info("MainMenu").unwrap().ref_count, 0);
    }
}

//====================================================================
