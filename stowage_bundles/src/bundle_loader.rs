//====================================================================

use std::{collections::HashMap, sync::Arc};

use shipyard::Unique;
use stowage_common::{LoadTask, LoaderConfig, TaskPoll, TaskSpawner};

use crate::{
    bundle::Bundle,
    error::BundleError,
    manifest::ManifestResolver,
    source::{BundleSource, FileSource},
    Hasher,
};

//====================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BundleState {
    Unloaded,
    Loading,
    Loaded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(u64);

#[derive(Debug)]
pub enum ChainEvent {
    Ready { chain: ChainId, bundle: Arc<Bundle> },
    Failed { chain: ChainId, error: BundleError },
}

impl ChainEvent {
    #[inline]
    pub fn chain(&self) -> ChainId {
        match self {
            ChainEvent::Ready { chain, .. } | ChainEvent::Failed { chain, .. } => *chain,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BundleUnload {
    Unloaded,
    StillLoading,
    NotLoaded,
}

//====================================================================

type BundleTask = LoadTask<Result<Bundle, BundleError>>;

enum BundleRecord {
    Loading(BundleTask),
    Loaded(Arc<Bundle>),
}

impl BundleRecord {
    #[inline]
    fn state(&self) -> BundleState {
        match self {
            BundleRecord::Loading(_) => BundleState::Loading,
            BundleRecord::Loaded(_) => BundleState::Loaded,
        }
    }
}

/// A non-blocking request: dependencies first, requested bundle last.
struct LoadChain {
    id: ChainId,
    order: Vec<String>,
    cursor: usize,
}

impl LoadChain {
    #[inline]
    fn target(&self) -> &str {
        self.order.last().map(String::as_str).unwrap_or_default()
    }

    /// Bundles the chain has not passed yet, the one it waits on included.
    #[inline]
    fn remaining(&self) -> &[String] {
        self.order.get(self.cursor..).unwrap_or_default()
    }

    #[inline]
    fn needs(&self, name: &str) -> bool {
        self.remaining().iter().any(|remaining| remaining == name)
    }

    fn blocked_by<'a>(&self, failed: &'a HashMap<String, BundleError, Hasher>) -> Option<&'a BundleError> {
        self.remaining().iter().find_map(|name| failed.get(name))
    }
}

enum ChainStep {
    Waiting,
    Done(Arc<Bundle>),
    Failed(BundleError),
}

fn open_bundle(source: &dyn BundleSource, name: &str) -> Result<Bundle, BundleError> {
    let bytes = source
        .read(name)
        .map_err(|e| BundleError::load_failed(name, e))?;

    Bundle::from_bytes(name, &bytes)
}

//====================================================================

/// Owns the bundle table. At most one load is in flight per bundle name;
/// every other request for that bundle waits on it.
#[derive(Unique)]
pub struct BundleLoader {
    source: Arc<dyn BundleSource>,
    spawner: Arc<dyn TaskSpawner>,
    manifest: ManifestResolver,

    records: HashMap<String, BundleRecord, Hasher>,
    chains: Vec<LoadChain>,
    next_chain: u64,
    events: Vec<ChainEvent>,
}

impl BundleLoader {
    pub fn new(
        source: Arc<dyn BundleSource>,
        spawner: Arc<dyn TaskSpawner>,
        root_package: impl Into<String>,
    ) -> Self {
        Self {
            source,
            spawner,
            manifest: ManifestResolver::new(root_package),

            records: HashMap::default(),
            chains: Vec::new(),
            next_chain: 0,
            events: Vec::new(),
        }
    }

    pub fn from_config(config: &LoaderConfig, spawner: Arc<dyn TaskSpawner>) -> Self {
        log::debug!(
            "Creating bundle loader for {:?} (root package '{}')",
            config.load_path(),
            config.root_package()
        );

        Self::new(
            Arc::new(FileSource::new(config.load_path())),
            spawner,
            config.root_package(),
        )
    }

    #[inline]
    pub fn spawner(&self) -> &Arc<dyn TaskSpawner> {
        &self.spawner
    }

    #[inline]
    pub fn manifest(&self) -> &ManifestResolver {
        &self.manifest
    }
}

//--------------------------------------------------

impl BundleLoader {
    pub fn state(&self, name: &str) -> BundleState {
        match self.records.get(name) {
            Some(record) => record.state(),
            None => BundleState::Unloaded,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Bundle>> {
        match self.records.get(name) {
            Some(BundleRecord::Loaded(bundle)) => Some(bundle.clone()),
            _ => None,
        }
    }

    pub fn loaded_count(&self) -> usize {
        self.records
            .values()
            .filter(|record| record.state() == BundleState::Loaded)
            .count()
    }

    /// Nothing in flight, no chains waiting and no undelivered events.
    pub fn is_idle(&self) -> bool {
        self.chains.is_empty()
            && self.events.is_empty()
            && self
                .records
                .values()
                .all(|record| record.state() != BundleState::Loading)
    }

    #[inline]
    pub fn dependencies(&mut self, name: &str) -> Result<Vec<String>, BundleError> {
        self.manifest.dependencies(self.source.as_ref(), name)
    }
}

//--------------------------------------------------

impl BundleLoader {
    /// Loads `name` and its dependencies on the calling thread. A bundle
    /// already loading in the background is taken over: its task is
    /// cancelled and the bundle is opened here instead.
    pub fn load_blocking(&mut self, name: &str) -> Result<Arc<Bundle>, BundleError> {
        for dependency in self.dependencies(name)? {
            self.load_one_blocking(&dependency)?;
        }

        self.load_one_blocking(name)
    }

    fn load_one_blocking(&mut self, name: &str) -> Result<Arc<Bundle>, BundleError> {
        if let Some(BundleRecord::Loaded(bundle)) = self.records.get(name) {
            return Ok(bundle.clone());
        }

        if let Some(BundleRecord::Loading(task)) = self.records.remove(name) {
            log::debug!("Taking over in-flight load of bundle '{}'", name);
            task.cancel();
        }

        log::debug!("Loading bundle '{}' (blocking)", name);

        match open_bundle(self.source.as_ref(), name) {
            Ok(bundle) => {
                let bundle = Arc::new(bundle);
                self.records
                    .insert(name.to_string(), BundleRecord::Loaded(bundle.clone()));
                Ok(bundle)
            }
            Err(error) => {
                log::error!("{}", error);
                self.fail_waiting_chains(name, &error);
                Err(error)
            }
        }
    }

    /// Starts a non-blocking load of `name` and its dependencies. The
    /// outcome is reported by a later [`BundleLoader::update`].
    pub fn begin_load(&mut self, name: &str) -> Result<ChainId, BundleError> {
        let mut order = self.dependencies(name)?;
        order.push(name.to_string());

        let id = ChainId(self.next_chain);
        self.next_chain += 1;

        log::trace!("Starting load chain {:?} for bundle '{}': {:?}", id, name, order);

        let mut chain = LoadChain {
            id,
            order,
            cursor: 0,
        };

        match self.advance(&mut chain, &HashMap::default()) {
            ChainStep::Waiting => self.chains.push(chain),
            ChainStep::Done(bundle) => self.events.push(ChainEvent::Ready { chain: id, bundle }),
            ChainStep::Failed(error) => self.events.push(ChainEvent::Failed { chain: id, error }),
        }

        Ok(id)
    }

    /// Forgets a chain. Bundle loads it started keep going for other waiters.
    pub fn cancel_chain(&mut self, id: ChainId) -> bool {
        let before = self.chains.len();
        self.chains.retain(|chain| chain.id != id);
        self.events.retain(|event| event.chain() != id);

        before != self.chains.len()
    }

    /// Collects finished bundle loads and steps every waiting chain.
    pub fn update(&mut self) -> Vec<ChainEvent> {
        let finished = self
            .records
            .iter_mut()
            .filter_map(|(name, record)| match record {
                BundleRecord::Loading(task) => match task.poll() {
                    TaskPoll::Pending => None,
                    TaskPoll::Ready(result) => Some((name.clone(), result)),
                    TaskPoll::Cancelled => Some((
                        name.clone(),
                        Err(BundleError::load_failed(name, "load job ended without a result")),
                    )),
                },
                BundleRecord::Loaded(_) => None,
            })
            .collect::<Vec<_>>();

        let mut failed = HashMap::<String, BundleError, Hasher>::default();

        finished.into_iter().for_each(|(name, result)| match result {
            Ok(bundle) => {
                log::debug!("Bundle '{}' loaded", name);
                self.records
                    .insert(name, BundleRecord::Loaded(Arc::new(bundle)));
            }
            Err(error) => {
                log::error!("{}", error);
                self.records.remove(&name);
                failed.insert(name, error);
            }
        });

        let mut events = std::mem::take(&mut self.events);

        std::mem::take(&mut self.chains)
            .into_iter()
            .for_each(|mut chain| match self.advance(&mut chain, &failed) {
                ChainStep::Waiting => self.chains.push(chain),
                ChainStep::Done(bundle) => events.push(ChainEvent::Ready {
                    chain: chain.id,
                    bundle,
                }),
                ChainStep::Failed(error) => events.push(ChainEvent::Failed {
                    chain: chain.id,
                    error,
                }),
            });

        events
    }

    fn advance(
        &mut self,
        chain: &mut LoadChain,
        failed: &HashMap<String, BundleError, Hasher>,
    ) -> ChainStep {
        // Failed bundles are never restarted for a chain that was already waiting.
        if let Some(error) = chain.blocked_by(failed) {
            return ChainStep::Failed(error.clone());
        }

        while let Some(name) = chain.order.get(chain.cursor) {
            match self.records.get(name) {
                Some(BundleRecord::Loaded(_)) => chain.cursor += 1,
                Some(BundleRecord::Loading(_)) => return ChainStep::Waiting,
                None => {
                    self.start_load(name);
                    return ChainStep::Waiting;
                }
            }
        }

        match self.get(chain.target()) {
            Some(bundle) => ChainStep::Done(bundle),
            None => ChainStep::Failed(BundleError::load_failed(
                chain.target(),
                "bundle vanished before the chain completed",
            )),
        }
    }

    fn start_load(&mut self, name: &str) {
        log::debug!("Loading bundle '{}'", name);

        let source = self.source.clone();
        let job_name = name.to_string();

        let task = LoadTask::spawn(self.spawner.as_ref(), move |_| {
            open_bundle(source.as_ref(), &job_name)
        });

        self.records
            .insert(name.to_string(), BundleRecord::Loading(task));
    }

    fn fail_waiting_chains(&mut self, name: &str, error: &BundleError) {
        let (waiting, rest) = std::mem::take(&mut self.chains)
            .into_iter()
            .partition::<Vec<_>, _>(|chain| chain.needs(name));

        self.chains = rest;
        self.events.extend(waiting.into_iter().map(|chain| ChainEvent::Failed {
            chain: chain.id,
            error: error.clone(),
        }));
    }
}

//--------------------------------------------------

impl BundleLoader {
    /// Unloads a single bundle. Refused while the bundle is still loading.
    pub fn unload_bundle(&mut self, name: &str) -> BundleUnload {
        match self.records.get(name).map(BundleRecord::state) {
            Some(BundleState::Loading) => BundleUnload::StillLoading,
            Some(_) => {
                self.records.remove(name);
                log::debug!("Unloaded bundle '{}'", name);
                BundleUnload::Unloaded
            }
            None => BundleUnload::NotLoaded,
        }
    }

    /// Drops every bundle, cancels in-flight loads and forgets the manifest.
    /// Pending chains are reported as cancelled on the next update.
    pub fn unload_all(&mut self) {
        let count = self.records.len();

        self.records.drain().for_each(|(_, record)| {
            if let BundleRecord::Loading(task) = record {
                task.cancel();
            }
        });

        let chains = std::mem::take(&mut self.chains);
        self.events.extend(chains.into_iter().map(|chain| ChainEvent::Failed {
            chain: chain.id,
            error: BundleError::Cancelled(chain.target().to_string()),
        }));

        self.manifest.reset();

        log::debug!("Unloaded all bundles ({} records)", count);
    }
}

//====================================================================


//====================================================================
