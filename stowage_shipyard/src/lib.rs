//====================================================================

use std::collections::HashMap;

use shipyard::{Unique, UniqueView, World};

//====================================================================

pub mod prelude {
    pub use crate::{Plugin, Res, ResMut, Stages, WorkloadBuilder};
}

//====================================================================

pub type Res<'a, T> = shipyard::UniqueView<'a, T>;
pub type ResMut<'a, T> = shipyard::UniqueViewMut<'a, T>;

//====================================================================

pub trait UniqueTools {
    fn insert<U: Unique + Send + Sync>(&self, unique: U) -> &Self;
    fn insert_if_missing<U: Unique + Send + Sync>(&self, create: impl FnOnce() -> U) -> bool;
    fn contains_unique<U: Unique + Send + Sync>(&self) -> bool;
}

impl UniqueTools for World {
    #[inline]
    fn insert<U: Unique + Send + Sync>(&self, unique: U) -> &Self {
        self.add_unique(unique);
        self
    }

    fn insert_if_missing<U: Unique + Send + Sync>(&self, create: impl FnOnce() -> U) -> bool {
        match self.contains_unique::<U>() {
            true => false,
            false => {
                self.add_unique(create());
                true
            }
        }
    }

    #[inline]
    fn contains_unique<U: Unique + Send + Sync>(&self) -> bool {
        self.borrow::<UniqueView<U>>().is_ok()
    }
}

impl UniqueTools for shipyard::AllStoragesView<'_> {
    #[inline]
    fn insert<U: Unique + Send + Sync>(&self, unique: U) -> &Self {
        self.add_unique(unique);
        self
    }

    fn insert_if_missing<U: Unique + Send + Sync>(&self, create: impl FnOnce() -> U) -> bool {
        match self.contains_unique::<U>() {
            true => false,
            false => {
                self.add_unique(create());
                true
            }
        }
    }

    #[inline]
    fn contains_unique<U: Unique + Send + Sync>(&self) -> bool {
        self.borrow::<UniqueView<U>>().is_ok()
    }
}

//====================================================================

/// Frame phases. `Setup` runs once, `First`, `Update` and `Last` run every
/// tick in that order, `Shutdown` runs once on teardown.
#[derive(shipyard::Label, Hash, Debug, Clone, Copy, PartialEq, Eq, enum_iterator::Sequence)]
pub enum Stages {
    Setup,
    First,
    Update,
    Last,
    Shutdown,
}

//====================================================================

pub struct WorkloadBuilder<'a> {
    world: &'a World,
    workloads: HashMap<Stages, shipyard::Workload>,

    plugin_text: String,
}

impl<'a> WorkloadBuilder<'a> {
    pub fn new(world: &'a World) -> Self {
        Self {
            world,
            workloads: HashMap::new(),

            plugin_text: String::new(),
        }
    }

    #[inline]
    pub fn world(&self) -> &'a World {
        self.world
    }

    pub fn add_workload(mut self, stage: Stages, workload: shipyard::Workload) -> Self {
        self.plugin_text = format!(
            "{}\n\tAdding workload for stage '{:?}'",
            self.plugin_text, stage
        );

        let merged = match self.workloads.remove(&stage) {
            Some(existing) => existing.merge(workload),
            None => shipyard::Workload::new(stage).merge(workload),
        };

        self.workloads.insert(stage, merged);
        self
    }

    pub fn add_plugin<T: Plugin>(mut self, plugin: T) -> Self {
        self.plugin_text = format!("Adding plugin '{}'", std::any::type_name::<T>());
        let builder = plugin.build(self);

        log::trace!("{}", builder.plugin_text);

        builder
    }

    /// Adds one workload per stage to the world, empty ones included, so
    /// every stage can be run unconditionally.
    pub fn build(mut self) -> Result<(), shipyard::error::AddWorkload> {
        for stage in enum_iterator::all::<Stages>() {
            let workload = self
                .workloads
                .remove(&stage)
                .unwrap_or_else(|| shipyard::Workload::new(stage));

            workload.add_to_world(self.world)?;
        }

        let data = self.world.workloads_info().0.iter().fold(
            String::from("Building workloads. Registered stages and systems:"),
            |acc, (name, workload_info)| {
                let acc = format!("{}\n{}", acc, name);

                workload_info
                    .batch_info
                    .iter()
                    .fold(acc, |acc, batch_info| {
                        batch_info
                            .systems()
                            .fold(acc, |acc, system| format!("{}\n    {}", acc, system.name))
                    })
            },
        );

        log::debug!("{data}");

        Ok(())
    }
}

pub trait Plugin {
    fn build(self, workload_builder: WorkloadBuilder) -> WorkloadBuilder;
}

//====================================================================


//====================================================================
