//====================================================================

use std::{path::Path, sync::Arc, time::Duration};

use parking_lot::Mutex;
use shipyard::{IntoWorkload, Unique, World};
use stowage::{
    assets::{AssetCache, AssetLoader, Handle, RegisterAssetLoader, Sweeper},
    bundles::{BundleEntry, BundleLoader, BundleWriter, DependencyGraph},
    common::{LoaderConfig, Platform},
    runner::Runner,
    shipyard_tools::{prelude::*, UniqueTools},
    Asset, DefaultPlugins,
};

//====================================================================

fn main() -> anyhow::Result<()> {
    env_logger::Builder::new()
        .filter_module("stowage", log::LevelFilter::Trace)
        .format_timestamp(None)
        .init();

    let dir = tempfile::tempdir()?;
    write_bundles(dir.path())?;

    let config = LoaderConfig::default()
        .with_load_path(dir.path())
        .with_platform(Platform::Desktop);

    let mut runner = Runner::new(|builder| {
        builder
            .world()
            .insert(config)
            .insert(MainMenu::default());

        builder
            .add_plugin(DefaultPlugins)
            .register_loader(PrefabLoader)
            .add_workload(Stages::Setup, (sys_request_assets).into_workload())
    })?
    .with_timestep(Duration::from_millis(5));

    let ticks = runner.run_until(200, menu_ready)?;
    println!("Main menu ready after {} ticks", ticks);

    runner.world().run(
        |menu: Res<MainMenu>,
         mut cache: ResMut<AssetCache>,
         mut bundles: ResMut<BundleLoader>,
         mut sweeper: ResMut<Sweeper>| {
            if let Some(handle) = menu.0.lock().take() {
                println!("{:?}", handle.inner());
                cache.release_handle(handle, true);
            }

            sweeper.sweep_unused(&mut cache, &mut bundles, |report| {
                println!("Sweep finished: {:?}", report);
            });
        },
    );

    runner.run_until(200, |world| {
        world.run(|sweeper: Res<Sweeper>| sweeper.is_idle())
    })?;

    runner.shutdown()
}

fn menu_ready(world: &World) -> bool {
    world.run(|menu: Res<MainMenu>| {
        let ready = menu.0.lock().is_some();
        ready
    })
}

fn sys_request_assets(
    mut cache: ResMut<AssetCache>,
    mut bundles: ResMut<BundleLoader>,
    menu: Res<MainMenu>,
) {
    match cache.request_sync::<String>(&mut bundles, "common", "Title") {
        Ok(title) => println!("Title (blocking): {}", title.inner()),
        Err(e) => log::error!("{}", e),
    }

    let slot = menu.0.clone();
    cache.request_async::<Prefab, _>(&mut bundles, "ui", "MainMenu", move |result| {
        match result {
            Ok(handle) => *slot.lock() = Some(handle),
            Err(e) => log::error!("{}", e),
        }
    });
}

//====================================================================

#[derive(Unique, Default)]
struct MainMenu(Arc<Mutex<Option<Handle<Prefab>>>>);

#[derive(Debug)]
pub struct Prefab {
    pub widgets: Vec<String>,
}

impl Asset for Prefab {}

pub struct PrefabLoader;

impl AssetLoader<Prefab> for PrefabLoader {
    fn kinds(&self) -> &[&str] {
        &["prefab"]
    }

    fn load(&self, entry: &BundleEntry) -> anyhow::Result<Prefab> {
        let text = std::str::from_utf8(&entry.data)?;

        Ok(Prefab {
            widgets: text.lines().map(str::to_string).collect(),
        })
    }
}

//====================================================================

fn write_bundles(dir: &Path) -> anyhow::Result<()> {
    let graph = DependencyGraph::new().with_bundle("ui", ["common"]);

    BundleWriter::new()
        .add_manifest(&graph)?
        .write_to(dir.join(Platform::Desktop.root_package()))?;

    BundleWriter::new()
        .add_text("Title", "Stowage")
        .write_to(dir.join("common"))?;

    BundleWriter::new()
        .add("MainMenu", "prefab", "Play\nOptions\nQuit")
        .write_to(dir.join("ui"))?;

    Ok(())
}

//====================================================================
