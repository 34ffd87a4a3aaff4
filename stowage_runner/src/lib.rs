//====================================================================

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use shipyard::{IntoWorkload, Unique, World};
use stowage_shipyard::{prelude::*, UniqueTools};

//====================================================================

const TIMESTEP: f32 = 1. / 75.;

//====================================================================

/// Headless frame loop. Owns the world every loading table lives in and
/// drives the cooperative stages on the calling thread.
pub struct Runner {
    world: World,
    timestep: Duration,
    shut_down: bool,
}

impl Runner {
    pub fn new<F>(build_app: F) -> anyhow::Result<Self>
    where
        F: FnOnce(WorkloadBuilder) -> WorkloadBuilder,
    {
        let world = World::new();

        let builder = WorkloadBuilder::new(&world).add_plugin(FramePlugin);
        build_app(builder)
            .build()
            .map_err(|e| anyhow!("Failed to build workloads: {:?}", e))?;

        world
            .run_workload(Stages::Setup)
            .map_err(|e| anyhow!("Workload setup failed to run: {:?}", e))?;

        Ok(Self {
            world,
            timestep: Duration::from_secs_f32(TIMESTEP),
            shut_down: false,
        })
    }

    #[inline]
    pub fn with_timestep(mut self, timestep: Duration) -> Self {
        self.timestep = timestep;
        self
    }

    #[inline]
    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn tick(&mut self) -> anyhow::Result<()> {
        [Stages::First, Stages::Update, Stages::Last]
            .into_iter()
            .try_for_each(|stage| {
                self.world
                    .run_workload(stage)
                    .map_err(|e| anyhow!("Stage '{:?}' failed to run: {:?}", stage, e))
            })
    }

    /// Ticks until `done` returns true, sleeping one timestep between ticks.
    /// Returns the number of ticks taken.
    pub fn run_until<P>(&mut self, max_ticks: usize, mut done: P) -> anyhow::Result<usize>
    where
        P: FnMut(&World) -> bool,
    {
        for ticks in 0..max_ticks {
            if done(&self.world) {
                return Ok(ticks);
            }

            self.tick()
                .with_context(|| format!("Tick {} failed", ticks))?;

            if !self.timestep.is_zero() {
                std::thread::sleep(self.timestep);
            }
        }

        match done(&self.world) {
            true => Ok(max_ticks),
            false => Err(anyhow!("Condition not met after {} ticks", max_ticks)),
        }
    }

    pub fn shutdown(mut self) -> anyhow::Result<()> {
        self.run_shutdown()
    }

    fn run_shutdown(&mut self) -> anyhow::Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        log::trace!("Running shutdown stage");

        self.world
            .run_workload(Stages::Shutdown)
            .map_err(|e| anyhow!("Shutdown failed to run: {:?}", e))
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if let Err(e) = self.run_shutdown() {
            log::warn!("{}", e);
        }
    }
}

//====================================================================

pub struct FramePlugin;

impl Plugin for FramePlugin {
    fn build(self, builder: WorkloadBuilder) -> WorkloadBuilder {
        builder.world().insert_if_missing(Frame::default);

        builder.add_workload(Stages::First, (sys_update_frame).into_workload())
    }
}

#[derive(Unique)]
pub struct Frame {
    count: u64,
    started: Instant,
    last_frame: Instant,
    delta: Duration,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            count: 0,
            started: Instant::now(),
            last_frame: Instant::now(),
            delta: Duration::ZERO,
        }
    }
}

impl Frame {
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    #[inline]
    pub fn delta(&self) -> Duration {
        self.delta
    }
}

fn sys_update_frame(mut frame: ResMut<Frame>) {
    frame.count += 1;
    frame.delta = frame.last_frame.elapsed();
    frame.last_frame = Instant::now();
}

//====================================================================


//====================================================================
