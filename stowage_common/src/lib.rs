//====================================================================

pub mod config;
pub mod task;

pub use config::{LoaderConfig, Platform};
pub use task::{CancelToken, DeferredSpawner, Job, LoadTask, TaskPoll, TaskSpawner, WorkerPool};

//====================================================================
