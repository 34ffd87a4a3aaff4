//====================================================================

use std::{fmt::Display, path::PathBuf};

use shipyard::Unique;

//====================================================================

/// Target platform class. Selects which root package holds the manifest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Platform {
    Desktop,
    Android,
    Ios,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_os = "ios") {
            Platform::Ios
        } else {
            Platform::Desktop
        }
    }

    #[inline]
    pub fn root_package(&self) -> &'static str {
        match self {
            Platform::Desktop => "PC",
            Platform::Android => "Android",
            Platform::Ios => "IOS",
        }
    }
}

impl Default for Platform {
    #[inline]
    fn default() -> Self {
        Self::current()
    }
}

impl Display for Platform {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.root_package())
    }
}

//====================================================================

#[derive(Unique, Clone, Debug)]
pub struct LoaderConfig {
    load_path: PathBuf,
    platform: Platform,
    worker_threads: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            load_path: match std::env::current_dir() {
                Ok(path) => path.join("res"),
                Err(_) => PathBuf::default(),
            },
            platform: Platform::default(),
            worker_threads: 2,
        }
    }
}

impl LoaderConfig {
    #[inline]
    pub fn with_load_path(mut self, load_path: impl Into<PathBuf>) -> Self {
        self.load_path = load_path.into();
        self
    }

    #[inline]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Values below one are raised to one.
    #[inline]
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads.max(1);
        self
    }

    #[inline]
    pub fn load_path(&self) -> &PathBuf {
        &self.load_path
    }

    #[inline]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    #[inline]
    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    #[inline]
    pub fn root_package(&self) -> &'static str {
        self.platform.root_package()
    }
}

//====================================================================


//====================================================================
