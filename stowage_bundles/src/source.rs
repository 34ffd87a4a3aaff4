//====================================================================

use std::{collections::HashMap, io, path::PathBuf};

use parking_lot::{Mutex, RwLock};

use crate::Hasher;

//====================================================================

/// Where bundle bytes come from. Called from worker threads for
/// non-blocking loads and from the owning thread for blocking ones.
pub trait BundleSource: 'static + Send + Sync {
    fn read(&self, name: &str) -> io::Result<Vec<u8>>;
}

//====================================================================

/// Reads `<root>/<bundle name>` from disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

impl BundleSource for FileSource {
    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        let path = self.root.join(name);

        log::trace!("Reading bundle file {:?}", path);

        if !path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no bundle file at {:?}", path),
            ));
        }

        std::fs::read(path)
    }
}

//====================================================================

/// In-memory bundle store. Records every read so callers can check how many
/// times, and in which order, bundles were actually opened.
#[derive(Default)]
pub struct MemorySource {
    files: RwLock<HashMap<String, Vec<u8>, Hasher>>,
    reads: Mutex<Vec<String>>,
}

impl MemorySource {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with(self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(name, bytes);
        self
    }

    #[inline]
    pub fn insert(&self, name: impl Into<String>, bytes: Vec<u8>) {
        self.files.write().insert(name.into(), bytes);
    }

    #[inline]
    pub fn remove(&self, name: &str) -> Option<Vec<u8>> {
        self.files.write().remove(name)
    }

    pub fn read_count(&self, name: &str) -> usize {
        self.reads.lock().iter().filter(|read| *read == name).count()
    }

    #[inline]
    pub fn read_log(&self) -> Vec<String> {
        self.reads.lock().clone()
    }
}

impl BundleSource for MemorySource {
    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        self.reads.lock().push(name.to_string());

        self.files.read().get(name).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no bundle named '{}'", name))
        })
    }
}

//====================================================================


//====================================================================
