use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::LibraryError;

/// Injected key–value persistence. Stores own their serialization; this
/// trait only moves strings. `location()` anchors derived on-disk state
/// (fragment fallback directories).
pub trait Persist: Send + Sync {
    fn get_item(&self, name: &str) -> Result<Option<String>, LibraryError>;
    fn set_item(&self, name: &str, value: &str) -> Result<(), LibraryError>;
    fn remove_item(&self, name: &str) -> Result<(), LibraryError>;
    fn location(&self) -> &Path;
}

/// One file per key under a directory. Writes go through a temp file and
/// a rename so a torn write never replaces a good blob.
pub struct DirPersist {
    dir: PathBuf,
}

impl DirPersist {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl Persist for DirPersist {
    fn get_item(&self, name: &str) -> Result<Option<String>, LibraryError> {
        let path = self.dir.join(name);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set_item(&self, name: &str, value: &str) -> Result<(), LibraryError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{}.tmp", name));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_item(&self, name: &str) -> Result<(), LibraryError> {
        let path = self.dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn location(&self) -> &Path {
        &self.dir
    }
}

/// Test backend; nothing touches disk.
#[derive(Default)]
pub struct MemoryPersist {
    items: Mutex<HashMap<String, String>>,
    location: PathBuf,
}

impl MemoryPersist {
    pub fn new(location: PathBuf) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            location,
        }
    }
}

impl Persist for MemoryPersist {
    fn get_item(&self, name: &str) -> Result<Option<String>, LibraryError> {
        Ok(self.items.lock().get(name).cloned())
    }

    fn set_item(&self, name: &str, value: &str) -> Result<(), LibraryError> {
        self.items.lock().insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, name: &str) -> Result<(), LibraryError> {
        self.items.lock().remove(name);
        Ok(())
    }

    fn location(&self) -> &Path {
        &self.location
    }
}
