use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metadata::SongTags;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::debounce::{Debouncer, SAVE_DEBOUNCE};
use crate::error::LibraryError;
use crate::persist::Persist;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    entries: HashMap<String, SongTags>,
    #[serde(default)]
    failures: HashSet<String>,
}

/// One layer of per-file metadata: either the parse cache or the user
/// override store. Keys are root-relative slash-form paths. `failures`
/// is the do-not-retry set for files whose parse failed hard.
///
/// Saves are debounced; a semantically-equal `set` leaves the store
/// clean.
pub struct MetadataStore {
    name: String,
    persist: Arc<dyn Persist>,
    data: Arc<Mutex<StoreData>>,
    debounce: Debouncer,
    loaded: Mutex<bool>,
}

impl MetadataStore {
    pub fn new(name: &str, persist: Arc<dyn Persist>) -> Self {
        let data: Arc<Mutex<StoreData>> = Arc::new(Mutex::new(StoreData::default()));
        let saved = Arc::clone(&data);
        let save_persist = Arc::clone(&persist);
        let save_name = name.to_string();
        let debounce = Debouncer::new(SAVE_DEBOUNCE, move || {
            let blob = {
                let data = saved.lock();
                serde_json::to_string(&*data)
            };
            match blob {
                Ok(blob) => {
                    if let Err(err) = save_persist.set_item(&save_name, &blob) {
                        warn!("Failed to save metadata store {}: {}", save_name, err);
                    }
                }
                Err(err) => warn!("Failed to serialize metadata store {}: {}", save_name, err),
            }
        });
        Self {
            name: name.to_string(),
            persist,
            data,
            debounce,
            loaded: Mutex::new(false),
        }
    }

    /// Idempotent. A missing blob is a successful empty load that
    /// schedules the initial save.
    pub fn load(&self) -> Result<(), LibraryError> {
        let mut loaded = self.loaded.lock();
        if *loaded {
            return Ok(());
        }
        match self.persist.get_item(&self.name)? {
            Some(blob) => match serde_json::from_str::<StoreData>(&blob) {
                Ok(data) => *self.data.lock() = data,
                Err(err) => {
                    warn!("Discarding unreadable metadata store {}: {}", self.name, err);
                    self.debounce.mark();
                }
            },
            None => self.debounce.mark(),
        }
        *loaded = true;
        Ok(())
    }

    pub fn get(&self, relpath: &str) -> Option<SongTags> {
        self.data.lock().entries.get(relpath).cloned()
    }

    /// Store a value; no-op (and no dirty mark) when the stored value is
    /// semantically equal.
    pub fn set(&self, relpath: &str, tags: SongTags) {
        let mut data = self.data.lock();
        if let Some(existing) = data.entries.get(relpath) {
            if existing.semantically_equal(&tags) {
                return;
            }
        }
        data.entries.insert(relpath.to_string(), tags);
        data.failures.remove(relpath);
        drop(data);
        self.debounce.mark();
    }

    pub fn remove(&self, relpath: &str) {
        let mut data = self.data.lock();
        let removed = data.entries.remove(relpath).is_some();
        let unfailed = data.failures.remove(relpath);
        drop(data);
        if removed || unfailed {
            self.debounce.mark();
        }
    }

    pub fn mark_failed(&self, relpath: &str) {
        let inserted = self.data.lock().failures.insert(relpath.to_string());
        if inserted {
            self.debounce.mark();
        }
    }

    pub fn has_failed(&self, relpath: &str) -> bool {
        self.data.lock().failures.contains(relpath)
    }

    pub fn len(&self) -> usize {
        self.data.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn flush(&self) {
        self.debounce.trigger().await;
    }
}
