use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use common::keys::encode_u32_path_safe;
use parking_lot::Mutex;
use tracing::warn;

use crate::debounce::{Debouncer, SAVE_DEBOUNCE};
use crate::error::LibraryError;

const INDEX_FILE: &str = "index.txt";

#[derive(Default)]
struct BlobIndex {
    seq: u32,
    by_key: HashMap<String, String>,
    refs: HashMap<String, HashSet<String>>,
}

/// Many keys, shared payloads. One directory holds the payload files and
/// `index.txt`: the last-used sequence number followed by alternating
/// key / payload-filename lines. A payload file is deleted when its last
/// key goes away. Index writes are debounced.
pub struct BlobStore<K> {
    dir: PathBuf,
    key_string: Box<dyn Fn(&K) -> String + Send + Sync>,
    index: Arc<Mutex<BlobIndex>>,
    debounce: Debouncer,
    loaded: Mutex<bool>,
}

impl<K> BlobStore<K> {
    pub fn new(dir: PathBuf, key_string: impl Fn(&K) -> String + Send + Sync + 'static) -> Self {
        let index: Arc<Mutex<BlobIndex>> = Arc::new(Mutex::new(BlobIndex::default()));
        let saved = Arc::clone(&index);
        let save_dir = dir.clone();
        let debounce = Debouncer::new(SAVE_DEBOUNCE, move || {
            let blob = {
                let index = saved.lock();
                let mut out = String::new();
                out.push_str(&index.seq.to_string());
                out.push('\n');
                let mut pairs: Vec<(&String, &String)> = index.by_key.iter().collect();
                pairs.sort();
                for (key, file) in pairs {
                    out.push_str(key);
                    out.push('\n');
                    out.push_str(file);
                    out.push('\n');
                }
                out
            };
            if let Err(err) = fs::create_dir_all(&save_dir)
                .and_then(|_| fs::write(save_dir.join(INDEX_FILE), blob))
            {
                warn!("Failed to save blob index {}: {}", save_dir.display(), err);
            }
        });
        Self {
            dir,
            key_string: Box::new(key_string),
            index,
            debounce,
            loaded: Mutex::new(false),
        }
    }

    /// Idempotent; a missing index file is an empty store.
    pub fn load(&self) -> Result<(), LibraryError> {
        let mut loaded = self.loaded.lock();
        if *loaded {
            return Ok(());
        }
        let path = self.dir.join(INDEX_FILE);
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let mut lines = contents.lines();
                let seq = lines
                    .next()
                    .and_then(|line| line.trim().parse::<u32>().ok())
                    .unwrap_or(0);
                let mut index = BlobIndex {
                    seq,
                    ..BlobIndex::default()
                };
                while let (Some(key), Some(file)) = (lines.next(), lines.next()) {
                    index
                        .refs
                        .entry(file.to_string())
                        .or_default()
                        .insert(key.to_string());
                    index.by_key.insert(key.to_string(), file.to_string());
                }
                *self.index.lock() = index;
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        *loaded = true;
        Ok(())
    }

    pub fn get(&self, key: &K) -> Option<Vec<u8>> {
        let file = {
            let index = self.index.lock();
            index.by_key.get(&(self.key_string)(key)).cloned()
        }?;
        match fs::read(self.dir.join(&file)) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!("Blob payload {} unreadable: {}", file, err);
                None
            }
        }
    }

    /// Store `bytes` under `key`. Byte-identical content already present
    /// is shared instead of duplicated; a key rebound to new content
    /// drops its old payload reference.
    pub fn put(&self, key: &K, bytes: &[u8]) -> Result<(), LibraryError> {
        fs::create_dir_all(&self.dir)?;
        let key_text = (self.key_string)(key);

        let mut index = self.index.lock();

        let target = match self.find_matching_payload(&index, bytes) {
            Some(existing) => existing,
            None => {
                index.seq += 1;
                let file = format!("BLOB-{}", encode_u32_path_safe(index.seq));
                fs::write(self.dir.join(&file), bytes)?;
                file
            }
        };

        if let Some(previous) = index.by_key.get(&key_text).cloned() {
            if previous == target {
                return Ok(());
            }
            self.release(&mut index, &previous, &key_text);
        }

        index.by_key.insert(key_text.clone(), target.clone());
        index.refs.entry(target).or_default().insert(key_text);
        drop(index);
        self.debounce.mark();
        Ok(())
    }

    /// Drop one key; the payload file goes with its last key.
    pub fn delete(&self, key: &K) -> bool {
        let key_text = (self.key_string)(key);
        let mut index = self.index.lock();
        let file = match index.by_key.remove(&key_text) {
            Some(file) => file,
            None => return false,
        };
        self.release(&mut index, &file, &key_text);
        drop(index);
        self.debounce.mark();
        true
    }

    /// Remove every payload and key.
    pub fn clear(&self) {
        let mut index = self.index.lock();
        for file in index.refs.keys() {
            if let Err(err) = fs::remove_file(self.dir.join(file)) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to delete blob payload {}: {}", file, err);
                }
            }
        }
        index.by_key.clear();
        index.refs.clear();
        drop(index);
        self.debounce.mark();
    }

    pub async fn flush(&self) {
        self.debounce.trigger().await;
    }

    fn release(&self, index: &mut BlobIndex, file: &str, key_text: &str) {
        let emptied = match index.refs.get_mut(file) {
            Some(keys) => {
                keys.remove(key_text);
                keys.is_empty()
            }
            None => true,
        };
        if emptied {
            index.refs.remove(file);
            if let Err(err) = fs::remove_file(self.dir.join(file)) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to delete blob payload {}: {}", file, err);
                }
            }
        }
    }

    fn find_matching_payload(&self, index: &BlobIndex, bytes: &[u8]) -> Option<String> {
        for file in index.refs.keys() {
            let path = self.dir.join(file);
            let same_size = fs::metadata(&path)
                .map(|meta| meta.len() == bytes.len() as u64)
                .unwrap_or(false);
            if !same_size {
                continue;
            }
            if let Ok(existing) = fs::read(&path) {
                if existing == bytes {
                    return Some(file.clone());
                }
            }
        }
        None
    }
}
