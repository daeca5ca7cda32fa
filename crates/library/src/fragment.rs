use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use common::keys::{encode_u32, encode_u32_path_safe, from_base36, to_base36};
use common::{chain_hash, MediaKey, SongKey};
use metadata::SongTags;
use parking_lot::Mutex;
use tracing::{debug, warn};
use xxhash_rust::xxh32::xxh32;

use crate::blob_store::BlobStore;
use crate::debounce::{Debouncer, SAVE_DEBOUNCE};
use crate::error::LibraryError;
use crate::file_index::{classify, collect_files, FileIndex, FileKind};
use crate::ignore::IgnoreSet;
use crate::metadata_store::MetadataStore;
use crate::persist::{DirPersist, Persist};

const STATE_DIR: &str = ".afi";
const IMAGES_DIR: &str = "images";
const SONG_KEYS_NAME: &str = "songKeys";
const CACHE_NAME: &str = "metadataCache";
const OVERRIDE_NAME: &str = "metadataOverride";

#[derive(Default)]
struct SongKeyMap {
    by_hash: HashMap<u32, String>,
    by_path: HashMap<String, u32>,
    loaded: bool,
}

/// One indexed root: file list, two metadata layers, artwork blobs,
/// folder-cover resolution, and the stable song-key map for every file
/// that was ever indexed under this root.
pub struct AudioFileFragment {
    root: PathBuf,
    hash: u32,
    prefix: String,
    state: Arc<dyn Persist>,
    index: Mutex<FileIndex>,
    cache: MetadataStore,
    overrides: MetadataStore,
    images: BlobStore<MediaKey>,
    folder_images: Mutex<HashMap<String, String>>,
    image_files: Mutex<BTreeSet<String>>,
    song_keys: Arc<Mutex<SongKeyMap>>,
    keys_debounce: Debouncer,
    last_scan: Mutex<Option<SystemTime>>,
}

impl AudioFileFragment {
    /// `hash` is minted (or restored) by the registry; `fallback` hosts
    /// fragment state when `<root>/.afi` cannot be created.
    pub fn new(root: PathBuf, hash: u32, fallback: &Arc<dyn Persist>) -> Arc<Self> {
        let state: Arc<dyn Persist> = Arc::new(DirPersist::new(state_dir_for(&root, hash, fallback)));

        let song_keys: Arc<Mutex<SongKeyMap>> = Arc::new(Mutex::new(SongKeyMap::default()));
        let saved_keys = Arc::clone(&song_keys);
        let keys_persist = Arc::clone(&state);
        let keys_debounce = Debouncer::new(SAVE_DEBOUNCE, move || {
            let blob = {
                let keys = saved_keys.lock();
                let mut lines: Vec<String> = keys
                    .by_hash
                    .iter()
                    .map(|(hash, rel)| format!("{},{}", to_base36(*hash), rel))
                    .collect();
                lines.sort();
                lines.join("\n")
            };
            if let Err(err) = keys_persist.set_item(SONG_KEYS_NAME, &blob) {
                warn!("Failed to save song keys: {}", err);
            }
        });

        Arc::new(Self {
            index: Mutex::new(FileIndex::new(Arc::clone(&state))),
            cache: MetadataStore::new(CACHE_NAME, Arc::clone(&state)),
            overrides: MetadataStore::new(OVERRIDE_NAME, Arc::clone(&state)),
            images: BlobStore::new(root.join(IMAGES_DIR), |key: &MediaKey| key.to_string()),
            folder_images: Mutex::new(HashMap::new()),
            image_files: Mutex::new(BTreeSet::new()),
            song_keys,
            keys_debounce,
            prefix: encode_u32(hash),
            state,
            root,
            hash,
            last_scan: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// The encoded hash, as it appears in song-key prefixes.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn last_scan(&self) -> Option<SystemTime> {
        *self.last_scan.lock()
    }

    pub fn load(&self) -> Result<(), LibraryError> {
        self.cache.load()?;
        self.overrides.load()?;
        self.images.load()?;
        self.index.lock().load()?;
        self.load_song_keys()?;

        // Seed the image state from the persisted list so covers resolve
        // before the first rescan.
        let image_rels: Vec<String> = {
            let index = self.index.lock();
            index
                .files()
                .iter()
                .filter(|rel| classify(rel) == Some(FileKind::Image))
                .cloned()
                .collect()
        };
        {
            let mut images = self.image_files.lock();
            if images.is_empty() {
                images.extend(image_rels);
            }
        }
        self.discover_folder_images();
        Ok(())
    }

    fn load_song_keys(&self) -> Result<(), LibraryError> {
        let mut keys = self.song_keys.lock();
        if keys.loaded {
            return Ok(());
        }
        if let Some(blob) = self.state.get_item(SONG_KEYS_NAME)? {
            for line in blob.lines() {
                let Some((hash_text, rel)) = line.split_once(',') else {
                    continue;
                };
                let Some(hash) = from_base36(hash_text) else {
                    warn!("Skipping malformed song-key line: {}", line);
                    continue;
                };
                keys.by_hash.insert(hash, rel.to_string());
                keys.by_path.insert(rel.to_string(), hash);
            }
        }
        keys.loaded = true;
        Ok(())
    }

    /// Deterministic song key for a file under this root. The relative
    /// path is hashed seeded by the fragment hash; collisions chain until
    /// a free slot or this path's own slot is found. First use persists
    /// the mapping.
    pub fn make_song_key(&self, path: &Path) -> Result<SongKey, LibraryError> {
        let rel = self.relpath(path)?;
        let mut keys = self.song_keys.lock();
        if let Some(hash) = keys.by_path.get(&rel) {
            return Ok(SongKey::new(self.hash, *hash));
        }

        let mut local = xxh32(rel.as_bytes(), self.hash);
        while let Some(claimed) = keys.by_hash.get(&local) {
            if claimed == &rel {
                break;
            }
            warn!("Song key collision on {}; rehashing", rel);
            local = chain_hash(local, &rel);
        }
        keys.by_hash.insert(local, rel.clone());
        keys.by_path.insert(rel, local);
        drop(keys);
        self.keys_debounce.mark();
        Ok(SongKey::new(self.hash, local))
    }

    /// Key previously minted for this relative path, if any.
    pub fn existing_key_for(&self, relpath: &str) -> Option<SongKey> {
        let keys = self.song_keys.lock();
        keys.by_path.get(relpath).map(|hash| SongKey::new(self.hash, *hash))
    }

    pub fn song_relpath(&self, key: SongKey) -> Option<String> {
        if key.fragment != self.hash {
            return None;
        }
        self.song_keys.lock().by_hash.get(&key.local).cloned()
    }

    pub fn song_path(&self, key: SongKey) -> Option<PathBuf> {
        self.song_relpath(key)
            .map(|rel| common::join_relpath(&self.root, &rel))
    }

    /// Root-relative slash form of `path`; `InvalidPath` when it does not
    /// resolve under this root. The prefix match is case-insensitive.
    pub fn relpath(&self, path: &Path) -> Result<String, LibraryError> {
        if let Some(rel) = common::relpath_from(&self.root, path) {
            if !rel.is_empty() {
                return Ok(rel);
            }
        }
        let full = common::path_to_slash_string(path);
        let root = common::path_to_slash_string(&self.root);
        if full.len() > root.len() && full[..root.len()].eq_ignore_ascii_case(&root) {
            let rest = full[root.len()..].trim_start_matches('/');
            if !rest.is_empty() {
                return Ok(rest.to_string());
            }
        }
        Err(LibraryError::InvalidPath(path.to_path_buf()))
    }

    /// Rescan this root: walk, diff against the previous file list, route
    /// audio adds/removes to the callbacks (sorted order) and image
    /// changes to internal state, then re-run folder-cover discovery.
    pub async fn rescan_files(
        &self,
        ignore: &IgnoreSet,
        mut on_add_song: impl FnMut(&Path),
        mut on_remove_song: impl FnMut(&Path),
    ) -> Result<(), LibraryError> {
        let fresh = collect_files(&self.root, ignore).await;

        let mut added_audio = Vec::new();
        let mut removed_audio = Vec::new();
        let mut added_images = Vec::new();
        let mut removed_images = Vec::new();
        {
            let mut index = self.index.lock();
            index.load()?;
            index.install(
                fresh,
                |rel| match classify(rel) {
                    Some(FileKind::Audio) => added_audio.push(rel.to_string()),
                    Some(FileKind::Image) => added_images.push(rel.to_string()),
                    None => {}
                },
                |rel| match classify(rel) {
                    Some(FileKind::Audio) => removed_audio.push(rel.to_string()),
                    Some(FileKind::Image) => removed_images.push(rel.to_string()),
                    None => {}
                },
            )?;
        }

        {
            let mut images = self.image_files.lock();
            for rel in &removed_images {
                images.remove(rel);
            }
            for rel in &added_images {
                images.insert(rel.clone());
            }
        }

        for rel in &removed_audio {
            self.cache.remove(rel);
            on_remove_song(&common::join_relpath(&self.root, rel));
        }
        for rel in &added_audio {
            on_add_song(&common::join_relpath(&self.root, rel));
        }

        self.discover_folder_images();
        *self.last_scan.lock() = Some(SystemTime::now());
        Ok(())
    }

    /// For every directory that holds both audio and images, the largest
    /// image by byte size becomes the folder cover.
    fn discover_folder_images(&self) {
        let mut audio_dirs: HashSet<String> = HashSet::new();
        {
            let index = self.index.lock();
            for rel in index.files() {
                if classify(rel) == Some(FileKind::Audio) {
                    audio_dirs.insert(common::rel_dirname(rel).to_string());
                }
            }
        }

        let mut chosen: HashMap<String, (u64, String)> = HashMap::new();
        {
            let images = self.image_files.lock();
            for rel in images.iter() {
                let dir = common::rel_dirname(rel);
                if !audio_dirs.contains(dir) {
                    continue;
                }
                let size = fs::metadata(common::join_relpath(&self.root, rel))
                    .map(|meta| meta.len())
                    .unwrap_or(0);
                match chosen.get(dir) {
                    Some((best, _)) if *best >= size => {}
                    _ => {
                        chosen.insert(dir.to_string(), (size, rel.clone()));
                    }
                }
            }
        }

        *self.folder_images.lock() = chosen
            .into_iter()
            .map(|(dir, (_, rel))| (dir, rel))
            .collect();
    }

    /// The resolution pipeline: do-not-retry, override, cached parse,
    /// filename pattern, then the container tags; hard or partial parse
    /// failures land in the do-not-retry set.
    pub async fn metadata_for_song(&self, path: &Path) -> Result<Option<SongTags>, LibraryError> {
        let rel = self.relpath(path)?;
        if self.cache.has_failed(&rel) {
            return Ok(None);
        }

        let over = self.overrides.get(&rel);
        let merged = |tags: &SongTags| match &over {
            Some(over) => tags.merged_with(over),
            None => tags.clone(),
        };

        if let Some(cached) = self.cache.get(&rel) {
            return Ok(Some(merged(&cached)));
        }

        let pattern = metadata::parse_path(&rel);
        let base = pattern.clone().unwrap_or_else(|| SongTags {
            original_path: rel.clone(),
            ..SongTags::default()
        });
        let result = merged(&base);
        if result.is_complete() {
            if let Some(pattern) = pattern {
                self.cache.set(&rel, pattern);
            }
            return Ok(Some(result));
        }

        let abs = common::join_relpath(&self.root, &rel);
        match metadata::read_tags(&abs) {
            Err(err) => {
                debug!("Tag parse failed for {}: {}", rel, err);
                self.cache.mark_failed(&rel);
                Ok(None)
            }
            Ok(raw) => {
                let mut full = metadata::synthesize(&rel, &raw);
                if full.title.is_none() {
                    full.title = file_stem(&rel);
                }
                let result = merged(&full);
                if !result.is_complete() {
                    debug!("Tags incomplete for {}; will not retry", rel);
                    self.cache.mark_failed(&rel);
                    return Ok(None);
                }
                self.cache.set(&rel, full);
                Ok(Some(result))
            }
        }
    }

    /// Write a user edit into the override store.
    pub fn update_metadata(&self, tags: SongTags) -> Result<bool, LibraryError> {
        let rel = tags.original_path.clone();
        if !is_valid_rel(&rel) {
            return Err(LibraryError::InvalidPath(PathBuf::from(rel)));
        }
        self.overrides.set(&rel, tags);
        Ok(true)
    }

    /// Probe order: blob store, then (when `prefer_internal`) the tags
    /// embedded in the file, then the folder cover, then the embedded
    /// tags.
    pub async fn image_for_song(&self, key: SongKey, prefer_internal: bool) -> Option<Vec<u8>> {
        if let Some(bytes) = self.images.get(&MediaKey::Song(key)) {
            return Some(bytes);
        }
        let rel = self.song_relpath(key)?;
        let abs = common::join_relpath(&self.root, &rel);
        if prefer_internal {
            if let Some(bytes) = embedded_cover(&abs) {
                return Some(bytes);
            }
        }
        if let Some(bytes) = self.folder_image_bytes(&rel) {
            return Some(bytes);
        }
        if prefer_internal {
            None
        } else {
            embedded_cover(&abs)
        }
    }

    /// Blob-store lookup for album/artist artwork stored in this
    /// fragment.
    pub fn stored_image(&self, key: MediaKey) -> Option<Vec<u8>> {
        self.images.get(&key)
    }

    pub fn set_image(&self, key: MediaKey, bytes: &[u8]) -> Result<(), LibraryError> {
        self.images.put(&key, bytes)
    }

    pub fn folder_image_bytes(&self, song_rel: &str) -> Option<Vec<u8>> {
        let image_rel = {
            let folder_images = self.folder_images.lock();
            folder_images.get(common::rel_dirname(song_rel)).cloned()
        }?;
        fs::read(common::join_relpath(&self.root, &image_rel)).ok()
    }

    pub fn embedded_image_bytes(&self, song_rel: &str) -> Option<Vec<u8>> {
        embedded_cover(&common::join_relpath(&self.root, song_rel))
    }

    pub fn for_each_file(&self, f: impl FnMut(&str)) {
        self.index.lock().for_each_file(f);
    }

    /// Flush every pending save. The owning registry drops its entry
    /// separately.
    pub async fn destroy(&self) {
        self.cache.flush().await;
        self.overrides.flush().await;
        self.images.flush().await;
        self.keys_debounce.trigger().await;
    }
}

fn state_dir_for(root: &Path, hash: u32, fallback: &Arc<dyn Persist>) -> PathBuf {
    if root.is_dir() {
        let primary = root.join(STATE_DIR);
        match fs::create_dir_all(&primary) {
            Ok(()) => return primary,
            Err(err) => {
                warn!(
                    "Fragment state dir {} is not writable ({}); using fallback",
                    primary.display(),
                    err
                );
            }
        }
    }
    let derived = fallback
        .location()
        .join("afi")
        .join(encode_u32_path_safe(hash));
    if let Err(err) = fs::create_dir_all(&derived) {
        warn!("Failed to create fallback state dir {}: {}", derived.display(), err);
    }
    derived
}

fn embedded_cover(path: &Path) -> Option<Vec<u8>> {
    metadata::read_embedded_cover(path).ok().flatten()
}

fn file_stem(relpath: &str) -> Option<String> {
    let base = common::rel_basename(relpath);
    let stem = base.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(base);
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

fn is_valid_rel(rel: &str) -> bool {
    !rel.is_empty()
        && !rel.starts_with('/')
        && !rel.split('/').any(|part| part.is_empty() || part == "..")
}
