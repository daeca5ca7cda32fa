use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::{Album, AlbumKey, Artist, ArtistKey, MediaKey, Song, SongKey};
use metadata::SongTags;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::LibraryError;
use crate::graph::{FlatDb, Graph};
use crate::ignore::{IgnoreKind, IgnoreRules};
use crate::persist::Persist;
use crate::registry::FragmentRegistry;
use crate::search::{SearchIndex, SearchResults};

pub const DEFAULT_DATABASE_KEY: &str = "audio-database";
const REFRESH_GRACE: Duration = Duration::from_millis(100);
const REFRESH_YIELD_EVERY: usize = 64;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub songs: usize,
    pub albums: usize,
    pub artists: usize,
}

#[derive(Serialize, Deserialize)]
struct SavedDb {
    songs: HashMap<SongKey, Song>,
    albums: HashMap<AlbumKey, Album>,
    artists: HashMap<ArtistKey, Artist>,
    #[serde(rename = "albumTitleIndex")]
    album_titles: HashMap<String, BTreeSet<AlbumKey>>,
    #[serde(rename = "artistNameIndex")]
    artist_names: HashMap<String, ArtistKey>,
    indices: Vec<SavedIndex>,
}

#[derive(Serialize, Deserialize)]
struct SavedIndex {
    location: PathBuf,
    hash: u32,
}

struct GraphState {
    graph: Graph,
    search: Option<SearchIndex>,
}

struct Shared {
    persist: Arc<dyn Persist>,
    db_key: String,
    state: Mutex<GraphState>,
    registry: Mutex<FragmentRegistry>,
    ignore: IgnoreRules,
    refresh_gate: tokio::sync::Mutex<()>,
    /// Outcome of the most recent refresh, observed by callers that join
    /// an in-flight one. Errors cross as strings; `LibraryError` is not
    /// cloneable.
    refresh_done: watch::Sender<Option<Result<bool, String>>>,
}

/// The aggregate catalog: a set of fragments merged into one
/// song/album/artist graph, plus keyword search, artwork routing, and
/// JSON persistence of the whole graph under one persist key.
///
/// The handle is cheap to clone; the graph lock is never held across a
/// suspension point, so concurrent tasks always observe a consistent
/// graph.
#[derive(Clone)]
pub struct AudioDatabase {
    shared: Arc<Shared>,
}

impl AudioDatabase {
    pub fn new(persist: Arc<dyn Persist>) -> Self {
        Self::with_database_key(persist, DEFAULT_DATABASE_KEY)
    }

    pub fn with_database_key(persist: Arc<dyn Persist>, db_key: &str) -> Self {
        let ignore = IgnoreRules::new(Arc::clone(&persist));
        if let Err(err) = ignore.load() {
            warn!("Failed to load ignore rules: {}", err);
        }
        let (refresh_done, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                persist,
                db_key: db_key.to_string(),
                state: Mutex::new(GraphState {
                    graph: Graph::new(),
                    search: None,
                }),
                registry: Mutex::new(FragmentRegistry::new()),
                ignore,
                refresh_gate: tokio::sync::Mutex::new(()),
                refresh_done,
            }),
        }
    }

    /// Register a root directory. `false` when the directory is missing
    /// or already registered.
    pub async fn add_file_location(&self, path: &Path) -> Result<bool, LibraryError> {
        if !path.is_dir() {
            return Ok(false);
        }
        let fragment = {
            let mut registry = self.shared.registry.lock();
            if registry.for_root(path).is_some() {
                return Ok(false);
            }
            registry.register(path.to_path_buf(), &self.shared.persist)
        };
        fragment.load()?;
        info!("Registered file location {}", path.display());
        Ok(true)
    }

    /// Deregister a root and cascade-delete its songs. `false` when the
    /// root was never registered.
    pub async fn remove_file_location(&self, path: &Path) -> Result<bool, LibraryError> {
        let Some(fragment) = self.shared.registry.lock().deregister(path) else {
            return Ok(false);
        };

        let doomed: Vec<SongKey> = {
            let state = self.shared.state.lock();
            state
                .graph
                .songs
                .keys()
                .filter(|key| key.fragment == fragment.hash())
                .copied()
                .collect()
        };
        {
            let mut state = self.shared.state.lock();
            for key in doomed {
                state.graph.remove_song(key);
            }
            state.search = None;
        }

        fragment.destroy().await;
        info!("Removed file location {}", path.display());
        Ok(true)
    }

    pub fn get_locations(&self) -> Vec<PathBuf> {
        self.shared.registry.lock().roots()
    }

    /// Rescan every fragment. A single refresh runs at a time: late
    /// callers wait a bounded grace for the in-flight one and return its
    /// actual result, or `false` ("skipped") when it does not finish in
    /// time.
    pub async fn refresh(&self) -> Result<bool, LibraryError> {
        match self.shared.refresh_gate.try_lock() {
            Ok(_guard) => {
                let result = self.run_refresh().await;
                let outcome = match &result {
                    Ok(()) => Ok(true),
                    Err(err) => Err(err.to_string()),
                };
                self.shared.refresh_done.send_replace(Some(outcome));
                result.map(|_| true)
            }
            Err(_) => {
                let mut rx = self.shared.refresh_done.subscribe();
                match tokio::time::timeout(REFRESH_GRACE, rx.changed()).await {
                    Ok(Ok(())) => match rx.borrow().clone() {
                        Some(Ok(done)) => Ok(done),
                        Some(Err(message)) => Err(LibraryError::Refresh(message)),
                        None => Ok(false),
                    },
                    Ok(Err(_)) | Err(_) => Ok(false),
                }
            }
        }
    }

    async fn run_refresh(&self) -> Result<(), LibraryError> {
        self.shared.ignore.load()?;
        let ignore = self.shared.ignore.snapshot();
        let fragments = self.shared.registry.lock().fragments();

        for fragment in fragments {
            fragment.load()?;

            let mut added: Vec<PathBuf> = Vec::new();
            let mut removed: Vec<PathBuf> = Vec::new();
            fragment
                .rescan_files(
                    &ignore,
                    |path| added.push(path.to_path_buf()),
                    |path| removed.push(path.to_path_buf()),
                )
                .await?;

            for (done, path) in removed.iter().enumerate() {
                if done % REFRESH_YIELD_EVERY == 0 {
                    tokio::task::yield_now().await;
                }
                let Ok(rel) = fragment.relpath(path) else {
                    continue;
                };
                if let Some(key) = fragment.existing_key_for(&rel) {
                    let mut state = self.shared.state.lock();
                    state.graph.remove_song(key);
                    state.search = None;
                }
            }

            for (done, path) in added.iter().enumerate() {
                if done % REFRESH_YIELD_EVERY == 0 {
                    tokio::task::yield_now().await;
                }
                let tags = match fragment.metadata_for_song(path).await {
                    Ok(Some(tags)) => tags,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!("Skipping {}: {}", path.display(), err);
                        continue;
                    }
                };
                let key = fragment.make_song_key(path)?;
                let mut state = self.shared.state.lock();
                state.graph.add_song(key, path.clone(), &tags);
                state.search = None;
            }
        }

        let stats = self.stats();
        info!(
            "Refresh complete: {} songs, {} albums, {} artists",
            stats.songs, stats.albums, stats.artists
        );
        Ok(())
    }

    /// Index one complete metadata record whose file lives under a
    /// registered root. Errors with `NoFragment` otherwise.
    pub async fn add_song(&self, path: &Path, tags: &SongTags) -> Result<SongKey, LibraryError> {
        let fragment = self
            .shared
            .registry
            .lock()
            .for_path(path)
            .ok_or_else(|| LibraryError::NoFragment(path.to_path_buf()))?;
        let key = fragment.make_song_key(path)?;
        let mut state = self.shared.state.lock();
        state.graph.add_song(key, path.to_path_buf(), tags);
        state.search = None;
        Ok(key)
    }

    pub fn delete_song(&self, key: SongKey) -> bool {
        let mut state = self.shared.state.lock();
        let removed = state.graph.remove_song(key);
        if removed {
            state.search = None;
        }
        removed
    }

    pub fn delete_song_by_path(&self, path: &Path) -> Result<bool, LibraryError> {
        let fragment = self
            .shared
            .registry
            .lock()
            .for_path(path)
            .ok_or_else(|| LibraryError::NoFragment(path.to_path_buf()))?;
        let rel = fragment.relpath(path)?;
        let Some(key) = fragment.existing_key_for(&rel) else {
            return Ok(false);
        };
        Ok(self.delete_song(key))
    }

    pub fn get_song(&self, key: SongKey) -> Option<Song> {
        self.shared.state.lock().graph.songs.get(&key).cloned()
    }

    pub fn get_album(&self, key: AlbumKey) -> Option<Album> {
        self.shared.state.lock().graph.albums.get(&key).cloned()
    }

    pub fn get_artist(&self, key: ArtistKey) -> Option<Artist> {
        self.shared.state.lock().graph.artists.get(&key).cloned()
    }

    /// Keyword AND-search over the three entity kinds. The index builds
    /// lazily on first query and is dropped on every graph mutation.
    pub fn search_index(&self, substring: bool, terms: &str) -> SearchResults {
        let mut state = self.shared.state.lock();
        if state.search.is_none() {
            let index = {
                let graph = &state.graph;
                SearchIndex::build(
                    graph.songs.values(),
                    graph.albums.values(),
                    graph.artists.values(),
                )
            };
            state.search = Some(index);
        }
        state
            .search
            .as_ref()
            .map(|search| search.search(substring, terms))
            .unwrap_or_default()
    }

    pub async fn get_metadata(&self, path: &Path) -> Result<Option<SongTags>, LibraryError> {
        let fragment = self
            .shared
            .registry
            .lock()
            .for_path(path)
            .ok_or_else(|| LibraryError::NoFragment(path.to_path_buf()))?;
        fragment.load()?;
        fragment.metadata_for_song(path).await
    }

    pub async fn get_metadata_by_key(&self, key: SongKey) -> Result<Option<SongTags>, LibraryError> {
        let Some(fragment) = self.shared.registry.lock().for_key(key) else {
            return Ok(None);
        };
        fragment.load()?;
        let Some(path) = fragment.song_path(key) else {
            return Ok(None);
        };
        fragment.metadata_for_song(&path).await
    }

    /// Write a user override for the file at `path` and, when the song is
    /// already indexed, re-resolve it into the graph. `false` when no
    /// registered root covers the path.
    pub async fn update_metadata(&self, path: &Path, partial: SongTags) -> Result<bool, LibraryError> {
        let Some(fragment) = self.shared.registry.lock().for_path(path) else {
            return Ok(false);
        };
        fragment.load()?;
        let rel = fragment.relpath(path)?;
        let mut partial = partial;
        partial.original_path = rel.clone();
        fragment.update_metadata(partial)?;

        if let Some(key) = fragment.existing_key_for(&rel) {
            let indexed = self.shared.state.lock().graph.songs.contains_key(&key);
            if indexed {
                if let Some(tags) = fragment.metadata_for_song(path).await? {
                    let mut state = self.shared.state.lock();
                    state.graph.add_song(key, path.to_path_buf(), &tags);
                    state.search = None;
                }
            }
        }
        Ok(true)
    }

    pub async fn get_song_picture(&self, key: SongKey) -> Option<Vec<u8>> {
        let fragment = self.shared.registry.lock().for_key(key)?;
        fragment.image_for_song(key, false).await
    }

    pub async fn set_song_picture(&self, key: SongKey, bytes: &[u8]) -> Result<bool, LibraryError> {
        let Some(fragment) = self.shared.registry.lock().for_key(key) else {
            return Ok(false);
        };
        fragment.set_image(MediaKey::Song(key), bytes)?;
        Ok(true)
    }

    /// Blob-store artwork first, then each song's folder cover, then
    /// embedded tags.
    pub async fn get_album_picture(&self, key: AlbumKey) -> Option<Vec<u8>> {
        let song_keys = {
            let state = self.shared.state.lock();
            state.graph.albums.get(&key)?.songs.clone()
        };

        for song_key in &song_keys {
            let Some(fragment) = self.shared.registry.lock().for_key(*song_key) else {
                continue;
            };
            if let Some(bytes) = fragment.stored_image(MediaKey::Album(key)) {
                return Some(bytes);
            }
        }
        for song_key in &song_keys {
            let Some(fragment) = self.shared.registry.lock().for_key(*song_key) else {
                continue;
            };
            let Some(rel) = fragment.song_relpath(*song_key) else {
                continue;
            };
            if let Some(bytes) = fragment.folder_image_bytes(&rel) {
                return Some(bytes);
            }
            if let Some(bytes) = fragment.embedded_image_bytes(&rel) {
                return Some(bytes);
            }
        }
        None
    }

    pub async fn set_album_picture(&self, key: AlbumKey, bytes: &[u8]) -> Result<bool, LibraryError> {
        let Some(song_key) = ({
            let state = self.shared.state.lock();
            state
                .graph
                .albums
                .get(&key)
                .and_then(|album| album.songs.first().copied())
        }) else {
            return Ok(false);
        };
        let Some(fragment) = self.shared.registry.lock().for_key(song_key) else {
            return Ok(false);
        };
        fragment.set_image(MediaKey::Album(key), bytes)?;
        Ok(true)
    }

    /// Direct artist artwork, then the artist's first album's picture.
    pub async fn get_artist_picture(&self, key: ArtistKey) -> Option<Vec<u8>> {
        let (song_keys, album_keys) = {
            let state = self.shared.state.lock();
            let artist = state.graph.artists.get(&key)?;
            (artist.songs.clone(), artist.albums.clone())
        };

        for song_key in &song_keys {
            let Some(fragment) = self.shared.registry.lock().for_key(*song_key) else {
                continue;
            };
            if let Some(bytes) = fragment.stored_image(MediaKey::Artist(key)) {
                return Some(bytes);
            }
        }
        for album_key in album_keys {
            if let Some(bytes) = self.get_album_picture(album_key).await {
                return Some(bytes);
            }
        }
        None
    }

    pub async fn set_artist_picture(&self, key: ArtistKey, bytes: &[u8]) -> Result<bool, LibraryError> {
        let Some(song_key) = ({
            let state = self.shared.state.lock();
            state
                .graph
                .artists
                .get(&key)
                .and_then(|artist| artist.songs.first().copied())
        }) else {
            return Ok(false);
        };
        let Some(fragment) = self.shared.registry.lock().for_key(song_key) else {
            return Ok(false);
        };
        fragment.set_image(MediaKey::Artist(key), bytes)?;
        Ok(true)
    }

    pub fn get_canonical_file_name(&self, key: SongKey) -> Option<String> {
        self.shared.state.lock().graph.canonical_file_name(key)
    }

    pub fn add_ignore_item(&self, kind: IgnoreKind, value: &str) -> bool {
        self.shared.ignore.add(kind, value)
    }

    pub fn remove_ignore_item(&self, kind: IgnoreKind, value: &str) -> bool {
        self.shared.ignore.remove(kind, value)
    }

    pub fn get_ignore_items(&self) -> Vec<(IgnoreKind, String)> {
        self.shared.ignore.items()
    }

    /// Serialize the graph and the fragment roster under the database
    /// key.
    pub async fn save(&self) -> Result<(), LibraryError> {
        let blob = {
            let state = self.shared.state.lock();
            let registry = self.shared.registry.lock();
            let saved = SavedDb {
                songs: state.graph.songs.clone(),
                albums: state.graph.albums.clone(),
                artists: state.graph.artists.clone(),
                album_titles: state.graph.album_titles.clone(),
                artist_names: state.graph.artist_names.clone(),
                indices: registry
                    .fragments()
                    .iter()
                    .map(|fragment| SavedIndex {
                        location: fragment.root().to_path_buf(),
                        hash: fragment.hash(),
                    })
                    .collect(),
            };
            serde_json::to_string(&saved)?
        };
        self.shared.persist.set_item(&self.shared.db_key, &blob)?;
        Ok(())
    }

    /// Restore a saved graph and re-register its fragments. `false`
    /// (and no change) when nothing was persisted.
    pub async fn load(&self) -> Result<bool, LibraryError> {
        let Some(blob) = self.shared.persist.get_item(&self.shared.db_key)? else {
            return Ok(false);
        };
        let saved: SavedDb = serde_json::from_str(&blob)?;

        let graph = Graph::from_parts(
            saved.songs,
            saved.albums,
            saved.artists,
            saved.album_titles,
            saved.artist_names,
        );
        for problem in graph.verify() {
            warn!("Loaded graph inconsistency: {}", problem);
        }
        {
            let mut state = self.shared.state.lock();
            state.graph = graph;
            state.search = None;
        }

        let fragments = {
            let mut registry = self.shared.registry.lock();
            saved
                .indices
                .into_iter()
                .map(|index| {
                    registry.register_with_hash(index.location, index.hash, &self.shared.persist)
                })
                .collect::<Vec<_>>()
        };
        for fragment in fragments {
            if let Err(err) = fragment.load() {
                warn!(
                    "Failed to load fragment state for {}: {}",
                    fragment.root().display(),
                    err
                );
            }
        }
        Ok(true)
    }

    pub fn stats(&self) -> LibraryStats {
        let state = self.shared.state.lock();
        LibraryStats {
            songs: state.graph.songs.len(),
            albums: state.graph.albums.len(),
            artists: state.graph.artists.len(),
        }
    }

    pub fn flatten(&self) -> FlatDb {
        self.shared.state.lock().graph.flatten()
    }

    /// Referential-integrity violations, if any. Logged by callers;
    /// never fatal.
    pub fn verify(&self) -> Vec<String> {
        self.shared.state.lock().graph.verify()
    }

    /// Flush every debounced store (ignore rules and all fragments).
    pub async fn flush(&self) {
        self.shared.ignore.flush().await;
        let fragments = self.shared.registry.lock().fragments();
        for fragment in fragments {
            fragment.destroy().await;
        }
    }
}
