use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::keys::encode_u32;
use common::{chain_hash, hash32, SongKey};
use tracing::warn;

use crate::fragment::AudioFileFragment;
use crate::persist::Persist;

struct RegisteredRoot {
    folded: String,
    root: PathBuf,
    prefix: String,
}

/// Owns every registered fragment. Lookup by encoded prefix, by song key,
/// or by longest case-insensitive root-path prefix. Deregistered prefixes
/// are retired rather than reused so song keys stay unambiguous for the
/// life of the registry.
#[derive(Default)]
pub struct FragmentRegistry {
    by_prefix: HashMap<String, Arc<AudioFileFragment>>,
    roster: Vec<RegisteredRoot>,
    retired: HashSet<String>,
}

impl FragmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root, minting its fragment hash. Prefix collisions
    /// (against live and retired slots) chain-rehash until free.
    pub fn register(
        &mut self,
        root: PathBuf,
        fallback: &Arc<dyn Persist>,
    ) -> Arc<AudioFileFragment> {
        if let Some(existing) = self.for_root(&root) {
            return existing;
        }
        let root_text = common::path_to_slash_string(&root);
        let mut hash = hash32(&root_text);
        loop {
            let prefix = encode_u32(hash);
            if self.by_prefix.contains_key(&prefix) || self.retired.contains(&prefix) {
                warn!("Fragment hash collision on {}; rehashing", root.display());
                hash = chain_hash(hash, &root_text);
            } else {
                break;
            }
        }
        self.insert(root, hash, fallback)
    }

    /// Re-register a fragment restored from the persisted roster,
    /// trusting its stored hash.
    pub fn register_with_hash(
        &mut self,
        root: PathBuf,
        hash: u32,
        fallback: &Arc<dyn Persist>,
    ) -> Arc<AudioFileFragment> {
        if let Some(existing) = self.for_root(&root) {
            return existing;
        }
        self.insert(root, hash, fallback)
    }

    fn insert(
        &mut self,
        root: PathBuf,
        hash: u32,
        fallback: &Arc<dyn Persist>,
    ) -> Arc<AudioFileFragment> {
        let fragment = AudioFileFragment::new(root.clone(), hash, fallback);
        let prefix = fragment.prefix().to_string();
        self.by_prefix.insert(prefix.clone(), Arc::clone(&fragment));
        self.roster.push(RegisteredRoot {
            folded: common::path_to_slash_string(&root).to_lowercase(),
            root,
            prefix,
        });
        // Longest root first, so nested roots resolve to the deeper one.
        self.roster.sort_by(|a, b| {
            b.folded
                .len()
                .cmp(&a.folded.len())
                .then_with(|| a.folded.cmp(&b.folded))
        });
        fragment
    }

    /// Remove a root; its prefix is retired, never reissued.
    pub fn deregister(&mut self, root: &Path) -> Option<Arc<AudioFileFragment>> {
        let folded = common::path_to_slash_string(root).to_lowercase();
        let position = self.roster.iter().position(|entry| entry.folded == folded)?;
        let entry = self.roster.remove(position);
        self.retired.insert(entry.prefix.clone());
        self.by_prefix.remove(&entry.prefix)
    }

    pub fn for_root(&self, root: &Path) -> Option<Arc<AudioFileFragment>> {
        let folded = common::path_to_slash_string(root).to_lowercase();
        self.roster
            .iter()
            .find(|entry| entry.folded == folded)
            .and_then(|entry| self.by_prefix.get(&entry.prefix).cloned())
    }

    /// Longest case-insensitive root-prefix match over the roster.
    pub fn for_path(&self, path: &Path) -> Option<Arc<AudioFileFragment>> {
        let folded = common::path_to_slash_string(path).to_lowercase();
        for entry in &self.roster {
            if folded == entry.folded {
                return self.by_prefix.get(&entry.prefix).cloned();
            }
            if folded.starts_with(&entry.folded) {
                let boundary = folded.as_bytes().get(entry.folded.len());
                if boundary == Some(&b'/') || entry.folded.ends_with('/') {
                    return self.by_prefix.get(&entry.prefix).cloned();
                }
            }
        }
        None
    }

    pub fn for_prefix(&self, prefix: &str) -> Option<Arc<AudioFileFragment>> {
        self.by_prefix.get(prefix).cloned()
    }

    pub fn for_key(&self, key: SongKey) -> Option<Arc<AudioFileFragment>> {
        self.for_prefix(&key.fragment_prefix())
    }

    pub fn fragments(&self) -> Vec<Arc<AudioFileFragment>> {
        self.roster
            .iter()
            .filter_map(|entry| self.by_prefix.get(&entry.prefix).cloned())
            .collect()
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.roster.iter().map(|entry| entry.root.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryPersist;
    use tempfile::TempDir;

    fn fallback(dir: &TempDir) -> Arc<dyn Persist> {
        Arc::new(MemoryPersist::new(dir.path().join("state")))
    }

    #[test]
    fn registers_and_resolves_by_path() {
        let dir = TempDir::new().unwrap();
        let fallback = fallback(&dir);
        let mut registry = FragmentRegistry::new();
        let fragment = registry.register(PathBuf::from("/Music/Main"), &fallback);

        let found = registry
            .for_path(Path::new("/music/main/Artist/song.mp3"))
            .unwrap();
        assert_eq!(found.hash(), fragment.hash());
        assert!(registry.for_path(Path::new("/music/mainline/x.mp3")).is_none());
        assert!(registry.for_path(Path::new("/elsewhere/x.mp3")).is_none());
    }

    #[test]
    fn nested_roots_resolve_to_the_deeper_one() {
        let dir = TempDir::new().unwrap();
        let fallback = fallback(&dir);
        let mut registry = FragmentRegistry::new();
        registry.register(PathBuf::from("/music"), &fallback);
        let inner = registry.register(PathBuf::from("/music/classical"), &fallback);

        let found = registry
            .for_path(Path::new("/music/classical/Bach/01.flac"))
            .unwrap();
        assert_eq!(found.hash(), inner.hash());
    }

    #[test]
    fn key_prefix_resolves_its_fragment() {
        let dir = TempDir::new().unwrap();
        let fallback = fallback(&dir);
        let mut registry = FragmentRegistry::new();
        let fragment = registry.register(PathBuf::from("/music"), &fallback);
        let key = SongKey::new(fragment.hash(), 42);
        assert_eq!(registry.for_key(key).unwrap().hash(), fragment.hash());
    }

    #[test]
    fn deregistered_prefixes_are_retired() {
        let dir = TempDir::new().unwrap();
        let fallback = fallback(&dir);
        let mut registry = FragmentRegistry::new();
        let fragment = registry.register(PathBuf::from("/music"), &fallback);
        let hash = fragment.hash();
        let prefix = fragment.prefix().to_string();

        assert!(registry.deregister(Path::new("/music")).is_some());
        assert!(registry.for_prefix(&prefix).is_none());
        assert!(registry.is_empty());

        // Re-registering the same root chains past the retired slot.
        let again = registry.register(PathBuf::from("/music"), &fallback);
        assert_ne!(again.hash(), hash);
    }

    #[test]
    fn registering_twice_returns_the_same_fragment() {
        let dir = TempDir::new().unwrap();
        let fallback = fallback(&dir);
        let mut registry = FragmentRegistry::new();
        let first = registry.register(PathBuf::from("/music"), &fallback);
        let second = registry.register(PathBuf::from("/music"), &fallback);
        assert_eq!(first.hash(), second.hash());
        assert_eq!(registry.fragments().len(), 1);
    }
}
