use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;
use walkdir::WalkDir;

use crate::error::LibraryError;
use crate::ignore::IgnoreSet;
use crate::persist::Persist;

const FILE_INDEX_KEY: &str = "fileIndex.txt";
const YIELD_EVERY: usize = 256;

const AUDIO_SUFFIXES: [&str; 4] = ["flac", "mp3", "aac", "m4a"];
const IMAGE_SUFFIXES: [&str; 5] = ["png", "jpg", "jpeg", "heic", "hei"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Audio,
    Image,
}

/// Classify a slash-form relative path by suffix. Hidden basenames are
/// excluded for audio but allowed for images.
pub fn classify(relpath: &str) -> Option<FileKind> {
    let basename = common::rel_basename(relpath);
    let ext = basename.rsplit_once('.').map(|(_, ext)| ext)?.to_lowercase();
    if AUDIO_SUFFIXES.contains(&ext.as_str()) {
        if basename.starts_with('.') {
            return None;
        }
        return Some(FileKind::Audio);
    }
    if IMAGE_SUFFIXES.contains(&ext.as_str()) {
        return Some(FileKind::Image);
    }
    None
}

/// The persisted sorted list of indexed relative paths under one root.
/// `rescan` swaps in a freshly-walked list in a single assignment after
/// diffing it against the previous one.
pub struct FileIndex {
    persist: Arc<dyn Persist>,
    files: Vec<String>,
    loaded: bool,
}

impl FileIndex {
    pub fn new(persist: Arc<dyn Persist>) -> Self {
        Self {
            persist,
            files: Vec::new(),
            loaded: false,
        }
    }

    pub fn load(&mut self) -> Result<(), LibraryError> {
        if self.loaded {
            return Ok(());
        }
        if let Some(blob) = self.persist.get_item(FILE_INDEX_KEY)? {
            let mut files: Vec<String> = blob
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            files.sort_by(|a, b| fold_cmp(a, b));
            self.files = files;
        }
        self.loaded = true;
        Ok(())
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn for_each_file(&self, mut f: impl FnMut(&str)) {
        for file in &self.files {
            f(file);
        }
    }

    /// Diff `fresh` against the current list, reporting adds and removes
    /// in sorted order, then install and persist the new list.
    pub fn install(
        &mut self,
        fresh: Vec<String>,
        mut on_add: impl FnMut(&str),
        mut on_remove: impl FnMut(&str),
    ) -> Result<(), LibraryError> {
        let mut old_iter = 0usize;
        let mut new_iter = 0usize;
        while old_iter < self.files.len() || new_iter < fresh.len() {
            match (self.files.get(old_iter), fresh.get(new_iter)) {
                (Some(old), Some(new)) => match fold_cmp(old, new) {
                    Ordering::Equal => {
                        old_iter += 1;
                        new_iter += 1;
                    }
                    Ordering::Less => {
                        on_remove(old);
                        old_iter += 1;
                    }
                    Ordering::Greater => {
                        on_add(new);
                        new_iter += 1;
                    }
                },
                (Some(old), None) => {
                    on_remove(old);
                    old_iter += 1;
                }
                (None, Some(new)) => {
                    on_add(new);
                    new_iter += 1;
                }
                (None, None) => break,
            }
        }

        self.files = fresh;
        let blob = self.files.join("\n");
        self.persist.set_item(FILE_INDEX_KEY, &blob)?;
        Ok(())
    }
}

/// Walk `root` and collect every indexable relative path, sorted with the
/// diff comparator. Hidden directories and ignored paths are pruned;
/// unreadable entries are logged and skipped; a missing root is an empty
/// list. Yields to the scheduler every few hundred entries.
pub async fn collect_files(root: &Path, ignore: &IgnoreSet) -> Vec<String> {
    let mut out = Vec::new();
    if !root.is_dir() {
        return out;
    }

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        if entry.file_type().is_dir() {
            let hidden = entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with('.'))
                .unwrap_or(false);
            if hidden {
                return false;
            }
        }
        !ignore.is_ignored(entry.path())
    });

    let mut seen = 0usize;
    for entry in walker {
        seen += 1;
        if seen % YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = match common::relpath_from(root, entry.path()) {
            Some(rel) => rel,
            None => continue,
        };
        if classify(&rel).is_some() {
            out.push(rel);
        }
    }

    out.sort_by(|a, b| fold_cmp(a, b));
    out
}

/// Case-insensitive path ordering used for both the stored list and the
/// rescan diff.
fn fold_cmp(a: &str, b: &str) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    match folded {
        Ordering::Equal => a.cmp(b),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryPersist;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn mem() -> Arc<dyn Persist> {
        Arc::new(MemoryPersist::new(PathBuf::from("/mem")))
    }

    #[test]
    fn classifies_by_suffix_and_hidden_rule() {
        assert_eq!(classify("a/b.mp3"), Some(FileKind::Audio));
        assert_eq!(classify("a/b.FLAC"), Some(FileKind::Audio));
        assert_eq!(classify("a/.hidden.mp3"), None);
        assert_eq!(classify("a/.folder.jpg"), Some(FileKind::Image));
        assert_eq!(classify("a/cover.png"), Some(FileKind::Image));
        assert_eq!(classify("a/readme.txt"), None);
        assert_eq!(classify("a/noext"), None);
    }

    #[test]
    fn diff_reports_adds_and_removes_in_order() {
        let mut index = FileIndex::new(mem());
        index.load().unwrap();
        let mut added = Vec::new();
        index
            .install(
                vec!["A/1.mp3".into(), "B/2.mp3".into(), "C/3.mp3".into()],
                |path| added.push(path.to_string()),
                |_| panic!("no removals expected"),
            )
            .unwrap();
        assert_eq!(added, ["A/1.mp3", "B/2.mp3", "C/3.mp3"]);

        let mut added = Vec::new();
        let mut removed = Vec::new();
        index
            .install(
                vec!["A/1.mp3".into(), "B/2a.mp3".into(), "C/3.mp3".into()],
                |path| added.push(path.to_string()),
                |path| removed.push(path.to_string()),
            )
            .unwrap();
        assert_eq!(added, ["B/2a.mp3"]);
        assert_eq!(removed, ["B/2.mp3"]);
    }

    #[test]
    fn diff_is_case_insensitive() {
        let mut index = FileIndex::new(mem());
        index.load().unwrap();
        index
            .install(vec!["Album/Song.mp3".into()], |_| {}, |_| {})
            .unwrap();

        let mut added_touched = false;
        let mut removed_touched = false;
        index
            .install(
                vec!["album/song.mp3".into()],
                |_| added_touched = true,
                |_| removed_touched = true,
            )
            .unwrap();
        assert!(!added_touched && !removed_touched);
    }

    #[test]
    fn persisted_list_survives_reload() {
        let persist = mem();
        let mut index = FileIndex::new(Arc::clone(&persist));
        index.load().unwrap();
        index
            .install(vec!["x/y.mp3".into()], |_| {}, |_| {})
            .unwrap();

        let mut reloaded = FileIndex::new(persist);
        reloaded.load().unwrap();
        assert_eq!(reloaded.files(), ["x/y.mp3"]);
    }

    #[tokio::test]
    async fn walk_collects_sorted_and_prunes_hidden_dirs() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("B")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::create_dir_all(root.join(".afi")).unwrap();
        fs::write(root.join("a/2.mp3"), b"x").unwrap();
        fs::write(root.join("B/1.flac"), b"x").unwrap();
        fs::write(root.join("B/cover.jpg"), b"x").unwrap();
        fs::write(root.join("B/notes.txt"), b"x").unwrap();
        fs::write(root.join(".afi/secret.mp3"), b"x").unwrap();

        let files = collect_files(root, &IgnoreSet::default()).await;
        assert_eq!(files, ["a/2.mp3", "B/1.flac", "B/cover.jpg"]);
    }

    #[tokio::test]
    async fn missing_root_walks_to_nothing() {
        let files = collect_files(Path::new("/no/such/root"), &IgnoreSet::default()).await;
        assert!(files.is_empty());
    }
}
