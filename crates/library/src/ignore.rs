use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::debounce::{Debouncer, SAVE_DEBOUNCE};
use crate::error::LibraryError;
use crate::persist::Persist;

const IGNORE_KEY: &str = "ignore-items";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IgnoreKind {
    #[serde(rename = "path-root")]
    PathRoot,
    #[serde(rename = "path-keyword")]
    PathKeyword,
    #[serde(rename = "dir-name")]
    DirName,
}

impl IgnoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IgnoreKind::PathRoot => "path-root",
            IgnoreKind::PathKeyword => "path-keyword",
            IgnoreKind::DirName => "dir-name",
        }
    }
}

impl std::fmt::Display for IgnoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IgnoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "path-root" => Ok(IgnoreKind::PathRoot),
            "path-keyword" => Ok(IgnoreKind::PathKeyword),
            "dir-name" => Ok(IgnoreKind::DirName),
            other => Err(format!("unknown ignore kind: {}", other)),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct IgnoreData {
    #[serde(default)]
    path_roots: BTreeSet<String>,
    #[serde(default)]
    path_keywords: BTreeSet<String>,
    #[serde(default)]
    dir_names: BTreeSet<String>,
}

/// Walk-time exclusion rules, persisted as one JSON blob with debounced
/// saves. Matching is case-insensitive throughout.
pub struct IgnoreRules {
    data: Arc<Mutex<IgnoreData>>,
    debounce: Debouncer,
    persist: Arc<dyn Persist>,
    loaded: Mutex<bool>,
}

impl IgnoreRules {
    pub fn new(persist: Arc<dyn Persist>) -> Self {
        let data: Arc<Mutex<IgnoreData>> = Arc::new(Mutex::new(IgnoreData::default()));
        let saved = Arc::clone(&data);
        let save_persist = Arc::clone(&persist);
        let debounce = Debouncer::new(SAVE_DEBOUNCE, move || {
            let blob = {
                let data = saved.lock();
                serde_json::to_string(&*data)
            };
            match blob {
                Ok(blob) => {
                    if let Err(err) = save_persist.set_item(IGNORE_KEY, &blob) {
                        warn!("Failed to save ignore rules: {}", err);
                    }
                }
                Err(err) => warn!("Failed to serialize ignore rules: {}", err),
            }
        });
        Self {
            data,
            debounce,
            persist,
            loaded: Mutex::new(false),
        }
    }

    pub fn load(&self) -> Result<(), LibraryError> {
        let mut loaded = self.loaded.lock();
        if *loaded {
            return Ok(());
        }
        if let Some(blob) = self.persist.get_item(IGNORE_KEY)? {
            match serde_json::from_str::<IgnoreData>(&blob) {
                Ok(data) => *self.data.lock() = data,
                Err(err) => warn!("Discarding unreadable ignore rules: {}", err),
            }
        }
        *loaded = true;
        Ok(())
    }

    pub fn add(&self, kind: IgnoreKind, value: &str) -> bool {
        let value = value.trim().to_lowercase();
        if value.is_empty() {
            return false;
        }
        let added = {
            let mut data = self.data.lock();
            set_for(&mut data, kind).insert(value)
        };
        if added {
            self.debounce.mark();
        }
        added
    }

    pub fn remove(&self, kind: IgnoreKind, value: &str) -> bool {
        let value = value.trim().to_lowercase();
        let removed = {
            let mut data = self.data.lock();
            set_for(&mut data, kind).remove(&value)
        };
        if removed {
            self.debounce.mark();
        }
        removed
    }

    pub fn items(&self) -> Vec<(IgnoreKind, String)> {
        let data = self.data.lock();
        let mut out = Vec::new();
        out.extend(data.path_roots.iter().map(|v| (IgnoreKind::PathRoot, v.clone())));
        out.extend(data.path_keywords.iter().map(|v| (IgnoreKind::PathKeyword, v.clone())));
        out.extend(data.dir_names.iter().map(|v| (IgnoreKind::DirName, v.clone())));
        out
    }

    /// Immutable snapshot for a directory walk, so no lock is held while
    /// walking.
    pub fn snapshot(&self) -> IgnoreSet {
        IgnoreSet {
            data: self.data.lock().clone(),
        }
    }

    pub async fn flush(&self) {
        self.debounce.trigger().await;
    }
}

#[derive(Clone, Debug, Default)]
pub struct IgnoreSet {
    data: IgnoreData,
}

impl IgnoreSet {
    pub fn is_ignored(&self, path: &Path) -> bool {
        let folded = common::path_to_slash_string(path).to_lowercase();
        if self
            .data
            .path_roots
            .iter()
            .any(|root| folded.starts_with(root.as_str()))
        {
            return true;
        }
        if self
            .data
            .path_keywords
            .iter()
            .any(|keyword| folded.contains(keyword.as_str()))
        {
            return true;
        }
        if !self.data.dir_names.is_empty() {
            for component in folded.split('/') {
                if self.data.dir_names.contains(component) {
                    return true;
                }
            }
        }
        false
    }
}

fn set_for(data: &mut IgnoreData, kind: IgnoreKind) -> &mut BTreeSet<String> {
    match kind {
        IgnoreKind::PathRoot => &mut data.path_roots,
        IgnoreKind::PathKeyword => &mut data.path_keywords,
        IgnoreKind::DirName => &mut data.dir_names,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryPersist;
    use std::path::PathBuf;

    fn rules() -> IgnoreRules {
        IgnoreRules::new(Arc::new(MemoryPersist::new(PathBuf::from("/mem"))))
    }

    #[tokio::test]
    async fn matches_the_three_kinds() {
        let rules = rules();
        rules.add(IgnoreKind::PathRoot, "/media/trash");
        rules.add(IgnoreKind::DirName, "Incoming");
        rules.add(IgnoreKind::PathKeyword, "demo tape");

        let set = rules.snapshot();
        assert!(set.is_ignored(Path::new("/media/trash/a.mp3")));
        assert!(set.is_ignored(Path::new("/music/incoming/b.mp3")));
        assert!(set.is_ignored(Path::new("/music/x/Demo Tape Vol 1/c.mp3")));
        assert!(!set.is_ignored(Path::new("/music/keep/d.mp3")));
    }

    #[tokio::test]
    async fn add_and_remove_report_effect() {
        let rules = rules();
        assert!(rules.add(IgnoreKind::DirName, "tmp"));
        assert!(!rules.add(IgnoreKind::DirName, "TMP"));
        assert!(rules.remove(IgnoreKind::DirName, "tmp"));
        assert!(!rules.remove(IgnoreKind::DirName, "tmp"));
        assert!(!rules.add(IgnoreKind::PathKeyword, "   "));
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let persist: Arc<dyn Persist> = Arc::new(MemoryPersist::new(PathBuf::from("/mem")));
        let rules = IgnoreRules::new(Arc::clone(&persist));
        rules.add(IgnoreKind::DirName, "skipme");
        rules.flush().await;

        let reloaded = IgnoreRules::new(persist);
        reloaded.load().unwrap();
        assert!(reloaded
            .snapshot()
            .is_ignored(Path::new("/m/skipme/x.mp3")));
    }
}
