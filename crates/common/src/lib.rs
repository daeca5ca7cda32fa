pub mod hash;
pub mod keys;
pub mod norm;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use hash::{chain_hash, hash32};
pub use keys::{AlbumKey, ArtistKey, KeyParseError, MediaKey, SongKey};
pub use norm::normalize_name;

/// One audio file, attached to exactly one album and at least one artist.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Song {
    pub key: SongKey,
    pub path: PathBuf,
    pub title: String,
    /// Disk-encoded position: `track_on_disk + disk * 100`.
    pub track: u32,
    pub album: AlbumKey,
    pub artists: Vec<ArtistKey>,
    #[serde(default)]
    pub secondary_artists: Vec<ArtistKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variations: Option<Vec<String>>,
}

impl Song {
    pub fn disk(&self) -> u32 {
        self.track / 100
    }

    pub fn track_on_disk(&self) -> u32 {
        self.track % 100
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Album {
    pub key: AlbumKey,
    pub title: String,
    pub year: u32,
    #[serde(default)]
    pub va_type: VaType,
    pub primary_artists: Vec<ArtistKey>,
    pub songs: Vec<SongKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_names: Option<Vec<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artist {
    pub key: ArtistKey,
    pub name: String,
    pub songs: Vec<SongKey>,
    pub albums: Vec<AlbumKey>,
}

/// Album marker: plain, various-artists, or soundtrack. VA and OST albums
/// carry no primary artists and compare equal on title/year/marker alone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaType {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "va")]
    Va,
    #[serde(rename = "ost")]
    Ost,
}

impl VaType {
    pub fn as_str(self) -> &'static str {
        match self {
            VaType::None => "",
            VaType::Va => "va",
            VaType::Ost => "ost",
        }
    }

    pub fn is_none(self) -> bool {
        self == VaType::None
    }
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(path_to_slash_string(rel))
}

pub fn join_relpath(root: &Path, relpath: &str) -> PathBuf {
    let mut out = PathBuf::from(root);
    for part in relpath.split('/') {
        if part.is_empty() {
            continue;
        }
        out.push(part);
    }
    out
}

pub fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}

/// Parent directory of a slash-form relative path, `""` for top-level files.
pub fn rel_dirname(relpath: &str) -> &str {
    match relpath.rfind('/') {
        Some(idx) => &relpath[..idx],
        None => "",
    }
}

pub fn rel_basename(relpath: &str) -> &str {
    match relpath.rfind('/') {
        Some(idx) => &relpath[idx + 1..],
        None => relpath,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_paths_round_trip() {
        let root = Path::new("/music");
        let abs = root.join("Artist").join("Album").join("01 - Song.mp3");
        let rel = relpath_from(root, &abs).unwrap();
        assert_eq!(rel, "Artist/Album/01 - Song.mp3");
        assert_eq!(join_relpath(root, &rel), abs);
    }

    #[test]
    fn dirname_and_basename() {
        assert_eq!(rel_dirname("a/b/c.mp3"), "a/b");
        assert_eq!(rel_dirname("c.mp3"), "");
        assert_eq!(rel_basename("a/b/c.mp3"), "c.mp3");
        assert_eq!(rel_basename("c.mp3"), "c.mp3");
    }

    #[test]
    fn track_encodes_disk() {
        let song = Song {
            key: SongKey::new(1, 2),
            path: PathBuf::from("/m/x.mp3"),
            title: "x".into(),
            track: 203,
            album: AlbumKey(9),
            artists: vec![ArtistKey(4)],
            secondary_artists: Vec::new(),
            variations: None,
        };
        assert_eq!(song.disk(), 2);
        assert_eq!(song.track_on_disk(), 3);
    }
}
