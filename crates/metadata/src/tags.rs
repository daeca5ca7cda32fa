use std::collections::HashSet;

use common::VaType;
use serde::{Deserialize, Serialize};

use crate::FileTags;

/// Per-file metadata as the catalog understands it. Every field except
/// `original_path` is optional so the same type serves the parse cache,
/// the user override store, and their merge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SongTags {
    /// Root-relative slash-form path; doubles as the store key.
    pub original_path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artists: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_artists: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    /// Disk-encoded: `track_on_disk + disk * 100`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub va_type: Option<VaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variations: Option<Vec<String>>,
}

impl SongTags {
    /// A record the database can index without opening the file again.
    pub fn is_complete(&self) -> bool {
        (!self.artists.is_empty() || self.va_type.map(|v| !v.is_none()).unwrap_or(false))
            && self.album.is_some()
            && self.track.is_some()
            && self.title.is_some()
    }

    /// Equality up to ordering of the array-valued fields; a `set` with a
    /// semantically-equal value must not dirty the store.
    pub fn semantically_equal(&self, other: &SongTags) -> bool {
        fn as_set(items: &[String]) -> HashSet<&str> {
            items.iter().map(String::as_str).collect()
        }
        fn opt_set(items: &Option<Vec<String>>) -> HashSet<&str> {
            items
                .as_deref()
                .map(|v| v.iter().map(String::as_str).collect())
                .unwrap_or_default()
        }

        self.original_path == other.original_path
            && as_set(&self.artists) == as_set(&other.artists)
            && as_set(&self.secondary_artists) == as_set(&other.secondary_artists)
            && opt_set(&self.variations) == opt_set(&other.variations)
            && self.album == other.album
            && self.year == other.year
            && self.track == other.track
            && self.title == other.title
            && self.va_type == other.va_type
            && self.disk_name == other.disk_name
    }

    /// Overlay `over` (the user override) on `self`; populated override
    /// fields win.
    pub fn merged_with(&self, over: &SongTags) -> SongTags {
        SongTags {
            original_path: self.original_path.clone(),
            artists: if over.artists.is_empty() {
                self.artists.clone()
            } else {
                over.artists.clone()
            },
            secondary_artists: if over.secondary_artists.is_empty() {
                self.secondary_artists.clone()
            } else {
                over.secondary_artists.clone()
            },
            album: over.album.clone().or_else(|| self.album.clone()),
            year: over.year.or(self.year),
            track: over.track.or(self.track),
            title: over.title.clone().or_else(|| self.title.clone()),
            va_type: over.va_type.or(self.va_type),
            disk_name: over.disk_name.clone().or_else(|| self.disk_name.clone()),
            variations: over.variations.clone().or_else(|| self.variations.clone()),
        }
    }
}

/// Build a full record from raw container tags. Artist strings are split
/// into primary and featured lists, and bracketed title suffixes become
/// variation tags.
pub fn synthesize(relpath: &str, raw: &FileTags) -> SongTags {
    let mut tags = SongTags {
        original_path: relpath.to_string(),
        ..SongTags::default()
    };

    let artist_text = raw
        .artist
        .clone()
        .or_else(|| raw.album_artist.clone())
        .unwrap_or_default();
    let (mut primary, mut secondary) = split_artists(&artist_text);

    if let Some(va) = va_type_for_artist(&artist_text) {
        tags.va_type = Some(va);
        primary.clear();
        secondary.clear();
    }

    if let Some(title) = raw.title.as_deref() {
        let (clean, variations, featured) = split_title(title);
        tags.title = Some(clean);
        if !variations.is_empty() {
            tags.variations = Some(variations);
        }
        for name in featured {
            if !secondary.iter().any(|s| s.eq_ignore_ascii_case(&name)) {
                secondary.push(name);
            }
        }
    }

    tags.artists = primary;
    tags.secondary_artists = secondary;
    tags.album = raw.album.clone();
    tags.year = raw.year;
    tags.track = match (raw.track_no, raw.disc_no) {
        (Some(track), Some(disk)) => Some(track + disk * 100),
        (Some(track), None) => Some(track),
        _ => None,
    };
    tags
}

/// Split an artist tag into primary and featured name lists.
pub fn split_artists(text: &str) -> (Vec<String>, Vec<String>) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let (main, feat) = split_featuring(trimmed);
    (split_name_list(main), feat.map(split_name_list).unwrap_or_default())
}

fn split_featuring(text: &str) -> (&str, Option<&str>) {
    for marker in [" feat. ", " feat ", " ft. ", " featuring "] {
        if let Some(idx) = find_ignore_case(text, marker) {
            return (&text[..idx], Some(&text[idx + marker.len()..]));
        }
    }
    (text, None)
}

fn split_name_list(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for chunk in text.split(&[',', ';'][..]) {
        for name in chunk.split(" & ") {
            let name = name.trim();
            if !name.is_empty() {
                out.push(name.to_string());
            }
        }
    }
    out
}

// Byte-offset-safe ASCII case folding; the markers are all ASCII.
fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let ned = needle.as_bytes();
    if ned.is_empty() || hay.len() < ned.len() {
        return None;
    }
    (0..=hay.len() - ned.len()).find(|&i| hay[i..i + ned.len()].eq_ignore_ascii_case(ned))
}

fn va_type_for_artist(text: &str) -> Option<VaType> {
    let folded = text.trim().to_lowercase();
    match folded.as_str() {
        "va" | "various" | "various artists" => Some(VaType::Va),
        "soundtrack" | "ost" | "original soundtrack" => Some(VaType::Ost),
        _ => None,
    }
}

/// Strip trailing `[...]` groups off a title. Groups starting with a
/// featuring marker name extra artists; the rest are variation tags
/// (`live`, `remix`, ...).
fn split_title(title: &str) -> (String, Vec<String>, Vec<String>) {
    let mut clean = title.trim().to_string();
    let mut variations = Vec::new();
    let mut featured = Vec::new();

    while let Some(open) = clean.rfind('[') {
        if !clean.ends_with(']') || open == 0 {
            break;
        }
        let inner = clean[open + 1..clean.len() - 1].trim().to_string();
        if inner.is_empty() {
            break;
        }
        let lowered = inner.to_lowercase();
        let mut matched = false;
        for marker in ["feat. ", "feat ", "ft. ", "featuring "] {
            if lowered.starts_with(marker) {
                featured.extend(split_name_list(inner[marker.len()..].trim()));
                matched = true;
                break;
            }
        }
        if !matched {
            variations.insert(0, inner);
        }
        clean.truncate(open);
        let trimmed = clean.trim_end().len();
        clean.truncate(trimmed);
    }

    (clean, variations, featured)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(artist: &str, album: &str, title: &str, track: u32, year: u32) -> FileTags {
        FileTags {
            artist: Some(artist.to_string()),
            album_artist: None,
            album: Some(album.to_string()),
            title: Some(title.to_string()),
            track_no: Some(track),
            disc_no: None,
            year: Some(year),
            has_embedded_cover: false,
        }
    }

    #[test]
    fn synthesizes_a_complete_record() {
        let tags = synthesize("a/b.mp3", &raw("The Artist", "The Album", "A Song", 1, 2000));
        assert!(tags.is_complete());
        assert_eq!(tags.artists, vec!["The Artist"]);
        assert_eq!(tags.track, Some(1));
        assert_eq!(tags.original_path, "a/b.mp3");
    }

    #[test]
    fn disc_number_folds_into_track() {
        let mut file = raw("A", "B", "C", 3, 2000);
        file.disc_no = Some(2);
        let tags = synthesize("x.mp3", &file);
        assert_eq!(tags.track, Some(203));
    }

    #[test]
    fn featuring_splits_into_secondary() {
        let tags = synthesize("x.mp3", &raw("Alpha feat. Beta", "L", "T", 1, 2001));
        assert_eq!(tags.artists, vec!["Alpha"]);
        assert_eq!(tags.secondary_artists, vec!["Beta"]);
    }

    #[test]
    fn multiple_artists_split_on_joiners() {
        let (primary, secondary) = split_artists("Alpha, Beta & Gamma");
        assert_eq!(primary, vec!["Alpha", "Beta", "Gamma"]);
        assert!(secondary.is_empty());
    }

    #[test]
    fn bracketed_suffixes_become_variations() {
        let tags = synthesize("x.mp3", &raw("A", "L", "Song [live] [feat. B]", 1, 2002));
        assert_eq!(tags.title.as_deref(), Some("Song"));
        assert_eq!(tags.variations, Some(vec!["live".to_string()]));
        assert_eq!(tags.secondary_artists, vec!["B"]);
    }

    #[test]
    fn various_artists_collapse_to_va() {
        let tags = synthesize("x.mp3", &raw("Various Artists", "L", "T", 1, 2003));
        assert_eq!(tags.va_type, Some(common::VaType::Va));
        assert!(tags.artists.is_empty());
        assert!(tags.is_complete());
    }

    #[test]
    fn merge_prefers_override_fields() {
        let base = synthesize("x.mp3", &raw("A", "L", "T", 1, 2000));
        let over = SongTags {
            original_path: "x.mp3".to_string(),
            title: Some("Renamed".to_string()),
            ..SongTags::default()
        };
        let merged = base.merged_with(&over);
        assert_eq!(merged.title.as_deref(), Some("Renamed"));
        assert_eq!(merged.artists, vec!["A"]);
    }

    #[test]
    fn semantic_equality_ignores_array_order() {
        let mut left = synthesize("x.mp3", &raw("A, B", "L", "T", 1, 2000));
        let right = synthesize("x.mp3", &raw("B, A", "L", "T", 1, 2000));
        assert!(left.semantically_equal(&right));
        left.title = Some("other".to_string());
        assert!(!left.semantically_equal(&right));
    }
}
