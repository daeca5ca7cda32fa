use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use common::{Album, AlbumKey, Artist, ArtistKey, Song, SongKey};

/// Word-token inverted index over the three entity title streams. Built
/// lazily from the graph and dropped wholesale on any mutation.
pub struct SearchIndex {
    songs: TokenMap<SongKey>,
    albums: TokenMap<AlbumKey>,
    artists: TokenMap<ArtistKey>,
}

#[derive(Default)]
pub struct SearchResults {
    pub songs: Vec<SongKey>,
    pub albums: Vec<AlbumKey>,
    pub artists: Vec<ArtistKey>,
}

impl SearchIndex {
    pub fn build<'a>(
        songs: impl Iterator<Item = &'a Song>,
        albums: impl Iterator<Item = &'a Album>,
        artists: impl Iterator<Item = &'a Artist>,
    ) -> Self {
        let mut index = Self {
            songs: TokenMap::default(),
            albums: TokenMap::default(),
            artists: TokenMap::default(),
        };
        for song in songs {
            index.songs.insert(&song.title, song.key);
        }
        for album in albums {
            index.albums.insert(&album.title, album.key);
        }
        for artist in artists {
            index.artists.insert(&artist.name, artist.key);
        }
        index
    }

    /// Space-separated terms AND together; each term matches a token by
    /// prefix, or anywhere within it when `substring` is set.
    pub fn search(&self, substring: bool, terms: &str) -> SearchResults {
        let terms: Vec<String> = terms
            .split_whitespace()
            .map(|term| term.to_lowercase())
            .collect();
        if terms.is_empty() {
            return SearchResults::default();
        }
        SearchResults {
            songs: self.songs.search(substring, &terms),
            albums: self.albums.search(substring, &terms),
            artists: self.artists.search(substring, &terms),
        }
    }
}

struct TokenMap<K> {
    tokens: HashMap<String, HashSet<K>>,
}

impl<K> Default for TokenMap<K> {
    fn default() -> Self {
        Self {
            tokens: HashMap::new(),
        }
    }
}

impl<K: Copy + Eq + Hash + Ord> TokenMap<K> {
    fn insert(&mut self, text: &str, key: K) {
        for word in text.split_whitespace() {
            let token = word.to_lowercase();
            if token.is_empty() {
                continue;
            }
            self.tokens.entry(token).or_default().insert(key);
        }
    }

    fn matches(&self, substring: bool, term: &str) -> HashSet<K> {
        let mut out = HashSet::new();
        for (token, keys) in &self.tokens {
            let hit = if substring {
                token.contains(term)
            } else {
                token.starts_with(term)
            };
            if hit {
                out.extend(keys.iter().copied());
            }
        }
        out
    }

    fn search(&self, substring: bool, terms: &[String]) -> Vec<K> {
        let mut intersection: Option<HashSet<K>> = None;
        for term in terms {
            let hits = self.matches(substring, term);
            intersection = Some(match intersection {
                Some(current) => current.intersection(&hits).copied().collect(),
                None => hits,
            });
            if intersection.as_ref().map(HashSet::is_empty).unwrap_or(false) {
                break;
            }
        }
        let mut out: Vec<K> = intersection.unwrap_or_default().into_iter().collect();
        out.sort();
        out
    }
}
