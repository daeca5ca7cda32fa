use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use common::{
    chain_hash, hash32, normalize_name, Album, AlbumKey, Artist, ArtistKey, Song, SongKey, VaType,
};
use metadata::SongTags;
use tracing::warn;

/// The in-memory entity graph: three entity maps, the two normalized-name
/// indices, and the claim maps backing collision-chained key minting.
/// Claims outlive their entities so a re-created album or artist gets its
/// old key back.
#[derive(Default)]
pub struct Graph {
    pub songs: HashMap<SongKey, Song>,
    pub albums: HashMap<AlbumKey, Album>,
    pub artists: HashMap<ArtistKey, Artist>,
    pub album_titles: HashMap<String, BTreeSet<AlbumKey>>,
    pub artist_names: HashMap<String, ArtistKey>,
    album_claims: HashMap<u32, String>,
    artist_claims: HashMap<u32, String>,
}

#[derive(Clone, Debug, Default)]
pub struct FlatDb {
    pub songs: Vec<Song>,
    pub albums: Vec<Album>,
    pub artists: Vec<Artist>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted parts, re-deriving the claim maps so key
    /// minting keeps chaining past every restored entity.
    pub fn from_parts(
        songs: HashMap<SongKey, Song>,
        albums: HashMap<AlbumKey, Album>,
        artists: HashMap<ArtistKey, Artist>,
        album_titles: HashMap<String, BTreeSet<AlbumKey>>,
        artist_names: HashMap<String, ArtistKey>,
    ) -> Self {
        let mut graph = Self {
            songs,
            albums,
            artists,
            album_titles,
            artist_names,
            album_claims: HashMap::new(),
            artist_claims: HashMap::new(),
        };
        for artist in graph.artists.values() {
            graph
                .artist_claims
                .insert(artist.key.0, normalize_name(&artist.name));
        }
        let claims: Vec<(u32, String)> = graph
            .albums
            .values()
            .map(|album| (album.key.0, graph.album_identity(album)))
            .collect();
        graph.album_claims.extend(claims);
        graph
    }

    /// Attach one complete metadata record under a pre-minted key,
    /// creating or matching its album and artists. Re-adding an existing
    /// key replaces the old song.
    pub fn add_song(&mut self, key: SongKey, path: PathBuf, tags: &SongTags) -> SongKey {
        if self.songs.contains_key(&key) {
            self.remove_song(key);
        }

        let mut primary = self.intern_artists(&tags.artists);
        let mut secondary: Vec<ArtistKey> = self
            .intern_artists(&tags.secondary_artists)
            .into_iter()
            .filter(|k| !primary.contains(k))
            .collect();

        let title = tags.title.clone().unwrap_or_default();
        let album_title = tags.album.clone().unwrap_or_default();
        let year = tags.year.unwrap_or(0);
        let track = tags.track.unwrap_or(0);
        let va = tags.va_type.unwrap_or(VaType::None);
        let dirname = path
            .parent()
            .map(|dir| common::path_to_slash_string(dir).to_lowercase())
            .unwrap_or_default();

        let album_key = self.get_or_new_album(
            &album_title,
            year,
            &mut primary,
            &mut secondary,
            va,
            &dirname,
            track / 100,
            tags.disk_name.as_deref(),
        );

        let song = Song {
            key,
            path,
            title,
            track,
            album: album_key,
            artists: primary.clone(),
            secondary_artists: secondary.clone(),
            variations: tags.variations.clone(),
        };

        if let Some(album) = self.albums.get_mut(&album_key) {
            if !album.songs.contains(&key) {
                album.songs.push(key);
            }
        }
        for artist_key in primary.iter().chain(secondary.iter()) {
            if let Some(artist) = self.artists.get_mut(artist_key) {
                if !artist.songs.contains(&key) {
                    artist.songs.push(key);
                }
                if !artist.albums.contains(&album_key) {
                    artist.albums.push(album_key);
                }
            }
        }

        self.songs.insert(key, song);
        key
    }

    /// Remove a song, pruning empty albums and artists and fixing up the
    /// two name indices and all back-references.
    pub fn remove_song(&mut self, key: SongKey) -> bool {
        let Some(song) = self.songs.remove(&key) else {
            return false;
        };

        let album_key = song.album;
        let mut album_deleted = false;
        let mut orphaned_primary: Vec<ArtistKey> = Vec::new();
        if let Some(album) = self.albums.get_mut(&album_key) {
            album.songs.retain(|k| *k != key);
            if album.songs.is_empty() {
                if let Some(album) = self.albums.remove(&album_key) {
                    let norm = normalize_name(&album.title);
                    if let Some(set) = self.album_titles.get_mut(&norm) {
                        set.remove(&album_key);
                        if set.is_empty() {
                            self.album_titles.remove(&norm);
                        }
                    }
                    orphaned_primary = album.primary_artists;
                    album_deleted = true;
                }
            }
        }
        if album_deleted {
            for artist_key in &orphaned_primary {
                if let Some(artist) = self.artists.get_mut(artist_key) {
                    artist.albums.retain(|a| *a != album_key);
                }
            }
        }

        let mut touched: Vec<ArtistKey> = song.artists.clone();
        for k in &song.secondary_artists {
            if !touched.contains(k) {
                touched.push(*k);
            }
        }

        for artist_key in touched {
            let Some(artist) = self.artists.get_mut(&artist_key) else {
                continue;
            };
            artist.songs.retain(|k| *k != key);
            if album_deleted {
                artist.albums.retain(|a| *a != album_key);
            }

            if artist.songs.is_empty() {
                if let Some(artist) = self.artists.remove(&artist_key) {
                    self.artist_names.remove(&normalize_name(&artist.name));
                    for album_key in artist.albums {
                        if let Some(album) = self.albums.get_mut(&album_key) {
                            album.primary_artists.retain(|a| *a != artist_key);
                        }
                    }
                }
                continue;
            }

            let listed: Vec<AlbumKey> = artist.albums.clone();
            for listed_key in listed {
                let Some(album) = self.albums.get(&listed_key) else {
                    if let Some(artist) = self.artists.get_mut(&artist_key) {
                        artist.albums.retain(|a| *a != listed_key);
                    }
                    continue;
                };
                let still_referenced = album.songs.iter().any(|sk| {
                    self.songs
                        .get(sk)
                        .map(|s| {
                            s.artists.contains(&artist_key)
                                || s.secondary_artists.contains(&artist_key)
                        })
                        .unwrap_or(false)
                });
                if !still_referenced {
                    if let Some(album) = self.albums.get_mut(&listed_key) {
                        album.primary_artists.retain(|a| *a != artist_key);
                    }
                    if let Some(artist) = self.artists.get_mut(&artist_key) {
                        artist.albums.retain(|a| *a != listed_key);
                    }
                }
            }
        }

        true
    }

    fn intern_artists(&mut self, names: &[String]) -> Vec<ArtistKey> {
        let mut out = Vec::new();
        for name in names {
            let Some(key) = self.intern_artist(name) else {
                continue;
            };
            if !out.contains(&key) {
                out.push(key);
            }
        }
        out
    }

    /// Artists collapse on normalized name; the first-seen display form
    /// wins. Keys are collision-chained over the claim map.
    fn intern_artist(&mut self, name: &str) -> Option<ArtistKey> {
        let norm = normalize_name(name);
        if norm.is_empty() {
            return None;
        }
        if let Some(key) = self.artist_names.get(&norm) {
            return Some(*key);
        }

        let mut hash = hash32(&norm);
        while let Some(claim) = self.artist_claims.get(&hash) {
            if claim == &norm {
                break;
            }
            warn!("Artist key collision on {}; rehashing", norm);
            hash = chain_hash(hash, &norm);
        }
        self.artist_claims.insert(hash, norm.clone());

        let key = ArtistKey(hash);
        self.artists.insert(
            key,
            Artist {
                key,
                name: name.trim().to_string(),
                songs: Vec::new(),
                albums: Vec::new(),
            },
        );
        self.artist_names.insert(norm, key);
        Some(key)
    }

    /// Album identity per the candidate rules: same year always; VA
    /// albums match on marker alone; plain albums match on the exact
    /// primary-artist set, or (within one directory) demote to the
    /// artist intersection, or collapse to VA when the intersection is
    /// empty.
    #[allow(clippy::too_many_arguments)]
    fn get_or_new_album(
        &mut self,
        title: &str,
        year: u32,
        primary: &mut Vec<ArtistKey>,
        secondary: &mut Vec<ArtistKey>,
        va: VaType,
        dirname: &str,
        disk: u32,
        disk_name: Option<&str>,
    ) -> AlbumKey {
        let norm_title = normalize_name(title);
        let candidates: Vec<AlbumKey> = self
            .album_titles
            .get(&norm_title)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        for candidate_key in candidates {
            let Some(candidate) = self.albums.get(&candidate_key) else {
                continue;
            };
            if candidate.year != year {
                continue;
            }

            if !candidate.va_type.is_none() && candidate.va_type == va {
                self.ensure_disk_names(candidate_key, disk, disk_name);
                return candidate_key;
            }

            if set_equal(&candidate.primary_artists, primary) {
                self.ensure_disk_names(candidate_key, disk, disk_name);
                return candidate_key;
            }

            let first_song_dir = candidate
                .songs
                .first()
                .and_then(|sk| self.songs.get(sk))
                .and_then(|song| song.path.parent().map(common::path_to_slash_string))
                .map(|dir| dir.to_lowercase());
            if first_song_dir.as_deref() != Some(dirname) {
                continue;
            }

            let common_set: Vec<ArtistKey> = candidate
                .primary_artists
                .iter()
                .copied()
                .filter(|k| primary.contains(k))
                .collect();

            if !common_set.is_empty() {
                // Shared-but-not-equal artist sets in one directory:
                // demote the non-common artists to secondary on the
                // incoming song and on every song already on the album.
                for k in primary.iter() {
                    if !common_set.contains(k) && !secondary.contains(k) {
                        secondary.push(*k);
                    }
                }
                primary.retain(|k| common_set.contains(k));

                let existing_songs = self
                    .albums
                    .get(&candidate_key)
                    .map(|album| album.songs.clone())
                    .unwrap_or_default();
                for song_key in existing_songs {
                    if let Some(song) = self.songs.get_mut(&song_key) {
                        let moved: Vec<ArtistKey> = song
                            .artists
                            .iter()
                            .copied()
                            .filter(|k| !common_set.contains(k))
                            .collect();
                        song.artists.retain(|k| common_set.contains(k));
                        for k in moved {
                            if !song.secondary_artists.contains(&k) {
                                song.secondary_artists.push(k);
                            }
                        }
                    }
                }
                if let Some(album) = self.albums.get_mut(&candidate_key) {
                    album.primary_artists = common_set;
                }
                self.ensure_disk_names(candidate_key, disk, disk_name);
                return candidate_key;
            }

            // Same directory, no shared artists: this is a compilation.
            if let Some(album) = self.albums.get_mut(&candidate_key) {
                album.va_type = VaType::Va;
                album.primary_artists.clear();
            }
            self.ensure_disk_names(candidate_key, disk, disk_name);
            return candidate_key;
        }

        let key = self.mint_album_key(&norm_title, year, primary, va);
        let album = Album {
            key,
            title: title.trim().to_string(),
            year,
            va_type: va,
            primary_artists: if va.is_none() { primary.clone() } else { Vec::new() },
            songs: Vec::new(),
            disk_names: None,
        };
        self.albums.insert(key, album);
        self.album_titles.entry(norm_title).or_default().insert(key);
        self.ensure_disk_names(key, disk, disk_name);
        key
    }

    fn mint_album_key(
        &mut self,
        norm_title: &str,
        year: u32,
        primary: &[ArtistKey],
        va: VaType,
    ) -> AlbumKey {
        let input = if va.is_none() {
            let joined = primary
                .iter()
                .filter_map(|k| self.artists.get(k))
                .map(|artist| artist.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}*{}*{}", norm_title, normalize_name(&joined), year)
        } else {
            format!("{}*{}*{}", norm_title, va.as_str(), year)
        };

        let mut hash = hash32(&input);
        while let Some(claim) = self.album_claims.get(&hash) {
            if claim == &input {
                break;
            }
            warn!("Album key collision on {}; rehashing", input);
            hash = chain_hash(hash, &input);
        }
        self.album_claims.insert(hash, input);
        AlbumKey(hash)
    }

    fn album_identity(&self, album: &Album) -> String {
        let norm_title = normalize_name(&album.title);
        if album.va_type.is_none() {
            let joined = album
                .primary_artists
                .iter()
                .filter_map(|k| self.artists.get(k))
                .map(|artist| artist.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}*{}*{}", norm_title, normalize_name(&joined), album.year)
        } else {
            format!("{}*{}*{}", norm_title, album.va_type.as_str(), album.year)
        }
    }

    /// Monotonic disk-name extension; a previously-set non-empty name is
    /// never overwritten.
    fn ensure_disk_names(&mut self, album_key: AlbumKey, disk: u32, disk_name: Option<&str>) {
        if disk == 0 {
            return;
        }
        let Some(album) = self.albums.get_mut(&album_key) else {
            return;
        };
        let names = album.disk_names.get_or_insert_with(Vec::new);
        while (names.len() as u32) < disk {
            names.push(String::new());
        }
        if let Some(name) = disk_name {
            let slot = &mut names[(disk - 1) as usize];
            if slot.is_empty() && !name.is_empty() {
                *slot = name.to_string();
            }
        }
    }

    /// The relocatable rendition of a song: album path piece, disk
    /// directory, zero-padded track, artist and variation suffixes.
    pub fn canonical_file_name(&self, key: SongKey) -> Option<String> {
        let song = self.songs.get(&key)?;
        let album = self.albums.get(&song.album)?;

        let header = match album.va_type {
            VaType::Ost => "Soundtrack".to_string(),
            VaType::Va => "VA".to_string(),
            VaType::None => {
                let keys = if album.primary_artists.is_empty() {
                    &song.artists
                } else {
                    &album.primary_artists
                };
                self.artist_display(keys)
            }
        };

        let mut out = format!("{} - {} - {}", header, album.year, album.title);
        if song.track < 99 {
            out.push('/');
        } else {
            let disk = song.track / 100;
            let disk_name = album
                .disk_names
                .as_ref()
                .and_then(|names| names.get(disk.saturating_sub(1) as usize))
                .filter(|name| !name.is_empty());
            match disk_name {
                Some(name) => out.push_str(&format!("/Disk {}- {}/", disk, name)),
                None => out.push_str(&format!("/Disk {}/", disk)),
            }
        }
        out.push_str(&format!("{:02} - ", song.track % 100));

        if !album.va_type.is_none() && !song.artists.is_empty() {
            out.push_str(&self.artist_display(&song.artists));
            out.push_str(" - ");
        }
        out.push_str(&song.title);

        if let Some(variations) = &song.variations {
            for variation in variations {
                out.push_str(&format!(" [{}]", variation));
            }
        }
        if !song.secondary_artists.is_empty() {
            out.push_str(&format!(
                " [feat. {}]",
                self.artist_display(&song.secondary_artists)
            ));
        }

        if let Some(ext) = song.path.extension().and_then(|ext| ext.to_str()) {
            out.push('.');
            out.push_str(ext);
        }
        Some(out)
    }

    /// `A`, `A & B`, `A, B & C`.
    pub fn artist_display(&self, keys: &[ArtistKey]) -> String {
        let names: Vec<&str> = keys
            .iter()
            .filter_map(|k| self.artists.get(k))
            .map(|artist| artist.name.as_str())
            .collect();
        match names.len() {
            0 => String::new(),
            1 => names[0].to_string(),
            _ => format!(
                "{} & {}",
                names[..names.len() - 1].join(", "),
                names[names.len() - 1]
            ),
        }
    }

    pub fn flatten(&self) -> FlatDb {
        let mut flat = FlatDb {
            songs: self.songs.values().cloned().collect(),
            albums: self.albums.values().cloned().collect(),
            artists: self.artists.values().cloned().collect(),
        };
        flat.songs.sort_by_key(|song| song.key);
        flat.albums.sort_by_key(|album| album.key);
        flat.artists.sort_by_key(|artist| artist.key);
        flat
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty() && self.albums.is_empty() && self.artists.is_empty()
    }

    /// Referential-integrity sweep; returns human-readable violations.
    /// Callers log them and carry on.
    pub fn verify(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for song in self.songs.values() {
            match self.albums.get(&song.album) {
                Some(album) if album.songs.contains(&song.key) => {}
                Some(_) => problems.push(format!("album drops song {}", song.key)),
                None => problems.push(format!("song {} has no album", song.key)),
            }
            for artist_key in song.artists.iter().chain(song.secondary_artists.iter()) {
                match self.artists.get(artist_key) {
                    Some(artist) if artist.songs.contains(&song.key) => {}
                    _ => problems.push(format!("artist drops song {}", song.key)),
                }
            }
        }
        for album in self.albums.values() {
            let norm = normalize_name(&album.title);
            if !self
                .album_titles
                .get(&norm)
                .map(|set| set.contains(&album.key))
                .unwrap_or(false)
            {
                problems.push(format!("album {} missing from title index", album.key));
            }
        }
        for artist in self.artists.values() {
            if self.artist_names.get(&normalize_name(&artist.name)) != Some(&artist.key) {
                problems.push(format!("artist {} missing from name index", artist.key));
            }
            for album_key in &artist.albums {
                let Some(album) = self.albums.get(album_key) else {
                    problems.push(format!("artist {} lists dead album", artist.key));
                    continue;
                };
                let referenced = album.primary_artists.contains(&artist.key)
                    || album.songs.iter().any(|sk| {
                        self.songs
                            .get(sk)
                            .map(|s| {
                                s.artists.contains(&artist.key)
                                    || s.secondary_artists.contains(&artist.key)
                            })
                            .unwrap_or(false)
                    });
                if !referenced {
                    problems.push(format!(
                        "artist {} lists album {} without songs there",
                        artist.key, album_key
                    ));
                }
            }
        }
        problems
    }
}

fn set_equal(a: &[ArtistKey], b: &[ArtistKey]) -> bool {
    a.len() == b.len() && a.iter().all(|k| b.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(artist: &str, album: &str, year: u32, track: u32, title: &str) -> SongTags {
        SongTags {
            original_path: format!("{} - {} - {}/{:02} - {}.mp3", artist, year, album, track, title),
            artists: vec![artist.to_string()],
            album: Some(album.to_string()),
            year: Some(year),
            track: Some(track),
            title: Some(title.to_string()),
            ..SongTags::default()
        }
    }

    fn path_for(tags: &SongTags) -> PathBuf {
        PathBuf::from(format!("/music/{}", tags.original_path))
    }

    #[test]
    fn add_then_remove_restores_empty() {
        let mut graph = Graph::new();
        let md = tags("The Artist", "The Album", 2000, 1, "A Song");
        let key = SongKey::new(1, 1);
        graph.add_song(key, path_for(&md), &md);

        assert_eq!(graph.songs.len(), 1);
        assert_eq!(graph.albums.len(), 1);
        assert_eq!(graph.artists.len(), 1);
        assert!(graph.verify().is_empty());

        assert!(graph.remove_song(key));
        assert!(graph.is_empty());
        assert!(graph.album_titles.is_empty());
        assert!(graph.artist_names.is_empty());
    }

    #[test]
    fn same_album_groups_songs() {
        let mut graph = Graph::new();
        let first = tags("A", "L", 2000, 1, "One");
        let second = tags("A", "L", 2000, 2, "Two");
        graph.add_song(SongKey::new(1, 1), path_for(&first), &first);
        graph.add_song(SongKey::new(1, 2), path_for(&second), &second);

        assert_eq!(graph.albums.len(), 1);
        let album = graph.albums.values().next().unwrap();
        assert_eq!(album.songs.len(), 2);
        assert!(graph.verify().is_empty());
    }

    #[test]
    fn different_year_means_different_album() {
        let mut graph = Graph::new();
        let first = tags("A", "L", 2000, 1, "One");
        let second = tags("A", "L", 2001, 1, "One Again");
        graph.add_song(SongKey::new(1, 1), path_for(&first), &first);
        graph.add_song(SongKey::new(1, 2), path_for(&second), &second);
        assert_eq!(graph.albums.len(), 2);
    }

    #[test]
    fn artist_names_collapse_on_normalization() {
        let mut graph = Graph::new();
        let first = tags("The Beatles", "L", 1968, 1, "One");
        let mut second = tags("beatles", "M", 1969, 1, "Two");
        second.original_path = "beatles - 1969 - M/01 - Two.mp3".to_string();
        graph.add_song(SongKey::new(1, 1), path_for(&first), &first);
        graph.add_song(SongKey::new(1, 2), path_for(&second), &second);

        assert_eq!(graph.artists.len(), 1);
        let artist = graph.artists.values().next().unwrap();
        assert_eq!(artist.name, "The Beatles");
        assert_eq!(artist.songs.len(), 2);
        assert_eq!(artist.albums.len(), 2);
    }

    #[test]
    fn va_albums_ignore_artist_identity() {
        let mut graph = Graph::new();
        let mut first = tags("A", "Hits", 1999, 1, "One");
        first.va_type = Some(VaType::Va);
        let mut second = tags("B", "Hits", 1999, 2, "Two");
        second.va_type = Some(VaType::Va);
        graph.add_song(SongKey::new(1, 1), PathBuf::from("/m/va/01.mp3"), &first);
        graph.add_song(SongKey::new(1, 2), PathBuf::from("/m/elsewhere/02.mp3"), &second);

        assert_eq!(graph.albums.len(), 1);
        let album = graph.albums.values().next().unwrap();
        assert_eq!(album.va_type, VaType::Va);
        assert!(album.primary_artists.is_empty());
        assert_eq!(graph.artists.len(), 2);
        assert!(graph.verify().is_empty());
    }

    #[test]
    fn shared_artists_in_one_directory_demote() {
        let mut graph = Graph::new();
        let mut first = tags("A", "L", 2000, 1, "One");
        first.artists = vec!["A".to_string(), "B".to_string()];
        let mut second = tags("A", "L", 2000, 2, "Two");
        second.artists = vec!["A".to_string(), "C".to_string()];

        let dir = PathBuf::from("/m/shared");
        graph.add_song(SongKey::new(1, 1), dir.join("01.mp3"), &first);
        graph.add_song(SongKey::new(1, 2), dir.join("02.mp3"), &second);

        assert_eq!(graph.albums.len(), 1);
        let album = graph.albums.values().next().unwrap();
        let a_key = *graph.artist_names.get("a").unwrap();
        let b_key = *graph.artist_names.get("b").unwrap();
        let c_key = *graph.artist_names.get("c").unwrap();
        assert_eq!(album.primary_artists, vec![a_key]);

        let one = graph.songs.get(&SongKey::new(1, 1)).unwrap();
        assert_eq!(one.artists, vec![a_key]);
        assert!(one.secondary_artists.contains(&b_key));
        let two = graph.songs.get(&SongKey::new(1, 2)).unwrap();
        assert_eq!(two.artists, vec![a_key]);
        assert!(two.secondary_artists.contains(&c_key));
        assert!(graph.verify().is_empty());
    }

    #[test]
    fn disjoint_artists_in_one_directory_collapse_to_va() {
        let mut graph = Graph::new();
        let first = tags("A", "L", 2000, 1, "One");
        let second = tags("B", "L", 2000, 2, "Two");

        let dir = PathBuf::from("/m/comp");
        graph.add_song(SongKey::new(1, 1), dir.join("01.mp3"), &first);
        graph.add_song(SongKey::new(1, 2), dir.join("02.mp3"), &second);

        assert_eq!(graph.albums.len(), 1);
        let album = graph.albums.values().next().unwrap();
        assert_eq!(album.va_type, VaType::Va);
        assert!(album.primary_artists.is_empty());
        assert!(graph.verify().is_empty());
    }

    #[test]
    fn equal_empty_artist_sets_share_an_album() {
        let mut graph = Graph::new();
        let mut first = tags("A", "L", 2000, 1, "One");
        first.artists.clear();
        let mut second = tags("A", "L", 2000, 2, "Two");
        second.artists.clear();

        // Same title and year, no primary artists, different directories:
        // the empty sets compare equal and the songs merge.
        graph.add_song(SongKey::new(1, 1), PathBuf::from("/m/a/01.mp3"), &first);
        graph.add_song(SongKey::new(1, 2), PathBuf::from("/m/b/02.mp3"), &second);

        assert_eq!(graph.albums.len(), 1);
        let album = graph.albums.values().next().unwrap();
        assert_eq!(album.songs.len(), 2);
        assert!(album.primary_artists.is_empty());
    }

    #[test]
    fn different_directories_keep_albums_separate() {
        let mut graph = Graph::new();
        let first = tags("A", "L", 2000, 1, "One");
        let second = tags("B", "L", 2000, 1, "Uno");
        graph.add_song(SongKey::new(1, 1), PathBuf::from("/m/a/01.mp3"), &first);
        graph.add_song(SongKey::new(1, 2), PathBuf::from("/m/b/01.mp3"), &second);
        assert_eq!(graph.albums.len(), 2);
    }

    #[test]
    fn removing_one_of_two_songs_keeps_the_album() {
        let mut graph = Graph::new();
        let first = tags("A", "L", 2000, 1, "One");
        let second = tags("A", "L", 2000, 2, "Two");
        graph.add_song(SongKey::new(1, 1), path_for(&first), &first);
        graph.add_song(SongKey::new(1, 2), path_for(&second), &second);

        let album_key = *graph.albums.keys().next().unwrap();
        assert!(graph.remove_song(SongKey::new(1, 1)));
        let album = graph.albums.get(&album_key).unwrap();
        assert_eq!(album.songs, vec![SongKey::new(1, 2)]);

        // Re-adding reuses the album key and appends at the end.
        graph.add_song(SongKey::new(1, 1), path_for(&first), &first);
        let album = graph.albums.get(&album_key).unwrap();
        assert_eq!(album.songs, vec![SongKey::new(1, 2), SongKey::new(1, 1)]);
        assert!(graph.verify().is_empty());
    }

    #[test]
    fn deleting_a_song_prunes_artists_without_remaining_songs() {
        let mut graph = Graph::new();
        let mut first = tags("A", "L", 2000, 1, "One");
        first.artists = vec!["A".to_string(), "B".to_string()];
        let second = tags("A", "L", 2000, 2, "Two");

        let dir = PathBuf::from("/m/l");
        graph.add_song(SongKey::new(1, 1), dir.join("01.mp3"), &first);
        graph.add_song(SongKey::new(1, 2), dir.join("02.mp3"), &second);

        // B only appears on song 1; deleting it removes B entirely.
        assert!(graph.remove_song(SongKey::new(1, 1)));
        assert!(graph.artist_names.get("b").is_none());
        let album = graph.albums.values().next().unwrap();
        let a_key = *graph.artist_names.get("a").unwrap();
        assert_eq!(album.primary_artists, vec![a_key]);
        assert!(graph.verify().is_empty());
    }

    #[test]
    fn disk_names_extend_monotonically() {
        let mut graph = Graph::new();
        let mut first = tags("A", "L", 2000, 203, "Deep");
        first.disk_name = Some("Second Night".to_string());
        graph.add_song(SongKey::new(1, 1), path_for(&first), &first);

        let album = graph.albums.values().next().unwrap();
        assert_eq!(
            album.disk_names,
            Some(vec![String::new(), "Second Night".to_string()])
        );

        // A later empty name never clobbers the set one.
        let mut second = tags("A", "L", 2000, 201, "Opener");
        second.disk_name = None;
        graph.add_song(SongKey::new(1, 2), path_for(&second), &second);
        let album = graph.albums.values().next().unwrap();
        assert_eq!(
            album.disk_names,
            Some(vec![String::new(), "Second Night".to_string()])
        );
    }

    #[test]
    fn canonical_name_for_a_plain_song() {
        let mut graph = Graph::new();
        let md = tags("The Artist", "The Album", 2000, 1, "A Song");
        let key = SongKey::new(1, 1);
        graph.add_song(key, path_for(&md), &md);
        assert_eq!(
            graph.canonical_file_name(key).unwrap(),
            "The Artist - 2000 - The Album/01 - A Song.mp3"
        );
    }

    #[test]
    fn canonical_name_with_disk_and_featuring() {
        let mut graph = Graph::new();
        let mut md = tags("A", "L", 2001, 203, "Deep Cut");
        md.secondary_artists = vec!["B".to_string(), "C".to_string()];
        md.disk_name = Some("Night Two".to_string());
        md.variations = Some(vec!["live".to_string()]);
        let key = SongKey::new(1, 1);
        graph.add_song(key, PathBuf::from("/m/x/203 - Deep Cut.flac"), &md);
        assert_eq!(
            graph.canonical_file_name(key).unwrap(),
            "A - 2001 - L/Disk 2- Night Two/03 - Deep Cut [live] [feat. B & C].flac"
        );
    }

    #[test]
    fn canonical_name_for_va_prefixes_song_artist() {
        let mut graph = Graph::new();
        let mut md = tags("A", "Hits", 1999, 5, "One");
        md.va_type = Some(VaType::Va);
        let key = SongKey::new(1, 1);
        graph.add_song(key, PathBuf::from("/m/hits/05 - One.mp3"), &md);
        assert_eq!(
            graph.canonical_file_name(key).unwrap(),
            "VA - 1999 - Hits/05 - A - One.mp3"
        );
    }

    #[test]
    fn save_shape_round_trips_through_parts() {
        let mut graph = Graph::new();
        let first = tags("A", "L", 2000, 1, "One");
        let second = tags("B", "M", 2001, 1, "Two");
        graph.add_song(SongKey::new(1, 1), path_for(&first), &first);
        graph.add_song(SongKey::new(1, 2), path_for(&second), &second);

        let rebuilt = Graph::from_parts(
            graph.songs.clone(),
            graph.albums.clone(),
            graph.artists.clone(),
            graph.album_titles.clone(),
            graph.artist_names.clone(),
        );
        assert_eq!(rebuilt.flatten().songs.len(), 2);
        assert!(rebuilt.verify().is_empty());

        // Minting the same artist again lands on the same key.
        let mut rebuilt = rebuilt;
        let key = rebuilt.intern_artist("A").unwrap();
        assert_eq!(Some(&key), graph.artist_names.get("a"));
    }
}
