use crate::tags::{split_artists, SongTags};
use common::VaType;

/// Parse `.../<Artist> - <Year> - <Album>/<Track> - <Title>.<ext>` out of
/// a slash-form path. The track number may carry a disk prefix (`103` is
/// disk 1, track 3). Any deviation yields `None` and the caller falls
/// back to the container tags.
pub fn parse_path(relpath: &str) -> Option<SongTags> {
    let mut components = relpath.rsplit('/');
    let file = components.next()?;
    let dir = components.next()?;

    let stem = file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file);

    let (artist_text, year, album) = parse_album_dir(dir)?;
    let (track, title) = parse_track_file(stem)?;

    let (artists, secondary) = split_artists(&artist_text);
    let va_type = va_for_header(&artist_text);

    Some(SongTags {
        original_path: relpath.to_string(),
        artists: if va_type.is_some() { Vec::new() } else { artists },
        secondary_artists: if va_type.is_some() { Vec::new() } else { secondary },
        album: Some(album),
        year: Some(year),
        track: Some(track),
        title: Some(title.to_string()),
        va_type,
        disk_name: None,
        variations: None,
    })
}

fn parse_album_dir(dir: &str) -> Option<(String, u32, String)> {
    let parts: Vec<&str> = dir.split(" - ").collect();
    if parts.len() < 3 {
        return None;
    }
    let year = parse_year_part(parts[1])?;
    let artist = parts[0].trim();
    if artist.is_empty() {
        return None;
    }
    let album = parts[2..].join(" - ");
    if album.trim().is_empty() {
        return None;
    }
    Some((artist.to_string(), year, album.trim().to_string()))
}

fn parse_track_file(stem: &str) -> Option<(u32, &str)> {
    let (track_text, title) = stem.split_once(" - ")?;
    let track_text = track_text.trim();
    if track_text.is_empty() || track_text.len() > 4 || !track_text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let track: u32 = track_text.parse().ok()?;
    let title = title.trim();
    if title.is_empty() {
        return None;
    }
    Some((track, title))
}

fn parse_year_part(text: &str) -> Option<u32> {
    let text = text.trim();
    if text.len() == 4 && text.bytes().all(|b| b.is_ascii_digit()) {
        text.parse().ok()
    } else {
        None
    }
}

fn va_for_header(artist: &str) -> Option<VaType> {
    match artist.trim().to_lowercase().as_str() {
        "va" | "various" | "various artists" => Some(VaType::Va),
        "soundtrack" | "ost" | "original soundtrack" => Some(VaType::Ost),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::parse_path;
    use common::VaType;

    #[test]
    fn parses_the_canonical_shape() {
        let tags = parse_path("The Artist - 2000 - The Album/01 - A Song.mp3").unwrap();
        assert_eq!(tags.artists, vec!["The Artist"]);
        assert_eq!(tags.year, Some(2000));
        assert_eq!(tags.album.as_deref(), Some("The Album"));
        assert_eq!(tags.track, Some(1));
        assert_eq!(tags.title.as_deref(), Some("A Song"));
        assert!(tags.is_complete());
    }

    #[test]
    fn keeps_dashes_inside_album_titles() {
        let tags = parse_path("X - 1999 - Signal - Noise/02 - T.flac").unwrap();
        assert_eq!(tags.album.as_deref(), Some("Signal - Noise"));
    }

    #[test]
    fn disk_encoded_tracks_pass_through() {
        let tags = parse_path("A - 2010 - L/203 - Deep Cut.mp3").unwrap();
        assert_eq!(tags.track, Some(203));
    }

    #[test]
    fn soundtrack_header_sets_va_type() {
        let tags = parse_path("Soundtrack - 1994 - The Movie/05 - Theme.mp3").unwrap();
        assert_eq!(tags.va_type, Some(VaType::Ost));
        assert!(tags.artists.is_empty());
    }

    #[test]
    fn deviations_fall_through() {
        assert!(parse_path("loose-file.mp3").is_none());
        assert!(parse_path("Artist - Album/01 - Song.mp3").is_none());
        assert!(parse_path("A - 2000 - L/no track here.mp3").is_none());
        assert!(parse_path("A - 20000 - L/01 - S.mp3").is_none());
    }

    #[test]
    fn uses_only_the_nearest_directory() {
        let tags = parse_path("library/rock/A - 2001 - L/07 - S.mp3").unwrap();
        assert_eq!(tags.artists, vec!["A"]);
        assert_eq!(tags.track, Some(7));
    }
}
