pub mod pattern;
pub mod tags;

use std::path::Path;

use lofty::error::LoftyError;
use lofty::picture::{Picture, PictureType};
use lofty::prelude::{ItemKey, TaggedFileExt};

pub use pattern::parse_path;
pub use tags::{synthesize, SongTags};

/// Raw tag fields as the container reports them, before synthesis into
/// [`SongTags`].
#[derive(Debug, Default, Clone)]
pub struct FileTags {
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub track_no: Option<u32>,
    pub disc_no: Option<u32>,
    pub year: Option<u32>,
    pub has_embedded_cover: bool,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Read the container tags of one audio file. Errors are hard parse
/// failures; a file with readable but empty tags returns a default value.
pub fn read_tags(path: &Path) -> Result<FileTags, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;

    let mut tags = FileTags::default();
    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        tags.title = tag.get_string(&ItemKey::TrackTitle).map(|v| v.to_string());
        tags.album = tag.get_string(&ItemKey::AlbumTitle).map(|v| v.to_string());
        let album_artist = tag.get_string(&ItemKey::AlbumArtist).map(|v| v.to_string());
        let track_artist = tag.get_string(&ItemKey::TrackArtist).map(|v| v.to_string());
        tags.artist = track_artist.or_else(|| album_artist.clone());
        tags.album_artist = album_artist;
        tags.track_no = tag.get_string(&ItemKey::TrackNumber).and_then(parse_number);
        tags.disc_no = tag.get_string(&ItemKey::DiscNumber).and_then(parse_number);
        tags.year = tag.get_string(&ItemKey::Year).and_then(parse_year);
        tags.has_embedded_cover = !tag.pictures().is_empty();
    }

    Ok(tags)
}

/// Front-cover bytes embedded in the file's tags, if any.
pub fn read_embedded_cover(path: &Path) -> Result<Option<Vec<u8>>, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let tag = match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        Some(tag) => tag,
        None => return Ok(None),
    };

    let picture = match pick_picture(tag.pictures()) {
        Some(picture) => picture,
        None => return Ok(None),
    };

    Ok(Some(picture.data().to_vec()))
}

fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    for picture in pictures {
        if picture.pic_type() == PictureType::CoverFront {
            return Some(picture);
        }
    }
    pictures.first()
}

/// Lenient "3" / "3/12" track and disc parsing.
fn parse_number(text: &str) -> Option<u32> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

/// First run of up to four digits, so "2003-05-01" and "(c) 2003" both
/// yield 2003.
fn parse_year(text: &str) -> Option<u32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_number, parse_year};

    #[test]
    fn parses_slashed_track_numbers() {
        assert_eq!(parse_number("3/12"), Some(3));
        assert_eq!(parse_number(" 7 "), Some(7));
        assert_eq!(parse_number("x"), None);
    }

    #[test]
    fn parses_years_out_of_dates() {
        assert_eq!(parse_year("2003-05-01"), Some(2003));
        assert_eq!(parse_year("(c) 1986"), Some(1986));
        assert_eq!(parse_year("no digits"), None);
    }
}
