use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserialize, Deserializer, Visitor};
use serde::{Serialize, Serializer};

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Encode a u32 as exactly six characters of the base64 alphabet,
/// big-endian six-bit groups, no padding.
pub fn encode_u32(value: u32) -> String {
    let mut out = String::with_capacity(6);
    for shift in [30u32, 24, 18, 12, 6, 0] {
        let idx = ((value as u64 >> shift) & 0x3f) as usize;
        out.push(ALPHABET[idx] as char);
    }
    out
}

pub fn decode_u32(text: &str) -> Option<u32> {
    if text.len() != 6 {
        return None;
    }
    let mut value: u64 = 0;
    for byte in text.bytes() {
        let idx = ALPHABET.iter().position(|c| *c == byte)?;
        value = (value << 6) | idx as u64;
    }
    Some(value as u32)
}

/// Filename-safe variant of [`encode_u32`]: `+` and `/` swapped for `-`
/// and `_` so the result can name a file.
pub fn encode_u32_path_safe(value: u32) -> String {
    encode_u32(value)
        .replace('+', "-")
        .replace('/', "_")
}

pub fn to_base36(mut value: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while value > 0 {
        buf.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

pub fn from_base36(text: &str) -> Option<u32> {
    let mut value: u64 = 0;
    if text.is_empty() {
        return None;
    }
    for ch in text.chars() {
        let digit = ch.to_digit(36)?;
        value = value * 36 + digit as u64;
        if value > u32::MAX as u64 {
            return None;
        }
    }
    Some(value as u32)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyParseError(pub String);

impl fmt::Display for KeyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed key: {}", self.0)
    }
}

impl std::error::Error for KeyParseError {}

/// Song identity: the owning fragment's hash plus the file's local hash.
/// Renders as `S<enc(fragment)>:<enc(local)>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SongKey {
    pub fragment: u32,
    pub local: u32,
}

impl SongKey {
    pub fn new(fragment: u32, local: u32) -> Self {
        Self { fragment, local }
    }

    /// The encoded fragment prefix, as it appears between `S` and `:`.
    pub fn fragment_prefix(&self) -> String {
        encode_u32(self.fragment)
    }
}

impl fmt::Display for SongKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}:{}", encode_u32(self.fragment), encode_u32(self.local))
    }
}

impl FromStr for SongKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('S')
            .ok_or_else(|| KeyParseError(s.to_string()))?;
        let (left, right) = rest
            .split_once(':')
            .ok_or_else(|| KeyParseError(s.to_string()))?;
        let fragment = decode_u32(left).ok_or_else(|| KeyParseError(s.to_string()))?;
        let local = decode_u32(right).ok_or_else(|| KeyParseError(s.to_string()))?;
        Ok(SongKey { fragment, local })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlbumKey(pub u32);

impl fmt::Display for AlbumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", encode_u32(self.0))
    }
}

impl FromStr for AlbumKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('L')
            .ok_or_else(|| KeyParseError(s.to_string()))?;
        decode_u32(rest)
            .map(AlbumKey)
            .ok_or_else(|| KeyParseError(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtistKey(pub u32);

impl fmt::Display for ArtistKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", encode_u32(self.0))
    }
}

impl FromStr for ArtistKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('R')
            .ok_or_else(|| KeyParseError(s.to_string()))?;
        decode_u32(rest)
            .map(ArtistKey)
            .ok_or_else(|| KeyParseError(s.to_string()))
    }
}

/// Any entity that can own artwork in a fragment's blob store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKey {
    Song(SongKey),
    Album(AlbumKey),
    Artist(ArtistKey),
}

impl fmt::Display for MediaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKey::Song(k) => k.fmt(f),
            MediaKey::Album(k) => k.fmt(f),
            MediaKey::Artist(k) => k.fmt(f),
        }
    }
}

impl FromStr for MediaKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.as_bytes().first() {
            Some(b'S') => s.parse().map(MediaKey::Song),
            Some(b'L') => s.parse().map(MediaKey::Album),
            Some(b'R') => s.parse().map(MediaKey::Artist),
            _ => Err(KeyParseError(s.to_string())),
        }
    }
}

macro_rules! string_serde {
    ($ty:ty, $expect:literal) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct KeyVisitor;

                impl<'de> Visitor<'de> for KeyVisitor {
                    type Value = $ty;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str($expect)
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                        v.parse().map_err(de::Error::custom)
                    }
                }

                deserializer.deserialize_str(KeyVisitor)
            }
        }
    };
}

string_serde!(SongKey, "a song key of the form S<enc>:<enc>");
string_serde!(AlbumKey, "an album key of the form L<enc>");
string_serde!(ArtistKey, "an artist key of the form R<enc>");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_encoding_round_trips() {
        for value in [0u32, 1, 63, 64, 0xDEAD_BEEF, u32::MAX] {
            let text = encode_u32(value);
            assert_eq!(text.len(), 6);
            assert_eq!(decode_u32(&text), Some(value));
        }
    }

    #[test]
    fn encoding_alphabet_is_base64() {
        let text = encode_u32(u32::MAX);
        assert!(text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/'));
        assert_eq!(encode_u32(0), "AAAAAA");
    }

    #[test]
    fn path_safe_encoding_avoids_separators() {
        for value in [0u32, 0xFFFF_FFFF, 0x03F0_3F03] {
            let text = encode_u32_path_safe(value);
            assert!(!text.contains('/'));
            assert!(!text.contains('+'));
        }
    }

    #[test]
    fn song_key_round_trips() {
        let key = SongKey::new(0x1234_5678, 0x9ABC_DEF0);
        let text = key.to_string();
        assert!(text.starts_with('S'));
        assert!(text.contains(':'));
        assert_eq!(text.parse::<SongKey>().unwrap(), key);
    }

    #[test]
    fn album_and_artist_keys_round_trip() {
        let album = AlbumKey(42);
        let artist = ArtistKey(0xCAFE_F00D);
        assert_eq!(album.to_string().parse::<AlbumKey>().unwrap(), album);
        assert_eq!(artist.to_string().parse::<ArtistKey>().unwrap(), artist);
        assert!(album.to_string().starts_with('L'));
        assert!(artist.to_string().starts_with('R'));
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!("X123456".parse::<SongKey>().is_err());
        assert!("Sabc".parse::<SongKey>().is_err());
        assert!("L123".parse::<AlbumKey>().is_err());
    }

    #[test]
    fn base36_round_trips() {
        for value in [0u32, 35, 36, 1_000_000, u32::MAX] {
            assert_eq!(from_base36(&to_base36(value)), Some(value));
        }
        assert_eq!(from_base36("zz"), Some(35 * 36 + 35));
        assert_eq!(from_base36(""), None);
    }

    #[test]
    fn keys_serialize_as_strings() {
        let key = SongKey::new(7, 9);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key));
        let back: SongKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
