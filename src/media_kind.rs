//! Media kinds, their content-type allow-lists, and cache keys.

use std::path::{Path, PathBuf};

use crate::error::MediaError;
use crate::filters::FilterSet;

/// Sorted-set name holding one access counter per cache key.
pub const FREQUENCY_SET_KEY: &str = "frequency.media:global";
const CURSOR_KEY_PREFIX: &str = "media.cursor:";

const IMAGE_TYPES: [(&str, &str); 3] = [
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
];
const SONG_TYPES: [(&str, &str); 2] = [("audio/mpeg", "mp3"), ("audio/wav", "wav")];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Song,
}

impl MediaKind {
    /// Directory and storage-key name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Song => "songs",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "images" | "image" => Some(Self::Image),
            "songs" | "song" => Some(Self::Song),
            _ => None,
        }
    }

    /// `mediaType` value understood by the catalog.
    pub fn catalog_code(self) -> &'static str {
        match self {
            Self::Image => "p",
            Self::Song => "a",
        }
    }

    fn top_level_type(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Song => "audio",
        }
    }

    fn content_types(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Image => &IMAGE_TYPES,
            Self::Song => &SONG_TYPES,
        }
    }

    /// Maps a `Content-Type` header onto a file extension for this kind.
    pub fn extension_for_content_type(self, header: &str) -> Result<&'static str, MediaError> {
        let content_type = header
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let top_level = content_type.split('/').next().unwrap_or_default();
        if top_level != self.top_level_type() {
            return Err(MediaError::UnsupportedContentType(content_type));
        }
        self.content_types()
            .iter()
            .find(|(candidate, _)| *candidate == content_type)
            .map(|(_, extension)| *extension)
            .ok_or(MediaError::UnsupportedContentType(content_type))
    }

    pub fn is_allowed_extension(self, extension: &str) -> bool {
        self.content_types()
            .iter()
            .any(|(_, allowed)| extension.eq_ignore_ascii_case(allowed))
    }

    pub fn content_type_for_extension(self, extension: &str) -> Option<&'static str> {
        self.content_types()
            .iter()
            .find(|(_, allowed)| extension.eq_ignore_ascii_case(allowed))
            .map(|(content_type, _)| *content_type)
    }

    /// Size segment of the asset CDN URL.
    pub fn asset_size_token(self, filters: &FilterSet) -> &'static str {
        match self {
            Self::Image if filters.small() => "640",
            Self::Image => "1200",
            Self::Song => "audio",
        }
    }
}

/// Identifies one cache entry: media kind, species, and filter bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: MediaKind,
    pub species: String,
    pub filter_bits: i64,
}

impl CacheKey {
    pub fn new(kind: MediaKind, species: &str, filters: &FilterSet) -> Self {
        Self {
            kind,
            species: species.trim().to_string(),
            filter_bits: filters.to_int(),
        }
    }

    /// `{kind}/{species}{bits}`; also the frequency-set member.
    pub fn member(&self) -> String {
        format!("{}/{}{}", self.kind.name(), self.species, self.filter_bits)
    }

    pub fn cursor_key(&self) -> String {
        format!("{CURSOR_KEY_PREFIX}{}", self.member())
    }

    pub fn directory(&self, cache_root: &Path) -> PathBuf {
        cache_root
            .join(self.kind.name())
            .join(format!("{}{}", self.species, self.filter_bits))
    }

    /// Resolves a frequency-set member back to its directory. Members that
    /// could escape the cache root resolve to `None`.
    pub fn directory_for_member(cache_root: &Path, member: &str) -> Option<PathBuf> {
        let (kind, entry) = member.split_once('/')?;
        MediaKind::from_name(kind)?;
        if entry.is_empty() || entry.contains('/') || entry.contains('\\') || entry == ".." {
            return None;
        }
        Some(cache_root.join(kind).join(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheKey, MediaKind};
    use crate::filters::FilterSet;
    use std::path::Path;

    #[test]
    fn test_extension_for_content_type_checks_top_level_and_allow_list() {
        assert_eq!(
            MediaKind::Image.extension_for_content_type("image/jpeg; charset=binary").ok(),
            Some("jpg")
        );
        assert!(MediaKind::Image.extension_for_content_type("audio/mpeg").is_err());
        assert!(MediaKind::Image.extension_for_content_type("image/tiff").is_err());
        assert_eq!(
            MediaKind::Song.extension_for_content_type("audio/mpeg").ok(),
            Some("mp3")
        );
    }

    #[test]
    fn test_equal_tuples_map_to_identical_keys() {
        let filters = FilterSet::default();
        let left = CacheKey::new(MediaKind::Image, "Turdus migratorius", &filters);
        let right = CacheKey::new(MediaKind::Image, " Turdus migratorius ", &filters);
        assert_eq!(left, right);
        assert_eq!(left.member(), right.member());
        assert_eq!(
            left.member(),
            format!("images/Turdus migratorius{}", filters.to_int())
        );
        assert_eq!(left.cursor_key(), format!("media.cursor:{}", left.member()));
    }

    #[test]
    fn test_directory_for_member_matches_key_directory() {
        let root = Path::new("/tmp/cache");
        let key = CacheKey::new(MediaKind::Song, "Turdus migratorius", &FilterSet::default());
        assert_eq!(
            CacheKey::directory_for_member(root, &key.member()),
            Some(key.directory(root))
        );
        assert_eq!(CacheKey::directory_for_member(root, "images/../../etc"), None);
        assert_eq!(CacheKey::directory_for_member(root, "videos/x1"), None);
    }

    #[test]
    fn test_asset_size_token_follows_small_flag() {
        let small = FilterSet::default().with_small(true);
        assert_eq!(MediaKind::Image.asset_size_token(&small), "640");
        assert_eq!(MediaKind::Image.asset_size_token(&FilterSet::default()), "1200");
        assert_eq!(MediaKind::Song.asset_size_token(&small), "audio");
    }
}
