//! Rotating, validating pick of one file from a cache entry.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::MediaError;
use crate::media_kind::MediaKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub path: PathBuf,
    /// Position in the input list; persisted as the next call's previous index.
    pub index: usize,
    pub extension: String,
}

fn allowed_extension(path: &Path, kind: MediaKind) -> Option<String> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    kind.is_allowed_extension(&extension).then_some(extension)
}

fn under_size_cap(path: &Path, max_file_size_bytes: u64) -> bool {
    fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.len() < max_file_size_bytes)
        .unwrap_or(false)
}

/// Picks the first valid file starting just after `previous_index`, wrapping
/// once around the list. A valid file has an allowed extension for `kind` and
/// is smaller than `max_file_size_bytes`.
pub fn select(
    files: &[PathBuf],
    previous_index: Option<usize>,
    kind: MediaKind,
    max_file_size_bytes: u64,
) -> Result<Selection, MediaError> {
    if files.is_empty() {
        return Err(MediaError::NoMedia(kind.name().to_string()));
    }
    let start = previous_index.map_or(0, |previous| previous.wrapping_add(1) % files.len());
    for offset in 0..files.len() {
        let index = (start + offset) % files.len();
        let path = &files[index];
        let Some(extension) = allowed_extension(path, kind) else {
            debug!("Selector: skipping {} (extension)", path.display());
            continue;
        };
        if !under_size_cap(path, max_file_size_bytes) {
            debug!("Selector: skipping {} (size)", path.display());
            continue;
        }
        return Ok(Selection {
            path: path.clone(),
            index,
            extension,
        });
    }
    Err(MediaError::NoValidMedia(kind.name().to_string()))
}

#[cfg(test)]
mod tests {
    use super::select;
    use crate::error::MediaError;
    use crate::media_kind::MediaKind;
    use std::fs;
    use std::path::{Path, PathBuf};

    const CAP: u64 = 6_000_000;

    fn write_files(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                fs::write(&path, b"media").expect("write");
                path
            })
            .collect()
    }

    #[test]
    fn test_successive_selections_never_repeat() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = write_files(dir.path(), &["1.jpg", "2.png", "3.gif"]);
        let mut previous = None;
        let mut last_path = None;
        for _ in 0..7 {
            let selection = select(&files, previous, MediaKind::Image, CAP).expect("select");
            assert_ne!(Some(selection.path.clone()), last_path);
            previous = Some(selection.index);
            last_path = Some(selection.path);
        }
    }

    #[test]
    fn test_single_valid_file_is_returned_every_time() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = write_files(dir.path(), &["1.jpg", "2.txt", "3.mp3"]);
        let mut previous = Some(0);
        for _ in 0..3 {
            let selection = select(&files, previous, MediaKind::Image, CAP).expect("select");
            assert_eq!(selection.path, files[0]);
            assert_eq!(selection.index, 0);
            previous = Some(selection.index);
        }
    }

    #[test]
    fn test_starts_after_previous_index_and_wraps() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = write_files(dir.path(), &["1.mp3", "2.wav", "3.mp3"]);
        let first = select(&files, None, MediaKind::Song, CAP).expect("select");
        assert_eq!(first.index, 0);
        let wrapped = select(&files, Some(2), MediaKind::Song, CAP).expect("select");
        assert_eq!(wrapped.index, 0);
        let next = select(&files, Some(0), MediaKind::Song, CAP).expect("select");
        assert_eq!((next.index, next.extension.as_str()), (1, "wav"));
        let stale = select(&files, Some(40), MediaKind::Song, CAP).expect("select");
        assert_eq!(stale.index, 41 % 3);
    }

    #[test]
    fn test_oversized_and_missing_files_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut files = write_files(dir.path(), &["1.jpg"]);
        files.insert(0, dir.path().join("0.jpg"));
        let selection = select(&files, None, MediaKind::Image, CAP).expect("select");
        assert_eq!(selection.index, 1);

        let tiny_cap = select(&files, None, MediaKind::Image, 3);
        assert!(matches!(tiny_cap, Err(MediaError::NoValidMedia(_))));
    }

    #[test]
    fn test_empty_list_is_distinct_from_no_valid_media() {
        assert!(matches!(
            select(&[], None, MediaKind::Image, CAP),
            Err(MediaError::NoMedia(_))
        ));
        let dir = tempfile::tempdir().expect("tempdir");
        let files = write_files(dir.path(), &["1.webp"]);
        assert!(matches!(
            select(&files, None, MediaKind::Image, CAP),
            Err(MediaError::NoValidMedia(_))
        ));
    }
}
