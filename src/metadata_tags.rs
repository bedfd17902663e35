//! Removes embedded tags from cached songs so titles cannot give the answer away.

use std::path::Path;

use lofty::file::TaggedFileExt;
use lofty::read_from_path;
use lofty::tag::{Tag, TagType};
use log::debug;

use crate::error::MediaError;

/// Tag types present in `path`, primary first.
pub fn embedded_tag_types(path: &Path) -> Result<Vec<TagType>, MediaError> {
    let tagged_file = read_from_path(path).map_err(|err| {
        MediaError::UnsupportedContentType(format!("unreadable audio {}: {err}", path.display()))
    })?;
    Ok(tagged_file.tags().iter().map(Tag::tag_type).collect())
}

/// Strips every tag from `path` in place; returns how many were removed.
pub fn strip_embedded_tags(path: &Path) -> Result<usize, MediaError> {
    let tag_types = embedded_tag_types(path)?;
    for tag_type in &tag_types {
        tag_type.remove_from_path(path).map_err(|err| {
            MediaError::Io(std::io::Error::other(format!(
                "failed to remove {:?} tag from {}: {err}",
                tag_type,
                path.display()
            )))
        })?;
    }
    if !tag_types.is_empty() {
        debug!(
            "MetadataTags: removed {} tag(s) from {}",
            tag_types.len(),
            path.display()
        );
    }
    Ok(tag_types.len())
}
