//! Bounded-concurrency materialization of asset references into a cache entry.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, info, warn};

use crate::backends::{AssetRef, HttpTransport};
use crate::error::MediaError;
use crate::media_kind::MediaKind;

pub const PARTIAL_SUFFIX: &str = "part";

#[derive(Debug, Clone, Copy)]
pub struct DownloadSettings {
    pub max_file_size_bytes: u64,
    pub concurrency: usize,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 6_000_000,
            concurrency: 3,
        }
    }
}

#[derive(Debug)]
pub struct DownloadFailure {
    pub asset_id: String,
    pub error: MediaError,
}

/// Paths that landed, in input order, plus per-asset failures.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub paths: Vec<PathBuf>,
    pub failures: Vec<DownloadFailure>,
}

impl DownloadReport {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

pub struct Downloader {
    transport: Arc<dyn HttpTransport>,
    settings: DownloadSettings,
}

fn is_safe_asset_id(asset_id: &str) -> bool {
    !asset_id.is_empty()
        && asset_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

impl Downloader {
    pub fn new(transport: Arc<dyn HttpTransport>, settings: DownloadSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.settings.max_file_size_bytes
    }

    /// Downloads every ref into `cache_dir` with at most `concurrency` in
    /// flight. Individual failures are recorded and never abort siblings.
    pub fn download_all(
        &self,
        cache_dir: &Path,
        kind: MediaKind,
        refs: &[AssetRef],
    ) -> Result<DownloadReport, MediaError> {
        if refs.is_empty() {
            return Ok(DownloadReport::default());
        }
        fs::create_dir_all(cache_dir)?;

        let workers = self.settings.concurrency.max(1).min(refs.len());
        let next_index = AtomicUsize::new(0);
        let mut outcomes: Vec<(usize, Result<PathBuf, MediaError>)> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        let mut finished = Vec::new();
                        loop {
                            let index = next_index.fetch_add(1, Ordering::Relaxed);
                            let Some(asset) = refs.get(index) else {
                                break;
                            };
                            finished.push((index, self.download_one(cache_dir, kind, asset)));
                        }
                        finished
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(finished) => finished,
                    Err(_) => {
                        warn!("Downloader[{}]: worker panicked", cache_dir.display());
                        Vec::new()
                    }
                })
                .collect()
        });
        outcomes.sort_by_key(|(index, _)| *index);

        let mut report = DownloadReport::default();
        for (index, outcome) in outcomes {
            match outcome {
                Ok(path) => report.paths.push(path),
                Err(error) => report.failures.push(DownloadFailure {
                    asset_id: refs[index].asset_id.clone(),
                    error,
                }),
            }
        }
        for failure in &report.failures {
            warn!(
                "Downloader[{}]: asset {} failed: {}",
                cache_dir.display(),
                failure.asset_id,
                failure.error
            );
        }
        info!(
            "Downloader[{}]: {} downloaded, {} failed",
            cache_dir.display(),
            report.paths.len(),
            report.failure_count()
        );
        Ok(report)
    }

    fn download_one(
        &self,
        cache_dir: &Path,
        kind: MediaKind,
        asset: &AssetRef,
    ) -> Result<PathBuf, MediaError> {
        if !is_safe_asset_id(&asset.asset_id) {
            return Err(MediaError::Validation(format!(
                "unusable asset id {:?}",
                asset.asset_id
            )));
        }
        let response = self.transport.get(&asset.url)?;
        if response.status != 200 {
            return Err(MediaError::Transport(format!(
                "HTTP {} for {}",
                response.status, asset.url
            )));
        }
        let limit = self.settings.max_file_size_bytes;
        let declared = response.content_length.ok_or_else(|| {
            MediaError::Transport(format!("missing content-length for {}", asset.url))
        })?;
        if declared > limit {
            return Err(MediaError::FileTooLarge {
                size: declared,
                limit,
            });
        }
        let content_type = response.content_type.as_deref().unwrap_or_default();
        let extension = kind.extension_for_content_type(content_type)?;

        let target = cache_dir.join(format!("{}.{}", asset.asset_id, extension));
        let partial = cache_dir.join(format!(
            "{}.{}.{}",
            asset.asset_id, extension, PARTIAL_SUFFIX
        ));
        match stream_to_file(response.body, &partial, limit) {
            Ok(written) if written > limit => {
                let _ = fs::remove_file(&partial);
                Err(MediaError::FileTooLarge {
                    size: written,
                    limit,
                })
            }
            Ok(written) => {
                fs::rename(&partial, &target)?;
                debug!("Downloader: wrote {} ({} bytes)", target.display(), written);
                Ok(target)
            }
            Err(error) => {
                let _ = fs::remove_file(&partial);
                Err(MediaError::Transport(format!(
                    "streaming {} failed: {}",
                    asset.url, error
                )))
            }
        }
    }
}

/// Copies at most `limit + 1` bytes so an oversized body is detected
/// without reading it to the end.
fn stream_to_file(body: Box<dyn Read + Send>, path: &Path, limit: u64) -> io::Result<u64> {
    let mut file = File::create(path)?;
    let written = io::copy(&mut body.take(limit.saturating_add(1)), &mut file)?;
    file.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::{DownloadSettings, Downloader};
    use crate::backends::test_support::{Scripted, ScriptedTransport};
    use crate::backends::AssetRef;
    use crate::error::MediaError;
    use crate::media_kind::MediaKind;
    use std::sync::Arc;

    fn asset(id: &str) -> AssetRef {
        AssetRef {
            url: format!("https://cdn.test/asset/{id}/1200"),
            asset_id: id.to_string(),
        }
    }

    fn settings(limit: u64) -> DownloadSettings {
        DownloadSettings {
            max_file_size_bytes: limit,
            concurrency: 3,
        }
    }

    #[test]
    fn test_oversized_asset_fails_without_aborting_valid_one() {
        let mut oversized = Scripted::file("image/jpeg", vec![1, 2, 3]);
        oversized.content_length = Some(7_000_000);
        let transport = Arc::new(
            ScriptedTransport::new(Vec::new())
                .with_route("/asset/100/", Scripted::file("image/png", vec![0x89, b'P', b'N', b'G']))
                .with_route("/asset/200/", oversized),
        );
        let dir = tempfile::tempdir().expect("tempdir");
        let downloader = Downloader::new(transport, settings(6_000_000));

        let report = downloader
            .download_all(dir.path(), MediaKind::Image, &[asset("100"), asset("200")])
            .expect("batch completes");

        assert_eq!(report.paths, vec![dir.path().join("100.png")]);
        assert_eq!(report.failure_count(), 1);
        assert!(matches!(
            report.failures[0].error,
            MediaError::FileTooLarge { size: 7_000_000, .. }
        ));
        assert!(!dir.path().join("200.jpg").exists());
    }

    #[test]
    fn test_rejects_missing_length_wrong_type_and_bad_status() {
        let mut no_length = Scripted::file("audio/mpeg", vec![1, 2]);
        no_length.content_length = None;
        let transport = Arc::new(
            ScriptedTransport::new(Vec::new())
                .with_route("/asset/1/", no_length)
                .with_route("/asset/2/", Scripted::file("image/png", vec![1]))
                .with_route("/asset/3/", Scripted::status(404))
                .with_route("/asset/4/", Scripted::file("audio/mpeg", vec![9; 16])),
        );
        let dir = tempfile::tempdir().expect("tempdir");
        let downloader = Downloader::new(transport, settings(6_000_000));
        let refs: Vec<_> = ["1", "2", "3", "4"].into_iter().map(asset).collect();

        let report = downloader
            .download_all(dir.path(), MediaKind::Song, &refs)
            .expect("batch completes");

        assert_eq!(report.paths, vec![dir.path().join("4.mp3")]);
        assert_eq!(report.failure_count(), 3);
        assert!(report
            .failures
            .iter()
            .any(|failure| matches!(failure.error, MediaError::UnsupportedContentType(_))));
    }

    #[test]
    fn test_body_longer_than_cap_is_removed() {
        let mut lying = Scripted::file("image/gif", vec![7; 64]);
        lying.content_length = Some(8);
        let transport =
            Arc::new(ScriptedTransport::new(Vec::new()).with_route("/asset/5/", lying));
        let dir = tempfile::tempdir().expect("tempdir");
        let downloader = Downloader::new(transport, settings(16));

        let report = downloader
            .download_all(dir.path(), MediaKind::Image, &[asset("5")])
            .expect("batch completes");

        assert!(report.paths.is_empty());
        let leftovers = std::fs::read_dir(dir.path()).expect("list").count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_transport_failure_is_isolated() {
        let transport = Arc::new(
            ScriptedTransport::new(Vec::new())
                .with_route("/asset/6/", Scripted::broken_connection())
                .with_route("/asset/7/", Scripted::file("image/jpeg", vec![0xff, 0xd8])),
        );
        let dir = tempfile::tempdir().expect("tempdir");
        let downloader = Downloader::new(transport, settings(6_000_000));

        let report = downloader
            .download_all(dir.path(), MediaKind::Image, &[asset("6"), asset("7")])
            .expect("batch completes");

        assert_eq!(report.paths, vec![dir.path().join("7.jpg")]);
        assert!(matches!(report.failures[0].error, MediaError::Transport(_)));
    }
}
