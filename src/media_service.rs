//! Entry point for chat and web callers: species name in, one deliverable file out.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::asset_codec::AssetCodec;
use crate::backends::catalog::{CatalogClient, CatalogSettings};
use crate::backends::taxonomy::{TaxonomyClient, TaxonomySettings};
use crate::backends::{HttpTransport, UpstreamLimiter};
use crate::config::Config;
use crate::downloader::Downloader;
use crate::error::{MediaError, UserOutcome};
use crate::filters::FilterSet;
use crate::image_pipeline::ensure_grayscale_png;
use crate::media_cache::CacheStore;
use crate::media_kind::{CacheKey, MediaKind};
use crate::metadata_tags::strip_embedded_tags;
use crate::selector::select;
use crate::state_store::MediaStateStore;

/// Hash field holding the last selected index for a consumer.
pub const PREVIOUS_INDEX_FIELD: &str = "prevJ";

/// Who is asking; each scope rotates through files independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConsumerScope {
    Channel(String),
    WebSession(String),
}

impl ConsumerScope {
    pub fn storage_key(&self) -> String {
        match self {
            Self::Channel(id) => format!("channel:{id}"),
            Self::WebSession(id) => format!("web.session:{id}"),
        }
    }

    /// Parses `channel:<id>` or `web.session:<id>`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(id) = text.strip_prefix("channel:") {
            return (!id.is_empty()).then(|| Self::Channel(id.to_string()));
        }
        if let Some(id) = text.strip_prefix("web.session:") {
            return (!id.is_empty()).then(|| Self::WebSession(id.to_string()));
        }
        None
    }
}

impl fmt::Display for ConsumerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// A file ready to send, plus what the caller shows alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMedia {
    /// File to send; a derived copy when post-processing applied.
    pub path: PathBuf,
    /// The cached original.
    pub source_path: PathBuf,
    pub extension: String,
    pub content_type: &'static str,
    pub index: usize,
    pub asset_id: String,
    pub asset_code: Option<String>,
}

pub struct MediaService {
    taxonomy: TaxonomyClient,
    catalog: CatalogClient,
    downloader: Downloader,
    cache: CacheStore,
    store: Arc<dyn MediaStateStore>,
    codec: Option<AssetCodec>,
    max_file_size_bytes: u64,
}

impl MediaService {
    pub fn new(
        taxonomy: TaxonomyClient,
        catalog: CatalogClient,
        downloader: Downloader,
        cache: CacheStore,
        store: Arc<dyn MediaStateStore>,
        codec: Option<AssetCodec>,
    ) -> Self {
        let max_file_size_bytes = downloader.max_file_size_bytes();
        Self {
            taxonomy,
            catalog,
            downloader,
            cache,
            store,
            codec,
            max_file_size_bytes,
        }
    }

    pub fn from_config(
        config: &Config,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn MediaStateStore>,
    ) -> Result<Self, MediaError> {
        let limiter = Arc::new(UpstreamLimiter::new(config.catalog.requests_per_second));
        let retry = config.catalog.retry_policy();
        let taxonomy = TaxonomyClient::new(
            Arc::clone(&transport),
            Arc::clone(&limiter),
            TaxonomySettings {
                taxonomy_url: config.catalog.taxonomy_url.clone(),
                retry,
            },
        );
        let catalog = CatalogClient::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            limiter,
            CatalogSettings {
                catalog_url: config.catalog.catalog_url.clone(),
                asset_url_template: config.catalog.asset_url_template.clone(),
                page_size: config.catalog.page_size,
                retry,
            },
        );
        let downloader = Downloader::new(transport, config.download_settings());
        let cache = CacheStore::new(
            config.cache.root_dir.clone(),
            Arc::clone(&store),
            config.cache.populate_attempts,
        );
        let codec = if config.asset_codes.key_hex.trim().is_empty() {
            None
        } else {
            Some(AssetCodec::from_hex_key(&config.asset_codes.key_hex)?)
        };
        Ok(Self::new(taxonomy, catalog, downloader, cache, store, codec))
    }

    fn download_media(
        &self,
        species: &str,
        kind: MediaKind,
        filters: &FilterSet,
        directory: &Path,
    ) -> Result<(), MediaError> {
        let record = self.taxonomy.lookup(species)?;
        debug!(
            "MediaService: {} is {} ({})",
            species, record.common_name, record.taxon_code
        );
        let refs = self
            .catalog
            .fetch_asset_refs(species, &record.taxon_code, kind, filters)?;
        self.downloader.download_all(directory, kind, &refs)?;
        Ok(())
    }

    /// Cached files for a species, populating the cache on a miss. The cache
    /// is keyed by scientific name when the taxonomy knows the species.
    pub fn get_files(
        &self,
        species: &str,
        kind: MediaKind,
        filters: &FilterSet,
    ) -> Result<(CacheKey, Vec<PathBuf>), MediaError> {
        let scientific_name = self.taxonomy.scientific_name(species);
        let key = CacheKey::new(kind, &scientific_name, filters);
        let files = self.cache.get_files(&key, |directory| {
            self.download_media(&scientific_name, kind, filters, directory)
        })?;
        Ok((key, files))
    }

    fn previous_index(&self, scope: &ConsumerScope) -> Option<usize> {
        match self
            .store
            .hash_get(&scope.storage_key(), PREVIOUS_INDEX_FIELD)
        {
            Ok(value) => value.and_then(|value| value.trim().parse().ok()),
            Err(err) => {
                warn!("MediaService[{}]: failed to read {}: {}", scope, PREVIOUS_INDEX_FIELD, err);
                None
            }
        }
    }

    fn remember_index(&self, scope: &ConsumerScope, index: usize) {
        if let Err(err) =
            self.store
                .hash_set(&scope.storage_key(), PREVIOUS_INDEX_FIELD, &index.to_string())
        {
            warn!("MediaService[{}]: failed to persist {}: {}", scope, PREVIOUS_INDEX_FIELD, err);
        }
    }

    fn post_process(&self, kind: MediaKind, filters: &FilterSet, source: &Path) -> Option<PathBuf> {
        match kind {
            MediaKind::Image if filters.black_and_white() => match ensure_grayscale_png(source) {
                Ok(path) => Some(path),
                Err(err) => {
                    warn!("MediaService: grayscale failed for {}: {}", source.display(), err);
                    None
                }
            },
            MediaKind::Image => None,
            MediaKind::Song => {
                if let Err(err) = strip_embedded_tags(source) {
                    warn!("MediaService: tag strip failed for {}: {}", source.display(), err);
                }
                None
            }
        }
    }

    fn asset_code(&self, asset_id: &str) -> Option<String> {
        let codec = self.codec.as_ref()?;
        match codec.encode_str(asset_id) {
            Ok(code) => Some(code),
            Err(err) => {
                warn!("MediaService: no asset code for {}: {}", asset_id, err);
                None
            }
        }
    }

    /// Picks the next file for `scope` and prepares it for delivery.
    pub fn fetch(
        &self,
        species: &str,
        kind: MediaKind,
        filters: &FilterSet,
        scope: &ConsumerScope,
    ) -> Result<DeliveredMedia, MediaError> {
        let (key, files) = self.get_files(species, kind, filters)?;
        if files.is_empty() {
            return Err(MediaError::NoMedia(key.member()));
        }

        let selection = select(
            &files,
            self.previous_index(scope),
            kind,
            self.max_file_size_bytes,
        )?;
        self.remember_index(scope, selection.index);

        let size = fs::metadata(&selection.path)?.len();
        if size > self.max_file_size_bytes {
            return Err(MediaError::FileTooLarge {
                size,
                limit: self.max_file_size_bytes,
            });
        }

        let asset_id = selection
            .path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
        let (path, extension) = match self.post_process(kind, filters, &selection.path) {
            Some(derived) => (derived, "png".to_string()),
            None => (selection.path.clone(), selection.extension.clone()),
        };
        let content_type = kind
            .content_type_for_extension(&extension)
            .unwrap_or("application/octet-stream");
        info!(
            "MediaService[{}]: {} -> {} (index {})",
            scope,
            key.member(),
            path.display(),
            selection.index
        );
        Ok(DeliveredMedia {
            asset_code: self.asset_code(&asset_id),
            path,
            source_path: selection.path,
            extension,
            content_type,
            index: selection.index,
            asset_id,
        })
    }

    /// `fetch` with every failure reduced to a user-facing outcome.
    pub fn fetch_for_user(
        &self,
        species: &str,
        kind: MediaKind,
        filters: &FilterSet,
        scope: &ConsumerScope,
    ) -> Result<DeliveredMedia, UserOutcome> {
        self.fetch(species, kind, filters, scope).map_err(|err| {
            let outcome = err.outcome();
            match outcome {
                UserOutcome::InternalError | UserOutcome::NetworkError => {
                    error!("MediaService[{}]: {} {} failed: {}", scope, kind.name(), species, err)
                }
                _ => info!("MediaService[{}]: {} {}: {}", scope, kind.name(), species, err),
            }
            outcome
        })
    }
}
