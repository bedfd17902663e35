//! Media catalog client: pages of asset references per cache key.
//!
//! Each cache key owns one opaque pagination cursor in the shared store, so
//! repeated misses for a popular key walk forward through upstream results.
//! Cursor read-then-write is not atomic; concurrent fetches for the same key
//! race and the last writer wins.

use std::sync::Arc;

use log::{info, warn};
use serde_json::Value;

use crate::backends::{
    execute_with_backoff, transient_on_transport, AssetRef, HttpTransport, RetryPolicy,
    UpstreamLimiter,
};
use crate::error::MediaError;
use crate::filters::FilterSet;
use crate::media_kind::{CacheKey, MediaKind};
use crate::state_store::MediaStateStore;

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    /// Search endpoint including its fixed leading query parameter.
    pub catalog_url: String,
    /// CDN template with `{id}` and `{size}` placeholders.
    pub asset_url_template: String,
    pub page_size: usize,
    pub retry: RetryPolicy,
}

struct CatalogPage {
    asset_ids: Vec<String>,
    next_cursor: Option<String>,
}

pub struct CatalogClient {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn MediaStateStore>,
    limiter: Arc<UpstreamLimiter>,
    settings: CatalogSettings,
}

impl CatalogClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn MediaStateStore>,
        limiter: Arc<UpstreamLimiter>,
        settings: CatalogSettings,
    ) -> Self {
        Self {
            transport,
            store,
            limiter,
            settings,
        }
    }

    fn read_cursor(&self, key: &CacheKey) -> String {
        match self.store.get_string(&key.cursor_key()) {
            Ok(cursor) => cursor.unwrap_or_default(),
            Err(error) => {
                warn!(
                    "Catalog[{}]: failed to read cursor, starting fresh: {}",
                    key.member(),
                    error
                );
                String::new()
            }
        }
    }

    fn write_cursor(&self, key: &CacheKey, cursor: &str) {
        if let Err(error) = self.store.set_string(&key.cursor_key(), cursor) {
            warn!(
                "Catalog[{}]: failed to persist cursor: {}",
                key.member(),
                error
            );
        }
    }

    fn asset_id_string(value: &Value) -> Option<String> {
        match value {
            Value::Number(number) => Some(number.to_string()),
            Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            _ => None,
        }
    }

    fn parse_page(payload: &Value) -> Result<CatalogPage, MediaError> {
        let Some(items) = payload.as_array() else {
            return Err(MediaError::upstream_transient(
                "Catalog response was not a JSON array",
            ));
        };
        let asset_ids = items
            .iter()
            .filter_map(|item| item.get("assetId").and_then(Self::asset_id_string))
            .collect();
        let next_cursor = items
            .last()
            .and_then(|item| item.get("cursorMark"))
            .and_then(Value::as_str)
            .filter(|cursor| !cursor.is_empty())
            .map(ToOwned::to_owned);
        Ok(CatalogPage {
            asset_ids,
            next_cursor,
        })
    }

    fn fetch_page_once(&self, url: &str) -> Result<CatalogPage, MediaError> {
        self.limiter.wait_for_slot();
        let response = self.transport.get(url).map_err(transient_on_transport)?;
        if response.status != 200 {
            return Err(MediaError::upstream_transient(format!(
                "HTTP {} while fetching {}",
                response.status, url
            )));
        }
        let payload = response.read_json().map_err(transient_on_transport)?;
        Self::parse_page(&payload)
    }

    fn asset_url(&self, asset_id: &str, size: &str) -> String {
        self.settings
            .asset_url_template
            .replace("{id}", asset_id)
            .replace("{size}", size)
    }

    /// Fetches the next page of asset references for one cache key.
    ///
    /// Non-200 responses and transport failures are retried with backoff and
    /// become a permanent upstream error once retries are spent. The next
    /// cursor is persisted before returning. An empty page is retried once
    /// without a cursor; a second empty page is `NotFound`.
    pub fn fetch_asset_refs(
        &self,
        species: &str,
        taxon_code: &str,
        kind: MediaKind,
        filters: &FilterSet,
    ) -> Result<Vec<AssetRef>, MediaError> {
        let key = CacheKey::new(kind, species, filters);
        let label = format!("Catalog[{}]", key.member());
        let mut cursor = self.read_cursor(&key);
        let mut retried_without_cursor = false;
        loop {
            let url = filters.build_query(
                &self.settings.catalog_url,
                taxon_code,
                kind,
                self.settings.page_size,
                &cursor,
            );
            let page = execute_with_backoff(&self.settings.retry, &label, || {
                self.fetch_page_once(&url)
            })?;
            self.write_cursor(&key, page.next_cursor.as_deref().unwrap_or_default());

            if !page.asset_ids.is_empty() {
                let size = kind.asset_size_token(filters);
                info!(
                    "{}: {} asset refs (cursor advanced: {})",
                    label,
                    page.asset_ids.len(),
                    page.next_cursor.is_some()
                );
                return Ok(page
                    .asset_ids
                    .into_iter()
                    .map(|asset_id| AssetRef {
                        url: self.asset_url(&asset_id, size),
                        asset_id,
                    })
                    .collect());
            }

            if retried_without_cursor {
                return Err(MediaError::NotFound(format!(
                    "no {} for {}",
                    kind.name(),
                    key.member()
                )));
            }
            info!("{}: empty page, retrying without cursor", label);
            retried_without_cursor = true;
            cursor.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CatalogClient, CatalogSettings};
    use crate::backends::test_support::{Scripted, ScriptedTransport};
    use crate::backends::{RetryPolicy, UpstreamLimiter};
    use crate::error::MediaError;
    use crate::filters::FilterSet;
    use crate::media_kind::{CacheKey, MediaKind};
    use crate::state_store::{InMemoryStateStore, MediaStateStore};
    use std::sync::Arc;
    use std::time::Duration;

    const SPECIES: &str = "Turdus migratorius";

    fn settings() -> CatalogSettings {
        CatalogSettings {
            catalog_url: "https://catalog.test/catalog.json?searchField=species".to_string(),
            asset_url_template: "https://cdn.test/asset/{id}/{size}".to_string(),
            page_size: 5,
            retry: RetryPolicy {
                backoff_unit: Duration::ZERO,
                ..RetryPolicy::default()
            },
        }
    }

    fn client(
        transport: Arc<ScriptedTransport>,
        store: Arc<InMemoryStateStore>,
    ) -> CatalogClient {
        CatalogClient::new(
            transport,
            store,
            Arc::new(UpstreamLimiter::unlimited()),
            settings(),
        )
    }

    fn page_json(ids: &[u64], cursor: Option<&str>) -> String {
        let items: Vec<String> = ids
            .iter()
            .enumerate()
            .map(|(index, id)| match cursor {
                Some(cursor) if index + 1 == ids.len() => {
                    format!(r#"{{"assetId": {id}, "cursorMark": "{cursor}"}}"#)
                }
                _ => format!(r#"{{"assetId": {id}}}"#),
            })
            .collect();
        format!("[{}]", items.join(","))
    }

    #[test]
    fn test_fetch_asset_refs_recovers_after_three_server_errors() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Scripted::status(500),
            Scripted::status(500),
            Scripted::status(500),
            Scripted::json(&page_json(&[1, 2, 3, 4, 5], Some("next"))),
        ]));
        let store = Arc::new(InMemoryStateStore::new());
        let client = client(transport.clone(), store);

        let refs = client
            .fetch_asset_refs(SPECIES, "amerob", MediaKind::Image, &FilterSet::default())
            .expect("fourth attempt should succeed");

        assert_eq!(refs.len(), 5);
        let retries = transport.requests().len() - 1;
        assert_eq!(retries, 3);
        assert_eq!(refs[0].asset_id, "1");
        assert_eq!(refs[0].url, "https://cdn.test/asset/1/1200");
    }

    #[test]
    fn test_fetch_asset_refs_fails_permanently_after_three_retries() {
        let transport =
            Arc::new(ScriptedTransport::new(Vec::new()).with_fallback(Scripted::status(503)));
        let store = Arc::new(InMemoryStateStore::new());
        let client = client(transport.clone(), store);

        let error = client
            .fetch_asset_refs(SPECIES, "amerob", MediaKind::Song, &FilterSet::default())
            .expect_err("upstream never recovers");

        assert!(matches!(error, MediaError::Upstream { .. }));
        assert!(!error.is_transient());
        assert_eq!(transport.requests().len(), 4);
    }

    #[test]
    fn test_transport_failures_are_retried_like_server_errors() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Scripted::broken_connection(),
            Scripted::json(&page_json(&[9], None)),
        ]));
        let store = Arc::new(InMemoryStateStore::new());
        let client = client(transport.clone(), store);

        let refs = client
            .fetch_asset_refs(SPECIES, "amerob", MediaKind::Song, &FilterSet::default())
            .expect("second attempt should succeed");
        assert_eq!(refs[0].url, "https://cdn.test/asset/9/audio");
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn test_cursor_is_persisted_and_used_by_the_next_fetch() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Scripted::json(&page_json(&[1, 2], Some("page-2"))),
            Scripted::json(&page_json(&[3, 4], None)),
        ]));
        let store = Arc::new(InMemoryStateStore::new());
        let client = client(transport.clone(), store.clone());
        let filters = FilterSet::default();
        let key = CacheKey::new(MediaKind::Image, SPECIES, &filters);

        client
            .fetch_asset_refs(SPECIES, "amerob", MediaKind::Image, &filters)
            .expect("first page");
        assert_eq!(
            store.get_string(&key.cursor_key()).ok().flatten().as_deref(),
            Some("page-2")
        );

        client
            .fetch_asset_refs(SPECIES, "amerob", MediaKind::Image, &filters)
            .expect("second page");
        let requests = transport.requests();
        assert!(requests[0].ends_with("&cursorMark="));
        assert!(requests[1].ends_with("&cursorMark=page-2"));
        assert_eq!(
            store.get_string(&key.cursor_key()).ok().flatten().as_deref(),
            Some("")
        );
    }

    #[test]
    fn test_empty_page_retries_once_without_cursor() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Scripted::json("[]"),
            Scripted::json(&page_json(&[7], None)),
        ]));
        let store = Arc::new(InMemoryStateStore::new());
        let filters = FilterSet::default();
        let key = CacheKey::new(MediaKind::Image, SPECIES, &filters);
        store
            .set_string(&key.cursor_key(), "stale")
            .expect("seed cursor");
        let client = client(transport.clone(), store);

        let refs = client
            .fetch_asset_refs(SPECIES, "amerob", MediaKind::Image, &filters)
            .expect("fresh query has results");

        assert_eq!(refs.len(), 1);
        let requests = transport.requests();
        assert!(requests[0].ends_with("&cursorMark=stale"));
        assert!(requests[1].ends_with("&cursorMark="));
    }

    #[test]
    fn test_empty_fresh_query_is_not_found() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()).with_fallback(Scripted::json("[]")));
        let store = Arc::new(InMemoryStateStore::new());
        let client = client(transport.clone(), store);

        let error = client
            .fetch_asset_refs(SPECIES, "amerob", MediaKind::Image, &FilterSet::default())
            .expect_err("nothing upstream");
        assert!(matches!(error, MediaError::NotFound(_)));
        assert_eq!(transport.requests().len(), 2);
    }
}
