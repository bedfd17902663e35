//! Species name to taxon code and scientific name, memoized per process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{info, warn};
use serde_json::Value;

use crate::backends::{
    execute_with_backoff, transient_on_transport, HttpTransport, RetryPolicy, UpstreamLimiter,
};
use crate::error::MediaError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonRecord {
    pub taxon_code: String,
    pub common_name: String,
    pub scientific_name: String,
}

#[derive(Debug, Clone)]
pub struct TaxonomySettings {
    /// Lookup URL with a `{}` placeholder for the encoded query.
    pub taxonomy_url: String,
    pub retry: RetryPolicy,
}

pub struct TaxonomyClient {
    transport: Arc<dyn HttpTransport>,
    limiter: Arc<UpstreamLimiter>,
    settings: TaxonomySettings,
    memo: Mutex<HashMap<String, TaxonRecord>>,
}

/// Trims, turns hyphens into spaces, and capitalizes each word.
pub fn normalize_species_name(name: &str) -> String {
    name.trim()
        .replace('-', " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl TaxonomyClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        limiter: Arc<UpstreamLimiter>,
        settings: TaxonomySettings,
    ) -> Self {
        Self {
            transport,
            limiter,
            settings,
            memo: Mutex::new(HashMap::new()),
        }
    }

    fn memoized(&self, normalized: &str) -> Option<TaxonRecord> {
        self.memo
            .lock()
            .ok()
            .and_then(|memo| memo.get(normalized).cloned())
    }

    fn remember(&self, normalized: String, record: TaxonRecord) {
        if let Ok(mut memo) = self.memo.lock() {
            memo.insert(normalized, record);
        }
    }

    fn parse_record(payload: &Value, name: &str) -> Result<TaxonRecord, MediaError> {
        let first = payload
            .as_array()
            .and_then(|items| items.first())
            .ok_or_else(|| MediaError::UnknownSpecies(format!("no taxon code for {name}")))?;
        let taxon_code = first
            .get("code")
            .and_then(Value::as_str)
            .filter(|code| !code.is_empty())
            .ok_or_else(|| MediaError::UnknownSpecies(format!("no taxon code for {name}")))?;
        let display_name = first.get("name").and_then(Value::as_str).unwrap_or(name);
        let (common_name, scientific_name) = display_name
            .split_once(" - ")
            .unwrap_or((display_name, display_name));
        Ok(TaxonRecord {
            taxon_code: taxon_code.to_string(),
            common_name: common_name.trim().to_string(),
            scientific_name: scientific_name.trim().to_string(),
        })
    }

    fn lookup_once(&self, url: &str, name: &str) -> Result<TaxonRecord, MediaError> {
        self.limiter.wait_for_slot();
        let response = self.transport.get(url).map_err(transient_on_transport)?;
        if response.status != 200 {
            return Err(MediaError::upstream_transient(format!(
                "HTTP {} while fetching {} for {}",
                response.status, url, name
            )));
        }
        let payload = response.read_json().map_err(transient_on_transport)?;
        Self::parse_record(&payload, name)
    }

    /// Resolves a free-text species name to the first upstream match.
    pub fn lookup(&self, name: &str) -> Result<TaxonRecord, MediaError> {
        let normalized = normalize_species_name(name);
        if normalized.is_empty() {
            return Err(MediaError::Validation("species name is blank".to_string()));
        }
        if let Some(record) = self.memoized(&normalized) {
            return Ok(record);
        }

        let query = normalized.replace("'s", "");
        let url = self
            .settings
            .taxonomy_url
            .replace("{}", &urlencoding::encode(&query));
        let label = format!("Taxonomy[{normalized}]");
        let record =
            execute_with_backoff(&self.settings.retry, &label, || self.lookup_once(&url, name))?;
        info!(
            "{}: taxon {} ({})",
            label, record.taxon_code, record.scientific_name
        );
        self.remember(normalized, record.clone());
        Ok(record)
    }

    /// Scientific name for `name`, or the normalized input when the lookup
    /// fails for any reason.
    pub fn scientific_name(&self, name: &str) -> String {
        match self.lookup(name) {
            Ok(record) => record.scientific_name,
            Err(error) => {
                warn!(
                    "Taxonomy[{}]: falling back to input name: {}",
                    name.trim(),
                    error
                );
                normalize_species_name(name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_species_name, TaxonomyClient, TaxonomySettings};
    use crate::backends::test_support::{Scripted, ScriptedTransport};
    use crate::backends::{RetryPolicy, UpstreamLimiter};
    use crate::error::MediaError;
    use std::sync::Arc;
    use std::time::Duration;

    const ROBIN: &str = r#"[{"code": "amerob", "name": "American Robin - Turdus migratorius"}]"#;

    fn client(transport: Arc<ScriptedTransport>) -> TaxonomyClient {
        TaxonomyClient::new(
            transport,
            Arc::new(UpstreamLimiter::unlimited()),
            TaxonomySettings {
                taxonomy_url: "https://taxonomy.test/v1/taxonomy?q={}&key=k".to_string(),
                retry: RetryPolicy {
                    backoff_unit: Duration::ZERO,
                    ..RetryPolicy::default()
                },
            },
        )
    }

    #[test]
    fn test_normalize_species_name_matches_capitalized_words() {
        assert_eq!(normalize_species_name("  american-robin "), "American Robin");
        assert_eq!(normalize_species_name("COOPER'S HAWK"), "Cooper's Hawk");
    }

    #[test]
    fn test_lookup_splits_name_and_memoizes() {
        let transport = Arc::new(ScriptedTransport::new(vec![Scripted::json(ROBIN)]));
        let client = client(transport.clone());

        let record = client.lookup("american robin").expect("lookup");
        assert_eq!(record.taxon_code, "amerob");
        assert_eq!(record.common_name, "American Robin");
        assert_eq!(record.scientific_name, "Turdus migratorius");

        let again = client.lookup("American-Robin").expect("memoized lookup");
        assert_eq!(again, record);
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].contains("q=American%20Robin&"));
    }

    #[test]
    fn test_lookup_drops_possessive_from_query() {
        let transport = Arc::new(ScriptedTransport::new(vec![Scripted::json(
            r#"[{"code": "coohaw", "name": "Cooper's Hawk - Accipiter cooperii"}]"#,
        )]));
        let client = client(transport.clone());
        client.lookup("cooper's hawk").expect("lookup");
        assert!(transport.requests()[0].contains("q=Cooper%20Hawk&"));
    }

    #[test]
    fn test_lookup_empty_result_is_unknown_species() {
        let transport = Arc::new(ScriptedTransport::new(vec![Scripted::json("[]")]));
        let client = client(transport);
        assert!(matches!(
            client.lookup("not a bird"),
            Err(MediaError::UnknownSpecies(_))
        ));
    }

    #[test]
    fn test_lookup_retries_server_errors() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Scripted::status(502),
            Scripted::json(ROBIN),
        ]));
        let client = client(transport.clone());
        assert!(client.lookup("american robin").is_ok());
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn test_scientific_name_falls_back_to_input() {
        let transport = Arc::new(ScriptedTransport::new(vec![Scripted::json("[]")]));
        let client = client(transport);
        assert_eq!(client.scientific_name("screech owl"), "Screech Owl");
    }
}
