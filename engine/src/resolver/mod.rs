//! Decoded value → content record lookup.

pub mod sqlite;
pub mod toml_store;

use std::collections::BTreeMap;
use std::sync::Arc;

use scan_resolve_common::config::StoreConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;

pub use sqlite::SqliteStore;
pub use toml_store::TomlStore;

/// A displayable item (letter, story, document) keyed by identifier.
/// Owned by the store; the engine only holds shared read-only references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Read-only identifier lookup. `Ok(None)` is the normal "unknown" answer.
pub trait ContentStore: Send + Sync {
    fn lookup(&self, id: &str) -> Result<Option<Arc<ContentRecord>>, StoreError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Found(Arc<ContentRecord>),
    NotFound,
}

/// How the lookup key is derived from a decoded value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyExtraction {
    /// The whole decoded value is the key.
    #[default]
    Direct,
    /// The decoded value is a URL and this query parameter is the key.
    /// Values that are not URLs, or lack the parameter, are used whole.
    QueryParam(String),
}

impl KeyExtraction {
    pub fn key<'a>(&self, value: &'a str) -> std::borrow::Cow<'a, str> {
        match self {
            KeyExtraction::Direct => value.into(),
            KeyExtraction::QueryParam(param) => url::Url::parse(value)
                .ok()
                .and_then(|url| {
                    url.query_pairs()
                        .find(|(name, _)| name == param.as_str())
                        .map(|(_, v)| v.into_owned())
                })
                .map_or(value.into(), Into::into),
        }
    }
}

pub struct ContentResolver {
    store: Arc<dyn ContentStore>,
    key: KeyExtraction,
}

impl ContentResolver {
    pub fn new(store: Arc<dyn ContentStore>, key: KeyExtraction) -> Self {
        Self { store, key }
    }

    pub fn resolve(&self, decoded_value: &str) -> Result<Resolution, StoreError> {
        let key = self.key.key(decoded_value);
        if key.is_empty() {
            return Ok(Resolution::NotFound);
        }
        let resolution = match self.store.lookup(&key)? {
            Some(record) => Resolution::Found(record),
            None => Resolution::NotFound,
        };
        debug!(
            store = self.store.name(),
            key = %key,
            found = matches!(resolution, Resolution::Found(_)),
            "lookup"
        );
        Ok(resolution)
    }
}

/// Open the store described by the `[store]` config section.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn ContentStore>, StoreError> {
    let store: Arc<dyn ContentStore> = match config.backend.as_str() {
        "toml" => Arc::new(TomlStore::load(&config.path)?),
        "sqlite" => Arc::new(SqliteStore::open(&config.path)?),
        other => return Err(StoreError::Backend(other.to_string())),
    };
    info!(
        backend = store.name(),
        path = %config.path.display(),
        "content store opened"
    );
    Ok(store)
}

/// The key extraction configured by `[store].key_param`.
pub fn key_extraction(config: &StoreConfig) -> KeyExtraction {
    match &config.key_param {
        Some(param) => KeyExtraction::QueryParam(param.clone()),
        None => KeyExtraction::Direct,
    }
}
