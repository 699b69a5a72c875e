//! On-disk content cache for remote templates.
//!
//! Layout: `<root>/index.json` maps a source key to its metadata, plus one
//! content file per entry named by the 128-bit identity key of the source.
//! Re-adding a source overwrites its file in place. There is no eviction and
//! no cross-process locking: two processes writing the same cache can lose
//! each other's index updates (the rename keeps the index itself intact).
use crate::error::{Error, Result};
use crate::integrity::{content_hash, identity_key};
use crate::template::TemplateFormat;
use crate::util::{now_epoch_ms, write_atomic};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const INDEX_FILENAME: &str = "index.json";

/// Index record for one cached source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    #[serde(skip)]
    pub source_key: String,
    #[serde(rename = "filename")]
    pub cache_filename: String,
    pub last_updated: u64,
    #[serde(rename = "hash")]
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<TemplateFormat>,
    #[serde(default, rename = "ext", skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

/// Caller-supplied metadata stored alongside cached content.
#[derive(Debug, Clone, Default)]
pub struct CacheMeta {
    pub format: Option<TemplateFormat>,
    pub extension: Option<String>,
}

#[derive(Debug)]
pub struct ContentCache {
    base_path: PathBuf,
    index: BTreeMap<String, CacheEntry>,
}

impl ContentCache {
    /// Open (or create) a cache rooted at `base_path`. A missing index is an
    /// empty cache.
    pub fn init(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)
            .map_err(|err| Error::io("create cache dir", &base_path, err))?;
        let mut cache = Self {
            base_path,
            index: BTreeMap::new(),
        };
        cache.load_index()?;
        Ok(cache)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn index_path(&self) -> PathBuf {
        self.base_path.join(INDEX_FILENAME)
    }

    pub fn entry_count(&self) -> usize {
        self.index.len()
    }

    fn load_index(&mut self) -> Result<()> {
        self.index.clear();
        let path = self.index_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(Error::io("read cache index", &path, err)),
        };
        let mut index: BTreeMap<String, CacheEntry> = serde_json::from_slice(&bytes)?;
        for (key, entry) in index.iter_mut() {
            entry.source_key = key.clone();
        }
        self.index = index;
        tracing::debug!(entries = self.index.len(), "loaded cache index");
        Ok(())
    }

    fn save_index(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.index)?;
        write_atomic(&self.index_path(), text.as_bytes())
    }

    pub fn add(&mut self, source_key: &str, content: &str, meta: CacheMeta) -> Result<()> {
        let cache_filename = identity_key(source_key);
        write_atomic(&self.base_path.join(&cache_filename), content.as_bytes())?;
        let entry = CacheEntry {
            source_key: source_key.to_string(),
            cache_filename,
            last_updated: now_epoch_ms(),
            content_hash: content_hash(content.as_bytes()),
            format: meta.format,
            extension: meta.extension,
        };
        tracing::debug!(source = source_key, hash = %entry.content_hash, "cached document");
        self.index.insert(source_key.to_string(), entry);
        self.save_index()
    }

    pub fn has(&self, source_key: &str) -> bool {
        self.index.contains_key(source_key)
    }

    pub fn get_meta(&self, source_key: &str) -> Option<&CacheEntry> {
        self.index.get(source_key)
    }

    /// Content for a source, or `None` when the source is not indexed or its
    /// content file is gone. Callers decide whether the latter is corruption.
    pub fn get_content(&self, source_key: &str) -> Result<Option<String>> {
        let Some(entry) = self.index.get(source_key) else {
            return Ok(None);
        };
        let path = self.content_path(entry);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::io("read cached content", &path, err)),
        }
    }

    pub fn content_path(&self, entry: &CacheEntry) -> PathBuf {
        self.base_path.join(&entry.cache_filename)
    }
}
