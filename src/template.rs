//! Template resolution.
//!
//! A template source is a local path, a plain URL, or a repository location.
//! Remote sources go through the content cache keyed by the source string
//! exactly as written in the contract. Every load is checked against the
//! pinned content hash when one is supplied.
use crate::cache::{CacheMeta, ContentCache};
use crate::error::{Error, Result};
use crate::integrity::{content_hash, verify_content_hash};
use crate::location::{is_repository_location, LocationUrl};
use crate::repository::RepositoryFetcher;
use crate::util::resolve_against;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub mod vars;
pub mod web;

pub use vars::{extract_variables, VariableTree};
use web::{extension_from_path, extension_from_url, fetch_document};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateFormat {
    #[default]
    Mustache,
    Handlebars,
}

impl TemplateFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateFormat::Mustache => "mustache",
            TemplateFormat::Handlebars => "handlebars",
        }
    }
}

impl fmt::Display for TemplateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateFormat {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mustache" => Ok(TemplateFormat::Mustache),
            "handlebars" => Ok(TemplateFormat::Handlebars),
            other => Err(format!(
                "unsupported template format {other:?} (expected mustache or handlebars)"
            )),
        }
    }
}

/// A loaded template. Immutable once returned by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub source: String,
    pub content: String,
    pub content_hash: String,
    pub extension: Option<String>,
    pub format: TemplateFormat,
    pub custom_delimiters: Option<(String, String)>,
}

impl Template {
    pub fn variables(&self) -> VariableTree {
        let delimiters = self
            .custom_delimiters
            .as_ref()
            .map(|(open, close)| (open.as_str(), close.as_str()));
        extract_variables(&self.content, self.format, delimiters)
    }
}

/// Per-load options.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Directory that relative local sources resolve against. For contract
    /// templates this is the contract's own directory.
    pub base_dir: PathBuf,
    pub expected_content_hash: Option<String>,
    /// Overrides the format recorded in the cache.
    pub format: Option<TemplateFormat>,
    pub delimiters: Option<(String, String)>,
    /// Skip cache reads. Fresh results are still written back.
    pub refresh: bool,
}

impl LoadOptions {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            expected_content_hash: None,
            format: None,
            delimiters: None,
            refresh: false,
        }
    }
}

pub struct TemplateResolver {
    cache: Option<ContentCache>,
    repositories: RepositoryFetcher,
}

impl TemplateResolver {
    pub fn new(cache: Option<ContentCache>, repositories: RepositoryFetcher) -> Self {
        Self {
            cache,
            repositories,
        }
    }

    pub fn cache(&self) -> Option<&ContentCache> {
        self.cache.as_ref()
    }

    pub fn load(&mut self, source: &str, options: &LoadOptions) -> Result<Template> {
        if !source.contains("://") {
            return load_local(source, options);
        }
        if !options.refresh {
            if let Some(template) = self.load_cached(source, options)? {
                return Ok(template);
            }
        }

        let fetched = if is_repository_location(source) {
            let location = LocationUrl::parse(source)?;
            self.repositories.fetch_file(&location)?
        } else {
            fetch_document(source)?
        };
        let hash = check_hash(source, options, &fetched.content)?;
        let format = options.format.unwrap_or_default();
        if let Some(cache) = self.cache.as_mut() {
            cache.add(
                source,
                &fetched.content,
                CacheMeta {
                    format: Some(format),
                    extension: fetched.extension.clone(),
                },
            )?;
        }
        Ok(Template {
            source: source.to_string(),
            content: fetched.content,
            content_hash: hash,
            extension: fetched.extension,
            format,
            custom_delimiters: options.delimiters.clone(),
        })
    }

    fn load_cached(&self, source: &str, options: &LoadOptions) -> Result<Option<Template>> {
        let Some(cache) = self.cache.as_ref() else {
            return Ok(None);
        };
        let Some(meta) = cache.get_meta(source) else {
            return Ok(None);
        };
        let Some(content) = cache.get_content(source)? else {
            return Err(Error::CacheCorruption {
                source_key: meta.source_key.clone(),
                path: cache.content_path(meta),
            });
        };
        tracing::debug!(source, "template cache hit");
        let hash = check_hash(source, options, &content)?;
        Ok(Some(Template {
            source: source.to_string(),
            content,
            content_hash: hash,
            extension: meta.extension.clone().or_else(|| extension_from_url(source)),
            format: options.format.or(meta.format).unwrap_or_default(),
            custom_delimiters: options.delimiters.clone(),
        }))
    }
}

fn load_local(source: &str, options: &LoadOptions) -> Result<Template> {
    let path = resolve_against(&options.base_dir, source);
    let content = read_template_file(source, &path)?;
    let hash = check_hash(source, options, &content)?;
    Ok(Template {
        source: source.to_string(),
        content,
        content_hash: hash,
        extension: extension_from_path(&path),
        format: options.format.unwrap_or_default(),
        custom_delimiters: options.delimiters.clone(),
    })
}

/// Read a template file, mapping absence to `TemplateNotFound`.
pub(crate) fn read_template_file(location: &str, path: &Path) -> Result<String> {
    let not_found = || Error::TemplateNotFound {
        location: location.to_string(),
        path: path.to_path_buf(),
    };
    if path.is_dir() {
        return Err(not_found());
    }
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(not_found()),
        Err(err) => Err(Error::io("read template", path, err)),
    }
}

fn check_hash(source: &str, options: &LoadOptions, content: &str) -> Result<String> {
    match options.expected_content_hash.as_deref() {
        Some(expected) => verify_content_hash(source, expected, content.as_bytes()),
        None => Ok(content_hash(content.as_bytes())),
    }
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
