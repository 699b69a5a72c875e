//! Plain HTTP(S) document fetches.
use crate::error::{Error, Result};
use std::path::Path;
use std::time::Instant;

/// A fetched document body plus the extension it should be stored under.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub content: String,
    pub extension: Option<String>,
}

pub fn fetch_document(url: &str) -> Result<FetchedDocument> {
    let start = Instant::now();
    let mut response = ureq::get(url).call().map_err(|err| Error::Fetch {
        url: url.to_string(),
        reason: err.to_string(),
    })?;
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let content = response
        .body_mut()
        .read_to_string()
        .map_err(|err| Error::Fetch {
            url: url.to_string(),
            reason: format!("read body: {err}"),
        })?;
    let extension = content_type
        .as_deref()
        .and_then(extension_for_content_type)
        .map(str::to_string)
        .or_else(|| extension_from_url(url));
    tracing::info!(
        elapsed_ms = start.elapsed().as_millis(),
        url,
        content_type = content_type.as_deref().unwrap_or(""),
        bytes = content.len(),
        "fetched document"
    );
    Ok(FetchedDocument { content, extension })
}

/// Map a `Content-Type` header to a file extension. Parameters such as
/// `charset` are ignored; unknown types yield `None`.
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    let ext = match mime.as_str() {
        "text/html" | "application/xhtml+xml" => "html",
        "text/markdown" | "text/x-markdown" => "md",
        "text/plain" => "txt",
        "text/x-tex" | "application/x-tex" => "tex",
        "application/toml" => "toml",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "text/csv" => "csv",
        _ => return None,
    };
    Some(ext)
}

/// Extension of the URL's trailing path segment, if any.
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    extension_from_path(Path::new(segment))
}

pub fn extension_from_path(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(str::to_string)
}
