//! Read-only HTTP(S) [`Backend`].
//!
//! Keys are paths below the base URL. Listing crawls HTML directory indexes
//! (the `autoindex` style most static file servers produce), following
//! relative links that end in `/` as subdirectories.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use anystore_core::error::{Result, StoreError};
use anystore_core::key::{join_key, KeyFilter};
use regex::Regex;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use reqwest::StatusCode;
use serde::Deserialize;

use super::{not_supported, Backend, BackendKind, BackendStat, ByteStream, KeyStream};

/// Options read from the `backend_config` map.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    /// Request timeout in seconds; none by default.
    pub timeout: Option<u64>,
    /// Extra headers sent with every request (e.g. `Authorization`).
    pub headers: BTreeMap<String, String>,
}

fn http_err(e: reqwest::Error) -> StoreError {
    StoreError::backend("http", e)
}

fn href_pattern() -> Option<&'static Regex> {
    static HREF: OnceLock<Option<Regex>> = OnceLock::new();
    HREF.get_or_init(|| Regex::new(r#"(?i)href\s*=\s*["']([^"'#?]+)["']"#).ok())
        .as_ref()
}

/// Relative links found in an index page, in document order.
fn index_links(html: &str) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();
    let Some(pattern) = href_pattern() else {
        return links;
    };
    for capture in pattern.captures_iter(html) {
        let link = &capture[1];
        if link.starts_with('/')
            || link.starts_with("..")
            || link.starts_with("./")
            || link.contains("://")
            || link.starts_with("mailto:")
        {
            continue;
        }
        if !links.iter().any(|l| l == link) {
            links.push(link.to_string());
        }
    }
    links
}

/// HTTP read-only storage.
pub struct HttpBackend {
    uri: String,
    base: String,
    client: Client,
}

impl HttpBackend {
    /// Builds a client for the base URL `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidUri`] for invalid header names or values,
    /// and a backend error if the client cannot be built.
    pub fn new(uri: &str, options: &HttpOptions) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let invalid = |reason: String| StoreError::InvalidUri {
                uri: uri.to_string(),
                reason,
            };
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| invalid(format!("header `{name}`: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| invalid(format!("header `{name}`: {e}")))?;
            headers.insert(name, value);
        }
        let mut builder = Client::builder().default_headers(headers);
        if let Some(secs) = options.timeout {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            uri: uri.to_string(),
            base: uri.trim_end_matches('/').to_string(),
            client: builder.build().map_err(http_err)?,
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base, key)
    }

    fn get(&self, key: &str) -> Result<Response> {
        let response = self.client.get(self.url(key)).send().map_err(http_err)?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(StoreError::does_not_exist(key)),
            _ => response.error_for_status().map_err(http_err),
        }
    }
}

impl Backend for HttpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.stat(key)?.is_some())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        Ok(self.get(key)?.bytes().map_err(http_err)?.to_vec())
    }

    fn read_stream(&self, key: &str) -> Result<ByteStream> {
        Ok(Box::new(self.get(key)?))
    }

    fn write(&self, _key: &str, _data: &[u8], _ttl: Option<Duration>) -> Result<()> {
        Err(not_supported("write", BackendKind::Http))
    }

    fn delete(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(not_supported("delete", BackendKind::Http))
    }

    fn list_keys(&self, filter: &KeyFilter) -> Result<KeyStream> {
        Ok(Box::new(IndexCrawl {
            client: self.client.clone(),
            base: self.base.clone(),
            pending: vec![filter.prefix().to_string()],
            files: Vec::new().into_iter(),
            filter: filter.clone(),
        }))
    }

    fn stat(&self, key: &str) -> Result<Option<BackendStat>> {
        let response = self.client.head(self.url(key)).send().map_err(http_err)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(None);
        }
        let response = response.error_for_status().map_err(http_err)?;
        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();
        Ok(Some(BackendStat {
            size,
            created_at: None,
            updated_at: None,
        }))
    }
}

/// Lazy crawl over directory index pages.
struct IndexCrawl {
    client: Client,
    base: String,
    pending: Vec<String>,
    files: std::vec::IntoIter<String>,
    filter: KeyFilter,
}

impl IndexCrawl {
    fn expand(&mut self, dir: &str) -> Result<()> {
        let url = if dir.is_empty() {
            format!("{}/", self.base)
        } else {
            format!("{}/{dir}/", self.base)
        };
        let response = self.client.get(&url).send().map_err(http_err)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let html = response
            .error_for_status()
            .and_then(Response::text)
            .map_err(http_err)?;
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for link in index_links(&html) {
            match link.strip_suffix('/') {
                Some(sub) => dirs.push(join_key(dir, sub)),
                None => files.push(join_key(dir, &link)),
            }
        }
        self.pending.extend(dirs.into_iter().rev());
        self.files = files.into_iter();
        Ok(())
    }
}

impl Iterator for IndexCrawl {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            for key in self.files.by_ref() {
                if self.filter.matches(&key) {
                    return Some(Ok(key));
                }
            }
            let dir = self.pending.pop()?;
            if let Err(err) = self.expand(&dir) {
                self.pending.clear();
                return Some(Err(err));
            }
        }
    }
}
