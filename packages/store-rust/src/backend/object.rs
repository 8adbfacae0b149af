//! Object storage [`Backend`] (S3, GCS, Azure) over the `object_store` crate.
//!
//! The URI names the bucket and an optional base path inside it; keys map to
//! objects below that path. Credentials and client settings come from the
//! environment and from `backend_config` entries (e.g. `aws_region`,
//! `aws_endpoint`, `google_service_account`), which are passed through to the
//! provider's builder untouched.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anystore_core::error::{Result, StoreError};
use anystore_core::key::{join_key, strip_namespace, KeyFilter};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tokio::sync::mpsc;
use url::Url;

use super::runtime::BlockingRuntime;
use super::{Backend, BackendKind, BackendStat, ByteStream, KeyStream};

/// Listing results buffered ahead of the consumer.
const LIST_BUFFER: usize = 1000;

fn object_err(e: object_store::Error) -> StoreError {
    StoreError::backend("object-store", e)
}

/// Flattens `backend_config` into the string options provider builders take.
///
/// Nested objects and nulls are skipped; scalars are stringified.
#[must_use]
pub fn object_store_options(
    config: &serde_json::Map<String, serde_json::Value>,
) -> Vec<(String, String)> {
    config
        .iter()
        .filter_map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => return None,
            };
            Some((k.to_ascii_lowercase(), value))
        })
        .collect()
}

/// Object storage bucket (or sub-path of one).
pub struct ObjectBackend {
    uri: String,
    base: String,
    store: Arc<dyn ObjectStore>,
    runtime: BlockingRuntime,
}

impl ObjectBackend {
    /// Builds a client for `uri` with provider `options`.
    ///
    /// `gcs://` is accepted as an alias of `gs://`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidUri`] if the URL or options are rejected
    /// by the provider builder.
    pub fn open(uri: &str, options: Vec<(String, String)>) -> Result<Self> {
        let normalized = match uri.strip_prefix("gcs://") {
            Some(rest) => format!("gs://{rest}"),
            None => uri.to_string(),
        };
        let url = Url::parse(&normalized).map_err(|e| StoreError::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        let (store, base) =
            object_store::parse_url_opts(&url, options).map_err(|e| StoreError::InvalidUri {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!(uri, base = %base, "object store opened");
        Self::from_store(uri, Arc::from(store), base.as_ref())
    }

    /// Wraps an already configured store, rooted at `base`.
    ///
    /// # Errors
    ///
    /// Fails if the private runtime cannot be started.
    pub fn from_store(uri: &str, store: Arc<dyn ObjectStore>, base: &str) -> Result<Self> {
        Ok(Self {
            uri: uri.to_string(),
            base: base.trim_matches('/').to_string(),
            store,
            runtime: BlockingRuntime::new("object-store")?,
        })
    }

    fn path(&self, key: &str) -> Path {
        Path::from(join_key(&self.base, key))
    }
}

impl Backend for ObjectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.stat(key)?.is_some())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path(key);
        let result = self.runtime.block_on(async {
            let get = self.store.get(&path).await?;
            get.bytes().await
        });
        match result {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(object_store::Error::NotFound { .. }) => Err(StoreError::does_not_exist(key)),
            Err(e) => Err(object_err(e)),
        }
    }

    fn read_stream(&self, key: &str) -> Result<ByteStream> {
        let path = self.path(key);
        match self.runtime.block_on(self.store.get(&path)) {
            Ok(get) => Ok(Box::new(BlockingBody {
                stream: get.into_stream(),
                runtime: self.runtime.clone(),
                chunk: Bytes::new(),
            })),
            Err(object_store::Error::NotFound { .. }) => Err(StoreError::does_not_exist(key)),
            Err(e) => Err(object_err(e)),
        }
    }

    fn write(&self, key: &str, data: &[u8], _ttl: Option<Duration>) -> Result<()> {
        let path = self.path(key);
        let payload = PutPayload::from(Bytes::copy_from_slice(data));
        self.runtime
            .block_on(self.store.put(&path, payload))
            .map_err(object_err)?;
        tracing::trace!(key, size = data.len(), "object write");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let previous = match self.read(key) {
            Ok(data) => Some(data),
            Err(e) if e.is_missing() => return Ok(None),
            Err(e) => return Err(e),
        };
        let path = self.path(key);
        match self.runtime.block_on(self.store.delete(&path)) {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(previous),
            Err(e) => Err(object_err(e)),
        }
    }

    fn list_keys(&self, filter: &KeyFilter) -> Result<KeyStream> {
        let prefix = join_key(&self.base, filter.prefix());
        let (tx, rx) = mpsc::channel(LIST_BUFFER);
        let store = self.store.clone();
        self.runtime.spawn(async move {
            let prefix = (!prefix.is_empty()).then(|| Path::from(prefix));
            let mut listing = store.list(prefix.as_ref());
            while let Some(item) = listing.next().await {
                let item = item.map(|meta| meta.location.to_string());
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        Ok(Box::new(ListReceiver {
            rx,
            base: self.base.clone(),
            filter: filter.clone(),
        }))
    }

    fn stat(&self, key: &str) -> Result<Option<BackendStat>> {
        let path = self.path(key);
        match self.runtime.block_on(self.store.head(&path)) {
            Ok(meta) => Ok(Some(BackendStat {
                size: meta.size as u64,
                created_at: None,
                updated_at: Some(meta.last_modified.timestamp_millis()),
            })),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(object_err(e)),
        }
    }
}

/// Synchronous view over an object body stream.
struct BlockingBody {
    stream: BoxStream<'static, object_store::Result<Bytes>>,
    runtime: BlockingRuntime,
    chunk: Bytes,
}

impl Read for BlockingBody {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        while self.chunk.is_empty() {
            match self.runtime.block_on(self.stream.next()) {
                Some(Ok(chunk)) => self.chunk = chunk,
                Some(Err(e)) => return Err(std::io::Error::other(e)),
                None => return Ok(0),
            }
        }
        let n = out.len().min(self.chunk.len());
        out[..n].copy_from_slice(&self.chunk.split_to(n));
        Ok(n)
    }
}

/// Receives listing pages produced by a background task.
struct ListReceiver {
    rx: mpsc::Receiver<object_store::Result<String>>,
    base: String,
    filter: KeyFilter,
}

impl Iterator for ListReceiver {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.rx.blocking_recv()? {
                Ok(location) => {
                    let Some(key) = strip_namespace(&self.base, &location) else {
                        continue;
                    };
                    if self.filter.matches(key) {
                        return Some(Ok(key.to_string()));
                    }
                }
                Err(e) => return Some(Err(object_err(e))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use object_store::memory::InMemory;

    use super::*;

    fn backend(base: &str) -> ObjectBackend {
        ObjectBackend::from_store("s3://bucket", Arc::new(InMemory::new()), base).unwrap()
    }

    #[test]
    fn round_trip_and_stat() {
        let backend = backend("data");
        backend.write("a/b.json", b"{}", None).unwrap();
        assert_eq!(backend.read("a/b.json").unwrap(), b"{}");
        let stat = backend.stat("a/b.json").unwrap().unwrap();
        assert_eq!(stat.size, 2);
        assert!(stat.updated_at.is_some());
        assert!(backend.read("missing").unwrap_err().is_missing());
        assert_eq!(backend.stat("missing").unwrap(), None);
    }

    #[test]
    fn stream_yields_whole_body() {
        let backend = backend("");
        backend.write("k", &[9u8; 5000], None).unwrap();
        let mut body = Vec::new();
        backend.read_stream("k").unwrap().read_to_end(&mut body).unwrap();
        assert_eq!(body.len(), 5000);
    }

    #[test]
    fn listing_strips_base_path() {
        let backend = backend("base");
        for key in ["topic/a", "topic/b", "other/c"] {
            backend.write(key, b"", None).unwrap();
        }
        let filter = KeyFilter::new().with_prefix("topic").unwrap();
        let mut keys: Vec<String> = backend
            .list_keys(&filter)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        keys.sort();
        assert_eq!(keys, vec!["topic/a", "topic/b"]);
    }

    #[test]
    fn delete_is_idempotent() {
        let backend = backend("");
        backend.write("k", b"v", None).unwrap();
        assert_eq!(backend.delete("k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(backend.delete("k").unwrap(), None);
    }

    #[test]
    fn options_are_stringified() {
        let config: serde_json::Map<String, serde_json::Value> = serde_json::from_str(
            r#"{"AWS_REGION": "eu-west-1", "allow_http": true, "nested": {"x": 1}}"#,
        )
        .unwrap();
        let mut options = object_store_options(&config);
        options.sort();
        assert_eq!(
            options,
            vec![
                ("allow_http".to_string(), "true".to_string()),
                ("aws_region".to_string(), "eu-west-1".to_string()),
            ]
        );
    }
}
