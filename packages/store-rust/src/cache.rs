//! Function-result memoization on top of a [`Store`].
//!
//! A call is looked up under a key derived from a function identity and its
//! arguments ([`signature_key`]), or under a key chosen by a custom key
//! function. Hits are decoded and returned without running the function.
//! Misses run it and write the result back with the configured TTL.
//!
//! Lookup failures other than capability errors degrade to a miss, so a
//! flaky cache never blocks the computation. Write-back failures propagate.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anystore_core::error::{Result, StoreError};
use anystore_core::hash::signature_key;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::store::{ReadOptions, Store, WriteOptions};

/// Hit/miss counters of a [`Memoizer`] and its clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// `true` if `value` serializes to nothing (`None`, `()`).
fn is_absent<R: Serialize>(value: &R) -> bool {
    matches!(serde_json::to_value(value), Ok(serde_json::Value::Null))
}

/// Memoizes function results in a store.
#[derive(Clone)]
pub struct Memoizer {
    store: Arc<Store>,
    ttl: Option<Duration>,
    cache_none: bool,
    counters: Arc<Counters>,
}

impl Memoizer {
    /// Caches into `store` with its default TTL; absent results are not cached.
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            ttl: None,
            cache_none: false,
            counters: Arc::default(),
        }
    }

    /// Expiry for cached results. `Duration::ZERO` caches forever.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Also cache absent results (`None`), so they are not recomputed.
    #[must_use]
    pub fn cache_none(mut self, enabled: bool) -> Self {
        self.cache_none = enabled;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        }
    }

    /// Default cache key for calling `identity` with `args`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Serialization`] if `args` cannot be serialized.
    pub fn key_for<A: Serialize + ?Sized>(&self, identity: &str, args: &A) -> Result<String> {
        signature_key(identity, args)
    }

    fn lookup<R: DeserializeOwned>(&self, key: &str) -> Result<Option<R>> {
        match self.store.get_model::<R>(key, &ReadOptions::lenient()) {
            Ok(hit) => Ok(hit),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(key, error = %e, "cache lookup failed, treating as miss");
                Ok(None)
            }
        }
    }

    fn store_result<R: Serialize>(&self, key: &str, result: &R) -> Result<()> {
        if !self.cache_none && is_absent(result) {
            tracing::debug!(key, "absent result not cached");
            return Ok(());
        }
        let options = WriteOptions {
            ttl: self.ttl,
            mode: None,
        };
        self.store.put_model(key, result, &options)
    }

    /// Returns the cached value under `key`, or runs `f` and caches it.
    ///
    /// With `key = None` caching is skipped and `f` runs.
    ///
    /// # Errors
    ///
    /// Fatal lookup errors and write-back errors.
    pub fn get_or_compute<R, F>(&self, key: Option<&str>, f: F) -> Result<R>
    where
        R: Serialize + DeserializeOwned,
        F: FnOnce() -> R,
    {
        self.try_get_or_compute(key, || Ok::<_, StoreError>(f()))
    }

    /// Fallible [`Memoizer::get_or_compute`]. Errors from `f` are returned
    /// as-is and nothing is cached.
    ///
    /// # Errors
    ///
    /// Errors from `f`, plus store errors converted into `E`.
    pub fn try_get_or_compute<R, E, F>(&self, key: Option<&str>, f: F) -> std::result::Result<R, E>
    where
        R: Serialize + DeserializeOwned,
        E: From<StoreError>,
        F: FnOnce() -> std::result::Result<R, E>,
    {
        let Some(key) = key else {
            return f();
        };
        if let Some(hit) = self.lookup::<R>(key)? {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key, "cache hit");
            return Ok(hit);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key, "cache miss");
        let result = f()?;
        self.store_result(key, &result)?;
        Ok(result)
    }

    /// Memoizes `f(args)` under the default key of `(identity, args)`.
    ///
    /// # Errors
    ///
    /// See [`Memoizer::get_or_compute`] and [`Memoizer::key_for`].
    pub fn call<A, R, F>(&self, identity: &str, args: &A, f: F) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: Serialize + DeserializeOwned,
        F: FnOnce(&A) -> R,
    {
        let key = self.key_for(identity, args)?;
        self.get_or_compute(Some(&key), || f(args))
    }

    /// Wraps `f` so every call goes through the cache.
    pub fn wrap<A, R, F>(&self, identity: impl Into<String>, f: F) -> CachedFn<A, R, F>
    where
        A: Serialize,
        R: Serialize + DeserializeOwned,
        F: Fn(&A) -> R,
    {
        CachedFn {
            memoizer: self.clone(),
            identity: identity.into(),
            func: f,
            key_fn: None,
            _marker: PhantomData,
        }
    }
}

type KeyFn<A> = Box<dyn Fn(&A) -> Option<String> + Send + Sync>;

/// A function wrapped by [`Memoizer::wrap`].
pub struct CachedFn<A, R, F> {
    memoizer: Memoizer,
    identity: String,
    func: F,
    key_fn: Option<KeyFn<A>>,
    _marker: PhantomData<fn(&A) -> R>,
}

impl<A, R, F> CachedFn<A, R, F>
where
    A: Serialize,
    R: Serialize + DeserializeOwned,
    F: Fn(&A) -> R,
{
    /// Uses `key_fn` instead of hashing. Returning `None` bypasses the cache
    /// for that call.
    #[must_use]
    pub fn with_key_fn(mut self, key_fn: impl Fn(&A) -> Option<String> + Send + Sync + 'static) -> Self {
        self.key_fn = Some(Box::new(key_fn));
        self
    }

    /// Cache key for `args`, `None` if caching is disabled for them.
    ///
    /// # Errors
    ///
    /// [`StoreError::Serialization`] if `args` cannot be hashed.
    pub fn key(&self, args: &A) -> Result<Option<String>> {
        match &self.key_fn {
            Some(key_fn) => Ok(key_fn(args)),
            None => self.memoizer.key_for(&self.identity, args).map(Some),
        }
    }

    /// Calls the wrapped function through the cache.
    ///
    /// # Errors
    ///
    /// See [`Memoizer::get_or_compute`].
    pub fn call(&self, args: &A) -> Result<R> {
        let key = self.key(args)?;
        self.memoizer
            .get_or_compute(key.as_deref(), || (self.func)(args))
    }

    #[must_use]
    pub fn memoizer(&self) -> &Memoizer {
        &self.memoizer
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use anystore_core::clock::ManualClock;
    use anystore_core::error::ErrorKind;
    use anystore_core::key::KeyFilter;
    use anystore_core::value::Value;

    use super::*;
    use crate::backend::fs::FsBackend;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::{Backend, BackendKind, BackendStat, KeyStream};
    use crate::config::StoreConfig;

    fn memoizer() -> (Memoizer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let backend = Arc::new(MemoryBackend::with_clock(clock.clone()));
        let store = Store::from_backend(backend, StoreConfig::with_uri("memory://"), clock.clone()).unwrap();
        (Memoizer::new(Arc::new(store)), clock)
    }

    #[test]
    fn second_call_is_a_hit() {
        let (memo, _) = memoizer();
        let calls = AtomicUsize::new(0);
        let square = memo.wrap("square", |x: &i64| {
            calls.fetch_add(1, Ordering::SeqCst);
            x * x
        });
        assert_eq!(square.call(&4).unwrap(), 16);
        assert_eq!(square.call(&4).unwrap(), 16);
        assert_eq!(square.call(&5).unwrap(), 25);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(memo.stats(), CacheStats { hits: 1, misses: 2 });
    }

    #[test]
    fn identity_is_part_of_the_key() {
        let (memo, _) = memoizer();
        let a = memo.call("double", &3, |x| x * 2).unwrap();
        let b = memo.call("triple", &3, |x| x * 3).unwrap();
        assert_eq!((a, b), (6, 9));
        assert_ne!(memo.key_for("double", &3).unwrap(), memo.key_for("triple", &3).unwrap());
    }

    #[test]
    fn ttl_expiry_recomputes() {
        let (memo, clock) = memoizer();
        let memo = memo.with_ttl(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        let f = memo.wrap("now", |_: &()| calls.fetch_add(1, Ordering::SeqCst));
        assert_eq!(f.call(&()).unwrap(), 0);
        clock.advance(Duration::from_secs(30));
        assert_eq!(f.call(&()).unwrap(), 0);
        clock.advance(Duration::from_secs(31));
        assert_eq!(f.call(&()).unwrap(), 1);
    }

    #[test]
    fn ttl_expiry_recomputes_on_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000_000));
        let backend = Arc::new(FsBackend::new("fs", dir.path()).unwrap());
        let store = Store::from_backend(backend, StoreConfig::default(), clock.clone()).unwrap();
        let memo = Memoizer::new(Arc::new(store)).with_ttl(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        let f = memo.wrap("greeting", |name: &String| {
            calls.fetch_add(1, Ordering::SeqCst);
            format!("hello {name}")
        });
        let name = "ada".to_string();

        assert_eq!(f.call(&name).unwrap(), "hello ada");
        let key = f.key(&name).unwrap().unwrap();
        let on_disk = std::fs::read(dir.path().join(&key)).unwrap();
        assert!(on_disk.starts_with(crate::store::EXPIRY_MAGIC));

        clock.advance(Duration::from_secs(30));
        assert_eq!(f.call(&name).unwrap(), "hello ada");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(memo.stats().hits, 1);

        clock.advance(Duration::from_secs(31));
        assert_eq!(f.call(&name).unwrap(), "hello ada");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn absent_results_follow_negative_cache_mode() {
        let (memo, _) = memoizer();
        let calls = AtomicUsize::new(0);
        let lookup = |_: &str| -> Option<String> {
            calls.fetch_add(1, Ordering::SeqCst);
            None
        };
        for _ in 0..2 {
            assert_eq!(memo.call("lookup", "x", lookup).unwrap(), None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let negative = memo.clone().cache_none(true);
        for _ in 0..2 {
            assert_eq!(negative.call("lookup", "y", lookup).unwrap(), None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn custom_key_fn_is_used_verbatim() {
        let (memo, _) = memoizer();
        let f = memo
            .wrap("len", |s: &String| s.len())
            .with_key_fn(|s| (!s.is_empty()).then(|| format!("len/{s}")));
        assert_eq!(f.call(&"abc".to_string()).unwrap(), 3);
        assert_eq!(memo.store().get("len/abc").unwrap(), Value::from(3));
        assert_eq!(f.call(&String::new()).unwrap(), 0);
        assert_eq!(memo.stats().misses, 1);
    }

    #[test]
    fn undecodable_entry_degrades_to_miss() {
        let (memo, _) = memoizer();
        let key = memo.key_for("f", &1).unwrap();
        memo.store().put(&key, "not a number").unwrap();
        assert_eq!(memo.call("f", &1, |x| x + 1).unwrap(), 2);
        assert_eq!(memo.call("f", &1, |_| 0).unwrap(), 2);
    }

    #[test]
    fn fallible_functions_are_not_cached_on_error() {
        #[derive(Debug)]
        enum AppError {
            Store,
            Upstream,
        }
        impl From<StoreError> for AppError {
            fn from(_: StoreError) -> Self {
                Self::Store
            }
        }
        let (memo, _) = memoizer();
        let res: std::result::Result<i32, AppError> = memo.try_get_or_compute(Some("k"), || Err(AppError::Upstream));
        assert!(matches!(res, Err(AppError::Upstream)));
        assert!(!matches!(res, Err(AppError::Store)));
        assert!(!memo.store().exists("k").unwrap());
        let res: std::result::Result<i32, AppError> = memo.try_get_or_compute(Some("k"), || Ok(1));
        assert_eq!(res.unwrap(), 1);
        assert!(memo.store().exists("k").unwrap());
    }

    /// Backend whose every call fails with a fixed error.
    struct Failing(fn() -> StoreError);

    impl Backend for Failing {
        fn kind(&self) -> BackendKind {
            BackendKind::Memory
        }
        fn uri(&self) -> &str {
            "failing://"
        }
        fn exists(&self, _key: &str) -> Result<bool> {
            Err((self.0)())
        }
        fn read(&self, _key: &str) -> Result<Vec<u8>> {
            Err((self.0)())
        }
        fn write(&self, _key: &str, _data: &[u8], _ttl: Option<Duration>) -> Result<()> {
            Err((self.0)())
        }
        fn delete(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Err((self.0)())
        }
        fn list_keys(&self, _filter: &KeyFilter) -> Result<KeyStream> {
            Err((self.0)())
        }
        fn stat(&self, _key: &str) -> Result<Option<BackendStat>> {
            Err((self.0)())
        }
    }

    fn failing(error: fn() -> StoreError) -> Memoizer {
        let store = Store::from_backend(
            Arc::new(Failing(error)),
            StoreConfig::with_uri("failing://"),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();
        Memoizer::new(Arc::new(store))
    }

    #[test]
    fn transient_lookup_errors_degrade_but_write_back_propagates() {
        let memo = failing(|| StoreError::backend("memory", anyhow::anyhow!("connection reset")));
        let err = memo.call("f", &1, |x| x + 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert_eq!(memo.stats().misses, 1);
    }

    #[test]
    fn fatal_lookup_errors_propagate() {
        let memo = failing(|| StoreError::NotSupported {
            operation: "read",
            backend: "memory",
        });
        let calls = AtomicUsize::new(0);
        let err = memo
            .call("f", &1, |x| {
                calls.fetch_add(1, Ordering::SeqCst);
                x + 1
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
