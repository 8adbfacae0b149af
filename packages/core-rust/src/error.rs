//! Error taxonomy shared by every store backend.
//!
//! All fallible operations return [`StoreError`]. Callers discriminate on the
//! variant (or on [`StoreError::kind`]) rather than on message text.

use std::fmt;

/// Convenience alias used across both crates.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors returned by stores, drivers and the serializer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A read-class operation addressed a key that is absent (or expired).
    #[error("key does not exist: `{key}`")]
    DoesNotExist { key: String },
    /// The connection string names a scheme no driver handles.
    #[error("unsupported backend `{scheme}`: {reason}")]
    UnsupportedBackend { scheme: String, reason: String },
    /// The operation is not valid for this backend (e.g. write over HTTP).
    #[error("operation `{operation}` is not supported by the {backend} backend")]
    NotSupported {
        operation: &'static str,
        backend: &'static str,
    },
    /// The store was configured read-only and a write-class operation was attempted.
    #[error("store `{uri}` is configured readonly")]
    ReadOnly { uri: String },
    /// The key is empty or escapes the store root.
    #[error("invalid key `{key}`: {reason}")]
    InvalidKey { key: String, reason: &'static str },
    /// The connection string could not be parsed at all.
    #[error("invalid uri `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },
    /// Encoding or decoding failed under the active mode.
    #[error("serialization failed ({mode}): {message}")]
    Serialization { mode: &'static str, message: String },
    /// Transport or driver failure (I/O, network, auth, SQL, ...).
    #[error("{backend} backend error: {source}")]
    Backend {
        backend: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Field-less discriminant of [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DoesNotExist,
    UnsupportedBackend,
    NotSupported,
    ReadOnly,
    InvalidKey,
    InvalidUri,
    Serialization,
    Backend,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DoesNotExist => "DoesNotExist",
            Self::UnsupportedBackend => "UnsupportedBackend",
            Self::NotSupported => "NotSupported",
            Self::ReadOnly => "ReadOnly",
            Self::InvalidKey => "InvalidKey",
            Self::InvalidUri => "InvalidUri",
            Self::Serialization => "SerializationError",
            Self::Backend => "BackendError",
        };
        f.write_str(name)
    }
}

impl StoreError {
    /// Builds a [`StoreError::DoesNotExist`] for `key`.
    pub fn does_not_exist(key: impl Into<String>) -> Self {
        Self::DoesNotExist { key: key.into() }
    }

    /// Builds a [`StoreError::Serialization`] from any displayable cause.
    pub fn serialization(mode: &'static str, message: impl fmt::Display) -> Self {
        Self::Serialization {
            mode,
            message: message.to_string(),
        }
    }

    /// Wraps a driver-level failure.
    pub fn backend(backend: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Backend {
            backend,
            source: source.into(),
        }
    }

    /// Returns the discriminant of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DoesNotExist { .. } => ErrorKind::DoesNotExist,
            Self::UnsupportedBackend { .. } => ErrorKind::UnsupportedBackend,
            Self::NotSupported { .. } => ErrorKind::NotSupported,
            Self::ReadOnly { .. } => ErrorKind::ReadOnly,
            Self::InvalidKey { .. } => ErrorKind::InvalidKey,
            Self::InvalidUri { .. } => ErrorKind::InvalidUri,
            Self::Serialization { .. } => ErrorKind::Serialization,
            Self::Backend { .. } => ErrorKind::Backend,
        }
    }

    /// `true` for errors that cannot be fixed by retrying the same call
    /// against the same store (configuration or capability problems).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotSupported
                | ErrorKind::UnsupportedBackend
                | ErrorKind::ReadOnly
                | ErrorKind::InvalidKey
                | ErrorKind::InvalidUri
        )
    }

    /// `true` if this is [`StoreError::DoesNotExist`].
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::DoesNotExist { .. })
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::backend("io", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(StoreError::does_not_exist("a").kind(), ErrorKind::DoesNotExist);
        assert_eq!(
            StoreError::serialization("json", "boom").kind(),
            ErrorKind::Serialization
        );
        let io = std::io::Error::other("disk on fire");
        assert_eq!(StoreError::from(io).kind(), ErrorKind::Backend);
    }

    #[test]
    fn fatal_errors_are_capability_errors() {
        let not_supported = StoreError::NotSupported {
            operation: "write",
            backend: "http",
        };
        assert!(not_supported.is_fatal());
        assert!(!StoreError::does_not_exist("k").is_fatal());
        assert!(!StoreError::backend("redis", anyhow::anyhow!("timeout")).is_fatal());
    }

    #[test]
    fn messages_name_the_key() {
        let err = StoreError::does_not_exist("topic/a");
        assert_eq!(err.to_string(), "key does not exist: `topic/a`");
        assert_eq!(ErrorKind::Serialization.to_string(), "SerializationError");
    }
}
