//! Content checksums and call-signature keys.
//!
//! [`checksum`] streams any reader through SHA-256 or BLAKE3 and returns the
//! hex digest; stores use it for `checksum(key)`. [`signature_key`] derives a
//! memoization key from a function identity plus its serialized arguments.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};

/// Read buffer size for streaming checksums.
const CHUNK_SIZE: usize = 64 * 1024;

/// Supported content hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    /// SHA-256 (default).
    #[default]
    Sha256,
    /// BLAKE3.
    Blake3,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        })
    }
}

impl FromStr for HashAlgorithm {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(StoreError::serialization(
                "raw",
                format!("unknown hash algorithm `{other}`"),
            )),
        }
    }
}

/// Computes the hex digest of everything `reader` yields.
///
/// # Examples
///
/// ```
/// use anystore_core::hash::{checksum, HashAlgorithm};
///
/// let digest = checksum(&b"hello"[..], HashAlgorithm::Sha256).unwrap();
/// assert_eq!(
///     digest,
///     "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
/// );
/// ```
///
/// # Errors
///
/// Propagates read failures as [`StoreError::Backend`].
pub fn checksum(mut reader: impl Read, algorithm: HashAlgorithm) -> Result<String> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
        HashAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hasher.finalize().to_hex().to_string())
        }
    }
}

/// Derives a stable key for a call of `identity` with `args`.
///
/// The arguments are serialized to JSON (map keys in `BTreeMap`s and structs
/// come out in a fixed order) and hashed together with the identity using
/// BLAKE3. Equal identities with equal arguments always produce equal keys.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if `args` cannot be serialized.
pub fn signature_key<A: Serialize + ?Sized>(identity: &str, args: &A) -> Result<String> {
    let encoded = serde_json::to_vec(args)
        .or_else(|_| rmp_serde::to_vec_named(args))
        .map_err(|e| StoreError::serialization("json", e))?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(identity.as_bytes());
    hasher.update(&[0]);
    hasher.update(&encoded);
    Ok(hasher.finalize().to_hex().to_string())
}
