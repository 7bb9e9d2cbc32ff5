//! Checksum descriptors and local revision comparison
//!
//! BIG-IP reports file checksums as colon-delimited descriptors such as
//! `SHA1:62:7b502c3a1f48c8609ae212cdfb639dee39673f5e` (algorithm, size, digest).
//! This module parses those descriptors and decides whether a local file holds
//! the same content as the remote record.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use sha1::Sha1;
use sha2::digest::DynDigest;
use sha2::{Sha256, Sha512};
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::{Result, SyncError};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Parsed form of a remote checksum descriptor
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChecksumDescriptor {
    /// Digest algorithm name as written remotely (may be empty)
    pub algorithm: String,
    /// Middle segments joined with `:`, empty when absent
    pub options: String,
    /// Hex encoded digest
    pub digest: String,
}

impl ChecksumDescriptor {
    /// Split a descriptor on `:`
    ///
    /// One segment is a bare digest, two are `algorithm:digest`, three or more
    /// are `algorithm:options...:digest` with the middle segments kept joined.
    pub fn parse(descriptor: &str) -> Self {
        let segments: Vec<&str> = descriptor.split(':').collect();
        match segments.as_slice() {
            [] => Self::default(),
            [digest] => Self {
                digest: digest.to_string(),
                ..Self::default()
            },
            [algorithm, digest] => Self {
                algorithm: algorithm.to_string(),
                options: String::new(),
                digest: digest.to_string(),
            },
            [algorithm, middle @ .., digest] => Self {
                algorithm: algorithm.to_string(),
                options: middle.join(":"),
                digest: digest.to_string(),
            },
        }
    }
}

/// Digest functions that remote checksums can be verified with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }

    fn hasher(&self) -> Box<dyn DynDigest + Send> {
        match self {
            ChecksumAlgorithm::Md5 => Box::new(Md5::default()),
            ChecksumAlgorithm::Sha1 => Box::new(Sha1::default()),
            ChecksumAlgorithm::Sha256 => Box::new(Sha256::default()),
            ChecksumAlgorithm::Sha512 => Box::new(Sha512::default()),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha1" => Ok(ChecksumAlgorithm::Sha1),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the lower-case hex digest of a file, streaming its content
pub async fn file_digest(algorithm: ChecksumAlgorithm, path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| SyncError::io(path, e))?;

    let mut hasher = algorithm.hasher();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .await
            .map_err(|e| SyncError::io(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Check whether the local file at `path` matches the remote `descriptor`
///
/// Returns `Ok(true)` when the digests are identical. An algorithm outside
/// md5/sha1/sha256/sha512 (including a descriptor without any algorithm) is an
/// error rather than a mismatch.
pub async fn same_revision(descriptor: &str, path: &Path) -> Result<bool> {
    let parsed = ChecksumDescriptor::parse(descriptor);

    let algorithm: ChecksumAlgorithm =
        parsed
            .algorithm
            .parse()
            .map_err(|_| SyncError::UnsupportedAlgorithm {
                algorithm: parsed.algorithm.clone(),
                path: path.to_path_buf(),
            })?;

    let local = file_digest(algorithm, path).await?;
    let same = local == parsed.digest;

    debug!(
        "{} digest of {}: local {} remote {} ({})",
        algorithm,
        path.display(),
        local,
        parsed.digest,
        if same { "same" } else { "changed" }
    );

    Ok(same)
}
