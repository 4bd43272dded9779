//! # File Digests
//!
//! Published weights carry a digest as ``{algorithm}:{hex}``:
//!
//! * ``md5:f64f049c92468c9affcd44b0976cdafe`` - a full md5 digest.
//! * ``sha256:0676ba61`` - a sha256 prefix, as embedded in torchvision file names.
//!
//! A digest matches when the file's hex digest starts with the given hex.

use anyhow::{Context, bail};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::Path;

/// The shortest accepted hex digest prefix.
pub const MIN_DIGEST_HEX_LEN: usize = 8;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// RSA md5.
    Md5,

    /// SHA-2 256.
    Sha256,
}

/// A parsed ``{algorithm}:{hex}`` digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    /// The hash algorithm.
    pub algorithm: DigestAlgorithm,

    /// Lower-case hex digest, or a prefix of one.
    pub hex: String,
}

impl FileDigest {
    /// Parse a ``{algorithm}:{hex}`` digest.
    pub fn parse(digest: &str) -> anyhow::Result<Self> {
        let (algorithm, hex) = digest
            .split_once(':')
            .with_context(|| format!("digest is not {{algorithm}}:{{hex}}: {digest:?}"))?;

        let algorithm = match algorithm {
            "md5" => DigestAlgorithm::Md5,
            "sha256" => DigestAlgorithm::Sha256,
            _ => bail!("unsupported digest algorithm: {algorithm:?}"),
        };

        let hex = hex.to_ascii_lowercase();
        if hex.len() < MIN_DIGEST_HEX_LEN || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("digest needs at least {MIN_DIGEST_HEX_LEN} hex digits: {digest:?}");
        }

        Ok(Self { algorithm, hex })
    }

    /// Hash a file with this digest's algorithm.
    ///
    /// # Returns
    ///
    /// The full lower-case hex digest.
    pub fn hash_file(
        &self,
        path: &Path,
    ) -> anyhow::Result<String> {
        match self.algorithm {
            DigestAlgorithm::Md5 => hash_file::<Md5>(path),
            DigestAlgorithm::Sha256 => hash_file::<Sha256>(path),
        }
    }

    /// Does the file at `path` match this digest?
    pub fn matches_file(
        &self,
        path: &Path,
    ) -> anyhow::Result<bool> {
        Ok(self.hash_file(path)?.starts_with(&self.hex))
    }
}

fn hash_file<D: Digest + std::io::Write>(path: &Path) -> anyhow::Result<String> {
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = D::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

/// Check a file against an optional ``{algorithm}:{hex}`` digest.
///
/// `None` always passes.
pub fn verify_file_digest(
    path: &Path,
    digest: Option<&str>,
) -> anyhow::Result<bool> {
    match digest {
        None => Ok(true),
        Some(digest) => FileDigest::parse(digest)?.matches_file(path),
    }
}
