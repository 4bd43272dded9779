//! # Cache Policy

use crate::cache::digest::verify_file_digest;
use anyhow::{Context, bail};
use burn::config::Config;
use burn::data::network::downloader;
use std::fs::{File, remove_file};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Cache Policy
#[derive(Config, Debug)]
pub struct DiskCacheConfig {
    /// Key for the root cache directory.
    #[config(default = "\"dilated-resnet\".to_string()")]
    pub root_cache_key: String,

    /// Overrides ``~/.cache`` as the parent of the root cache directory.
    #[config(default = "None")]
    pub cache_dir: Option<String>,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskCacheConfig {
    /// Fetch the base cache directory.
    ///
    /// If the cache directory does not exist, does not create it.
    pub fn base_cache_dir(&self) -> anyhow::Result<PathBuf> {
        let parent = match &self.cache_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .context("no home directory for the weights cache")?
                .join(".cache"),
        };
        Ok(parent.join(&self.root_cache_key))
    }

    /// Fetch the base cache directory.
    ///
    /// If the cache directory does not exist, creates it.
    pub fn ensure_base_cache_dir(&self) -> anyhow::Result<PathBuf> {
        let dir = self.base_cache_dir()?;
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }

    /// Map a resource key to a cache path.
    ///
    /// Does not ensure that the path (or any of the parents) exist.
    pub fn resource_to_path(
        &self,
        resource_key: &[String],
    ) -> anyhow::Result<PathBuf> {
        let path = self.base_cache_dir()?;
        Ok(resource_key.iter().fold(path, |acc, s| acc.join(s)))
    }

    /// Map a resource key to a cache path and ensure the parent directory exists.
    pub fn ensure_resource_parent_dir(
        &self,
        resource_key: &[String],
    ) -> anyhow::Result<PathBuf> {
        let path = self.resource_to_path(resource_key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    /// Fetch a Resource to the Cache.
    ///
    /// # Arguments
    ///
    /// - `url`: the download URL.
    /// - `resource`: the resource key of the cache file.
    /// - `digest`: an optional ``{algorithm}:{hex}`` digest; see [`crate::cache::digest`].
    pub fn fetch_resource(
        &self,
        url: &str,
        resource: &[String],
        digest: Option<&str>,
    ) -> anyhow::Result<PathBuf> {
        let cache_file_path = self.ensure_resource_parent_dir(resource)?;
        try_cache_download_to_path(url, cache_file_path, digest)
    }
}

/// Check a cached file.
///
/// A cached file which does not match `digest` is removed.
///
/// # Returns
///
/// `Some(path)` for a usable cache hit; `None` when the file must be fetched.
pub fn check_cached(
    cache_file_path: &Path,
    digest: Option<&str>,
) -> anyhow::Result<Option<PathBuf>> {
    if !cache_file_path.exists() {
        return Ok(None);
    }
    if verify_file_digest(cache_file_path, digest)? {
        tracing::debug!(path = %cache_file_path.display(), "weights cache hit");
        return Ok(Some(cache_file_path.to_path_buf()));
    }

    tracing::warn!(
        path = %cache_file_path.display(),
        ?digest,
        "cached weights fail their digest; removing"
    );
    remove_file(cache_file_path)
        .with_context(|| format!("removing {}", cache_file_path.display()))?;
    Ok(None)
}

/// Download a URL resource to a given path.
///
/// If the path already exists and matches `digest`, does nothing.
///
/// # Returns
///
/// The cache path.
pub fn try_cache_download_to_path(
    url: &str,
    cache_file_path: PathBuf,
    digest: Option<&str>,
) -> anyhow::Result<PathBuf> {
    if let Some(path) = check_cached(&cache_file_path, digest)? {
        return Ok(path);
    }

    let file_name = match cache_file_path.file_name() {
        Some(name) => name.to_string_lossy().to_string(),
        None => bail!("cache path has no file name: {}", cache_file_path.display()),
    };

    tracing::info!(url, path = %cache_file_path.display(), "downloading weights");
    let bytes = downloader::download_file_as_bytes(url, &file_name);

    let mut output_file = File::create(&cache_file_path)
        .with_context(|| format!("creating {}", cache_file_path.display()))?;
    if let Err(err) = output_file.write_all(&bytes) {
        remove_file(&cache_file_path)?;
        return Err(err).context("failed to write the whole weights file");
    }
    drop(output_file);

    if !verify_file_digest(&cache_file_path, digest)? {
        remove_file(&cache_file_path)?;
        bail!(
            "downloaded {url} does not match digest {}",
            digest.unwrap_or_default()
        );
    }

    Ok(cache_file_path)
}
