//! # Pretrained Weights Descriptors

use crate::cache::disk::DiskCacheConfig;
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

const X25: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_IBM_SDLC);

/// Returns a local path to a weights file, downloading it into the default cache.
pub fn fetch_model_weights<S: AsRef<str>>(url: S) -> anyhow::Result<PathBuf> {
    let cache_key = url_to_cache_key(Some("model"), url.as_ref());
    let resource = pretrained_weights_resource_key(&cache_key);

    let disk_cache = DiskCacheConfig::default();
    disk_cache.fetch_resource(url.as_ref(), &resource, None)
}

/// Build a cache key (bare cache file name) from a name and URL.
///
/// The key is ``{name}-{url crc}-{url basename}``, or ``{url crc}-{url basename}``.
pub fn url_to_cache_key(
    name: Option<&str>,
    url: &str,
) -> String {
    let hash = X25.checksum(url.as_bytes()).to_string();
    let base_name = url.rsplit_once('/').map_or(url, |(_, base)| base);
    match name {
        Some(n) => format!("{n}-{hash}-{base_name}"),
        None => format!("{hash}-{base_name}"),
    }
}

/// Get the cache resource key for a pretrained weights file.
pub fn pretrained_weights_resource_key(cache_key: &str) -> Vec<String> {
    vec!["weights".to_string(), cache_key.to_string()]
}

/// Static [`PretrainedWeightsDescriptor`] provider.
#[derive(Debug)]
pub struct StaticPretrainedWeightsDescriptor<'a> {
    /// Name of the weights.
    pub name: &'a str,

    /// Description of the weights.
    pub description: &'a str,

    /// License.
    pub license: Option<&'a str>,

    /// Source URL.
    pub origin: Option<&'a str>,

    /// URLs to download the weights from; the first is used.
    pub urls: &'a [&'a str],

    /// ``{algorithm}:{hex}`` digest of the file; see [`crate::cache::digest`].
    pub digest: Option<&'a str>,
}

impl StaticPretrainedWeightsDescriptor<'_> {
    /// Convert to a [`PretrainedWeightsDescriptor`].
    pub fn to_descriptor(&self) -> PretrainedWeightsDescriptor {
        PretrainedWeightsDescriptor {
            name: self.name.to_string(),
            description: self.description.to_string(),
            license: self.license.map(|s| s.to_string()),
            origin: self.origin.map(|s| s.to_string()),
            urls: self.urls.iter().map(|s| s.to_string()).collect(),
            digest: self.digest.map(|s| s.to_string()),
        }
    }
}

impl From<&StaticPretrainedWeightsDescriptor<'_>> for PretrainedWeightsDescriptor {
    fn from(descriptor: &StaticPretrainedWeightsDescriptor) -> Self {
        descriptor.to_descriptor()
    }
}

/// A descriptor for a pretrained weights file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PretrainedWeightsDescriptor {
    /// Name of the weights.
    pub name: String,

    /// Description of the weights.
    pub description: String,

    /// License.
    pub license: Option<String>,

    /// Source URL.
    pub origin: Option<String>,

    /// URLs to download the weights from; the first is used.
    pub urls: Vec<String>,

    /// ``{algorithm}:{hex}`` digest of the file; see [`crate::cache::digest`].
    #[serde(default)]
    pub digest: Option<String>,
}

impl PretrainedWeightsDescriptor {
    /// The download URL.
    pub fn url(&self) -> anyhow::Result<&str> {
        self.urls
            .first()
            .map(String::as_str)
            .with_context(|| format!("weights {:?} have no urls", self.name))
    }

    /// Cache Key
    ///
    /// The key is ``{name}-{url crc}-{url basename}``.
    pub fn cache_key(&self) -> anyhow::Result<String> {
        Ok(url_to_cache_key(Some(&self.name), self.url()?))
    }

    /// Read-Through Cache the Weights
    ///
    /// Cached and downloaded files are checked against the digest, when one is set.
    ///
    /// # Returns
    ///
    /// The disk location of the cached weights.
    pub fn fetch_weights(
        &self,
        disk_cache: &DiskCacheConfig,
    ) -> anyhow::Result<PathBuf> {
        let url = self.url()?;
        let resource = pretrained_weights_resource_key(&self.cache_key()?);

        disk_cache.fetch_resource(url, &resource, self.digest.as_deref())
    }
}

/// Static [`PretrainedWeightsMap`] builder.
#[derive(Debug)]
pub struct StaticPretrainedWeightsMap<'a> {
    /// List of static descriptors.
    pub items: &'a [&'a StaticPretrainedWeightsDescriptor<'a>],
}

impl StaticPretrainedWeightsMap<'_> {
    /// Convert to a [`PretrainedWeightsMap`].
    pub fn to_map(&self) -> PretrainedWeightsMap {
        PretrainedWeightsMap {
            items: self
                .items
                .iter()
                .map(|d| {
                    let desc = d.to_descriptor();
                    (desc.name.clone(), desc)
                })
                .collect(),
        }
    }
}

impl From<&StaticPretrainedWeightsMap<'_>> for PretrainedWeightsMap {
    fn from(map: &StaticPretrainedWeightsMap) -> Self {
        map.to_map()
    }
}

/// Map of [`PretrainedWeightsDescriptor`]s, by name.
#[derive(Debug, Clone, Default)]
pub struct PretrainedWeightsMap {
    /// Map of descriptors.
    pub items: BTreeMap<String, PretrainedWeightsDescriptor>,
}

impl PretrainedWeightsMap {
    /// Lookup a descriptor by name.
    pub fn lookup_by_name(
        &self,
        name: &str,
    ) -> Option<PretrainedWeightsDescriptor> {
        self.items.get(name).cloned()
    }

    /// Lookup a descriptor.
    pub fn try_lookup_by_name(
        &self,
        name: &str,
    ) -> anyhow::Result<PretrainedWeightsDescriptor> {
        match self.lookup_by_name(name) {
            Some(d) => Ok(d),
            None => bail!(
                "weights not found: {name:?}; known: {:?}",
                self.items.keys().collect::<Vec<_>>()
            ),
        }
    }

    /// Lookup a descriptor.
    pub fn expect_lookup_by_name(
        &self,
        name: &str,
    ) -> PretrainedWeightsDescriptor {
        match self.try_lookup_by_name(name) {
            Ok(p) => p,
            Err(e) => panic!("{}", e),
        }
    }
}
