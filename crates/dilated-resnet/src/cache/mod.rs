//! # Module / Weight Caches
//!
//! * [`disk`] - the on-disk download cache.
//! * [`digest`] - md5 / sha256 file digests for downloaded weights.
//! * [`weights`] - pretrained weights descriptors.
//! * [`prefabs`] - well-known model configs, and the weights published for them.

pub mod digest;
pub mod disk;
pub mod prefabs;
pub mod weights;
