//! Pooling layers.
mod max_pool_2d_same;

pub use max_pool_2d_same::*;
