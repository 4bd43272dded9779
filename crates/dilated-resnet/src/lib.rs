#![warn(missing_docs)]
//!# dilated-resnet - Dilated `ResNet` Feature Extractors for Burn
//!
//! ## Notable Components
//!
//! * [`cache`] - weight download cache and well-known prefabs.
//! * [`compat`] - conv shape arithmetic not (yet) provided by ``burn``.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::blocks::conv_norm`] - ``Conv2d + BatchNorm2d`` block.
//!   * [`layers::pool`] - Keras ``'same'`` max pooling.
//! * [`models`] - complete models.
//!   * [`models::dilated_resnet`] - the dilated `ResNet-50` feature extractor.
//! * [`utility`] - record inspection.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod cache;
pub mod compat;
pub mod layers;
pub mod models;
pub mod utility;
