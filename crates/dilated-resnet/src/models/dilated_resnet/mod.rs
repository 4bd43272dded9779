//! # Dilated `ResNet-50`
//!
//! A `ResNet-50` feature extractor whose late stages trade stride for
//! dilation, keeping spatial resolution for dense prediction.
//!
//! With the default output stride of 8:
//!
//! | stage | blocks | planes | stride | dilation |
//! |-------|--------|--------|--------|----------|
//! | 1     | stem   | 64     | 4      | 1        |
//! | 2     | 3      | 256    | 1      | 1        |
//! | 3     | 4      | 512    | 2      | 1        |
//! | 4     | 6      | 1024   | 1      | 2        |
//! | 5     | 3      | 2048   | 1      | 4        |
//!
//! See [`model::DilatedResNetContractConfig`] for the high-level config,
//! and [`prefabs::PREFAB_DILATED_RESNET_MAP`] for well-known configs.
//!
//! Weights load from Keras ``.h5`` archives ([`keras_weights`]) or
//! ``torch`` files ([`pytorch_stubs`]); [`DilatedResNet::load_weights_file`]
//! picks the reader by file extension.

pub mod bottleneck;
pub mod keras_weights;
pub mod model;
pub mod naming;
pub mod prefabs;
pub mod pytorch_stubs;
pub mod shortcut;
pub mod stage;
pub mod stem;
pub mod util;

pub use model::*;
pub use prefabs::PREFAB_DILATED_RESNET_MAP;
