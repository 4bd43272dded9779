//! # Models

pub mod dilated_resnet;
