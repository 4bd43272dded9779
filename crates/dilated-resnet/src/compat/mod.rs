//! # Compat
//!
//! Shape arithmetic which is not (yet) provided by ``burn``.

pub mod conv_shape;
