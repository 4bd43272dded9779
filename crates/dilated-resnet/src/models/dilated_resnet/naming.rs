//! # Keras Layer Naming
//!
//! The published ResNet-50 weights name every layer after its stage and block:
//!
//! ```text
//! conv1 / bn_conv1                                stem
//! res{stage}{block}_branch2{a,b,c}                bottleneck convolutions
//! bn{stage}{block}_branch2{a,b,c}                 bottleneck norms
//! res{stage}{block}_branch1 / bn{stage}{block}_branch1   projection shortcut
//! ```
//!
//! Stages are numbered from 2 (stage 1 is the stem); blocks are lettered from `a`.

use std::fmt::{Display, Formatter};

/// Stem convolution name.
pub const STEM_CONV_NAME: &str = "conv1";

/// Stem norm name.
pub const STEM_NORM_NAME: &str = "bn_conv1";

/// The first residual stage number.
pub const FIRST_RESIDUAL_STAGE: usize = 2;

/// The most blocks a stage can hold; blocks are lettered ``a..=z``.
pub const MAX_STAGE_DEPTH: usize = 26;

/// The branches of a bottleneck block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    /// The 1x1 reduction conv.
    B2a,

    /// The spatial (possibly dilated) conv.
    B2b,

    /// The 1x1 expansion conv.
    B2c,

    /// The projection shortcut.
    B1,
}

impl Branch {
    /// The residual path branches, in forward order.
    pub const RESIDUAL: [Branch; 3] = [Branch::B2a, Branch::B2b, Branch::B2c];

    /// The name suffix of the branch.
    pub fn suffix(&self) -> &'static str {
        match self {
            Branch::B2a => "2a",
            Branch::B2b => "2b",
            Branch::B2c => "2c",
            Branch::B1 => "1",
        }
    }

    /// The field name of the branch in [`super::bottleneck::BottleneckBlock`].
    pub fn module_field(&self) -> &'static str {
        match self {
            Branch::B2a => "branch2a",
            Branch::B2b => "branch2b",
            Branch::B2c => "branch2c",
            Branch::B1 => "shortcut.conv_norm",
        }
    }
}

impl Display for Branch {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "branch{}", self.suffix())
    }
}

/// The letter of the block at `index` within a stage.
///
/// # Panics
///
/// If `index >= MAX_STAGE_DEPTH`.
pub fn block_letter(index: usize) -> char {
    assert!(
        index < MAX_STAGE_DEPTH,
        "block index out of letter range: {index}"
    );
    (b'a' + index as u8) as char
}

/// Names of the layers of one residual block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNames {
    /// Stage number; ``2..=5`` for `ResNet-50`.
    pub stage: usize,

    /// Block index within the stage.
    pub block_index: usize,
}

impl BlockNames {
    /// Create the names for block `block_index` of `stage`.
    pub fn new(
        stage: usize,
        block_index: usize,
    ) -> Self {
        Self { stage, block_index }
    }

    /// ``{stage}{letter}``; e.g. ``4b``.
    pub fn prefix(&self) -> String {
        format!("{}{}", self.stage, block_letter(self.block_index))
    }

    /// The convolution name of a branch; e.g. ``res4b_branch2b``.
    pub fn conv(
        &self,
        branch: Branch,
    ) -> String {
        format!("res{}_{}", self.prefix(), branch)
    }

    /// The norm name of a branch; e.g. ``bn4b_branch2b``.
    pub fn norm(
        &self,
        branch: Branch,
    ) -> String {
        format!("bn{}_{}", self.prefix(), branch)
    }
}

/// A named layer: Keras name and the module path of the matching burn module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerName {
    /// The Keras layer name.
    pub keras_name: String,

    /// The module path in the burn module tree.
    pub module_path: String,
}

impl LayerName {
    /// Build a layer name pair.
    pub fn new(
        keras_name: impl Into<String>,
        module_path: impl Into<String>,
    ) -> Self {
        Self {
            keras_name: keras_name.into(),
            module_path: module_path.into(),
        }
    }
}

/// Names for the stem conv/norm pair.
pub fn stem_layer_names() -> Vec<LayerName> {
    vec![
        LayerName::new(STEM_CONV_NAME, "stem.conv_norm.conv"),
        LayerName::new(STEM_NORM_NAME, "stem.conv_norm.norm"),
    ]
}

/// Names for every conv/norm pair of a block.
///
/// # Arguments
///
/// - `stage_index`: zero-based index into the model's stages.
/// - `block_index`: zero-based index into the stage's blocks.
/// - `has_shortcut`: does the block carry a projection shortcut?
pub fn block_layer_names(
    stage_index: usize,
    block_index: usize,
    has_shortcut: bool,
) -> Vec<LayerName> {
    let names = BlockNames::new(stage_index + FIRST_RESIDUAL_STAGE, block_index);
    let base = format!("stages.{stage_index}.blocks.{block_index}");

    let mut branches = Branch::RESIDUAL.to_vec();
    if has_shortcut {
        branches.push(Branch::B1);
    }

    branches
        .into_iter()
        .flat_map(|branch| {
            let field = branch.module_field();
            [
                LayerName::new(names.conv(branch), format!("{base}.{field}.conv")),
                LayerName::new(names.norm(branch), format!("{base}.{field}.norm")),
            ]
        })
        .collect()
}
