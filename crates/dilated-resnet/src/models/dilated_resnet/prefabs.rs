//! # Pretrained Dilated `ResNet` Models and Configs
//!
//! Prefabs are addressed as ``{prefab}`` or ``{prefab}.{weights}``,
//! for example ``dilated_resnet50_tv.tv_in1k``.

use crate::cache::disk::DiskCacheConfig;
use crate::cache::prefabs::{PreFabConfig, StaticPreFabConfig, StaticPreFabMap};
use crate::cache::weights::{StaticPretrainedWeightsDescriptor, StaticPretrainedWeightsMap};
use crate::models::dilated_resnet::model::{
    DilatedResNet, DilatedResNetConfig, DilatedResNetContractConfig,
};
use anyhow::Context;
use burn::prelude::Backend;
use std::sync::Arc;

impl PreFabConfig<DilatedResNetContractConfig> {
    /// Convert to a prefab for [`DilatedResNetConfig`].
    pub fn to_structure_prefab(&self) -> PreFabConfig<DilatedResNetConfig> {
        let builder = self.builder.clone();
        PreFabConfig {
            name: self.name.clone(),
            description: self.description.clone(),
            builder: Arc::new(move || builder().to_structure()),
            weights: self.weights.clone(),
        }
    }
}

impl From<&StaticPreFabConfig<DilatedResNetContractConfig>> for PreFabConfig<DilatedResNetConfig> {
    fn from(config: &StaticPreFabConfig<DilatedResNetContractConfig>) -> Self {
        config.to_prefab().to_structure_prefab()
    }
}

impl From<&PreFabConfig<DilatedResNetContractConfig>> for PreFabConfig<DilatedResNetConfig> {
    fn from(config: &PreFabConfig<DilatedResNetContractConfig>) -> Self {
        config.to_structure_prefab()
    }
}

/// Well-known [`super::DilatedResNet`] configs and weights.
pub static PREFAB_DILATED_RESNET_MAP: StaticPreFabMap<DilatedResNetContractConfig> =
    StaticPreFabMap {
        name: "dilated_resnet",
        description: "Well-known dilated ResNet configs",

        items: &[
            &StaticPreFabConfig {
                name: "dilated_resnet50",
                description: "Dilated ResNet-50 [3, 4, 6, 3], output stride 8, Keras topology",
                builder: DilatedResNetContractConfig::new,

                weights: Some(&StaticPretrainedWeightsMap {
                    items: &[&StaticPretrainedWeightsDescriptor {
                        name: "th_kernels_notop",
                        description: "Keras ResNet50 ImageNet weights, Theano kernels, no top",
                        license: Some("mit"),
                        origin: Some("https://github.com/fchollet/deep-learning-models"),
                        urls: &[
                            "https://github.com/fchollet/deep-learning-models/releases/download/v0.2/resnet50_weights_th_dim_ordering_th_kernels_notop.h5",
                        ],
                        digest: Some("md5:f64f049c92468c9affcd44b0976cdafe"),
                    }],
                }),
            },
            &StaticPreFabConfig {
                name: "dilated_resnet50_tv",
                description: "Dilated ResNet-50 [3, 4, 6, 3], output stride 8, torchvision topology",
                builder: DilatedResNetContractConfig::torchvision,

                weights: Some(&StaticPretrainedWeightsMap {
                    items: &[
                        &StaticPretrainedWeightsDescriptor {
                            name: "tv_in1k",
                            description: "ResNet-50 pretrained on ImageNet-1k (torchvision V1)",
                            license: Some("bsd-3-clause"),
                            origin: Some("https://github.com/pytorch/vision"),
                            urls: &["https://download.pytorch.org/models/resnet50-0676ba61.pth"],
                            digest: Some("sha256:0676ba61"),
                        },
                        &StaticPretrainedWeightsDescriptor {
                            name: "tv2_in1k",
                            description: "ResNet-50 pretrained on ImageNet-1k (torchvision V2)",
                            license: Some("bsd-3-clause"),
                            origin: Some("https://github.com/pytorch/vision"),
                            urls: &["https://download.pytorch.org/models/resnet50-11ad3fa6.pth"],
                            digest: Some("sha256:11ad3fa6"),
                        },
                    ],
                }),
            },
        ],
    };

/// Split ``{prefab}.{weights}`` into its parts.
pub fn parse_pretrained_name(name: &str) -> (&str, Option<&str>) {
    match name.split_once('.') {
        Some((prefab, weights)) => (prefab, Some(weights)),
        None => (name, None),
    }
}

/// Build a prefab model, optionally loading published weights.
///
/// # Arguments
///
/// - `name`: ``{prefab}`` for a freshly initialized model,
///   or ``{prefab}.{weights}`` to fetch and load published weights.
/// - `edit`: a chance to edit the config before the model is built.
/// - `disk_cache`: the weights cache.
/// - `device`: the device to build on.
///
/// Edits which change the parameter structure (depths, widths, bias)
/// will fail to load published weights; `output_stride` edits load fine.
///
/// # Errors
///
/// If the prefab or weights are unknown, the edited config is invalid,
/// or the weights cannot be fetched or do not fit the model.
#[tracing::instrument(skip(edit, disk_cache, device))]
pub fn load_prefab_model<B: Backend, F>(
    name: &str,
    edit: F,
    disk_cache: &DiskCacheConfig,
    device: &B::Device,
) -> anyhow::Result<(DilatedResNetContractConfig, DilatedResNet<B>)>
where
    F: FnOnce(DilatedResNetContractConfig) -> DilatedResNetContractConfig,
{
    let (prefab_name, weights_name) = parse_pretrained_name(name);
    let prefab = PREFAB_DILATED_RESNET_MAP.try_lookup_prefab(prefab_name)?;

    let config = edit(prefab.to_config());
    config.try_validate().map_err(anyhow::Error::msg)?;

    let structure = config.to_structure();
    structure
        .try_validate()
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("invalid structure for {prefab_name}"))?;
    let model: DilatedResNet<B> = structure.init(device);

    let model = match weights_name {
        None => model,
        Some(weights_name) => {
            let descriptor = prefab.try_lookup_pretrained_weights(weights_name)?;
            let path = descriptor.fetch_weights(disk_cache)?;
            tracing::info!(weights = %descriptor.name, path = %path.display(), "loading pretrained weights");
            model
                .load_weights_file(path, config.weight_layout, config.kernel_order)
                .with_context(|| format!("loading {name}"))?
        }
    };

    Ok((config, model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dilated_resnet::model::RESNET50_BLOCKS;
    use crate::models::dilated_resnet::util::{KerasKernelOrder, StridePlacement, WeightLayout};
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_parse_pretrained_name() {
        assert_eq!(
            parse_pretrained_name("dilated_resnet50_tv.tv_in1k"),
            ("dilated_resnet50_tv", Some("tv_in1k"))
        );
        assert_eq!(
            parse_pretrained_name("dilated_resnet50"),
            ("dilated_resnet50", None)
        );
    }

    #[test]
    fn test_prefab_map() {
        let keras = PREFAB_DILATED_RESNET_MAP.expect_lookup_prefab("dilated_resnet50");
        let config = keras.to_config();
        assert_eq!(config.stage_depths, RESNET50_BLOCKS);
        assert_eq!(config.weight_layout, WeightLayout::Keras);
        assert_eq!(config.kernel_order, KerasKernelOrder::Theano);
        let weights = keras.expect_lookup_pretrained_weights("th_kernels_notop");
        assert_eq!(
            weights.url().unwrap(),
            "https://github.com/fchollet/deep-learning-models/releases/download/v0.2/resnet50_weights_th_dim_ordering_th_kernels_notop.h5"
        );
        assert_eq!(
            weights.digest.as_deref(),
            Some("md5:f64f049c92468c9affcd44b0976cdafe")
        );
        assert!(weights.cache_key().unwrap().ends_with("_notop.h5"));

        let tv = PREFAB_DILATED_RESNET_MAP.expect_lookup_prefab("dilated_resnet50_tv");
        let config = tv.to_config();
        assert_eq!(config.stride_placement, StridePlacement::Spatial);
        assert_eq!(config.weight_layout, WeightLayout::TorchVision);
        let weights = tv.expect_lookup_pretrained_weights("tv2_in1k");
        assert_eq!(
            weights.urls,
            vec!["https://download.pytorch.org/models/resnet50-11ad3fa6.pth"]
        );
        assert_eq!(weights.digest.as_deref(), Some("sha256:11ad3fa6"));

        // torchvision file names embed their sha256 prefix.
        for prefab in PREFAB_DILATED_RESNET_MAP.items {
            for item in prefab.weights.iter().flat_map(|w| w.items.iter()) {
                let digest = item.digest.unwrap();
                if let Some(prefix) = digest.strip_prefix("sha256:") {
                    assert!(item.urls[0].ends_with(&format!("-{prefix}.pth")));
                }
            }
        }
    }

    #[test]
    fn test_structure_prefab() {
        let prefab: PreFabConfig<DilatedResNetConfig> = PREFAB_DILATED_RESNET_MAP.items[1].into();
        assert_eq!(prefab.name, "dilated_resnet50_tv");
        assert_eq!(prefab.to_config().out_planes(), 2048);
        assert!(prefab.weights.is_some());
    }

    #[test]
    fn test_load_prefab_model_without_weights() {
        let device = Default::default();
        let (config, model) = load_prefab_model::<B, _>(
            "dilated_resnet50",
            |c| {
                c.with_stage_depths([1, 1, 1, 1])
                    .with_stem_width(4)
                    .with_base_planes(2)
                    .with_output_stride(16)
            },
            &DiskCacheConfig::default(),
            &device,
        )
        .unwrap();

        assert_eq!(config.output_stride, 16);
        assert_eq!(model.output_stride(), 16);
        assert_eq!(model.out_planes(), 64);
    }

    #[test]
    fn test_load_prefab_model_errors() {
        let device = Default::default();

        let err = load_prefab_model::<B, _>("nope", |c| c, &DiskCacheConfig::default(), &device)
            .unwrap_err();
        assert!(err.to_string().contains("prefab not found"));

        let err = load_prefab_model::<B, _>(
            "dilated_resnet50.tv_in1k",
            |c| c.with_stage_depths([1, 1, 1, 1]),
            &DiskCacheConfig::default(),
            &device,
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("weights not found: \"tv_in1k\""));

        let err = load_prefab_model::<B, _>(
            "dilated_resnet50",
            |c| c.with_kernel_size(4),
            &DiskCacheConfig::default(),
            &device,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "kernel_size must be odd and > 0: 4");

        let err = load_prefab_model::<B, _>(
            "dilated_resnet50",
            |c| c.with_stage_depths([1, 1, 27, 1]),
            &DiskCacheConfig::default(),
            &device,
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("stage_depths must be <= 26"));

        let err = load_prefab_model::<B, _>(
            "dilated_resnet50",
            |c| c.with_output_stride(3),
            &DiskCacheConfig::default(),
            &device,
        )
        .unwrap_err();
        assert!(err.to_string().contains("output_stride"));
    }
}
