use anyhow::{Context, anyhow, bail};
use burn::backend::NdArray;
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::tensor::Distribution;
use clap::{Parser, ValueEnum};
use dilated_resnet::cache::disk::DiskCacheConfig;
use dilated_resnet::cache::weights::fetch_model_weights;
use dilated_resnet::models::dilated_resnet::prefabs::{
    PREFAB_DILATED_RESNET_MAP, load_prefab_model, parse_pretrained_name,
};
use dilated_resnet::models::dilated_resnet::util::WeightLayout;
use dilated_resnet::models::dilated_resnet::{DilatedResNet, DilatedResNetContractConfig};
use dilated_resnet::utility::burn::record::display_record;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum LayoutArg {
    Keras,
    Torchvision,
}

impl From<LayoutArg> for WeightLayout {
    fn from(layout: LayoutArg) -> Self {
        match layout {
            LayoutArg::Keras => WeightLayout::Keras,
            LayoutArg::Torchvision => WeightLayout::TorchVision,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Prefab model, as ``{prefab}`` or ``{prefab}.{weights}``.
    /// Use "list" to list all available prefabs.
    #[arg(long, default_value = "dilated_resnet50")]
    pretrained: String,

    /// Load the model config from a JSON file instead of a prefab.
    ///
    /// Not combinable with a ``{prefab}.{weights}`` `--pretrained`; use `--weights`.
    #[arg(long)]
    config: Option<String>,

    /// Save the model config as JSON.
    #[arg(long)]
    save_config: Option<String>,

    /// ``.pth`` or Keras ``.h5`` weights to load; a local path, or a URL fetched through the cache.
    #[arg(long)]
    weights: Option<String>,

    /// Key layout of `--weights`; defaults to the config's layout.
    #[arg(long, value_enum)]
    layout: Option<LayoutArg>,

    /// Override the output stride.
    #[arg(long)]
    output_stride: Option<usize>,

    /// Input height.
    #[arg(long, default_value_t = 224)]
    height: usize,

    /// Input width.
    #[arg(long, default_value_t = 224)]
    width: usize,

    /// Batch size.
    #[arg(short, long, default_value_t = 1)]
    batch: usize,

    /// Print the Keras layer names and module paths.
    #[arg(long, default_value = "false")]
    show_layers: bool,

    /// Print the parameter record structure.
    #[arg(long, default_value = "false")]
    show_record: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dilated_resnet=info,dilated_resnet_features=info")),
        )
        .init();

    let args = Args::parse();

    if args.pretrained == "list" {
        list_prefabs();
        return Ok(());
    }

    run::<NdArray<f32>>(&args)
}

fn list_prefabs() {
    println!("Available prefabs:");
    for prefab in PREFAB_DILATED_RESNET_MAP.items {
        println!("* \"{}\": {}", prefab.name, prefab.description);
        if let Some(weights) = prefab.weights {
            for item in weights.items {
                println!(
                    "  - \"{}.{}\": {}",
                    prefab.name, item.name, item.description
                );
            }
        }
    }
}

fn apply_overrides(
    config: DilatedResNetContractConfig,
    args: &Args,
) -> DilatedResNetContractConfig {
    match args.output_stride {
        Some(output_stride) => config.with_output_stride(output_stride),
        None => config,
    }
}

fn build_model<B: Backend>(
    args: &Args,
    device: &B::Device,
) -> anyhow::Result<(DilatedResNetContractConfig, DilatedResNet<B>)> {
    match &args.config {
        Some(path) => {
            if let (_, Some(weights)) = parse_pretrained_name(&args.pretrained) {
                bail!(
                    "--config cannot load the prefab weights {weights:?} of --pretrained {:?}; use --weights",
                    args.pretrained
                );
            }
            let config = DilatedResNetContractConfig::load(path)
                .map_err(|err| anyhow!("loading config {path}: {err:?}"))?;
            let config = apply_overrides(config, args);
            config.try_validate().map_err(anyhow::Error::msg)?;

            let model = config.clone().to_structure().init(device);
            Ok((config, model))
        }
        None => load_prefab_model(
            &args.pretrained,
            |c| apply_overrides(c, args),
            &DiskCacheConfig::default(),
            device,
        ),
    }
}

fn run<B: Backend>(args: &Args) -> anyhow::Result<()> {
    let device: B::Device = Default::default();

    let (config, mut model) = build_model::<B>(args, &device)?;

    if let Some(weights) = &args.weights {
        let path = if weights.starts_with("http://") || weights.starts_with("https://") {
            fetch_model_weights(weights)?
        } else {
            PathBuf::from(weights)
        };
        let layout = args.layout.map_or(config.weight_layout, WeightLayout::from);
        model = model.load_weights_file(path, layout, config.kernel_order)?;
    }

    if let Some(path) = &args.save_config {
        config
            .save(path)
            .with_context(|| format!("saving config to {path}"))?;
        tracing::info!(path = %path, "saved config");
    }

    if args.show_layers {
        for name in model.layer_names() {
            println!("{:<20} {}", name.keras_name, name.module_path);
        }
    }

    if args.show_record {
        display_record::<B, _>(model.clone().into_record())?;
    }

    let input: Tensor<B, 4> = Tensor::random(
        [args.batch, model.in_channels(), args.height, args.width],
        Distribution::Normal(0.0, 1.0),
        &device,
    );

    let features = model.forward_features(input);
    for (idx, feature) in features.iter().enumerate() {
        tracing::info!(stage = idx + 1, shape = ?feature.dims(), "features");
    }

    println!(
        "output_stride={} dilations={:?} out_planes={} output_resolution={:?}",
        model.output_stride(),
        model.stage_dilations(),
        model.out_planes(),
        model.output_resolution([args.height, args.width]),
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_rejects_prefab_weights() {
        let args = Args::parse_from([
            "dilated_resnet_features",
            "--config",
            "/nonexistent/config.json",
            "--pretrained",
            "dilated_resnet50.th_kernels_notop",
        ]);

        let err = build_model::<NdArray<f32>>(&args, &Default::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "--config cannot load the prefab weights \"th_kernels_notop\" of --pretrained \"dilated_resnet50.th_kernels_notop\"; use --weights"
        );
    }

    #[test]
    fn test_config_reads_file() {
        let args = Args::parse_from([
            "dilated_resnet_features",
            "--config",
            "/nonexistent/config.json",
        ]);

        let err = build_model::<NdArray<f32>>(&args, &Default::default()).unwrap_err();
        assert!(err.to_string().starts_with("loading config /nonexistent/config.json"));
    }
}
