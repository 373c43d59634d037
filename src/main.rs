use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use image::ImageFormat;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::{prelude::*, ThreadPoolBuilder};
use serde::Serialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use walkdir::WalkDir;

use autolabel_seg::{create_plugin, Config, ModelConfig, ModelRegistry, PredictionResult};

/// On-disk label file: the prediction response plus the image it belongs to.
#[derive(Serialize)]
struct LabelFile<'a> {
    #[serde(flatten)]
    prediction: PredictionResult,
    #[serde(rename = "imagePath")]
    image_path: &'a str,
    #[serde(rename = "imageWidth")]
    image_width: u32,
    #[serde(rename = "imageHeight")]
    image_height: u32,
}

fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);

    let model_config = ModelConfig::from_file(&config.config)
        .with_context(|| format!("Failed to read model config: {}", config.config.display()))?;
    let model_id = model_config.model_id.clone();

    let mut registry = ModelRegistry::new();
    registry.register(create_plugin(model_config)?)?;

    if config.metadata {
        let metadata = registry.get(&model_id)?.get_metadata();
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    ensure!(config.input.exists(), "Input path does not exist");

    let degraded = registry.load_all();
    if !degraded.is_empty() {
        bail!("Failed to load models: {}", degraded.join(", "));
    }

    ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build_global()?;

    let image_paths = collect_images(&config.input);
    tracing::info!(model_id = %model_id, images = image_paths.len(), "labeling started");

    let progress_bar = ProgressBar::new(image_paths.len() as u64);
    progress_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec} {eta})",
        )?
        .progress_chars("#>-"),
    );

    let params = config.call_params();
    image_paths
        .par_iter()
        .progress_with(progress_bar.clone())
        .try_for_each(|path| -> Result<()> {
            let image = image::open(path)
                .with_context(|| format!("Failed to open image: {}", path.display()))?
                .into_rgb8();

            let prediction = registry
                .predict(&model_id, &image, &params)
                .with_context(|| format!("Failed to label image: {}", path.display()))?;

            let file_name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default();
            let label = LabelFile {
                prediction,
                image_path: file_name,
                image_width: image.width(),
                image_height: image.height(),
            };

            let output_path = construct_output_path(path, &config)?;
            let json = serde_json::to_string_pretty(&label)?;
            fs::write(&output_path, json)
                .with_context(|| format!("Failed to save labels: {}", output_path.display()))
        })?;

    progress_bar.finish();
    registry.unload_all();
    tracing::info!(model_id = %model_id, "labeling finished");

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ort=warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn collect_images(input: &Path) -> Vec<PathBuf> {
    if input.is_file() {
        return vec![input.to_path_buf()];
    }
    WalkDir::new(input)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && ImageFormat::from_path(e.path()).is_ok())
        .map(|e| e.into_path())
        .collect()
}

fn relocate(path: &Path, prefix: &Path, new_prefix: &Path) -> Result<PathBuf> {
    let relative = if prefix.is_file() {
        Path::new(path.file_name().context("Input file has no name")?)
    } else {
        path.strip_prefix(prefix)
            .with_context(|| format!("{} is outside the input directory", path.display()))?
    };
    Ok(new_prefix.join(relative))
}

fn construct_output_path(path: &Path, config: &Config) -> Result<PathBuf> {
    let output_path = relocate(path, &config.input, &config.output_dir)?;
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    label_path(&output_path)
}

/// `<image file name>.json` next to the relocated image path, so images that
/// only differ in extension get separate label files.
fn label_path(path: &Path) -> Result<PathBuf> {
    let mut file_name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?
        .to_os_string();
    file_name.push(".json");
    Ok(path.with_file_name(file_name))
}
