use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::{AutoLabelError, Result};

/// Backend-specific key/value parameters, both in configuration records and
/// in per-call requests.
pub type Params = Map<String, Value>;

pub const DEFAULT_BACKEND: &str = "yolo_seg";
pub const DEFAULT_BATCH_PROCESSING_MODE: &str = "default";

/// Configuration record a plugin is created from.
///
/// Apart from `model_id`, `display_name` and the parameter keys the backend
/// recognises, the values are passed through untouched to metadata responses.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub model_id: String,
    pub display_name: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub widgets: Vec<Value>,
    #[serde(default = "default_batch_processing_mode")]
    pub batch_processing_mode: String,
    #[serde(default = "default_backend")]
    pub backend: String,
}

fn default_batch_processing_mode() -> String {
    DEFAULT_BATCH_PROCESSING_MODE.to_string()
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

impl ModelConfig {
    pub fn new(model_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            display_name: display_name.into(),
            params: Params::new(),
            widgets: Vec::new(),
            batch_processing_mode: default_batch_processing_mode(),
            backend: default_backend(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Load a record from a YAML file. Parameters can be overridden through
    /// `AUTOLABEL__PARAMS__<KEY>` environment variables.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AutoLabelError::FileSystem {
                path: path.to_path_buf(),
                operation: "model config lookup".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "model configuration file does not exist",
                ),
            });
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("AUTOLABEL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let model_config = settings.try_deserialize::<ModelConfig>()?;
        model_config.validate()?;
        tracing::debug!(
            model_id = %model_config.model_id,
            path = %path.display(),
            "loaded model configuration"
        );
        Ok(model_config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_id.trim().is_empty() {
            return Err(AutoLabelError::Configuration {
                message: "model_id must not be empty".to_string(),
            });
        }
        if self.display_name.trim().is_empty() {
            return Err(AutoLabelError::Configuration {
                message: format!("display_name of `{}` must not be empty", self.model_id),
            });
        }
        Ok(())
    }
}

/// Command line options of the `autolabel` binary.
#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Image file or directory of images to label
    pub input: PathBuf,

    /// Model configuration record (YAML)
    #[arg(short, long)]
    pub config: PathBuf,

    #[arg(short, long, default_value = "output")]
    pub output_dir: PathBuf,

    #[arg(long)]
    pub conf_threshold: Option<f32>,

    #[arg(long)]
    pub iou_threshold: Option<f32>,

    #[arg(long)]
    pub epsilon_factor: Option<f32>,

    /// Also emit a rectangle for every mask instance
    #[arg(long)]
    pub show_boxes: bool,

    #[arg(short, long, default_value_t = default_num_threads())]
    pub num_threads: usize,

    /// Print the model metadata and exit
    #[arg(long)]
    pub metadata: bool,

    #[arg(long)]
    pub log_json: bool,
}

fn default_num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Config {
    /// Call-time parameters given on the command line. Options that were not
    /// given are left out so the configured values apply.
    pub fn call_params(&self) -> Params {
        let mut params = Params::new();
        if let Some(v) = self.conf_threshold {
            params.insert("conf_threshold".to_string(), Value::from(v));
        }
        if let Some(v) = self.iou_threshold {
            params.insert("iou_threshold".to_string(), Value::from(v));
        }
        if let Some(v) = self.epsilon_factor {
            params.insert("epsilon_factor".to_string(), Value::from(v));
        }
        if self.show_boxes {
            params.insert("show_boxes".to_string(), Value::Bool(true));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_model_config_from_yaml() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("yolo11n_seg.yaml");
        fs::write(
            &path,
            r#"
model_id: yolo11n_seg
display_name: YOLO11n-Seg
params:
  model_path: weights/yolo11n-seg.onnx
  conf_threshold: 0.4
  show_boxes: true
widgets:
  - name: button_run
    value: null
"#,
        )?;

        let config = ModelConfig::from_file(&path)?;
        assert_eq!(config.model_id, "yolo11n_seg");
        assert_eq!(config.display_name, "YOLO11n-Seg");
        assert_eq!(config.batch_processing_mode, "default");
        assert_eq!(config.backend, DEFAULT_BACKEND);
        assert_eq!(config.widgets.len(), 1);
        assert_eq!(
            config.params.get("model_path").and_then(Value::as_str),
            Some("weights/yolo11n-seg.onnx")
        );
        assert_eq!(
            config.params.get("show_boxes").and_then(Value::as_bool),
            Some(true)
        );
        Ok(())
    }

    #[test]
    fn test_model_config_missing_file() {
        let result = ModelConfig::from_file(Path::new("does/not/exist.yaml"));
        assert!(matches!(result, Err(AutoLabelError::FileSystem { .. })));
    }

    #[test]
    fn test_model_config_rejects_empty_id() {
        let config = ModelConfig::new("  ", "Nameless");
        assert!(matches!(
            config.validate(),
            Err(AutoLabelError::Configuration { .. })
        ));
    }

    #[test]
    fn test_call_params_only_contains_given_options() {
        let config = Config {
            input: "images".into(),
            config: "model.yaml".into(),
            output_dir: "output".into(),
            conf_threshold: Some(0.5),
            iou_threshold: None,
            epsilon_factor: None,
            show_boxes: false,
            num_threads: 1,
            metadata: false,
            log_json: false,
        };

        let params = config.call_params();
        assert_eq!(params.len(), 1);
        assert!(params.contains_key("conf_threshold"));
    }
}
