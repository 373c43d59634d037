use std::collections::BTreeMap;

use image::RgbImage;

use crate::config::{ModelConfig, Params, DEFAULT_BACKEND};
use crate::errors::{AutoLabelError, Result};
use crate::plugin::SegmentationPlugin;
use crate::shape::{ModelMetadata, PredictionResult};
use crate::traits::{ModelPlugin, PluginState};

/// Instantiate the plugin named by the record's `backend`.
pub fn create_plugin(config: ModelConfig) -> Result<Box<dyn ModelPlugin>> {
    config.validate()?;
    match config.backend.as_str() {
        DEFAULT_BACKEND => Ok(Box::new(SegmentationPlugin::yolo_seg(config))),
        other => Err(AutoLabelError::Configuration {
            message: format!(
                "unknown backend `{other}` for model `{}`",
                config.model_id
            ),
        }),
    }
}

/// Host-side set of plugins keyed by model id.
///
/// Plugins that fail to load stay registered as degraded: they keep serving
/// metadata requests through [`ModelRegistry::get`] but are left out of
/// [`ModelRegistry::list_metadata`] and refuse predictions.
#[derive(Default)]
pub struct ModelRegistry {
    plugins: BTreeMap<String, Box<dyn ModelPlugin>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Box<dyn ModelPlugin>) -> Result<()> {
        let model_id = plugin.model_id().to_string();
        if self.plugins.contains_key(&model_id) {
            return Err(AutoLabelError::Configuration {
                message: format!("model `{model_id}` is registered twice"),
            });
        }
        self.plugins.insert(model_id, plugin);
        Ok(())
    }

    /// Load every plugin that is not loaded yet. Returns the ids of the
    /// plugins that failed; the others stay usable.
    pub fn load_all(&mut self) -> Vec<String> {
        let mut degraded = Vec::new();
        for (model_id, plugin) in self.plugins.iter_mut() {
            if plugin.state() != PluginState::Unloaded {
                if plugin.state() == PluginState::Failed {
                    degraded.push(model_id.clone());
                }
                continue;
            }
            if let Err(err) = plugin.load() {
                tracing::warn!(model_id = %model_id, error = %err, "model marked as degraded");
                degraded.push(model_id.clone());
            }
        }
        degraded
    }

    pub fn get(&self, model_id: &str) -> Result<&dyn ModelPlugin> {
        self.plugins
            .get(model_id)
            .map(|plugin| plugin.as_ref())
            .ok_or_else(|| AutoLabelError::UnknownModel {
                model_id: model_id.to_string(),
            })
    }

    pub fn predict(
        &self,
        model_id: &str,
        image: &RgbImage,
        params: &Params,
    ) -> Result<PredictionResult> {
        self.get(model_id)?.predict(image, params)
    }

    /// Ids of the plugins ready for predictions.
    pub fn available_models(&self) -> Vec<&str> {
        self.plugins
            .iter()
            .filter(|(_, plugin)| plugin.is_loaded())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn degraded_models(&self) -> Vec<&str> {
        self.plugins
            .iter()
            .filter(|(_, plugin)| plugin.state() == PluginState::Failed)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Metadata of the loaded plugins, keyed by model id.
    pub fn list_metadata(&self) -> BTreeMap<String, ModelMetadata> {
        self.plugins
            .iter()
            .filter(|(_, plugin)| plugin.is_loaded())
            .map(|(id, plugin)| (id.clone(), plugin.get_metadata()))
            .collect()
    }

    pub fn unload_all(&mut self) {
        for plugin in self.plugins.values_mut() {
            plugin.unload();
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
