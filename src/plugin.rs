use image::RgbImage;

use crate::assembler::ShapeAssembler;
use crate::config::{ModelConfig, Params};
use crate::errors::{AutoLabelError, Result};
use crate::model::YoloSegmenter;
use crate::params::InferenceSettings;
use crate::shape::PredictionResult;
use crate::traits::{InstanceSegmenter, ModelPlugin, PluginState};

type Loader<S> = Box<dyn Fn(&ModelConfig) -> Result<S> + Send + Sync>;

/// Model plugin wrapping an instance segmenter.
///
/// The segmenter is created by `loader` on `load` and dropped on `unload`;
/// it is owned exclusively by the plugin in between.
pub struct SegmentationPlugin<S: InstanceSegmenter> {
    config: ModelConfig,
    state: PluginState,
    loader: Loader<S>,
    segmenter: Option<S>,
}

impl<S: InstanceSegmenter> SegmentationPlugin<S> {
    pub fn new<F>(config: ModelConfig, loader: F) -> Self
    where
        F: Fn(&ModelConfig) -> Result<S> + Send + Sync + 'static,
    {
        Self {
            config,
            state: PluginState::Unloaded,
            loader: Box::new(loader),
            segmenter: None,
        }
    }

    /// Settings of a call with `params`, after falling back to the
    /// configured parameters and the defaults.
    pub fn settings(&self, params: &Params) -> InferenceSettings {
        InferenceSettings::resolve(params, &self.config.params)
    }

    fn acquire(&self) -> Result<S> {
        let segmenter = (self.loader)(&self.config)?;
        segmenter.warm_up()?;
        Ok(segmenter)
    }
}

impl SegmentationPlugin<YoloSegmenter> {
    /// Plugin backed by a YOLO segmentation model in ONNX format.
    pub fn yolo_seg(config: ModelConfig) -> Self {
        Self::new(config, YoloSegmenter::from_config)
    }
}

impl<S: InstanceSegmenter> ModelPlugin for SegmentationPlugin<S> {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn state(&self) -> PluginState {
        self.state
    }

    fn load(&mut self) -> Result<()> {
        match self.state {
            PluginState::Loaded => return Ok(()),
            PluginState::Failed => {
                return Err(AutoLabelError::load(
                    &self.config.model_id,
                    "a previous load failed; unload the plugin before retrying",
                ))
            }
            PluginState::Unloaded => {}
        }

        match self.acquire() {
            Ok(segmenter) => {
                self.segmenter = Some(segmenter);
                self.state = PluginState::Loaded;
                tracing::info!(model_id = %self.config.model_id, "model loaded");
                Ok(())
            }
            Err(err) => {
                self.state = PluginState::Failed;
                tracing::error!(model_id = %self.config.model_id, error = %err, "model failed to load");
                Err(match err {
                    err @ AutoLabelError::Load { .. } => err,
                    other => AutoLabelError::Load {
                        model_id: self.config.model_id.clone(),
                        reason: other.to_string(),
                        source: Some(Box::new(other)),
                    },
                })
            }
        }
    }

    fn predict(&self, image: &RgbImage, params: &Params) -> Result<PredictionResult> {
        let segmenter = match (&self.segmenter, self.state) {
            (Some(segmenter), PluginState::Loaded) => segmenter,
            _ => {
                return Err(AutoLabelError::NotLoaded {
                    model_id: self.config.model_id.clone(),
                    state: self.state,
                })
            }
        };

        let settings = self.settings(params);
        let (width, height) = image.dimensions();
        tracing::debug!(model_id = %self.config.model_id, ?settings, width, height, "predict");

        let instances =
            segmenter.infer(image, settings.conf_threshold, settings.iou_threshold)?;
        let instance_count = instances.len();

        let shapes = ShapeAssembler::from_settings(&settings).assemble_all(instances, width, height)?;
        tracing::debug!(
            model_id = %self.config.model_id,
            instances = instance_count,
            shapes = shapes.len(),
            "prediction assembled"
        );

        Ok(PredictionResult::new(shapes))
    }

    fn unload(&mut self) {
        if self.segmenter.take().is_some() {
            tracing::info!(model_id = %self.config.model_id, "model unloaded");
        }
        self.state = PluginState::Unloaded;
    }
}
