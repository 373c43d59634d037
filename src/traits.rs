use crate::config::{ModelConfig, Params};
use crate::detection::DetectionInstance;
use crate::errors::Result;
use crate::shape::{ModelMetadata, PredictionResult};
use image::RgbImage;

/// Lifecycle state of a model plugin.
///
/// `Unloaded` is initial. `load` moves to `Loaded` or `Failed`; `unload` moves
/// any state back to `Unloaded`. `predict` is only valid in `Loaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    Unloaded,
    Loaded,
    Failed,
}

/// Contract every inference backend exposes to the hosting service.
///
/// Lifecycle transitions take `&mut self`, so a single plugin instance can not
/// be loaded or unloaded while a `predict` borrow is alive. Hosts that share a
/// plugin across threads wrap it in a lock.
pub trait ModelPlugin: Send + Sync {
    /// Configuration record the plugin was created from.
    fn config(&self) -> &ModelConfig;

    fn state(&self) -> PluginState;

    /// Acquire backend resources. Fails with `AutoLabelError::Load`, leaving
    /// the plugin in `Failed`.
    fn load(&mut self) -> Result<()>;

    /// Run inference on one image. Fails with `AutoLabelError::NotLoaded`
    /// unless the plugin is `Loaded`.
    fn predict(&self, image: &RgbImage, params: &Params) -> Result<PredictionResult>;

    /// Release backend resources. Idempotent, valid in any state.
    fn unload(&mut self);

    fn model_id(&self) -> &str {
        &self.config().model_id
    }

    fn is_loaded(&self) -> bool {
        self.state() == PluginState::Loaded
    }

    /// Metadata for discovery endpoints, sourced from static configuration.
    fn get_metadata(&self) -> ModelMetadata {
        ModelMetadata::from_config(self.config())
    }
}

/// The wrapped detection/segmentation model.
///
/// Given an image and thresholds it yields per-instance label, score, box and
/// optional mask. Instances are returned in the order the model ranks them.
pub trait InstanceSegmenter: Send + Sync {
    fn infer(
        &self,
        image: &RgbImage,
        conf_threshold: f32,
        iou_threshold: f32,
    ) -> Result<Vec<DetectionInstance>>;

    /// Force lazy initialisation once after the model is materialised.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

impl<S: InstanceSegmenter + ?Sized> InstanceSegmenter for Box<S> {
    fn infer(
        &self,
        image: &RgbImage,
        conf_threshold: f32,
        iou_threshold: f32,
    ) -> Result<Vec<DetectionInstance>> {
        (**self).infer(image, conf_threshold, iou_threshold)
    }

    fn warm_up(&self) -> Result<()> {
        (**self).warm_up()
    }
}
