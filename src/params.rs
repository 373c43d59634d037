//! Layered parameter lookup.
//!
//! A value is resolved with the following precedence, first hit wins:
//!
//! 1. the parameters passed to the `predict` call,
//! 2. the parameters of the plugin's configuration record,
//! 3. the hard-coded default.
//!
//! A value of the wrong JSON type is treated as absent at its tier, so a
//! malformed request value falls back to the configured one instead of
//! failing the call.

use serde_json::Value;

use crate::config::Params;

pub const DEFAULT_CONF_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.70;
pub const DEFAULT_SHOW_BOXES: bool = false;
pub const DEFAULT_EPSILON_FACTOR: f32 = 0.001;

/// Resolve `key` through the call and configured tiers with `extract`,
/// falling back to `default`.
pub fn resolve<T>(
    call: &Params,
    configured: &Params,
    key: &str,
    default: T,
    extract: impl Fn(&Value) -> Option<T>,
) -> T {
    [call, configured]
        .into_iter()
        .find_map(|tier| tier.get(key).and_then(&extract))
        .unwrap_or(default)
}

pub fn resolve_f32(call: &Params, configured: &Params, key: &str, default: f32) -> f32 {
    resolve(call, configured, key, default, |v| {
        v.as_f64().map(|f| f as f32).filter(|f| f.is_finite())
    })
}

pub fn resolve_bool(call: &Params, configured: &Params, key: &str, default: bool) -> bool {
    resolve(call, configured, key, default, Value::as_bool)
}

pub fn resolve_string(call: &Params, configured: &Params, key: &str, default: &str) -> String {
    resolve(call, configured, key, default.to_string(), |v| {
        v.as_str().map(str::to_string)
    })
}

/// The typed parameter set consumed by one `predict` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceSettings {
    /// Minimum confidence to keep an instance.
    pub conf_threshold: f32,
    /// Overlap threshold for duplicate suppression.
    pub iou_threshold: f32,
    /// Also emit a rectangle shape for every mask instance.
    pub show_boxes: bool,
    /// Polygon simplification tolerance as a fraction of the contour perimeter.
    pub epsilon_factor: f32,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            conf_threshold: DEFAULT_CONF_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            show_boxes: DEFAULT_SHOW_BOXES,
            epsilon_factor: DEFAULT_EPSILON_FACTOR,
        }
    }
}

impl InferenceSettings {
    pub fn resolve(call: &Params, configured: &Params) -> Self {
        Self {
            conf_threshold: resolve_f32(call, configured, "conf_threshold", DEFAULT_CONF_THRESHOLD),
            iou_threshold: resolve_f32(call, configured, "iou_threshold", DEFAULT_IOU_THRESHOLD),
            show_boxes: resolve_bool(call, configured, "show_boxes", DEFAULT_SHOW_BOXES),
            epsilon_factor: resolve_f32(call, configured, "epsilon_factor", DEFAULT_EPSILON_FACTOR),
        }
    }
}
