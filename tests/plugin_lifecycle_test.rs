use image::RgbImage;
use rayon::prelude::*;

use autolabel_seg::mocks::{failing_plugin, mock_plugin, rect_mask};
use autolabel_seg::{
    AutoLabelError, BoundingBox, DetectionInstance, ModelConfig, ModelPlugin, Params, PluginState,
};

fn config() -> ModelConfig {
    ModelConfig::new("mock_seg", "Mock Segmentation")
}

#[test]
fn test_full_lifecycle() {
    let mut plugin = mock_plugin(config(), Vec::new());
    let image = RgbImage::new(8, 8);
    assert_eq!(plugin.state(), PluginState::Unloaded);

    assert!(plugin.load().is_ok());
    assert!(plugin.load().is_ok());
    assert_eq!(plugin.state(), PluginState::Loaded);
    assert!(plugin.predict(&image, &Params::new()).is_ok());

    plugin.unload();
    assert!(matches!(
        plugin.predict(&image, &Params::new()),
        Err(AutoLabelError::NotLoaded { state: PluginState::Unloaded, .. })
    ));

    assert!(plugin.load().is_ok());
    assert!(plugin.is_loaded());
}

#[test]
fn test_failed_plugin_recovers_only_through_unload() {
    let mut plugin = failing_plugin(config());

    let err = plugin.load().unwrap_err();
    assert!(err.is_load_error());
    assert!(err.to_string().contains("mock_seg"));
    assert_eq!(plugin.state(), PluginState::Failed);
    assert!(plugin.load().unwrap_err().is_load_error());

    plugin.unload();
    assert_eq!(plugin.state(), PluginState::Unloaded);
    assert_eq!(plugin.get_metadata().display_name, "Mock Segmentation");
}

#[test]
fn test_concurrent_predictions_agree() {
    let bbox = BoundingBox::new(4., 6., 27., 20.);
    let instance = DetectionInstance::new("cell", 0.8, bbox, Some(rect_mask(32, 32, &bbox)));
    let mut plugin = mock_plugin(config(), vec![instance]);
    assert!(plugin.load().is_ok());

    let image = RgbImage::new(32, 32);
    let results: Vec<_> = (0..16)
        .into_par_iter()
        .map(|_| plugin.predict(&image, &Params::new()))
        .collect::<Result<_, _>>()
        .unwrap();

    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(results[0].shapes.len(), 1);
}
