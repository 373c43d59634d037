use std::fs;

use image::RgbImage;
use serde_json::{json, Value};
use tempfile::TempDir;

use autolabel_seg::mocks::{disk_mask, mock_plugin, rect_mask};
use autolabel_seg::{
    create_plugin, parse_prompts, BoundingBox, DetectionInstance, ModelConfig, ModelPlugin,
    ModelRegistry, Params, PluginState, ShapeType,
};

fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}

fn scene() -> Vec<DetectionInstance> {
    let bbox = BoundingBox::new(8., 8., 23., 23.);
    vec![
        DetectionInstance::new("cell", 0.91, bbox, Some(rect_mask(32, 32, &bbox))),
        DetectionInstance::new("marker", 0.55, BoundingBox::new(1., 1., 5., 4.), None),
        DetectionInstance::new("debris", 0.10, bbox, Some(disk_mask(32, 32, 16., 16., 6.))),
    ]
}

#[test]
fn test_predict_end_to_end() -> anyhow::Result<()> {
    let config = ModelConfig::new("mock_seg", "Mock Segmentation").with_param("show_boxes", true);
    let mut plugin = mock_plugin(config, scene());
    plugin.load()?;

    let image = RgbImage::new(32, 32);
    let result = plugin.predict(&image, &Params::new())?;

    // debris falls below the default confidence threshold
    let kinds: Vec<_> = result.shapes.iter().map(|s| (s.label.as_str(), s.shape_type)).collect();
    assert_eq!(
        kinds,
        vec![
            ("cell", ShapeType::Rectangle),
            ("cell", ShapeType::Polygon),
            ("marker", ShapeType::Rectangle),
        ]
    );

    let rectangle = &result.shapes[0];
    assert_eq!(rectangle.points, vec![[8., 8.], [23., 8.], [23., 23.], [8., 23.]]);
    assert_eq!(rectangle.score, Some(0.91));

    let polygon = &result.shapes[1].points;
    assert!(polygon.len() >= 4);
    assert_eq!(polygon.first(), polygon.last());
    assert!(polygon
        .iter()
        .all(|&[x, y]| (8. ..=23.).contains(&x) && (8. ..=23.).contains(&y)));
    Ok(())
}

#[test]
fn test_call_params_take_precedence() -> anyhow::Result<()> {
    let config = ModelConfig::new("mock_seg", "Mock Segmentation").with_param("conf_threshold", 0.6);
    let mut plugin = mock_plugin(config, scene());
    plugin.load()?;
    let image = RgbImage::new(32, 32);

    let configured = plugin.predict(&image, &Params::new())?;
    assert_eq!(configured.shapes.len(), 1);

    let call = params(json!({ "conf_threshold": 0.05, "show_boxes": false }));
    let overridden = plugin.predict(&image, &call)?;
    let labels: Vec<_> = overridden.shapes.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["cell", "marker", "debris"]);

    // a string is not a threshold, so the configured value applies
    let wrong_type = params(json!({ "conf_threshold": "0.05" }));
    assert_eq!(plugin.predict(&image, &wrong_type)?.shapes.len(), 1);
    Ok(())
}

#[test]
fn test_prediction_wire_format() -> anyhow::Result<()> {
    let mut plugin = mock_plugin(ModelConfig::new("mock_seg", "Mock Segmentation"), scene());
    plugin.load()?;
    let result = plugin.predict(&RgbImage::new(32, 32), &Params::new())?;

    let value = serde_json::to_value(&result)?;
    assert_eq!(value["description"], json!(""));
    let shape = &value["shapes"][0];
    assert_eq!(shape["label"], json!("cell"));
    assert_eq!(shape["shape_type"], json!("polygon"));
    assert_eq!(shape["difficult"], json!(false));
    assert_eq!(shape["group_id"], Value::Null);
    assert_eq!(shape["kie_linking"], json!([]));
    Ok(())
}

#[test]
fn test_yaml_config_with_missing_weights_is_degraded() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("yolo11n_seg.yaml");
    let weights = temp_dir.path().join("missing.onnx");
    fs::write(
        &path,
        format!(
            "model_id: yolo11n_seg\ndisplay_name: YOLO11n-Seg\nparams:\n  model_path: {}\n  device: cpu\n",
            weights.display()
        ),
    )?;

    let mut registry = ModelRegistry::new();
    registry.register(create_plugin(ModelConfig::from_file(&path)?)?)?;
    registry.register(Box::new(mock_plugin(
        ModelConfig::new("mock_seg", "Mock Segmentation"),
        scene(),
    )))?;

    assert_eq!(registry.load_all(), vec!["yolo11n_seg".to_string()]);
    assert_eq!(registry.get("yolo11n_seg")?.state(), PluginState::Failed);
    assert_eq!(registry.available_models(), vec!["mock_seg"]);

    let metadata = registry.get("yolo11n_seg")?.get_metadata();
    assert_eq!(metadata.display_name, "YOLO11n-Seg");
    assert_eq!(metadata.batch_processing_mode, "default");

    let image = RgbImage::new(32, 32);
    assert!(registry.predict("yolo11n_seg", &image, &Params::new()).is_err());
    assert!(!registry.predict("mock_seg", &image, &Params::new())?.shapes.is_empty());
    Ok(())
}

#[test]
fn test_prompt_parsing() {
    let separators = autolabel_seg::prompt::DEFAULT_SEPARATORS;
    assert_eq!(parse_prompts("a, b, a.", &separators, true), vec!["a", "b"]);
    assert_eq!(parse_prompts("a, b, a.", &separators, false), vec!["a", "b", "a"]);
    assert!(parse_prompts("   ", &separators, true).is_empty());
}
