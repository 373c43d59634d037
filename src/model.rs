use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{
    assembler::resample_mask,
    config::{ModelConfig, Params},
    detection::{BoundingBox, DetectionInstance},
    errors::{AutoLabelError, Result},
    params::resolve_string,
    traits::InstanceSegmenter,
};
use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::value::TensorRef;
use ort::{
    execution_providers::{
        CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
        TensorRTExecutionProvider,
    },
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;

pub const DEFAULT_MODEL_PATH: &str = "yolo11n-seg.onnx";
pub const DEFAULT_DEVICE: &str = "cpu";
const DEFAULT_INPUT_SIZE: u32 = 640;
const MASK_THRESHOLD: f32 = 0.5;
const MAX_DETECTIONS: usize = 300;

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Where the ONNX session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda(i32),
    TensorRt(i32),
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        let (kind, id) = match s.split_once(':') {
            Some((kind, id)) => {
                let id = id
                    .parse::<i32>()
                    .ok()
                    .filter(|id| *id >= 0)
                    .ok_or_else(|| format!("invalid device id in `{s}`"))?;
                (kind, id)
            }
            None => (s.as_str(), 0),
        };

        match kind {
            "cpu" if !s.contains(':') => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda(id)),
            "tensorrt" | "trt" => Ok(Self::TensorRt(id)),
            _ => Err(format!(
                "unsupported device `{s}`. Use `cpu`, `cuda[:N]` or `tensorrt[:N]`."
            )),
        }
    }
}

impl Device {
    fn execution_provider(self) -> ExecutionProviderDispatch {
        match self {
            Device::Cpu => CPUExecutionProvider::default().build(),
            Device::Cuda(id) => CUDAExecutionProvider::default()
                .with_device_id(id)
                .build()
                .error_on_failure(),
            Device::TensorRt(id) => TensorRTExecutionProvider::default()
                .with_device_id(id)
                .build()
                .error_on_failure(),
        }
    }
}

/// YOLO instance segmentation model (ultralytics ONNX export).
///
/// `output0` holds `[1, 4 + classes + coefficients, anchors]` candidates in
/// centre format, `output1` the `[1, coefficients, mh, mw]` mask prototypes.
/// Detection-only exports without `output1` yield box-only instances.
pub struct YoloSegmenter {
    pub input_size: u32,
    input_name: String,
    class_names: Vec<String>,
    session: Mutex<Session>,
}

impl YoloSegmenter {
    /// Build from the configured `model_path`, `device` and `class_names`
    /// parameters. Every failure is reported as a load error.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let none = Params::new();
        let model_path = PathBuf::from(resolve_string(
            &none,
            &config.params,
            "model_path",
            DEFAULT_MODEL_PATH,
        ));
        let device = resolve_string(&none, &config.params, "device", DEFAULT_DEVICE)
            .parse::<Device>()
            .map_err(|reason| AutoLabelError::load(&config.model_id, reason))?;
        let class_names = class_names(&config.params);

        Self::new(&model_path, device, class_names).map_err(|e| AutoLabelError::Load {
            model_id: config.model_id.clone(),
            reason: e.to_string(),
            source: Some(Box::new(e)),
        })
    }

    pub fn new(model_path: &Path, device: Device, class_names: Vec<String>) -> Result<Self> {
        if !model_path.exists() {
            return Err(AutoLabelError::FileSystem {
                path: model_path.to_path_buf(),
                operation: "model weights lookup".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "model file does not exist",
                ),
            });
        }

        let session = SessionBuilder::new()
            .map_err(|e| AutoLabelError::Model {
                operation: "session builder initialisation".to_string(),
                source: e.to_string().into(),
            })?
            .with_execution_providers([device.execution_provider()])
            .map_err(|e| AutoLabelError::Model {
                operation: format!("execution provider setup ({device:?})"),
                source: e.to_string().into(),
            })?
            .commit_from_file(model_path)
            .map_err(|e| AutoLabelError::Model {
                operation: format!("model file load: {}", model_path.display()),
                source: e.to_string().into(),
            })?;

        let input = session.inputs.first().ok_or_else(|| AutoLabelError::Model {
            operation: "model input lookup".to_string(),
            source: "model declares no inputs".into(),
        })?;
        let input_name = input.name.clone();
        let input_size = input
            .input_type
            .tensor_shape()
            .and_then(|shape| shape.get(2).copied())
            .filter(|&size| size > 0)
            .map(|size| size as u32)
            .unwrap_or(DEFAULT_INPUT_SIZE);

        tracing::info!(
            path = %model_path.display(),
            ?device,
            input_size,
            classes = class_names.len(),
            "created ONNX session"
        );

        Ok(Self {
            input_size,
            input_name,
            class_names,
            session: Mutex::new(session),
        })
    }

    fn run(&self, tensor: ArrayView4<f32>) -> Result<(ArrayD<f32>, Option<ArrayD<f32>>)> {
        let mut session = self.session.lock();
        let outputs = session.run(
            ort::inputs![self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?],
        )?;

        let predictions = outputs["output0"].try_extract_array::<f32>()?.to_owned();
        let protos = match outputs.get("output1") {
            Some(value) => Some(value.try_extract_array::<f32>()?.to_owned()),
            None => None,
        };
        Ok((predictions, protos))
    }

    fn label(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| class_id.to_string())
    }
}

impl InstanceSegmenter for YoloSegmenter {
    fn infer(
        &self,
        image: &RgbImage,
        conf_threshold: f32,
        iou_threshold: f32,
    ) -> Result<Vec<DetectionInstance>> {
        let (width, height) = image.dimensions();
        let tensor = preprocess(image, self.input_size);
        let (predictions, protos) = self.run(tensor.view())?;

        let coefficients = protos
            .as_ref()
            .and_then(|p| p.shape().get(1).copied())
            .unwrap_or(0);
        let candidates = decode(predictions.view(), coefficients, conf_threshold)?;
        let kept = non_max_suppression(candidates, iou_threshold, MAX_DETECTIONS);
        tracing::debug!(kept = kept.len(), "decoded YOLO output");

        let prototypes = protos.map(|p| flatten_prototypes(p.view())).transpose()?;

        let size = self.input_size as f32;
        let (sx, sy) = (width as f32 / size, height as f32 / size);

        kept.into_iter()
            .map(|candidate| -> Result<DetectionInstance> {
                let mask = match &prototypes {
                    Some((matrix, mh, mw)) => {
                        Some(instance_mask(&candidate, matrix, *mh, *mw, self.input_size)?)
                    }
                    None => None,
                };
                let bbox = clip(candidate.bbox.scale(sx, sy), width as f32, height as f32);
                Ok(DetectionInstance::new(
                    self.label(candidate.class_id),
                    candidate.score,
                    bbox,
                    mask,
                ))
            })
            .collect()
    }

    fn warm_up(&self) -> Result<()> {
        let size = self.input_size as usize;
        let data = Array4::<f32>::zeros((1, 3, size, size));
        self.run(data.view())?;
        Ok(())
    }
}

fn class_names(params: &Params) -> Vec<String> {
    params
        .get("class_names")
        .and_then(|v| v.as_array())
        .map(|names| {
            names
                .iter()
                .filter_map(|n| n.as_str().map(str::to_string))
                .collect::<Vec<_>>()
        })
        .filter(|names| !names.is_empty())
        .unwrap_or_else(|| COCO_CLASSES.iter().map(|s| s.to_string()).collect())
}

/// Resize to the square input size and lay out as a contiguous
/// `[1, 3, size, size]` RGB tensor in `[0, 1]`.
pub fn preprocess(image: &RgbImage, input_size: u32) -> Array4<f32> {
    let resized = imageops::resize(image, input_size, input_size, FilterType::Triangle);
    let tensor = resized
        .as_ndarray3()
        .slice_move(s![NewAxis, .., .., ..])
        .mapv(|v| v as f32 / 255.);
    let mut standard = Array4::zeros(tensor.raw_dim());
    standard.assign(&tensor);
    standard
}

/// A decoded candidate in input-tensor coordinates.
#[derive(Debug, Clone)]
struct Candidate {
    class_id: usize,
    score: f32,
    bbox: BoundingBox,
    coefficients: Array1<f32>,
}

fn decode(
    predictions: ArrayViewD<f32>,
    coefficients: usize,
    conf_threshold: f32,
) -> Result<Vec<Candidate>> {
    let predictions = predictions.into_dimensionality::<Ix3>()?;
    let predictions = predictions.index_axis(Axis(0), 0);
    let (channels, anchors) = predictions.dim();

    if channels <= 4 + coefficients {
        return Err(AutoLabelError::Model {
            operation: "YOLO output decoding".to_string(),
            source: format!("{channels} channels leave no room for class scores").into(),
        });
    }
    let num_classes = channels - 4 - coefficients;

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let column = predictions.column(anchor);
        let (class_id, score) = column
            .slice(s![4..4 + num_classes])
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, s)| if s > best.1 { (i, s) } else { best });

        if !(score > conf_threshold) {
            continue;
        }

        candidates.push(Candidate {
            class_id,
            score,
            bbox: BoundingBox::from_cxcywh(column[0], column[1], column[2], column[3]),
            coefficients: column.slice(s![4 + num_classes..]).to_owned(),
        });
    }
    Ok(candidates)
}

/// Per-class NMS, highest score first.
fn non_max_suppression(
    mut candidates: Vec<Candidate>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

/// `[1, c, mh, mw]` prototypes as a `(c, mh * mw)` matrix.
fn flatten_prototypes(protos: ArrayViewD<f32>) -> Result<(Array2<f32>, usize, usize)> {
    let protos = protos.into_dimensionality::<Ix4>()?;
    let (_, c, mh, mw) = protos.dim();
    let matrix = protos
        .index_axis(Axis(0), 0)
        .to_owned()
        .into_shape_with_order((c, mh * mw))?;
    Ok((matrix, mh, mw))
}

/// Binary mask of one candidate at input resolution: the sigmoid of the
/// coefficient/prototype product, upsampled, zeroed outside the box and
/// thresholded at 0.5.
fn instance_mask(
    candidate: &Candidate,
    prototypes: &Array2<f32>,
    mh: usize,
    mw: usize,
    input_size: u32,
) -> Result<Array2<f32>> {
    let logits = candidate.coefficients.dot(prototypes);
    let mask = logits
        .mapv(|x| 1. / (1. + (-x).exp()))
        .into_shape_with_order((mh, mw))?;
    let mut mask = resample_mask(mask, input_size, input_size)?;

    let b = &candidate.bbox;
    for ((y, x), v) in mask.indexed_iter_mut() {
        let (x, y) = (x as f32, y as f32);
        let inside = x >= b.x1 && x < b.x2 && y >= b.y1 && y < b.y2;
        *v = if inside && *v > MASK_THRESHOLD { 1. } else { 0. };
    }
    Ok(mask)
}

fn clip(bbox: BoundingBox, width: f32, height: f32) -> BoundingBox {
    BoundingBox::new(
        bbox.x1.clamp(0., width),
        bbox.y1.clamp(0., height),
        bbox.x2.clamp(0., width),
        bbox.y2.clamp(0., height),
    )
}
