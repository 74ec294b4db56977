use crate::common::{Config, GymAuthError, Result};
use crate::common::config::DetectorConfig;
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use std::path::Path;
use std::sync::Arc;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array2, Array4, CowArray};

/// Boxes narrower or shorter than this (in detector pixels) are noise.
const MIN_BOX_SIDE: f32 = 10.0;
const MAX_FACES: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &FaceBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 { intersection / union } else { 0.0 }
    }
}

pub(crate) fn build_session(
    environment: &Arc<Environment>,
    model_path: &Path,
    optimization_level: u32,
) -> Result<Session> {
    if !model_path.exists() {
        return Err(GymAuthError::ModelLoad(
            format!("Model not found at: {:?}", model_path)
        ));
    }

    let opt_level = match optimization_level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    };

    let session = SessionBuilder::new(environment)?
        .with_optimization_level(opt_level)?
        .with_model_from_file(model_path)?;
    Ok(session)
}

pub(crate) fn build_environment(name: &str) -> Result<Arc<Environment>> {
    let environment = Environment::builder()
        .with_name(name)
        .build()
        .map_err(|e| GymAuthError::ModelLoad(format!("Failed to create environment: {}", e)))?;
    Ok(Arc::new(environment))
}

/// YOLO-style single-class face detector.
pub struct FaceDetector {
    session: Session,
    _environment: Arc<Environment>,
    config: DetectorConfig,
}

impl FaceDetector {
    pub fn new(config: &Config) -> Result<Self> {
        let environment = build_environment("face_detector")?;
        let session = build_session(
            &environment,
            &config.models.detector_path,
            config.performance.optimization_level,
        )?;

        Ok(Self {
            session,
            _environment: environment,
            config: config.detector.clone(),
        })
    }

    /// Faces above the confidence threshold, in original image coordinates,
    /// highest confidence first.
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;
        let (input_w, input_h) = (self.config.input_width, self.config.input_height);

        let input = if image.width() == input_w && image.height() == input_h {
            image_to_array(image)
        } else {
            image_to_array(&image.resize_exact(input_w, input_h, FilterType::Nearest))
        };

        let cow_array = CowArray::from(input.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let output = outputs.first()
            .ok_or_else(|| GymAuthError::Model("Detector produced no output".into()))?;
        let tensor = output.try_extract::<f32>()?;
        let predictions = predictions_matrix(tensor.view().to_owned())?;

        let candidates = boxes_from_predictions(&predictions, input_w as f32, input_h as f32);
        let mut faces = non_max_suppression(candidates, self.config.nms_iou_threshold);
        faces.retain(|face| face.confidence >= self.config.detection_confidence);
        faces.truncate(MAX_FACES);

        let scale_x = orig_width / input_w as f32;
        let scale_y = orig_height / input_h as f32;
        for face in &mut faces {
            face.x1 *= scale_x;
            face.x2 *= scale_x;
            face.y1 *= scale_y;
            face.y2 *= scale_y;
        }

        Ok(faces)
    }
}

/// Grayscale replicated into three normalised channels.
fn image_to_array(img: &DynamicImage) -> Array4<f32> {
    let gray = img.to_luma8();
    let (width, height) = (gray.width() as usize, gray.height() as usize);
    let mut array = Array4::<f32>::zeros((1, 3, height, width));

    for (x, y, pixel) in gray.enumerate_pixels() {
        let value = pixel[0] as f32 / 255.0;
        let (x, y) = (x as usize, y as usize);
        array[[0, 0, y, x]] = value;
        array[[0, 1, y, x]] = value;
        array[[0, 2, y, x]] = value;
    }

    array
}

/// Normalises detector output to one prediction per row. Models export either
/// `[1, N, 5]` or the transposed `[1, 5, N]`.
fn predictions_matrix(output: ndarray::ArrayD<f32>) -> Result<Array2<f32>> {
    let shape = output.shape().to_vec();
    let (rows, cols) = match shape.as_slice() {
        [1, a, b] | [a, b] => (*a, *b),
        other => {
            return Err(GymAuthError::Model(format!("Unexpected detector output shape: {:?}", other)))
        }
    };

    let matrix = output
        .into_shape((rows, cols))
        .map_err(|e| GymAuthError::Model(format!("Failed to reshape detector output: {}", e)))?;

    if cols > rows && rows <= 10 {
        Ok(matrix.reversed_axes())
    } else {
        Ok(matrix)
    }
}

fn boxes_from_predictions(predictions: &Array2<f32>, input_w: f32, input_h: f32) -> Vec<FaceBox> {
    predictions
        .rows()
        .into_iter()
        .filter(|row| row.len() >= 4)
        .filter_map(|row| {
            let confidence = row.get(4).copied().unwrap_or(0.0);
            if confidence <= 0.001 {
                return None;
            }

            // Coordinates are either pixels or normalised to [0, 1]
            let raw = [row[0], row[1], row[2], row[3]];
            let scale = if raw.iter().any(|v| *v > 1.0) { 1.0 } else { input_w };
            let [xc, yc, w, h] = raw.map(|v| v * scale);

            let face = FaceBox {
                x1: (xc - w / 2.0).max(0.0),
                y1: (yc - h / 2.0).max(0.0),
                x2: (xc + w / 2.0).min(input_w),
                y2: (yc + h / 2.0).min(input_h),
                confidence,
            };
            (face.width() > MIN_BOX_SIDE && face.height() > MIN_BOX_SIDE).then_some(face)
        })
        .collect()
}

pub fn non_max_suppression(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| kept.iou(&candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}
