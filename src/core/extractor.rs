use crate::common::{Config, GymAuthError, Result};
use crate::core::detector::{FaceBox, FaceDetector};
use crate::core::recognizer::FaceRecognizer;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::DynamicImage;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

const TEMPLATE_CACHE_LIMIT: usize = 256;

/// Fixed-length face embedding, unit length when produced by
/// [`FaceDescriptor::normalized`].
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDescriptor(Vec<f32>);

impl FaceDescriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn normalized(mut values: Vec<f32>) -> Self {
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Euclidean distance. Descriptors of different lengths never match.
pub fn distance(a: &FaceDescriptor, b: &FaceDescriptor) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.0.iter()
        .zip(&b.0)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Turns frames and stored templates into descriptors.
///
/// `ensure_model_loaded` must succeed before `extract` or `decode_template`
/// are called; implementations cache the loaded model for later scans.
pub trait DescriptorExtractor: Send + 'static {
    fn ensure_model_loaded(&mut self) -> Result<()>;

    /// `Ok(None)` when no face was found in the frame.
    fn extract(&mut self, frame: &DynamicImage) -> Result<Option<FaceDescriptor>>;

    /// Descriptor for an admin's stored template, `Ok(None)` when the
    /// template image contains no face.
    fn decode_template(&mut self, template: &str) -> Result<Option<FaceDescriptor>>;
}

/// When several faces are in frame, the largest one is used. Equal sizes go
/// to the more confident detection.
pub fn select_face(faces: &[FaceBox]) -> Option<&FaceBox> {
    faces.iter().fold(None, |best: Option<&FaceBox>, face| match best {
        Some(b) if b.area() > face.area() => Some(b),
        Some(b) if b.area() == face.area() && b.confidence >= face.confidence => Some(b),
        _ => Some(face),
    })
}

/// Decodes a stored template: base64 image bytes, optionally wrapped in a
/// `data:image/...;base64,` URL.
pub fn decode_template_image(template: &str) -> Result<DynamicImage> {
    let payload = match template.split_once(',') {
        Some((header, data)) if header.starts_with("data:") => data,
        _ => template,
    };

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| GymAuthError::Template(format!("Invalid base64 template: {}", e)))?;
    Ok(image::load_from_memory(&bytes)?)
}

struct Models {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

/// ONNX Runtime detector + embedding network. Models load on first use and
/// stay loaded for the life of the extractor.
pub struct OnnxExtractor {
    config: Config,
    models: Option<Models>,
    template_cache: HashMap<Vec<u8>, Option<FaceDescriptor>>,
}

impl OnnxExtractor {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            models: None,
            template_cache: HashMap::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.models.is_some()
    }

    fn models(&self) -> Result<&Models> {
        self.models.as_ref()
            .ok_or_else(|| GymAuthError::ModelLoad("Model not loaded".into()))
    }

    /// All faces the detector reports, for diagnostics.
    pub fn detect_faces(&mut self, frame: &DynamicImage) -> Result<Vec<FaceBox>> {
        self.ensure_model_loaded()?;
        self.models()?.detector.detect(frame)
    }

    fn describe(&self, image: &DynamicImage) -> Result<Option<FaceDescriptor>> {
        let models = self.models()?;
        let faces = models.detector.detect(image)?;
        let Some(face) = select_face(&faces) else {
            return Ok(None);
        };
        if faces.len() > 1 {
            tracing::debug!("{} faces in frame, using the largest", faces.len());
        }

        let embedding = models.recognizer.get_embedding(image, face)?;
        Ok(Some(FaceDescriptor::normalized(embedding)))
    }
}

impl DescriptorExtractor for OnnxExtractor {
    fn ensure_model_loaded(&mut self) -> Result<()> {
        if self.models.is_some() {
            return Ok(());
        }

        tracing::info!("Loading face models...");
        let load = || -> Result<Models> {
            Ok(Models {
                detector: FaceDetector::new(&self.config)?,
                recognizer: FaceRecognizer::new(&self.config)?,
            })
        };
        let models = load().map_err(|e| match e {
            GymAuthError::ModelLoad(_) => e,
            other => GymAuthError::ModelLoad(other.to_string()),
        })?;

        self.models = Some(models);
        tracing::info!("Face models ready");
        Ok(())
    }

    fn extract(&mut self, frame: &DynamicImage) -> Result<Option<FaceDescriptor>> {
        self.describe(frame)
    }

    fn decode_template(&mut self, template: &str) -> Result<Option<FaceDescriptor>> {
        let key = Sha256::digest(template.as_bytes()).to_vec();
        if let Some(cached) = self.template_cache.get(&key) {
            return Ok(cached.clone());
        }

        let image = decode_template_image(template)?;
        let descriptor = self.describe(&image)?;

        if self.template_cache.len() >= TEMPLATE_CACHE_LIMIT {
            self.template_cache.clear();
        }
        self.template_cache.insert(key, descriptor.clone());
        Ok(descriptor)
    }
}
