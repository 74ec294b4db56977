use crate::common::{Config, GymAuthError, Result};
use crate::common::config::RecognizerConfig;
use crate::core::detector::{build_environment, build_session, FaceBox};
use ort::{Environment, Session, Value};
use std::sync::Arc;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};

/// Embedding network turning a cropped face into a raw feature vector.
pub struct FaceRecognizer {
    session: Session,
    _environment: Arc<Environment>,
    config: RecognizerConfig,
}

impl FaceRecognizer {
    pub fn new(config: &Config) -> Result<Self> {
        let environment = build_environment("face_recognizer")?;
        let session = build_session(
            &environment,
            &config.models.recognizer_path,
            config.performance.optimization_level,
        )?;

        Ok(Self {
            session,
            _environment: environment,
            config: config.recognizer.clone(),
        })
    }

    pub fn get_embedding(&self, image: &DynamicImage, face: &FaceBox) -> Result<Vec<f32>> {
        let size = self.config.input_size;
        let face_img = crop_face(image, face)
            .resize_exact(size, size, FilterType::Triangle);

        let input = preprocess_face(&face_img, size as usize, self.config.normalization_value);
        let cow_array = CowArray::from(input.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let output = outputs.first()
            .ok_or_else(|| GymAuthError::Model("Recognizer produced no output".into()))?;
        let embedding = output.try_extract::<f32>()?.view().iter().copied().collect();
        Ok(embedding)
    }
}

/// Face coordinates are already in original image space.
fn crop_face(image: &DynamicImage, face: &FaceBox) -> DynamicImage {
    let x = face.x1.max(0.0) as u32;
    let y = face.y1.max(0.0) as u32;
    let width = face.width().max(1.0) as u32;
    let height = face.height().max(1.0) as u32;

    image.crop_imm(x, y, width, height)
}

/// Single-channel input, ArcFace-style `(p - n) / n` normalisation.
fn preprocess_face(img: &DynamicImage, size: usize, norm: f32) -> Array4<f32> {
    let gray = img.to_luma8();
    let mut array = Array4::<f32>::zeros((1, 1, size, size));

    for (x, y, pixel) in gray.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        if x < size && y < size {
            array[[0, 0, y, x]] = (pixel[0] as f32 - norm) / norm;
        }
    }

    array
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn preprocess_maps_pixels_into_unit_range() {
        let mut img = GrayImage::new(2, 2);
        img.put_pixel(0, 0, Luma([0]));
        img.put_pixel(1, 0, Luma([255]));
        let array = preprocess_face(&DynamicImage::ImageLuma8(img), 2, 127.5);

        assert_eq!(array[[0, 0, 0, 0]], -1.0);
        assert_eq!(array[[0, 0, 0, 1]], 1.0);
    }

    #[test]
    fn crop_clamps_negative_origin() {
        let img = DynamicImage::new_luma8(100, 100);
        let face = FaceBox { x1: -5.0, y1: -5.0, x2: 40.0, y2: 30.0, confidence: 0.9 };
        let cropped = crop_face(&img, &face);
        assert_eq!((cropped.width(), cropped.height()), (45, 35));
    }
}
