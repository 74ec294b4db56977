use crate::core::detector::FaceBox;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

const SELECTED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const HIGH_CONF_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const LOW_CONF_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Draws every detection onto a copy of `image`. The face a login would use
/// is green, the rest yellow or red by confidence.
pub fn annotate_faces(image: &DynamicImage, faces: &[FaceBox], selected: Option<&FaceBox>) -> RgbImage {
    let mut img = image.to_rgb8();

    for face in faces {
        if face.width() <= 0.0 || face.height() <= 0.0 {
            continue;
        }

        let color = if Some(face) == selected {
            SELECTED_COLOR
        } else if face.confidence > 0.7 {
            HIGH_CONF_COLOR
        } else {
            LOW_CONF_COLOR
        };

        let x1 = face.x1.max(0.0) as i32;
        let y1 = face.y1.max(0.0) as i32;
        let x2 = face.x2.min(img.width() as f32) as i32;
        let y2 = face.y2.min(img.height() as f32) as i32;
        let rect_width = (x2 - x1).max(1) as u32;
        let rect_height = (y2 - y1).max(1) as u32;

        draw_hollow_rect_mut(&mut img, Rect::at(x1, y1).of_size(rect_width, rect_height), color);

        // Second pass for a two pixel border on the selected face
        if Some(face) == selected && rect_width > 2 && rect_height > 2 {
            let inner = Rect::at(x1 + 1, y1 + 1).of_size(rect_width - 2, rect_height - 2);
            draw_hollow_rect_mut(&mut img, inner, color);
        }
    }

    img
}
