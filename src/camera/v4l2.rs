use crate::camera::{CameraBackend, FacingMode, FrameStream};
use crate::common::config::{CameraConfig, AUTO_DETECT_DEVICE};
use crate::common::{GymAuthError, Result};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma};
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
    pub features: Vec<String>,
    pub likely_ir: bool,
}

/// Indices of all `/dev/videoN` nodes, sorted.
fn video_indices() -> Result<Vec<u32>> {
    let mut indices: Vec<u32> = fs::read_dir("/dev")?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            entry.file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("video"))
                .and_then(|index| index.parse::<u32>().ok())
        })
        .collect();
    indices.sort_unstable();
    Ok(indices)
}

fn is_grayscale(fourcc: &FourCC) -> bool {
    matches!(&fourcc.repr, b"GREY" | b"Y8  " | b"Y16 ")
}

/// List all available cameras with their capabilities
pub fn list_all_cameras() -> Result<Vec<CameraInfo>> {
    let mut cameras = Vec::new();

    for index in video_indices()? {
        let Ok(device) = Device::new(index as usize) else { continue };
        let Ok(caps) = device.query_caps() else { continue };

        let mut features = Vec::new();
        let mut likely_ir = false;

        if caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            features.push("VIDEO_CAPTURE".to_string());
        } else if caps.capabilities.contains(v4l::capability::Flags::META_CAPTURE) {
            features.push("METADATA_CAPTURE".to_string());
        }

        for fmt in device.enum_formats().unwrap_or_default() {
            let name = fmt.fourcc.str().unwrap_or("UNKNOWN").to_string();
            if is_grayscale(&fmt.fourcc) {
                features.push(format!("Grayscale ({})", name));
                likely_ir = true;
            } else if name == "MJPG" || name == "YUYV" {
                features.push(format!("Color ({})", name));
            }
        }

        if caps.card.contains("IR") || caps.card.contains("Infrared") {
            likely_ir = true;
        }

        cameras.push(CameraInfo { index, name: caps.card.clone(), features, likely_ir });
    }

    Ok(cameras)
}

/// Picks a capture device, preferring grayscale (IR) cameras. Falls back to
/// device 0 when nothing better is found.
pub fn detect_ir_camera() -> Result<u32> {
    let mut best: Option<(u32, String, u32)> = None;

    for camera in list_all_cameras()? {
        if !camera.features.iter().any(|f| f == "VIDEO_CAPTURE") {
            continue;
        }
        let priority = if camera.features.iter().any(|f| f.starts_with("Grayscale")) {
            100
        } else if camera.likely_ir {
            50
        } else {
            10
        };
        if best.as_ref().map_or(true, |(_, _, p)| priority > *p) {
            best = Some((camera.index, camera.name, priority));
        }
    }

    match best {
        Some((index, name, _)) => {
            tracing::info!("Selected camera: /dev/video{} ({})", index, name);
            Ok(index)
        }
        None => {
            tracing::warn!("No capture camera detected, falling back to /dev/video0");
            Ok(0)
        }
    }
}

/// Linux cameras through Video4Linux2.
pub struct V4l2Backend {
    config: CameraConfig,
}

impl V4l2Backend {
    pub fn new(config: &CameraConfig) -> Self {
        Self { config: config.clone() }
    }

    fn device_index(&self, facing: FacingMode) -> Result<u32> {
        match facing {
            FacingMode::User if self.config.device_index == AUTO_DETECT_DEVICE => detect_ir_camera(),
            FacingMode::User => Ok(self.config.device_index),
            FacingMode::Environment => self.config.rear_device_index.ok_or_else(|| {
                GymAuthError::Capture("No rear-facing camera configured".into())
            }),
        }
    }
}

impl CameraBackend for V4l2Backend {
    fn open(&mut self, facing: FacingMode) -> Result<Box<dyn FrameStream>> {
        let index = self.device_index(facing)?;
        tracing::info!("Opening camera device {}...", index);

        let device = Device::new(index as usize)
            .map_err(|e| GymAuthError::Capture(format!("Failed to open camera {}: {}", index, e)))?;

        let caps = device.query_caps()
            .map_err(|e| GymAuthError::Capture(format!("Failed to query capabilities: {}", e)))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!("Device {} may not support standard video capture", index);
        }

        let mut fmt = device.format()
            .map_err(|e| GymAuthError::Capture(format!("Failed to get format: {}", e)))?;

        fmt.width = self.config.width;
        fmt.height = self.config.height;
        // Keep grayscale for IR cameras, otherwise ask for MJPG
        if !is_grayscale(&fmt.fourcc) {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let format = device.format()
            .map_err(|e| GymAuthError::Capture(format!("Failed to get final format: {}", e)))?;

        if format.width != self.config.width || format.height != self.config.height {
            tracing::warn!("Camera resolution {}x{} differs from requested {}x{}",
                           format.width, format.height, self.config.width, self.config.height);
        }
        tracing::debug!("Camera format: {}x{} {}", format.width, format.height,
                        format.fourcc.str().unwrap_or("UNKNOWN"));

        Ok(Box::new(V4l2Stream {
            device: Some(device),
            format,
            warmup_frames: self.config.warmup_frames,
            warmup_delay: Duration::from_millis(self.config.warmup_delay_ms),
            warmed_up: false,
        }))
    }
}

struct V4l2Stream {
    device: Option<Device>,
    format: v4l::Format,
    warmup_frames: u32,
    warmup_delay: Duration,
    warmed_up: bool,
}

impl FrameStream for V4l2Stream {
    fn next_frame(&mut self) -> Result<DynamicImage> {
        let device = self.device.as_mut()
            .ok_or_else(|| GymAuthError::Capture("Camera stopped".into()))?;

        let mut stream = v4l::io::mmap::Stream::with_buffers(device, Type::VideoCapture, 4)
            .map_err(|e| GymAuthError::Capture(format!("Failed to create stream: {}", e)))?;

        // IR emitters need a few frames before the image settles
        if !self.warmed_up {
            for i in 0..self.warmup_frames {
                stream.next()
                    .map_err(|e| GymAuthError::Capture(format!("Failed to capture warmup frame {}: {}", i, e)))?;
                std::thread::sleep(self.warmup_delay);
            }
            self.warmed_up = true;
        }

        let (buf, _meta) = stream.next()
            .map_err(|e| GymAuthError::Capture(format!("Failed to capture: {}", e)))?;

        decode_frame(buf, &self.format)
    }

    fn stop(&mut self) {
        if self.device.take().is_some() {
            tracing::debug!("V4L2 device closed");
        }
    }
}

fn decode_frame(data: &[u8], format: &v4l::Format) -> Result<DynamicImage> {
    let (width, height) = (format.width, format.height);
    match &format.fourcc.repr {
        b"GREY" | b"Y8  " => {
            let pixels = data.get(..(width * height) as usize)
                .ok_or_else(|| GymAuthError::Capture("Short grayscale frame".into()))?;
            let buffer = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels.to_vec())
                .ok_or_else(|| GymAuthError::Capture("Failed to create grayscale image buffer".into()))?;
            Ok(DynamicImage::ImageLuma8(buffer))
        }
        b"YUYV" => {
            // Luma only: every other byte of a YUYV row is a Y sample
            let luma: Vec<u8> = data.iter().step_by(2).take((width * height) as usize).copied().collect();
            let buffer = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, luma)
                .ok_or_else(|| GymAuthError::Capture("Short YUYV frame".into()))?;
            Ok(DynamicImage::ImageLuma8(buffer))
        }
        b"MJPG" => Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?),
        other => Err(GymAuthError::Capture(format!(
            "Unsupported pixel format {}", String::from_utf8_lossy(other)
        ))),
    }
}
