use crate::camera::DisplaySurface;
use crate::core::detector::FaceBox;
use image::DynamicImage;
use std::io::{self, Write};
use std::sync::Mutex;
use crossterm::{
    terminal::{self, ClearType},
    cursor,
    queue,
};

const ASCII_RAMP: &str = " .·:;+=xX#@";
const DEFAULT_WIDTH: usize = 80;
const DEFAULT_HEIGHT: usize = 30;

pub struct AsciiRenderer {
    width: usize,
    height: usize,
}

impl AsciiRenderer {
    pub fn new(width: Option<usize>, height: Option<usize>) -> Self {
        let (term_width, term_height) = terminal::size()
            .map(|(w, h)| (w as usize, h as usize))
            .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));

        // Half resolution keeps redraws cheap
        Self {
            width: width.unwrap_or((term_width / 2).min(DEFAULT_WIDTH / 2)),
            height: height.unwrap_or((term_height.saturating_sub(5) / 2).min(DEFAULT_HEIGHT / 2)),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Renders the frame with an optional face outline and a status line
    /// centred underneath.
    pub fn render(&self, image: &DynamicImage, face: Option<&FaceBox>, status: &str) -> String {
        let mut grid = self.image_to_ascii(image);

        if let Some(face) = face {
            self.draw_face_box(&mut grid, face, image.width() as f32, image.height() as f32);
        }

        let mut out = self.grid_to_string(&grid);
        if !status.is_empty() {
            let pad = self.width.saturating_sub(status.chars().count()) / 2;
            out.push_str("\r\n");
            out.push_str(&" ".repeat(pad));
            out.push_str(status);
        }
        out
    }

    fn image_to_ascii(&self, image: &DynamicImage) -> Vec<Vec<char>> {
        let mut grid = vec![vec![' '; self.width]; self.height];
        let ramp: Vec<char> = ASCII_RAMP.chars().collect();

        let gray = image.to_luma8();
        let (img_width, img_height) = gray.dimensions();

        for (term_y, row) in grid.iter_mut().enumerate() {
            for (term_x, cell) in row.iter_mut().enumerate() {
                let img_x = (term_x as f32 / self.width as f32 * img_width as f32) as u32;
                let img_y = (term_y as f32 / self.height as f32 * img_height as f32) as u32;

                if img_x < img_width && img_y < img_height {
                    let brightness = gray.get_pixel(img_x, img_y)[0] as usize;
                    *cell = ramp[brightness * (ramp.len() - 1) / 255];
                }
            }
        }

        grid
    }

    fn draw_face_box(&self, grid: &mut [Vec<char>], face: &FaceBox, img_width: f32, img_height: f32) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        let scale_x = |v: f32| (((v / img_width) * self.width as f32).max(0.0) as usize).min(self.width - 1);
        let scale_y = |v: f32| (((v / img_height) * self.height as f32).max(0.0) as usize).min(self.height - 1);

        let (x1, x2) = (scale_x(face.x1), scale_x(face.x2));
        let (y1, y2) = (scale_y(face.y1), scale_y(face.y2));
        if x2 <= x1 || y2 <= y1 {
            return;
        }

        for x in (x1 + 1)..x2 {
            grid[y1][x] = '─';
            grid[y2][x] = '─';
        }
        for row in grid.iter_mut().take(y2).skip(y1 + 1) {
            row[x1] = '│';
            row[x2] = '│';
        }
        grid[y1][x1] = '┌';
        grid[y1][x2] = '┐';
        grid[y2][x1] = '└';
        grid[y2][x2] = '┘';
    }

    fn grid_to_string(&self, grid: &[Vec<char>]) -> String {
        grid.iter()
            .map(|row| row.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join("\r\n")
    }
}

/// Terminal preview for face login. Each captured frame is redrawn in place
/// with the latest scan status below it.
pub struct AsciiSurface {
    renderer: AsciiRenderer,
    status: Mutex<String>,
}

impl AsciiSurface {
    pub fn new() -> Self {
        Self {
            renderer: AsciiRenderer::new(None, None),
            status: Mutex::new(String::new()),
        }
    }

    pub fn set_status(&self, message: &str) {
        if let Ok(mut status) = self.status.lock() {
            *status = message.to_string();
        }
    }
}

impl Default for AsciiSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySurface for AsciiSurface {
    fn attach(&self) {
        if let Err(e) = clear_screen() {
            tracing::debug!("Failed to clear terminal: {}", e);
        }
    }

    fn show(&self, frame: &DynamicImage) {
        let status = self.status.lock().map(|s| s.clone()).unwrap_or_default();
        let rendered = self.renderer.render(frame, None, &status);

        let mut stdout = io::stdout();
        let result = queue!(stdout, cursor::MoveTo(0, 0))
            .and_then(|_| write!(stdout, "{}", rendered))
            .and_then(|_| queue!(stdout, terminal::Clear(ClearType::FromCursorDown)))
            .and_then(|_| stdout.flush());
        if let Err(e) = result {
            tracing::debug!("Failed to draw preview: {}", e);
        }
    }

    fn detach(&self) {
        println!();
    }
}

pub fn clear_screen() -> io::Result<()> {
    let mut stdout = io::stdout();
    queue!(stdout, terminal::Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    stdout.flush()
}
