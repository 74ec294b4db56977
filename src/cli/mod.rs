pub mod annotate;
pub mod ascii_preview;

pub use annotate::annotate_faces;
pub use ascii_preview::{AsciiRenderer, AsciiSurface, clear_screen};
