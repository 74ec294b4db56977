// Core modules
pub mod core;
pub mod camera;
pub mod storage;
pub mod cli;
pub mod common;

// Re-export commonly used types
pub use common::{Config, DevMode, GymAuthError, Paths, Result};
pub use core::{
    DescriptorExtractor, FaceDescriptor, LoginGate, LoginHandoff, LoginMode, MatchLoop,
    OnnxExtractor, ScanOutcome, ScanState, ScanUpdate,
};
pub use camera::{CaptureDevice, CaptureHandle, FacingMode};
pub use storage::{AdminRecord, Roster, RosterFeed, SessionStore};
