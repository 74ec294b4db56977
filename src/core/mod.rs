pub mod credentials;
pub mod detector;
pub mod extractor;
pub mod gate;
pub mod matcher;
pub mod recognizer;
pub mod recovery;

pub use credentials::authenticate;
pub use detector::{FaceBox, FaceDetector};
pub use extractor::{DescriptorExtractor, FaceDescriptor, OnnxExtractor, distance, select_face};
pub use gate::{LoginGate, LoginHandoff, LoginMode, SuccessCallback};
pub use matcher::{MatchCallback, MatchLoop, ScanHandle, ScanOutcome, ScanState, ScanUpdate, find_match};
pub use recognizer::FaceRecognizer;
pub use recovery::{RecoveredPassword, recover};
