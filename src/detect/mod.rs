mod backend;
mod backends;
mod manager;
mod result;

pub use backend::FaceDetector;
pub use backends::{ScriptedFrame, StubDetector, StubControls};
pub use manager::{DetectorFactory, DetectorManager, SharedDetector};
pub use result::{DetectionBox, DetectionResult};

#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
