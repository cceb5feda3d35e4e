pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{ScriptedFrame, StubDetector, StubControls};

#[cfg(feature = "backend-tract")]
pub use tract::TractDetector;
