//! Frame sources.
//!
//! - Synthetic `stub://` source (tests, demos)
//! - USB/V4L2 webcams (feature: ingest-v4l2)
//!
//! All sources produce `VideoFrame` instances. Sources MUST NOT store frames
//! to disk, forward them over the network or log pixel content.

mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::VideoFrame;

pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Where and how to capture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// `stub://<name>`, `/dev/videoN` or `v4l2:///dev/videoN`.
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Whether the preview is shown horizontally flipped.
    pub mirrored: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://webcam".to_string(),
            width: 640,
            height: 480,
            target_fps: 30,
            mirrored: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// A live video source the detection loop pulls frames from.
pub trait FrameSource: Send {
    /// Acquire the underlying device.
    fn connect(&mut self) -> Result<()>;

    /// Current frame size. `(0, 0)` until the source has negotiated a format.
    fn dimensions(&self) -> (u32, u32);

    /// True once frames can be read.
    fn is_ready(&self) -> bool;

    fn next_frame(&mut self) -> Result<VideoFrame>;

    /// False after a capture error or when frames have stopped arriving.
    /// A later successful `next_frame` brings the source back.
    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;

    /// Give the device back. Safe to call more than once.
    fn release(&mut self);
}

/// Build an unconnected source for `config.url`.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    if config.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config.clone())));
    }
    if config.url.starts_with("/dev/video") || config.url.starts_with("v4l2://") {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(V4l2Source::new(config.clone())));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            return Err(anyhow!(
                "{} requires the ingest-v4l2 feature",
                config.url
            ));
        }
    }
    Err(anyhow!("unsupported source url: {}", config.url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_urls_open_synthetic_source() {
        let source = open_source(&SourceConfig::default()).unwrap();
        assert_eq!(source.dimensions(), (0, 0));
        assert!(!source.is_ready());
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let config = SourceConfig {
            url: "rtsp://camera/stream".into(),
            ..SourceConfig::default()
        };
        assert!(open_source(&config).is_err());
    }
}
