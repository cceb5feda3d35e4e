//! Raw video frame isolation.
//!
//! - `VideoFrame`: opaque container for RGB pixels. Bytes are private.
//! - `DetectorView`: borrowed view a detector runs on. The borrow ends with
//!   the detector call, so pixels cannot be retained.
//! - `StillFrame`: the one explicit export path, used by the capture action.
//!
//! Pixel buffers are zeroized on drop.

use anyhow::{anyhow, Result};
use std::time::Instant;
use zeroize::Zeroize;

/// Opaque RGB8 frame. There is no `Clone` and no byte accessor.
pub struct VideoFrame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Source-relative capture time.
    pub timestamp_ms: u64,
    capture_instant: Instant,
}

impl VideoFrame {
    /// Wrap `data` as a `width` x `height` RGB8 frame.
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ms: u64) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp_ms,
            capture_instant: Instant::now(),
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn detector_view(&self) -> DetectorView<'_> {
        DetectorView { frame: self }
    }

    /// Milliseconds since the frame was captured.
    pub fn age_ms(&self) -> u128 {
        self.capture_instant.elapsed().as_millis()
    }

    /// Copy the pixels out as a still for the capture action.
    pub fn grab_still(&self) -> StillFrame {
        StillFrame {
            rgb: self.data.clone(),
            width: self.width,
            height: self.height,
            timestamp_ms: self.timestamp_ms,
        }
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_ms", &self.timestamp_ms)
            .finish_non_exhaustive()
    }
}

impl Drop for VideoFrame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

/// What a detector sees of a frame.
pub struct DetectorView<'a> {
    frame: &'a VideoFrame,
}

impl<'a> DetectorView<'a> {
    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.frame.timestamp_ms
    }

    /// Read-only RGB8 pixels, row-major. Valid only for the detector call.
    pub fn pixels(&self) -> &'a [u8] {
        &self.frame.data
    }
}

/// Still image grabbed for the authoritative capture action.
pub struct StillFrame {
    rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: u64,
}

impl StillFrame {
    pub fn rgb(&self) -> &[u8] {
        &self.rgb
    }

    /// Encode as JPEG.
    #[cfg(feature = "still-jpeg")]
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        use image::codecs::jpeg::JpegEncoder;
        use image::ExtendedColorType;

        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode(&self.rgb, self.width, self.height, ExtendedColorType::Rgb8)
            .map_err(|e| anyhow!("jpeg encode failed: {}", e))?;
        Ok(out)
    }
}

impl std::fmt::Debug for StillFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StillFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_ms", &self.timestamp_ms)
            .finish_non_exhaustive()
    }
}

impl Drop for StillFrame {
    fn drop(&mut self) {
        self.rgb.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32) -> VideoFrame {
        let data = vec![7u8; (width * height * 3) as usize];
        VideoFrame::new(data, width, height, 33).unwrap()
    }

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(VideoFrame::new(vec![0u8; 10], 4, 4, 0).is_err());
    }

    #[test]
    fn detector_view_exposes_metadata() {
        let frame = frame(4, 2);
        let view = frame.detector_view();
        assert_eq!(view.width(), 4);
        assert_eq!(view.height(), 2);
        assert_eq!(view.timestamp_ms(), 33);
        assert_eq!(view.pixels().len(), 24);
    }

    #[test]
    fn still_copies_pixels() {
        let frame = frame(2, 2);
        let still = frame.grab_still();
        drop(frame);
        assert_eq!(still.rgb(), &[7u8; 12][..]);
        assert_eq!((still.width, still.height), (2, 2));
    }

    #[cfg(feature = "still-jpeg")]
    #[test]
    fn still_encodes_jpeg() {
        let still = frame(8, 8).grab_still();
        let jpeg = still.to_jpeg(80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
