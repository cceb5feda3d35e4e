//! Synthetic `stub://` source.
//!
//! Produces a flat background with a bright square drifting slowly across the
//! frame. Reports zero dimensions until `connect()`, like a camera that has
//! not negotiated a format yet.

use anyhow::{anyhow, Result};

use super::{FrameSource, SourceConfig, SourceStats};
use crate::frame::VideoFrame;

pub struct SyntheticSource {
    config: SourceConfig,
    connected: bool,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            connected: false,
            frame_count: 0,
        }
    }

    fn frame_interval_ms(&self) -> u64 {
        1000 / u64::from(self.config.target_fps.max(1))
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        let side = w.min(h) / 3;
        let travel = w.saturating_sub(side).max(1);
        let left = (self.frame_count as usize * 2) % travel;
        let top = (h - side) / 2;

        let mut pixels = vec![32u8; w * h * 3];
        for y in top..top + side {
            let row = y * w * 3;
            for x in left..left + side {
                let offset = row + x * 3;
                pixels[offset..offset + 3].copy_from_slice(&[224, 200, 180]);
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(anyhow!(
                "synthetic source {} has zero dimensions",
                self.config.url
            ));
        }
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.config.url,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn dimensions(&self) -> (u32, u32) {
        if self.connected {
            (self.config.width, self.config.height)
        } else {
            (0, 0)
        }
    }

    fn is_ready(&self) -> bool {
        self.connected
    }

    fn next_frame(&mut self) -> Result<VideoFrame> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected"));
        }
        let pixels = self.generate_pixels();
        let timestamp_ms = self.frame_count * self.frame_interval_ms();
        self.frame_count += 1;
        VideoFrame::new(pixels, self.config.width, self.config.height, timestamp_ms)
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }

    fn release(&mut self) {
        if self.connected {
            log::info!("SyntheticSource: released {}", self.config.url);
        }
        self.connected = false;
    }
}
