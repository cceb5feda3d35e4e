//! V4L2 webcam source.
//!
//! The device handle and its mmap stream live together in a `CameraLease`.
//! Dropping the lease stops streaming and closes the device, so the camera
//! is given back on `release()`, on drop, or when `connect()` fails halfway.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{FrameSource, SourceConfig, SourceStats};
use crate::frame::VideoFrame;

#[self_referencing]
struct CameraLease {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Source {
    config: SourceConfig,
    lease: Option<CameraLease>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    connected_at: Option<Instant>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl V4l2Source {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            lease: None,
            format: PixelFormat::Rgb24,
            active_width: 0,
            active_height: 0,
            connected_at: None,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn device_path(&self) -> &str {
        self.config
            .url
            .strip_prefix("v4l2://")
            .unwrap_or(&self.config.url)
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(u64::from(base_ms.max(2_000)))
    }
}

impl FrameSource for V4l2Source {
    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        self.release();
        let path = self.device_path().to_string();
        let mut device =
            v4l::Device::with_path(&path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set RGB3 on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!("v4l2 device {} offers unsupported format {}", path, format.fourcc)
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", path, err);
            }
        }

        let lease = CameraLeaseBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;

        self.lease = Some(lease);
        self.format = pixel_format;
        self.active_width = format.width;
        self.active_height = format.height;
        self.connected_at = Some(Instant::now());
        self.last_error = None;

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            path,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn dimensions(&self) -> (u32, u32) {
        if self.lease.is_some() {
            (self.active_width, self.active_height)
        } else {
            (0, 0)
        }
    }

    fn is_ready(&self) -> bool {
        self.lease.is_some()
    }

    fn next_frame(&mut self) -> Result<VideoFrame> {
        use v4l::io::traits::CaptureStream;

        let lease = self.lease.as_mut().context("v4l2 device not connected")?;
        let raw = lease
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;

        let rgb = normalize_to_rgb(&raw, self.active_width, self.active_height, self.format)?;
        self.frame_count += 1;
        self.last_error = None;
        let now = Instant::now();
        self.last_frame_at = Some(now);
        let timestamp_ms = self
            .connected_at
            .map(|at| now.duration_since(at).as_millis() as u64)
            .unwrap_or(0);

        VideoFrame::new(rgb, self.active_width, self.active_height, timestamp_ms)
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }

    fn release(&mut self) {
        if self.lease.take().is_some() {
            log::info!("V4l2Source: released {}", self.device_path());
        }
        self.connected_at = None;
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.release();
    }
}
