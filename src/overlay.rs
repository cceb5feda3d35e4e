//! Overlay geometry and label styling.
//!
//! Detection boxes arrive in native video pixels. The overlay surface is
//! either resized to the native resolution (desktop) or follows the on-screen
//! element size (mobile), and the preview is usually mirrored.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::detect::DetectionBox;
use crate::geometry::Rect;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlayGeometry {
    pub video_width: u32,
    pub video_height: u32,
    /// On-screen size of the video element.
    pub display_width: f32,
    pub display_height: f32,
    pub mobile: bool,
    pub mirrored: bool,
}

impl OverlayGeometry {
    /// Desktop, mirrored, display size equal to the native size.
    pub fn new(video_width: u32, video_height: u32) -> Self {
        Self {
            video_width,
            video_height,
            display_width: video_width as f32,
            display_height: video_height as f32,
            mobile: false,
            mirrored: true,
        }
    }

    pub fn with_display(mut self, width: f32, height: f32) -> Self {
        self.display_width = width;
        self.display_height = height;
        self
    }

    pub fn with_mobile(mut self, mobile: bool) -> Self {
        self.mobile = mobile;
        self
    }

    pub fn with_mirrored(mut self, mirrored: bool) -> Self {
        self.mirrored = mirrored;
        self
    }

    /// Resolution the overlay surface should be drawn at.
    pub fn surface_size(&self) -> (f32, f32) {
        if self.mobile {
            (self.display_width, self.display_height)
        } else {
            (self.video_width as f32, self.video_height as f32)
        }
    }

    /// Per-axis scale from native video pixels to surface pixels.
    pub fn scale(&self) -> (f32, f32) {
        if !self.mobile || self.video_width == 0 || self.video_height == 0 {
            return (1.0, 1.0);
        }
        (
            self.display_width / self.video_width as f32,
            self.display_height / self.video_height as f32,
        )
    }

    pub fn project(&self, detection: &DetectionBox) -> Rect {
        let (sx, sy) = self.scale();
        let (surface_width, _) = self.surface_size();
        let w = detection.width * sx;
        let h = detection.height * sy;
        let x = if self.mirrored {
            surface_width - (detection.origin_x + detection.width) * sx
        } else {
            detection.origin_x * sx
        };
        Rect::new(x, detection.origin_y * sy, w, h)
    }

    pub fn project_all(&self, detections: &[DetectionBox]) -> Vec<Rect> {
        detections.iter().map(|d| self.project(d)).collect()
    }
}

/// Mobile heuristic used to pick the surface sizing mode.
pub fn is_mobile_user_agent(user_agent: &str) -> bool {
    static MOBILE: OnceLock<Option<Regex>> = OnceLock::new();
    MOBILE
        .get_or_init(|| Regex::new(r"(?i)Android|iPhone|iPad|iPod").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(user_agent))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelStyle {
    Scanning,
    Confirmed,
    Unknown,
}

impl LabelStyle {
    pub fn rgba(&self) -> &'static str {
        match self {
            LabelStyle::Scanning => "rgba(56,189,248,0.9)",
            LabelStyle::Confirmed => "rgba(34,197,94,0.9)",
            LabelStyle::Unknown => "rgba(239,68,68,0.9)",
        }
    }
}

pub const SCANNING_LABEL: &str = "Scanning...";

/// `"Name (NN%)"`, with confidence given as a fraction.
pub fn confirmed_label(name: &str, confidence: f32) -> String {
    format!("{} ({}%)", name, percent(confidence))
}

/// Fraction in `[0, 1]` to a whole percentage.
pub fn percent(confidence: f32) -> u8 {
    (confidence.clamp(0.0, 1.0) * 100.0).round() as u8
}
