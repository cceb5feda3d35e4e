//! Box geometry shared by the overlay projection and the tracker.

use serde::{Deserialize, Serialize};

/// Axis-aligned box in overlay pixel space. `(x, y)` is the top-left corner.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// Intersection-over-Union. Degenerate boxes yield 0.
    pub fn iou(&self, other: &Rect) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Exponential smoothing toward `self`: `alpha * self + (1 - alpha) * previous`.
    pub fn smoothed(&self, previous: &Rect, alpha: f32) -> Rect {
        let mix = |current: f32, prev: f32| alpha * current + (1.0 - alpha) * prev;
        Rect {
            x: mix(self.x, previous.x),
            y: mix(self.y, previous.y),
            w: mix(self.w, previous.w),
            h: mix(self.h, previous.h),
        }
    }

    /// True when either center axis moved more than `limit` pixels.
    pub fn drifted_from(&self, other: &Rect, limit: f32) -> bool {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (ax - bx).abs() > limit || (ay - by).abs() > limit
    }
}

pub fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}
