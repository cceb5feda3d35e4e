//! Facemark
//!
//! Live face tracking and local embedding recognition for attendance kiosks.
//!
//! # Architecture
//!
//! ```text
//! FrameSource ─► DetectionLoop ─► FrameReport ─► TrackingPipeline ─► OverlaySink
//!                   │ (DetectorManager)               │
//!                   ▼                                 ├─ SharedFaces (backend results)
//!               FaceDetector                          └─ EmbeddingFeed (known users)
//! ```
//!
//! The tracker guarantees, per frame:
//!
//! 1. **Exclusive names**: no identity is displayed on two boxes at once.
//! 2. **No ghosting**: a track whose box jumps beyond the drift limit is dropped
//!    rather than carrying its name to a different face.
//! 3. **Debounced labels**: confidence is smoothed and a known name survives a
//!    brief "Unknown" while the track has a streak of confirmations.
//! 4. **No resurrection**: delayed reverification never recreates or relabels a
//!    track that was evicted or rebound in the meantime.
//!
//! # Module Structure
//!
//! - `frame`: Raw frame isolation (VideoFrame, DetectorView, StillFrame)
//! - `ingest`: Frame sources (synthetic, V4L2)
//! - `detect`: Face detector capability and its lifecycle manager
//! - `detection_loop`: Per-frame detection cycle and its thread handle
//! - `tracker`: Identity tracking across frames
//! - `matcher`: Strict cosine matching against known embeddings
//! - `pipeline`: Loop → tracker → overlay glue
//! - `replay`: Recorded sessions run through the tracker on their own clock

pub mod config;
pub mod detect;
pub mod detection_loop;
pub mod embeddings;
pub mod feed;
pub mod frame;
pub mod geometry;
pub mod identity;
pub mod ingest;
pub mod matcher;
pub mod overlay;
pub mod pipeline;
pub mod replay;
pub mod tracker;
pub mod ui;

pub use config::FacemarkConfig;
pub use detect::{DetectionBox, DetectionResult, DetectorManager, FaceDetector};
pub use detection_loop::{DetectionLoop, DetectionObserver, FrameReport, LoopHandle, TickOutcome};
pub use embeddings::{EmbeddingCacheEntry, EmbeddingFeed, EmbeddingSnapshot, SharedEmbeddings};
pub use feed::{BackendFace, SharedFaces};
pub use frame::{DetectorView, StillFrame, VideoFrame};
pub use geometry::Rect;
pub use identity::Identity;
pub use ingest::{open_source, FrameSource, SourceConfig};
pub use matcher::{strict_match, MatchOptions, MatchOutcome};
pub use overlay::{LabelStyle, OverlayGeometry};
pub use pipeline::{OverlaySink, TrackingPipeline};
pub use tracker::{FrameOverlay, IdentityTracker, LabeledBox, TrackerConfig};
