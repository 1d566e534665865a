//! Core library for the Visual Hive live visual engine.
//!
//! A tempo source (network sync session or audio beat detection) drives a
//! beat clock; the control loop reads that clock to schedule beat-locked
//! effects and cue-quantized asset transitions, and hands composed frames to
//! a presenter. Decoding and pixel work stay behind the [`MediaBackend`] and
//! [`Display`] seams.

pub mod analysis;
pub mod assets;
pub mod audio;
pub mod clock;
pub mod config;
pub mod effects;
pub mod engine;
pub mod error;
pub mod events;
pub mod render;
pub mod shared;
pub mod smoothing;
pub mod tempo;
pub mod timeline;
pub mod transition;

#[cfg(test)]
mod test_support;

pub use analysis::TempoEstimator;
pub use assets::{
    ActiveAsset, AssetCatalog, AssetDescriptor, AssetSource, Frame, Layer, MediaBackend,
    Resolution, Rgb, VideoStream,
};
pub use audio::{AudioDetector, DetectionPipeline};
pub use clock::{is_near_grid_boundary, BeatClock, CueGate};
pub use config::{AppConfig, KeyBindings, TempoSourceKind};
pub use effects::{EffectFlags, EffectScheduler, EffectState};
pub use engine::ControlLoop;
pub use error::{Result, VisualHiveError};
pub use events::{Event, EventKind, EventQueue, SyncQueue};
pub use render::{
    frame_queue, run_presenter, ComposedFrame, Compositor, Display, FrameContent, FrameQueue,
    FrameSink, Overlay,
};
pub use shared::{RunFlag, SharedClockState};
pub use smoothing::TempoSmoother;
pub use tempo::{LocalSession, NetworkSync, SyncSession, TempoSource};
pub use timeline::{Micros, Timeline};
pub use transition::{StatusHandle, TransitionManager, TransitionStatus};
