//! Frame composition and presentation.
//!
//! The render loop describes each output frame as a [`ComposedFrame`]; the
//! pixel work happens in whatever [`Display`] consumes the frame queue.

use crate::{
    assets::{Frame, Rgb},
    effects::EffectState,
    events::SyncQueue,
    shared::RunFlag,
    Result,
};

/// Frames waiting for the presenter. Older frames are dropped first.
pub const FRAME_QUEUE_CAPACITY: usize = 2;

pub type FrameQueue = SyncQueue<ComposedFrame>;

/// Queue between the control loop and the presenter. Holds two frames so a
/// slow display only ever sees the newest ones.
pub fn frame_queue() -> FrameQueue {
    FrameQueue::bounded(FRAME_QUEUE_CAPACITY)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub image: Frame,
    /// Fraction of the output width, bounce already applied.
    pub scale: f64,
    pub tint: Rgb,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameContent {
    /// Strobe is lit: the whole output is one colour.
    Flash { color: Rgb },
    Composite {
        background: Option<Frame>,
        overlay: Option<Overlay>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposedFrame {
    pub sequence: u64,
    pub beat: f64,
    pub bpm: f64,
    pub content: FrameContent,
}

/// Latest picture of each layer, as handed to the compositor.
#[derive(Debug, Clone, Default)]
pub struct LayerFrames {
    pub background: Option<Frame>,
    pub foreground: Option<Frame>,
    /// Foreground asset scale in percent of the output width.
    pub foreground_scale: f64,
    pub tint: Option<Rgb>,
}

#[derive(Debug, Clone)]
pub struct Compositor {
    flash_color: Rgb,
    sequence: u64,
}

impl Compositor {
    pub fn new(flash_color: Rgb) -> Self {
        Self {
            flash_color,
            sequence: 0,
        }
    }

    /// Returns how many frames have been composed.
    pub fn frames_composed(&self) -> u64 {
        self.sequence
    }

    pub fn compose(
        &mut self,
        beat: f64,
        bpm: f64,
        effects: EffectState,
        layers: &LayerFrames,
    ) -> ComposedFrame {
        let content = if effects.strobe_lit {
            FrameContent::Flash {
                color: self.flash_color,
            }
        } else {
            let overlay = layers.foreground.as_ref().map(|image| Overlay {
                image: image.clone(),
                scale: layers.foreground_scale / 100.0 * effects.scale,
                tint: layers.tint.unwrap_or(Rgb::WHITE),
            });
            FrameContent::Composite {
                background: layers.background.clone(),
                overlay,
            }
        };

        let frame = ComposedFrame {
            sequence: self.sequence,
            beat,
            bpm,
            content,
        };
        self.sequence += 1;
        frame
    }
}

/// Destination of composed frames. Must never block the render loop.
pub trait FrameSink: Send + Sync {
    fn submit(&self, frame: ComposedFrame) -> Result<()>;
}

impl FrameSink for SyncQueue<ComposedFrame> {
    fn submit(&self, frame: ComposedFrame) -> Result<()> {
        if let Some(dropped) = self.push(frame)? {
            tracing::trace!(sequence = dropped.sequence, "presenter behind, dropped frame");
        }
        Ok(())
    }
}

/// Shows frames to the audience.
pub trait Display {
    fn present(&mut self, frame: &ComposedFrame) -> Result<()>;
}

/// Hands queued frames to `display` until `running` is cleared. Returns the
/// number of frames presented.
pub fn run_presenter(
    queue: &FrameQueue,
    display: &mut dyn Display,
    running: &RunFlag,
) -> Result<u64> {
    let mut presented = 0;
    while let Some(frame) = queue.wait_and_pop(running)? {
        match display.present(&frame) {
            Ok(()) => presented += 1,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => tracing::warn!(%err, sequence = frame.sequence, "present failed"),
        }
    }
    tracing::debug!(presented, "presenter stopped");
    Ok(presented)
}
