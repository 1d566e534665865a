//! Doubles shared by the unit tests.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicI64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    assets::{AssetDescriptor, AssetSource, Frame, Layer, MediaBackend, Resolution, VideoStream},
    tempo::{SyncSession, TempoCallback},
    timeline::{Micros, Timeline},
    Result, VisualHiveError,
};

pub(crate) fn background(name: &str, key: char) -> AssetDescriptor {
    AssetDescriptor::new(
        name,
        Layer::Background,
        AssetSource::Video {
            path: PathBuf::from(format!("backgrounds/{name}.mp4")),
        },
    )
    .with_key(key)
}

pub(crate) fn foreground(name: &str, key: char) -> AssetDescriptor {
    AssetDescriptor::new(
        name,
        Layer::Foreground,
        AssetSource::Image {
            path: PathBuf::from(format!("foregrounds/{name}.png")),
        },
    )
    .with_key(key)
}

#[derive(Debug, Default)]
struct Counters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    rewinds: AtomicUsize,
}

/// Media backend that hands out tiny frames and counts every call.
#[derive(Debug, Clone)]
pub(crate) struct CountingBackend {
    counters: Arc<Counters>,
    frames_per_loop: usize,
    fail_all: bool,
    fail_on: Vec<String>,
}

impl Default for CountingBackend {
    fn default() -> Self {
        Self {
            counters: Arc::default(),
            frames_per_loop: 1_000,
            fail_all: false,
            fail_on: Vec::new(),
        }
    }
}

impl CountingBackend {
    pub(crate) fn with_frames(frames_per_loop: usize) -> Self {
        Self {
            frames_per_loop,
            ..Self::default()
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    /// Fails any path containing one of `names`.
    pub(crate) fn failing_on(names: &[&str]) -> Self {
        Self {
            fail_on: names.iter().map(|name| name.to_string()).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn rewinds(&self) -> usize {
        self.counters.rewinds.load(Ordering::SeqCst)
    }

    fn check(&self, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        if self.fail_all || self.fail_on.iter().any(|name| path.contains(name.as_str())) {
            return Err(VisualHiveError::msg(format!("cannot decode {path}")));
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl MediaBackend for CountingBackend {
    fn open_video(&self, path: &Path) -> Result<Box<dyn VideoStream>> {
        self.check(path)?;
        Ok(Box::new(CountingStream {
            counters: Arc::clone(&self.counters),
            total: self.frames_per_loop,
            remaining: self.frames_per_loop,
        }))
    }

    fn load_image(&self, path: &Path) -> Result<Frame> {
        self.check(path)?;
        Ok(Frame::solid(Resolution::new(2, 2), crate::assets::Rgb(0, 0, 255)))
    }
}

struct CountingStream {
    counters: Arc<Counters>,
    total: usize,
    remaining: usize,
}

impl VideoStream for CountingStream {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(Frame::solid(Resolution::new(2, 2), crate::assets::Rgb(0, 255, 0))))
    }

    fn rewind(&mut self) -> Result<()> {
        self.counters.rewinds.fetch_add(1, Ordering::SeqCst);
        self.remaining = self.total;
        Ok(())
    }

    fn fps(&self) -> Option<f64> {
        Some(25.0)
    }

    fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sync session whose clock only moves when the test says so.
pub(crate) struct ManualSession {
    now: AtomicI64,
    timeline: Mutex<Timeline>,
    callbacks: Mutex<Vec<TempoCallback>>,
}

impl ManualSession {
    pub(crate) fn new(tempo_bpm: f64) -> Self {
        Self {
            now: AtomicI64::new(0),
            timeline: Mutex::new(Timeline::new(tempo_bpm, 0)),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_now(&self, at: Micros) {
        self.now.store(at, Ordering::SeqCst);
    }
}

impl SyncSession for ManualSession {
    fn clock_micros(&self) -> Micros {
        self.now.load(Ordering::SeqCst)
    }

    fn capture_timeline(&self) -> Timeline {
        *self.timeline.lock().unwrap()
    }

    fn commit_timeline(&self, timeline: Timeline) {
        let previous = std::mem::replace(&mut *self.timeline.lock().unwrap(), timeline);
        if previous.tempo() != timeline.tempo() {
            for callback in self.callbacks.lock().unwrap().iter() {
                callback(timeline.tempo());
            }
        }
    }

    fn peer_count(&self) -> usize {
        1
    }

    fn on_tempo_change(&self, callback: TempoCallback) {
        self.callbacks.lock().unwrap().push(callback);
    }
}
