//! Tempo source driven by beat detection on live audio.
//!
//! The estimator produces raw readings; [`DetectionPipeline`] samples them on
//! the read interval, smooths on the calculation interval and pushes the
//! published tempo into an [`AudioDetector`], which the render loop reads
//! like any other [`TempoSource`].

#[cfg(feature = "capture")]
mod capture;

#[cfg(feature = "capture")]
pub use capture::{list_input_devices, AudioCapture};

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::{
    config::{DetectionConfig, SmootherConfig},
    shared::SharedClockState,
    smoothing::TempoSmoother,
    timeline::{Micros, Timeline},
    Result, TempoSource, VisualHiveError,
};

/// Local beat clock whose tempo follows the detection pipeline.
pub struct AudioDetector {
    epoch: Instant,
    timeline: Mutex<Timeline>,
    shared: Arc<SharedClockState>,
}

impl AudioDetector {
    /// Detector publishing `initial_bpm` until the first reading lands.
    pub fn new(initial_bpm: f64, shared: Arc<SharedClockState>) -> Self {
        let timeline = Timeline::new(initial_bpm, 0);
        shared.store_bpm(timeline.tempo());
        Self {
            epoch: Instant::now(),
            timeline: Mutex::new(timeline),
            shared,
        }
    }

    pub fn shared(&self) -> &Arc<SharedClockState> {
        &self.shared
    }

    /// Re-bases the timeline onto `bpm` so the beat stays continuous.
    pub fn publish_tempo(&self, bpm: f64) -> Result<()> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Ok(());
        }
        let at = self.now();
        let mut timeline = self.lock_timeline()?;
        let previous = timeline.tempo();
        timeline.set_tempo(bpm, at);
        let tempo = timeline.tempo();
        drop(timeline);

        self.shared.store_bpm(tempo);
        if tempo != previous {
            tracing::info!(bpm = tempo, previous, "detected tempo changed");
        }
        Ok(())
    }

    fn lock_timeline(&self) -> Result<MutexGuard<'_, Timeline>> {
        self.timeline
            .lock()
            .map_err(|_| VisualHiveError::Poisoned("detector timeline"))
    }
}

impl TempoSource for AudioDetector {
    fn name(&self) -> &'static str {
        "audio"
    }

    fn now(&self) -> Micros {
        self.epoch.elapsed().as_micros() as Micros
    }

    fn tempo(&self) -> f64 {
        self.shared.bpm()
    }

    fn beat_at_time(&self, at: Micros) -> f64 {
        match self.lock_timeline() {
            Ok(timeline) => timeline.beat_at_time(at),
            Err(err) => {
                tracing::warn!(%err, "beat position unavailable");
                0.0
            }
        }
    }

    fn realign(&self, at: Micros) {
        match self.lock_timeline() {
            Ok(mut timeline) => {
                let offset = timeline.realign(at);
                tracing::info!(source = self.name(), offset, "realigned beat origin");
            }
            Err(err) => tracing::warn!(%err, "realign skipped"),
        }
    }
}

impl fmt::Debug for AudioDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioDetector")
            .field("bpm", &self.shared.bpm())
            .finish()
    }
}

/// Turns a stream of raw estimator readings into published tempo values.
#[derive(Debug)]
pub struct DetectionPipeline {
    smoother: TempoSmoother,
    read_interval: Duration,
    calculation_interval: Duration,
    readings: Vec<f64>,
    last_reading: Option<Instant>,
    last_calculation: Option<Instant>,
}

impl DetectionPipeline {
    pub fn new(detection: &DetectionConfig, smoothing: &SmootherConfig) -> Self {
        Self {
            smoother: TempoSmoother::new(smoothing.clone()),
            read_interval: Duration::from_millis(detection.read_interval_ms),
            calculation_interval: Duration::from_millis(detection.calculation_interval_ms),
            readings: Vec::new(),
            last_reading: None,
            last_calculation: None,
        }
    }

    /// Returns the smoother fed by this pipeline.
    pub fn smoother(&self) -> &TempoSmoother {
        &self.smoother
    }

    /// Readings collected since the last calculation.
    pub fn pending_readings(&self) -> &[f64] {
        &self.readings
    }

    /// Feeds the latest raw estimate observed at `now`. Returns the newly
    /// published tempo when a calculation ran.
    pub fn observe(&mut self, raw_bpm: Option<f64>, now: Instant) -> Option<f64> {
        if due(self.last_reading, self.read_interval, now) {
            self.last_reading = Some(now);
            if let Some(raw) = raw_bpm.filter(|raw| raw.is_finite() && *raw > 0.0) {
                self.readings.push(raw);
            }
        }

        let Some(started) = self.last_calculation else {
            self.last_calculation = Some(now);
            return None;
        };
        if now.saturating_duration_since(started) < self.calculation_interval {
            return None;
        }
        self.last_calculation = Some(now);

        let reading = median(&mut self.readings)?;
        self.readings.clear();
        self.smoother.accept(reading);
        let published = self.smoother.publish();
        (published > 0.0).then_some(published)
    }

    /// Runs [`observe`](Self::observe) and forwards any result to `detector`.
    pub fn drive(
        &mut self,
        raw_bpm: Option<f64>,
        now: Instant,
        detector: &AudioDetector,
    ) -> Result<Option<f64>> {
        let published = self.observe(raw_bpm, now);
        if let Some(bpm) = published {
            detector.publish_tempo(bpm)?;
        }
        Ok(published)
    }
}

fn due(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
    last.map_or(true, |last| now.saturating_duration_since(last) >= interval)
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> DetectionPipeline {
        let smoothing = SmootherConfig {
            drift_correction: 0.0,
            ..SmootherConfig::default()
        };
        DetectionPipeline::new(&DetectionConfig::default(), &smoothing)
    }

    #[test]
    fn median_of_readings() {
        assert_eq!(median(&mut []), None);
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }

    #[test]
    fn readings_respect_read_interval() {
        let start = Instant::now();
        let mut pipeline = pipeline();

        pipeline.observe(Some(120.0), start);
        pipeline.observe(Some(121.0), start + Duration::from_millis(50));
        pipeline.observe(Some(122.0), start + Duration::from_millis(100));
        pipeline.observe(None, start + Duration::from_millis(200));

        assert_eq!(pipeline.pending_readings(), &[120.0, 122.0]);
    }

    #[test]
    fn publishes_on_calculation_interval() {
        let start = Instant::now();
        let mut pipeline = pipeline();

        let mut published = Vec::new();
        for step in 0..=10u64 {
            let now = start + Duration::from_millis(step * 100);
            if let Some(bpm) = pipeline.observe(Some(119.8 + (step % 3) as f64 * 0.2), now) {
                published.push((step, bpm));
            }
        }

        // Calculations at 500 ms and 1000 ms.
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, 5);
        assert_eq!(published[0].1, 120.0);
        assert_eq!(published[1].1, 120.0);
        assert!(pipeline.pending_readings().is_empty());
    }

    #[test]
    fn half_tempo_readings_are_folded() {
        let start = Instant::now();
        let mut pipeline = pipeline();
        pipeline.observe(Some(64.0), start);
        let bpm = pipeline.observe(Some(64.0), start + Duration::from_millis(500));
        assert_eq!(bpm, Some(128.0));
    }

    #[test]
    fn detector_keeps_beat_continuous_across_tempo_change() {
        let shared = Arc::new(SharedClockState::default());
        let detector = AudioDetector::new(120.0, Arc::clone(&shared));
        assert_eq!(shared.bpm(), 120.0);

        let at = detector.now();
        let before = detector.beat_at_time(at);
        detector.publish_tempo(90.0).unwrap();
        let after = detector.beat_at_time(at);

        assert_eq!(detector.tempo(), 90.0);
        assert!((before - after).abs() < 1e-3);
        assert_eq!(detector.peer_count(), 0);
        assert_eq!(detector.name(), "audio");
    }

    #[test]
    fn drive_forwards_to_detector() {
        let start = Instant::now();
        let shared = Arc::new(SharedClockState::default());
        let detector = AudioDetector::new(100.0, Arc::clone(&shared));
        let mut pipeline = pipeline();

        pipeline.drive(Some(140.0), start, &detector).unwrap();
        let published = pipeline
            .drive(Some(140.0), start + Duration::from_millis(500), &detector)
            .unwrap();

        assert_eq!(published, Some(140.0));
        assert_eq!(shared.bpm(), 140.0);
    }

    #[test]
    fn detector_realign_lands_on_whole_beat() {
        let detector = AudioDetector::new(120.0, Arc::default());
        let at = 1_250_000;
        detector.realign(at);
        let beat = detector.beat_at_time(at);
        assert!((beat - beat.round()).abs() < 1e-9);
    }
}
