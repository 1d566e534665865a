//! Beat clock used by the render loop: wraps the active tempo source and adds
//! the beat-grid queries the cue logic relies on.

use std::{fmt, sync::Arc};

use crate::{config::TempoConfig, timeline::Micros, TempoSource};

/// True when `value`, shifted by `displacement`, sits within `tolerance` beats
/// of a multiple of `divisor`. Both sides of the boundary count, so
/// `31.9999` and `0.0001` are both near a 32-beat boundary.
pub fn is_near_grid_boundary(value: f64, displacement: f64, divisor: f64, tolerance: f64) -> bool {
    if divisor <= 0.0 {
        return false;
    }
    let remainder = (value - displacement).rem_euclid(divisor);
    remainder < tolerance || divisor - remainder < tolerance
}

/// Beat grid view over the active tempo source.
pub struct BeatClock {
    source: Arc<dyn TempoSource>,
    quantum: f64,
    cue_interval: f64,
    displacement: f64,
}

impl BeatClock {
    pub fn new(source: Arc<dyn TempoSource>, quantum: f64, cue_interval: f64) -> Self {
        Self {
            source,
            quantum,
            cue_interval,
            displacement: 0.0,
        }
    }

    /// Clock with quantum and cue interval from the tempo section.
    pub fn from_config(source: Arc<dyn TempoSource>, config: &TempoConfig) -> Self {
        Self::new(source, config.quantum, config.cue_beat_interval)
    }

    /// Returns the tempo source the clock reads from.
    pub fn source(&self) -> &Arc<dyn TempoSource> {
        &self.source
    }

    /// Current session time in microseconds.
    pub fn now(&self) -> Micros {
        self.source.now()
    }

    /// Tempo of the underlying source, in BPM.
    pub fn tempo(&self) -> f64 {
        self.source.tempo()
    }

    /// Beats per bar used for phase.
    pub fn quantum(&self) -> f64 {
        self.quantum
    }

    /// Beats between cue boundaries.
    pub fn cue_interval(&self) -> f64 {
        self.cue_interval
    }

    /// Grid offset remembered from the last manual realign.
    pub fn displacement(&self) -> f64 {
        self.displacement
    }

    /// Absolute beat at session time `at`.
    pub fn beat(&self, at: Micros) -> f64 {
        self.source.beat_at_time(at)
    }

    /// Position within the current quantum, in `[0, quantum)`.
    pub fn phase(&self, at: Micros) -> f64 {
        self.source.beat_phase(at, self.quantum)
    }

    /// Position within a `grid`-beat cycle; zero for a non-positive grid.
    pub fn grid_position(&self, at: Micros, grid: f64) -> f64 {
        if grid <= 0.0 {
            return 0.0;
        }
        self.source.beat_phase(at, grid).rem_euclid(grid)
    }

    /// Whether `at` lies within `tolerance` beats of a boundary on the
    /// realigned grid.
    pub fn is_near_grid_boundary(&self, at: Micros, grid: f64, tolerance: f64) -> bool {
        is_near_grid_boundary(self.grid_position(at, grid), self.displacement, grid, tolerance)
    }

    /// Snaps the shared beat to a whole number and restarts the cue grid from
    /// this beat, so the next cue lands a full interval later.
    pub fn realign(&mut self, at: Micros) {
        self.source.realign(at);
        let position = self.grid_position(at, self.cue_interval).round();
        self.displacement = if self.cue_interval > 0.0 {
            position.rem_euclid(self.cue_interval)
        } else {
            0.0
        };
        tracing::info!(
            source = self.source.name(),
            beat = self.beat(at),
            displacement = self.displacement,
            "manual realign"
        );
    }
}

impl fmt::Debug for BeatClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeatClock")
            .field("source", &self.source.name())
            .field("quantum", &self.quantum)
            .field("cue_interval", &self.cue_interval)
            .field("displacement", &self.displacement)
            .finish()
    }
}

/// Fires once per cue boundary even though the boundary predicate stays true
/// for several consecutive frames. A boundary that falls between two frames
/// outside the tolerance window still fires, on the first frame after it.
#[derive(Debug, Default, Clone)]
pub struct CueGate {
    last_boundary: Option<i64>,
}

impl CueGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// True on the first tick at or past a new cue boundary.
    pub fn poll(&mut self, clock: &BeatClock, at: Micros, tolerance: f64) -> bool {
        let grid = clock.cue_interval();
        if grid <= 0.0 {
            return false;
        }
        let position = (clock.beat(at) - clock.displacement()) / grid;

        if clock.is_near_grid_boundary(at, grid, tolerance) {
            return self.observe(position.round() as i64);
        }

        let passed = position.floor() as i64;
        match self.last_boundary {
            Some(last) if passed > last => {
                tracing::debug!(boundary = passed, "cue boundary caught late");
                self.observe(passed)
            }
            Some(_) => false,
            None => {
                // Started between boundaries: wait for the next one.
                self.last_boundary = Some(passed);
                false
            }
        }
    }

    /// Records a boundary crossing; true the first time `index` is seen.
    pub fn observe(&mut self, index: i64) -> bool {
        if self.last_boundary == Some(index) {
            return false;
        }
        self.last_boundary = Some(index);
        true
    }

    /// Forgets the last boundary; the next poll starts a fresh count.
    pub fn reset(&mut self) {
        self.last_boundary = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{shared::SharedClockState, tempo::NetworkSync, test_support::ManualSession};

    fn clock_at(tempo: f64) -> (Arc<ManualSession>, BeatClock) {
        let session = Arc::new(ManualSession::new(tempo));
        let source = NetworkSync::new(session.clone(), Arc::new(SharedClockState::default()));
        (session, BeatClock::new(Arc::new(source), 4.0, 32.0))
    }

    /// Session time of `beat` at 120 BPM.
    fn beat_time(beat: f64) -> Micros {
        (beat * 500_000.0).round() as Micros
    }

    #[test]
    fn boundary_predicate_handles_wraparound() {
        for divisor in [1.0, 4.0, 32.0, 64.0] {
            for tolerance in [0.001, 0.01, 0.1] {
                assert!(is_near_grid_boundary(divisor - 0.0001, 0.0, divisor, tolerance));
            }
            assert!(!is_near_grid_boundary(divisor / 2.0, 0.0, divisor, 0.1));
        }
        assert!(is_near_grid_boundary(32.0, 0.0, 32.0, 0.001));
        assert!(is_near_grid_boundary(5.02, 5.0, 32.0, 0.05));
        assert!(!is_near_grid_boundary(1.0, 0.0, 0.0, 0.1));
    }

    #[test]
    fn grid_position_wraps() {
        let (session, clock) = clock_at(120.0);
        session.set_now(beat_time(37.5));
        assert!((clock.grid_position(clock.now(), 32.0) - 5.5).abs() < 1e-9);
        assert!((clock.phase(clock.now()) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn realign_makes_beat_whole_and_moves_cue_grid() {
        let (session, mut clock) = clock_at(120.0);
        session.set_now(beat_time(12.3));
        let at = clock.now();
        clock.realign(at);

        let beat = clock.beat(at);
        assert!((beat - beat.round()).abs() < 1e-9);
        assert_eq!(clock.displacement(), 12.0);
        assert!(clock.is_near_grid_boundary(at, 32.0, 0.05));

        session.set_now(at + beat_time(32.0));
        assert!(clock.is_near_grid_boundary(clock.now(), 32.0, 0.05));
        session.set_now(at + beat_time(20.0));
        assert!(!clock.is_near_grid_boundary(clock.now(), 32.0, 0.05));
    }

    #[test]
    fn cue_gate_fires_once_per_boundary() {
        let (session, clock) = clock_at(120.0);
        let mut gate = CueGate::new();
        let mut fired = Vec::new();

        // 30 fps frames across two and a half cue intervals.
        let mut frame = 0;
        loop {
            let at = frame * 33_333;
            if clock.beat(at) > 80.0 {
                break;
            }
            session.set_now(at);
            if gate.poll(&clock, clock.now(), 0.1) {
                fired.push(clock.beat(at).round());
            }
            frame += 1;
        }

        assert_eq!(fired, vec![0.0, 32.0, 64.0]);
    }

    #[test]
    fn cue_gate_catches_boundaries_between_slow_frames() {
        // 12 fps at 174 BPM moves about 0.24 beats per frame, wider than the
        // tolerance window on both sides of a boundary.
        let (session, clock) = clock_at(174.0);
        let mut gate = CueGate::new();
        let mut fired = Vec::new();

        let mut frame: i64 = 0;
        loop {
            let at = frame * 83_333;
            if clock.beat(at) > 10.0 * 32.0 + 16.0 {
                break;
            }
            session.set_now(at);
            if gate.poll(&clock, clock.now(), 0.1) {
                fired.push((clock.beat(at) / 32.0).round() as i64);
            }
            frame += 1;
        }

        assert_eq!(fired, (0..=10).collect::<Vec<_>>());
    }

    #[test]
    fn cue_gate_waits_for_next_boundary_when_started_mid_grid() {
        let (session, clock) = clock_at(120.0);
        let mut gate = CueGate::new();

        session.set_now(beat_time(10.0));
        assert!(!gate.poll(&clock, clock.now(), 0.1));
        session.set_now(beat_time(31.0));
        assert!(!gate.poll(&clock, clock.now(), 0.1));
        session.set_now(beat_time(32.3));
        assert!(gate.poll(&clock, clock.now(), 0.1));
        session.set_now(beat_time(33.0));
        assert!(!gate.poll(&clock, clock.now(), 0.1));
    }
}
