use serde::{Deserialize, Serialize};

/// Session clock time in microseconds.
pub type Micros = i64;

pub const MIN_TEMPO: f64 = 20.0;
pub const MAX_TEMPO: f64 = 999.0;

const MICROS_PER_MINUTE: f64 = 60_000_000.0;

/// Mapping between session time and beats: a tempo plus the beat value at a
/// reference instant. Beat position stays continuous across tempo changes;
/// only [`Timeline::realign`] jumps it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    tempo_bpm: f64,
    beat_origin: f64,
    time_origin: Micros,
}

impl Timeline {
    /// Starts a timeline with beat 0 at `at`.
    pub fn new(tempo_bpm: f64, at: Micros) -> Self {
        Self {
            tempo_bpm: clamp_tempo(tempo_bpm),
            beat_origin: 0.0,
            time_origin: at,
        }
    }

    /// Returns the tempo in BPM.
    pub fn tempo(&self) -> f64 {
        self.tempo_bpm
    }

    /// Beat reached at session time `at`; negative before the origin.
    pub fn beat_at_time(&self, at: Micros) -> f64 {
        self.beat_origin + (at - self.time_origin) as f64 * self.tempo_bpm / MICROS_PER_MINUTE
    }

    /// Position within a grid of `quantum` beats, in `[0, quantum)`.
    pub fn phase_at_time(&self, at: Micros, quantum: f64) -> f64 {
        if quantum <= 0.0 {
            return 0.0;
        }
        self.beat_at_time(at).rem_euclid(quantum)
    }

    /// Inverse of [`beat_at_time`](Self::beat_at_time), rounded to a microsecond.
    pub fn time_at_beat(&self, beat: f64) -> Micros {
        let elapsed = (beat - self.beat_origin) * MICROS_PER_MINUTE / self.tempo_bpm;
        self.time_origin + elapsed.round() as Micros
    }

    /// Changes tempo without moving the beat position at `at`.
    pub fn set_tempo(&mut self, tempo_bpm: f64, at: Micros) {
        self.rebase(at, self.beat_at_time(at));
        self.tempo_bpm = clamp_tempo(tempo_bpm);
    }

    /// Snaps the beat at `at` to the nearest whole beat. Returns the
    /// fractional offset that was removed.
    pub fn realign(&mut self, at: Micros) -> f64 {
        let beat = self.beat_at_time(at);
        let target = beat.round();
        self.rebase(at, target);
        beat - target
    }

    fn rebase(&mut self, at: Micros, beat: f64) {
        self.time_origin = at;
        self.beat_origin = beat;
    }
}

fn clamp_tempo(tempo_bpm: f64) -> f64 {
    if tempo_bpm.is_finite() {
        tempo_bpm.clamp(MIN_TEMPO, MAX_TEMPO)
    } else {
        MIN_TEMPO
    }
}
