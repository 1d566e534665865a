//! Tempo sources: anything that can report the current tempo and beat
//! position on a session clock.

mod network;

pub use network::{LocalSession, NetworkSync, SyncSession, TempoCallback};

use crate::timeline::Micros;

/// Capability shared by the network session backend and the audio detector.
///
/// Implementations are read from the render loop and written from their own
/// callback threads, so every method takes `&self`.
pub trait TempoSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Current session clock time.
    fn now(&self) -> Micros;

    fn tempo(&self) -> f64;

    /// Continuous beat position at `at`.
    fn beat_at_time(&self, at: Micros) -> f64;

    /// Beat position wrapped into a grid of `quantum` beats.
    fn beat_phase(&self, at: Micros, quantum: f64) -> f64 {
        if quantum <= 0.0 {
            return 0.0;
        }
        self.beat_at_time(at).rem_euclid(quantum)
    }

    /// Number of connected peers; always zero for local sources.
    fn peer_count(&self) -> usize {
        0
    }

    /// Moves the beat origin so the beat at `at` is a whole number. The jump
    /// is visible to every reader immediately.
    fn realign(&self, at: Micros);
}
