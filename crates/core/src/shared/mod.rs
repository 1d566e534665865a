//! State shared between the tempo thread, the render loop and the input
//! thread.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

/// The single writer of the published tempo is the active tempo source; the
/// render loop reads it once per tick and tolerates one tick of lag.
#[derive(Debug)]
pub struct SharedClockState {
    bpm_bits: AtomicU64,
}

impl SharedClockState {
    pub fn new(initial_bpm: f64) -> Self {
        Self {
            bpm_bits: AtomicU64::new(initial_bpm.to_bits()),
        }
    }

    /// Returns the last published tempo.
    pub fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm_bits.load(Ordering::Relaxed))
    }

    /// Publishes a new tempo to every reader.
    pub fn store_bpm(&self, bpm: f64) {
        self.bpm_bits.store(bpm.to_bits(), Ordering::Relaxed);
    }
}

impl Default for SharedClockState {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Process-wide running flag. Cleared once; every loop checks it each
/// iteration.
#[derive(Debug, Clone)]
pub struct RunFlag {
    running: Arc<AtomicBool>,
}

impl RunFlag {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// False once any thread has called [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Asks every loop sharing this flag to exit.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            tracing::info!("shutdown requested");
        }
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bpm_round_trips_through_atomic_bits() {
        let state = SharedClockState::new(120.0);
        assert_eq!(state.bpm(), 120.0);
        state.store_bpm(127.5);
        assert_eq!(state.bpm(), 127.5);
    }

    #[test]
    fn stop_is_visible_to_clones() {
        let flag = RunFlag::new();
        let observer = flag.clone();
        assert!(observer.is_running());
        flag.stop();
        flag.stop();
        assert!(!observer.is_running());
    }
}
