use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    time::Instant,
};

use crate::{
    shared::SharedClockState,
    timeline::{Micros, Timeline},
    Result, TempoSource, VisualHiveError,
};

/// Invoked with the new tempo whenever the session tempo changes.
pub type TempoCallback = Box<dyn Fn(f64) + Send + Sync>;

/// A synchronised clock session shared with peers on the network.
///
/// The wire protocol lives outside this crate; the engine only needs to read
/// and commit the session timeline.
pub trait SyncSession: Send + Sync {
    fn clock_micros(&self) -> Micros;

    fn capture_timeline(&self) -> Timeline;

    fn commit_timeline(&self, timeline: Timeline);

    fn peer_count(&self) -> usize;

    fn on_tempo_change(&self, callback: TempoCallback);
}

/// In-process session used when no peers are connected. Time is measured on
/// the steady clock from the moment the session is created.
pub struct LocalSession {
    epoch: Instant,
    timeline: Mutex<Timeline>,
    callbacks: Mutex<Vec<TempoCallback>>,
}

impl LocalSession {
    pub fn new(tempo_bpm: f64) -> Self {
        Self {
            epoch: Instant::now(),
            timeline: Mutex::new(Timeline::new(tempo_bpm, 0)),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    fn lock_timeline(&self) -> Result<MutexGuard<'_, Timeline>> {
        self.timeline
            .lock()
            .map_err(|_| VisualHiveError::Poisoned("session timeline"))
    }

    fn notify(&self, tempo: f64) {
        match self.callbacks.lock() {
            Ok(callbacks) => callbacks.iter().for_each(|callback| callback(tempo)),
            Err(_) => tracing::warn!("tempo callbacks poisoned, change not broadcast"),
        }
    }
}

impl SyncSession for LocalSession {
    fn clock_micros(&self) -> Micros {
        self.epoch.elapsed().as_micros() as Micros
    }

    fn capture_timeline(&self) -> Timeline {
        match self.lock_timeline() {
            Ok(timeline) => *timeline,
            Err(err) => {
                tracing::warn!(%err, "falling back to a fresh timeline");
                Timeline::new(crate::timeline::MIN_TEMPO, self.clock_micros())
            }
        }
    }

    fn commit_timeline(&self, timeline: Timeline) {
        let previous = match self.lock_timeline() {
            Ok(mut slot) => std::mem::replace(&mut *slot, timeline).tempo(),
            Err(err) => {
                tracing::warn!(%err, "timeline commit dropped");
                return;
            }
        };
        if previous != timeline.tempo() {
            self.notify(timeline.tempo());
        }
    }

    fn peer_count(&self) -> usize {
        0
    }

    fn on_tempo_change(&self, callback: TempoCallback) {
        match self.callbacks.lock() {
            Ok(mut callbacks) => callbacks.push(callback),
            Err(_) => tracing::warn!("tempo callbacks poisoned, listener not registered"),
        }
    }
}

impl fmt::Debug for LocalSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSession")
            .field("timeline", &self.capture_timeline())
            .finish()
    }
}

/// Tempo source backed by a shared network session.
pub struct NetworkSync<S: SyncSession> {
    session: Arc<S>,
    shared: Arc<SharedClockState>,
}

impl<S: SyncSession> NetworkSync<S> {
    /// Joins the session and mirrors its tempo into `shared`.
    pub fn new(session: Arc<S>, shared: Arc<SharedClockState>) -> Self {
        shared.store_bpm(session.capture_timeline().tempo());

        let writer = Arc::clone(&shared);
        session.on_tempo_change(Box::new(move |tempo| {
            tracing::info!(tempo, "session tempo changed");
            writer.store_bpm(tempo);
        }));

        tracing::info!(peers = session.peer_count(), "joined sync session");
        Self { session, shared }
    }

    /// Commits a new tempo to the session at the current session time.
    pub fn propose_tempo(&self, tempo_bpm: f64) {
        let at = self.session.clock_micros();
        let mut timeline = self.session.capture_timeline();
        timeline.set_tempo(tempo_bpm, at);
        self.session.commit_timeline(timeline);
    }

    /// Returns the underlying sync session.
    pub fn session(&self) -> &Arc<S> {
        &self.session
    }
}

impl<S: SyncSession> TempoSource for NetworkSync<S> {
    fn name(&self) -> &'static str {
        "network"
    }

    fn now(&self) -> Micros {
        self.session.clock_micros()
    }

    fn tempo(&self) -> f64 {
        self.shared.bpm()
    }

    fn beat_at_time(&self, at: Micros) -> f64 {
        self.session.capture_timeline().beat_at_time(at)
    }

    fn peer_count(&self) -> usize {
        self.session.peer_count()
    }

    fn realign(&self, at: Micros) {
        let mut timeline = self.session.capture_timeline();
        let offset = timeline.realign(at);
        self.session.commit_timeline(timeline);
        tracing::info!(offset, beat = timeline.beat_at_time(at), "realigned session beat");
    }
}

impl<S: SyncSession> fmt::Debug for NetworkSync<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkSync")
            .field("tempo", &self.shared.bpm())
            .field("peers", &self.session.peer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ManualSession;

    #[test]
    fn realign_makes_phase_integral_for_every_reader() {
        let session = Arc::new(ManualSession::new(123.0));
        let first = NetworkSync::new(session.clone(), Arc::new(SharedClockState::default()));
        let second = NetworkSync::new(session.clone(), Arc::new(SharedClockState::default()));

        session.set_now(3_217_391);
        let at = first.now();
        assert!(first.beat_phase(at, 4.0).fract() != 0.0);

        first.realign(at);
        let phase = second.beat_phase(at, 4.0);
        assert!((phase - phase.round()).abs() < 1e-9);
    }

    #[test]
    fn proposed_tempo_reaches_shared_state_through_callback() {
        let shared = Arc::new(SharedClockState::default());
        let sync = NetworkSync::new(Arc::new(LocalSession::new(120.0)), shared.clone());
        assert_eq!(sync.tempo(), 120.0);

        sync.propose_tempo(128.0);
        assert_eq!(shared.bpm(), 128.0);
        assert_eq!(sync.session().capture_timeline().tempo(), 128.0);
    }

    #[test]
    fn local_session_has_no_peers() {
        let sync = NetworkSync::new(
            Arc::new(LocalSession::new(100.0)),
            Arc::new(SharedClockState::default()),
        );
        assert_eq!(sync.peer_count(), 0);
        assert!(sync.now() >= 0);
    }
}
