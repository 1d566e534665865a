//! The render/control loop: drains operator events, commits cues on the beat
//! grid, advances effects and emits one composed frame per tick.

use std::{
    fmt,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crate::{
    assets::Frame,
    clock::{BeatClock, CueGate},
    config::{AppConfig, KeyBindings},
    effects::{EffectFlags, EffectScheduler},
    events::{Event, EventKind, EventQueue},
    render::{ComposedFrame, Compositor, FrameSink, LayerFrames},
    shared::RunFlag,
    transition::{AssetChannel, TransitionManager},
    Result,
};

pub struct ControlLoop {
    clock: BeatClock,
    effects: EffectScheduler,
    transitions: TransitionManager,
    cue_gate: CueGate,
    cue_tolerance: f64,
    keys: KeyBindings,
    flags: EffectFlags,
    compositor: Compositor,
    layers: LayerFrames,
    fallback_fps: f64,
    events: Arc<EventQueue>,
    sink: Arc<dyn FrameSink>,
    running: RunFlag,
}

impl ControlLoop {
    pub fn new(
        config: &AppConfig,
        clock: BeatClock,
        transitions: TransitionManager,
        events: Arc<EventQueue>,
        sink: Arc<dyn FrameSink>,
        running: RunFlag,
    ) -> Self {
        Self {
            clock,
            effects: EffectScheduler::new(&config.effects),
            transitions,
            cue_gate: CueGate::new(),
            cue_tolerance: config.tempo.cue_tolerance,
            keys: config.keys.clone(),
            flags: EffectFlags {
                bounce: config.effects.bounce_on_start,
                strobe_held: false,
            },
            compositor: Compositor::new(config.effects.flash_color),
            layers: LayerFrames::default(),
            fallback_fps: config.display.fallback_fps,
            events,
            sink,
            running,
        }
    }

    pub fn clock(&self) -> &BeatClock {
        &self.clock
    }

    pub fn transitions(&self) -> &TransitionManager {
        &self.transitions
    }

    /// Returns the effect switches as the operator last left them.
    pub fn flags(&self) -> EffectFlags {
        self.flags
    }

    /// Runs ticks paced to the background's frame rate until shutdown.
    pub fn run(&mut self) -> Result<()> {
        tracing::info!(source = self.clock.source().name(), "render loop started");
        while self.running.is_running() {
            let started = Instant::now();
            self.tick(started);

            let budget = self.frame_budget();
            let elapsed = started.elapsed();
            if elapsed < budget {
                thread::sleep(budget - elapsed);
            } else {
                tracing::debug!(?elapsed, ?budget, "tick overran frame budget");
            }
        }
        tracing::info!(frames = self.compositor.frames_composed(), "render loop stopped");
        Ok(())
    }

    /// One frame. Failures inside the tick are logged and never escape it.
    pub fn tick(&mut self, now: Instant) -> ComposedFrame {
        self.handle_events();

        let at = self.clock.now();
        let beat = self.clock.beat(at);
        let bpm = self.clock.tempo();

        let boundary = self.cue_gate.poll(&self.clock, at, self.cue_tolerance);
        if boundary && self.transitions.cue_mode() {
            self.transitions.commit_cue();
        }

        self.refresh_layers();
        let effects = self.effects.tick(now, beat, bpm, self.flags);
        let frame = self.compositor.compose(beat, bpm, effects, &self.layers);

        if let Err(err) = self.sink.submit(frame.clone()) {
            tracing::warn!(%err, "frame sink rejected frame");
        }
        frame
    }

    fn frame_budget(&self) -> Duration {
        let fps = self
            .transitions
            .background()
            .fps()
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(self.fallback_fps)
            .max(1.0);
        Duration::from_secs_f64(1.0 / fps)
    }

    fn handle_events(&mut self) {
        let events = match self.events.drain() {
            Ok(events) => events,
            Err(err) => {
                tracing::warn!(%err, "event queue unavailable");
                return;
            }
        };
        for event in events {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: Event) {
        let EventKind::Keyboard = event.kind;
        let code = event.code;

        if !event.is_key_down {
            if code == self.keys.strobe {
                self.flags.strobe_held = false;
            }
            return;
        }

        if self.keys.quit.contains(&code) {
            self.running.stop();
        } else if code == self.keys.bounce {
            self.flags.bounce = !self.flags.bounce;
            tracing::info!(enabled = self.flags.bounce, "bounce");
        } else if code == self.keys.strobe {
            self.flags.strobe_held = true;
        } else if code == self.keys.cue {
            self.transitions.toggle_cue_mode();
        } else if code == self.keys.realign {
            let at = self.clock.now();
            self.clock.realign(at);
            // The realign instant starts a new grid, not a cue.
            let _ = self.cue_gate.poll(&self.clock, at, self.cue_tolerance);
        } else {
            match self.transitions.select_key(code) {
                Ok(Some(outcome)) => tracing::debug!(key = ?code, ?outcome, "asset key"),
                Ok(None) => tracing::debug!(key = ?code, "unbound key"),
                Err(err) => tracing::warn!(%err, key = ?code, "asset switch failed"),
            }
        }
    }

    fn refresh_layers(&mut self) {
        refresh(self.transitions.background_mut(), &mut self.layers.background);
        refresh(self.transitions.foreground_mut(), &mut self.layers.foreground);

        self.layers.foreground_scale = self
            .transitions
            .foreground()
            .active_descriptor()
            .map_or(100.0, |descriptor| descriptor.scale);
        self.layers.tint = self
            .transitions
            .background()
            .active_descriptor()
            .map(|descriptor| descriptor.overlay_color());
    }
}

/// Pulls the next frame from `channel`, keeping the last good one on error.
fn refresh(channel: &mut AssetChannel, slot: &mut Option<Frame>) {
    match channel.next_frame() {
        Some(Ok(frame)) => *slot = Some(frame),
        Some(Err(err)) => tracing::warn!(%err, layer = ?channel.layer(), "frame read failed"),
        None => *slot = None,
    }
}

impl fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlLoop")
            .field("clock", &self.clock)
            .field("transitions", &self.transitions)
            .field("flags", &self.flags)
            .field("frames", &self.compositor.frames_composed())
            .finish()
    }
}
