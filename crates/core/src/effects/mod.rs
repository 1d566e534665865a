//! Beat-locked visual effects. Everything here is derived from the beat
//! position and tempo handed in by the render loop; the only state kept is
//! when the current bounce started and when the strobe toggles next.

use std::{
    f64::consts::PI,
    time::{Duration, Instant},
};

use crate::config::EffectsConfig;

/// Scale of the overlay at `progress` through a beat: a half-sine bump that
/// is 1.0 at both ends and `1 + amplitude` halfway through.
pub fn bounce_scale(progress: f64, amplitude: f64) -> f64 {
    if !(0.0..1.0).contains(&progress) {
        return 1.0;
    }
    1.0 + amplitude * (progress * PI).sin()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BounceState {
    Idle,
    Animating { started: Instant },
}

/// One bounce animation per beat while enabled.
#[derive(Debug, Clone)]
pub struct Bounce {
    amplitude: f64,
    state: BounceState,
    last_whole_beat: Option<i64>,
}

impl Bounce {
    pub fn new(amplitude: f64) -> Self {
        Self {
            amplitude,
            state: BounceState::Idle,
            last_whole_beat: None,
        }
    }

    /// Returns the current animation state.
    pub fn state(&self) -> BounceState {
        self.state
    }

    /// Advances the animation and returns the scale for this frame.
    pub fn update(&mut self, now: Instant, beat: f64, bpm: f64, enabled: bool) -> f64 {
        let whole_beat = beat.floor() as i64;
        let crossed = self.last_whole_beat.is_some_and(|last| whole_beat > last);
        self.last_whole_beat = Some(whole_beat);

        if !enabled || !bpm.is_finite() || bpm <= 0.0 {
            self.state = BounceState::Idle;
            return 1.0;
        }
        if crossed {
            self.state = BounceState::Animating { started: now };
        }

        match self.state {
            BounceState::Idle => 1.0,
            BounceState::Animating { started } => {
                let beat_duration = 60.0 / bpm;
                let progress = now.saturating_duration_since(started).as_secs_f64() / beat_duration;
                if progress >= 1.0 {
                    self.state = BounceState::Idle;
                    1.0
                } else {
                    bounce_scale(progress, self.amplitude)
                }
            }
        }
    }
}

/// Toggle interval used while the tempo is unknown.
const FALLBACK_INTERVAL: Duration = Duration::from_millis(500);

/// Strobe flashing while its key is held. Toggles on the steady clock so a
/// tempo change mid-flash does not feed back into the timer.
#[derive(Debug, Clone)]
pub struct Strobe {
    divisions_per_beat: f64,
    lit: bool,
    next_toggle: Option<Instant>,
}

impl Strobe {
    pub fn new(divisions_per_beat: f64) -> Self {
        Self {
            divisions_per_beat,
            lit: false,
            next_toggle: None,
        }
    }

    /// Time between toggles at `bpm`.
    pub fn interval(&self, bpm: f64) -> Duration {
        let divisions = self.divisions_per_beat;
        if !bpm.is_finite() || bpm <= 0.0 || !divisions.is_finite() || divisions <= 0.0 {
            return FALLBACK_INTERVAL;
        }
        Duration::from_secs_f64(60.0 / (bpm * divisions))
    }

    /// Returns whether the flash is lit at `now`. Releasing the key resets it.
    pub fn update(&mut self, now: Instant, bpm: f64, held: bool) -> bool {
        if !held {
            self.lit = false;
            self.next_toggle = None;
            return false;
        }
        if self.next_toggle.map_or(true, |due| now >= due) {
            self.lit = !self.lit;
            self.next_toggle = Some(now + self.interval(bpm));
        }
        self.lit
    }
}

/// Operator-controlled effect switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectFlags {
    pub bounce: bool,
    pub strobe_held: bool,
}

/// Effect output for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectState {
    pub scale: f64,
    pub strobe_lit: bool,
}

#[derive(Debug, Clone)]
pub struct EffectScheduler {
    bounce: Bounce,
    strobe: Strobe,
}

impl EffectScheduler {
    pub fn new(config: &EffectsConfig) -> Self {
        Self {
            bounce: Bounce::new(config.bounce_amplitude),
            strobe: Strobe::new(config.strobe_divisions_per_beat),
        }
    }

    /// Returns the bounce animation.
    pub fn bounce(&self) -> &Bounce {
        &self.bounce
    }

    /// Advances both effects by one frame.
    pub fn tick(&mut self, now: Instant, beat: f64, bpm: f64, flags: EffectFlags) -> EffectState {
        EffectState {
            scale: self.bounce.update(now, beat, bpm, flags.bounce),
            strobe_lit: self.strobe.update(now, bpm, flags.strobe_held),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounce_peaks_halfway_and_settles() {
        assert!((bounce_scale(0.5, 0.1) - 1.1).abs() < 1e-12);
        assert_eq!(bounce_scale(0.0, 0.1), 1.0);
        assert_eq!(bounce_scale(1.0, 0.1), 1.0);
        assert_eq!(bounce_scale(1.7, 0.1), 1.0);
        assert!(bounce_scale(0.25, 0.1) > 1.0);
    }

    #[test]
    fn bounce_animates_across_one_beat() {
        let start = Instant::now();
        let mut bounce = Bounce::new(0.2);

        // First observation only records the beat.
        assert_eq!(bounce.update(start, 3.9, 120.0, true), 1.0);
        assert_eq!(bounce.state(), BounceState::Idle);

        // Crossing into beat 4 starts the animation.
        bounce.update(start, 4.0, 120.0, true);
        assert_eq!(bounce.state(), BounceState::Animating { started: start });

        // Half a beat at 120 BPM is 250 ms.
        let halfway = bounce.update(start + Duration::from_millis(250), 4.5, 120.0, true);
        assert!((halfway - 1.2).abs() < 1e-9);

        let done = bounce.update(start + Duration::from_millis(500), 4.99, 120.0, true);
        assert_eq!(done, 1.0);
        assert_eq!(bounce.state(), BounceState::Idle);
    }

    #[test]
    fn disabled_bounce_stays_idle() {
        let start = Instant::now();
        let mut bounce = Bounce::new(0.2);
        bounce.update(start, 0.5, 120.0, false);
        assert_eq!(bounce.update(start, 1.1, 120.0, false), 1.0);
        assert_eq!(bounce.state(), BounceState::Idle);
    }

    #[test]
    fn strobe_toggles_on_interval_while_held() {
        let start = Instant::now();
        let mut strobe = Strobe::new(4.0);
        // 120 BPM, four toggles per beat.
        assert_eq!(strobe.interval(120.0), Duration::from_millis(125));

        assert!(strobe.update(start, 120.0, true));
        assert!(strobe.update(start + Duration::from_millis(100), 120.0, true));
        assert!(!strobe.update(start + Duration::from_millis(125), 120.0, true));
        assert!(strobe.update(start + Duration::from_millis(250), 120.0, true));

        assert!(!strobe.update(start + Duration::from_millis(260), 120.0, false));
        // Pressing again starts lit.
        assert!(strobe.update(start + Duration::from_millis(270), 120.0, true));
    }

    #[test]
    fn unusable_tempo_falls_back_instead_of_panicking() {
        let strobe = Strobe::new(4.0);
        assert_eq!(strobe.interval(f64::NAN), FALLBACK_INTERVAL);
        assert_eq!(strobe.interval(f64::INFINITY), FALLBACK_INTERVAL);
        assert_eq!(Strobe::new(f64::NAN).interval(120.0), FALLBACK_INTERVAL);

        let start = Instant::now();
        let mut scheduler = EffectScheduler::new(&EffectsConfig::default());
        let flags = EffectFlags {
            bounce: true,
            strobe_held: true,
        };
        scheduler.tick(start, 0.9, f64::NAN, flags);
        let state = scheduler.tick(start, 1.0, f64::NAN, flags);
        assert_eq!(state.scale, 1.0);
        assert!(state.strobe_lit);
        assert_eq!(scheduler.bounce().state(), BounceState::Idle);
    }

    #[test]
    fn scheduler_combines_effects() {
        let start = Instant::now();
        let mut scheduler = EffectScheduler::new(&EffectsConfig::default());
        let flags = EffectFlags {
            bounce: true,
            strobe_held: false,
        };

        scheduler.tick(start, 0.9, 120.0, flags);
        scheduler.tick(start, 1.0, 120.0, flags);
        let state = scheduler.tick(start + Duration::from_millis(250), 1.5, 120.0, flags);
        assert!((state.scale - 1.1).abs() < 1e-9);
        assert!(!state.strobe_lit);
    }
}
