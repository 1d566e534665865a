//! Rolling-median tempo smoothing with adaptive rounding hysteresis.
//!
//! Audio tempo detection jitters by a few tenths of a BPM and regularly
//! reports half or double the real tempo. The smoother keeps the last few
//! accepted readings, rejects outliers far from the window, and rounds the
//! median to a whole BPM with a tolerance band that tightens while the result
//! is stable and widens while it drifts.

use std::collections::VecDeque;

use crate::config::SmootherConfig;

/// Which branch of the rounding rule produced the last published value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingDecision {
    /// Nothing to round yet.
    Empty,
    /// The reading moved decisively to the other side of a whole BPM.
    StrongEvidence,
    /// Close enough to a whole BPM to round normally.
    WithinBand,
    /// Outside the band; rounded towards the previous value.
    Drifting,
}

#[derive(Debug, Clone)]
pub struct TempoSmoother {
    config: SmootherConfig,
    window: VecDeque<f64>,
    sorted: Vec<f64>,
    tolerance: f64,
    published: f64,
    last_decision: RoundingDecision,
}

impl TempoSmoother {
    /// Empty smoother. A zero window size is treated as one sample.
    pub fn new(mut config: SmootherConfig) -> Self {
        config.window_size = config.window_size.max(1);
        let tolerance = config.initial_rounding_tolerance;
        Self {
            window: VecDeque::with_capacity(config.window_size + 1),
            sorted: Vec::with_capacity(config.window_size + 1),
            config,
            tolerance,
            published: 0.0,
            last_decision: RoundingDecision::Empty,
        }
    }

    /// Starts from an already published tempo, as if it had been rounded on
    /// the previous tick.
    pub fn with_published(config: SmootherConfig, published: f64) -> Self {
        let mut smoother = Self::new(config);
        smoother.published = published;
        smoother
    }

    /// Offers a raw reading. Returns `false` when the reading was rejected as
    /// an outlier.
    pub fn accept(&mut self, raw_bpm: f64) -> bool {
        if !raw_bpm.is_finite() || raw_bpm <= 0.0 {
            return false;
        }

        // Detectors lock onto half the tempo far more often than double.
        let sample = if raw_bpm < self.config.octave_threshold {
            raw_bpm * 2.0
        } else {
            raw_bpm
        };

        if self.is_full() {
            let margin = self.published * self.config.percentage_tolerance;
            if let (Some(&min), Some(&max)) = (self.sorted.first(), self.sorted.last()) {
                if sample < min - margin || sample > max + margin {
                    tracing::trace!(sample, min, max, "rejected tempo sample");
                    return false;
                }
            }
        }

        self.window.push_back(sample);
        let at = self.sorted.partition_point(|&value| value < sample);
        self.sorted.insert(at, sample);

        if self.window.len() > self.config.window_size {
            if let Some(oldest) = self.window.pop_front() {
                let at = self.sorted.partition_point(|&value| value < oldest);
                self.sorted.remove(at);
            }
        }
        true
    }

    /// Rounds the current median and records it as the published tempo.
    pub fn publish(&mut self) -> f64 {
        let Some(median) = self.median() else {
            self.last_decision = RoundingDecision::Empty;
            return self.published;
        };

        let corrected = median * (1.0 - self.config.drift_correction);
        let floor = corrected.floor();
        let ceil = corrected.ceil();
        let previous = self.published;
        let margin = self.config.strong_evidence_margin;

        let strong_evidence = previous > 0.0
            && ((corrected > previous && ceil - corrected < margin)
                || (corrected < previous && corrected - floor < margin));

        let rounded = if strong_evidence {
            self.tolerance = self.config.initial_rounding_tolerance;
            self.last_decision = RoundingDecision::StrongEvidence;
            corrected.round()
        } else if corrected - floor < self.tolerance || ceil - corrected < self.tolerance {
            let rounded = corrected.round();
            self.tolerance = if rounded == previous {
                (self.tolerance - self.config.shrink_rate).max(self.config.min_rounding_tolerance)
            } else {
                self.config.initial_rounding_tolerance
            };
            self.last_decision = RoundingDecision::WithinBand;
            rounded
        } else {
            self.tolerance =
                (self.tolerance + self.config.growth_rate).min(self.config.max_rounding_tolerance);
            self.last_decision = RoundingDecision::Drifting;
            if corrected < previous {
                ceil
            } else {
                floor
            }
        };

        tracing::debug!(
            median,
            corrected,
            rounded,
            tolerance = self.tolerance,
            decision = ?self.last_decision,
            "published tempo"
        );
        self.published = rounded;
        rounded
    }

    /// Median of the accepted window, if any.
    pub fn median(&self) -> Option<f64> {
        let len = self.sorted.len();
        match len {
            0 => None,
            _ if len % 2 == 0 => Some((self.sorted[len / 2 - 1] + self.sorted[len / 2]) / 2.0),
            _ => Some(self.sorted[len / 2]),
        }
    }

    /// Last value returned by [`publish`](Self::publish).
    pub fn published(&self) -> f64 {
        self.published
    }

    /// Current half-width of the rounding band, in BPM.
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Which rounding branch the last publish took.
    pub fn last_decision(&self) -> RoundingDecision {
        self.last_decision
    }

    /// Accepted samples, oldest first.
    pub fn window(&self) -> impl Iterator<Item = f64> + '_ {
        self.window.iter().copied()
    }

    /// Number of accepted samples held.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    fn is_full(&self) -> bool {
        self.window.len() >= self.config.window_size
    }
}

impl Default for TempoSmoother {
    fn default() -> Self {
        Self::new(SmootherConfig::default())
    }
}
