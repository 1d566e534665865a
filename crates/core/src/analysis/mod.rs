use std::{collections::VecDeque, f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{config::DetectionConfig, Result, VisualHiveError};

const MIN_ONSET_INTERVAL: f64 = 0.2;
const MAX_ONSET_HISTORY: usize = 32;
const FLUX_HISTORY: usize = 64;
/// Standard deviations above the mean flux an onset has to reach.
const FLUX_SENSITIVITY: f32 = 1.5;
const MIN_FLUX: f32 = 1e-4;
const MIN_BEAT_PERIOD: f64 = 0.25;
const MAX_BEAT_PERIOD: f64 = 2.0;

/// Onset-based tempo estimator. Audio is cut into overlapping Hann windows,
/// the positive spectral flux between consecutive windows is compared with an
/// adaptive threshold, and the mean spacing of recent onsets gives the tempo.
///
/// Readings are raw; octave folding and smoothing happen in
/// [`TempoSmoother`](crate::smoothing::TempoSmoother).
pub struct TempoEstimator {
    sample_rate: u32,
    window_size: usize,
    hop_size: usize,
    pending: Vec<f32>,
    processed_samples: usize,
    previous_magnitudes: Vec<f32>,
    flux_history: VecDeque<f32>,
    onsets: VecDeque<f64>,
    tempo_bpm: Option<f64>,
    fft: FftResources,
}

impl TempoEstimator {
    pub fn new(sample_rate: u32, config: &DetectionConfig) -> Result<Self> {
        Self::with_window(sample_rate, config.window_size, config.hop_size)
    }

    /// Estimator with explicit FFT window and hop sizes, in samples.
    pub fn with_window(sample_rate: u32, window_size: usize, hop_size: usize) -> Result<Self> {
        if sample_rate == 0 {
            return Err(VisualHiveError::msg("sample rate must be positive"));
        }
        if window_size < 2 || hop_size == 0 || hop_size > window_size {
            return Err(VisualHiveError::msg(format!(
                "invalid analysis window {window_size} with hop {hop_size}"
            )));
        }

        let fft = FftResources::plan(window_size);
        Ok(Self {
            sample_rate,
            window_size,
            hop_size,
            pending: Vec::with_capacity(window_size * 2),
            processed_samples: 0,
            previous_magnitudes: vec![0.0; fft.spectrum.len()],
            flux_history: VecDeque::with_capacity(FLUX_HISTORY),
            onsets: VecDeque::with_capacity(MAX_ONSET_HISTORY),
            tempo_bpm: None,
            fft,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Latest tempo estimate, if enough onsets have been seen.
    pub fn tempo_bpm(&self) -> Option<f64> {
        self.tempo_bpm
    }

    /// Onsets detected so far.
    pub fn onset_count(&self) -> usize {
        self.onsets.len()
    }

    /// Clears all accumulated state while keeping the FFT plan.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.processed_samples = 0;
        self.previous_magnitudes.iter_mut().for_each(|m| *m = 0.0);
        self.flux_history.clear();
        self.onsets.clear();
        self.tempo_bpm = None;
    }

    /// Consumes mono samples and returns the current estimate.
    pub fn push_samples(&mut self, samples: &[f32]) -> Result<Option<f64>> {
        self.pending.extend_from_slice(samples);

        let mut consumed = 0;
        while self.pending.len() - consumed >= self.window_size {
            let start = self.processed_samples;
            let centre = (start + self.window_size / 2) as f64 / self.sample_rate as f64;
            let flux = self.spectral_flux(consumed)?;
            self.observe_flux(centre, flux);
            consumed += self.hop_size;
            self.processed_samples += self.hop_size;
        }
        self.pending.drain(..consumed);

        Ok(self.tempo_bpm)
    }

    fn spectral_flux(&mut self, offset: usize) -> Result<f32> {
        let window = &self.pending[offset..offset + self.window_size];
        let len = self.window_size;
        for (index, (slot, sample)) in self.fft.input.iter_mut().zip(window).enumerate() {
            *slot = *sample * hann_value(index, len);
        }

        self.fft.plan.process_with_scratch(
            &mut self.fft.input,
            &mut self.fft.spectrum,
            &mut self.fft.scratch,
        )?;

        let norm = 1.0 / len as f32;
        let mut flux = 0.0;
        for (bin, previous) in self.fft.spectrum.iter().zip(self.previous_magnitudes.iter_mut()) {
            let magnitude = bin.norm() * norm;
            flux += (magnitude - *previous).max(0.0);
            *previous = magnitude;
        }
        Ok(flux)
    }

    fn observe_flux(&mut self, time: f64, flux: f32) {
        let threshold = self.threshold();
        if self.flux_history.len() == FLUX_HISTORY {
            self.flux_history.pop_front();
        }
        self.flux_history.push_back(flux);

        if flux <= threshold {
            return;
        }
        let spaced = self
            .onsets
            .back()
            .map_or(true, |last| time - last >= MIN_ONSET_INTERVAL);
        if !spaced {
            return;
        }

        self.onsets.push_back(time);
        if self.onsets.len() > MAX_ONSET_HISTORY {
            self.onsets.pop_front();
        }
        self.update_tempo_estimate();
    }

    fn threshold(&self) -> f32 {
        if self.flux_history.is_empty() {
            return MIN_FLUX;
        }
        let count = self.flux_history.len() as f32;
        let mean = self.flux_history.iter().sum::<f32>() / count;
        let variance = self
            .flux_history
            .iter()
            .map(|flux| (flux - mean).powi(2))
            .sum::<f32>()
            / count;
        (mean + FLUX_SENSITIVITY * variance.sqrt()).max(MIN_FLUX)
    }

    fn update_tempo_estimate(&mut self) {
        let (sum, count) = self
            .onsets
            .iter()
            .zip(self.onsets.iter().skip(1))
            .map(|(earlier, later)| later - earlier)
            .filter(|interval| (MIN_BEAT_PERIOD..=MAX_BEAT_PERIOD).contains(interval))
            .fold((0.0, 0usize), |(sum, count), interval| (sum + interval, count + 1));

        if count > 0 {
            let average = sum / count as f64;
            let bpm = 60.0 / average;
            tracing::trace!(bpm, onsets = self.onsets.len(), "tempo estimate");
            self.tempo_bpm = Some(bpm);
        }
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl FftResources {
    fn plan(size: usize) -> Self {
        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(size);
        Self {
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        }
    }
}

impl fmt::Debug for TempoEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempoEstimator")
            .field("sample_rate", &self.sample_rate)
            .field("window_size", &self.window_size)
            .field("hop_size", &self.hop_size)
            .field("processed_samples", &self.processed_samples)
            .field("onsets", &self.onsets.len())
            .field("tempo_bpm", &self.tempo_bpm)
            .finish()
    }
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
