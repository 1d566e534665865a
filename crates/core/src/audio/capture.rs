use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Sample, SampleFormat, SizedSample,
};
use ringbuf::{
    traits::{Consumer as _, Producer as _, Split as _},
    HeapCons, HeapProd, HeapRb,
};

use super::{AudioDetector, DetectionPipeline};
use crate::{
    analysis::TempoEstimator,
    config::{DetectionConfig, SmootherConfig},
    shared::RunFlag,
    Result, VisualHiveError,
};

const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Names of every input device on the default host.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|err| VisualHiveError::msg(format!("enumerate input devices: {err}")))?;
    Ok(devices
        .map(|device| device.name().unwrap_or_else(|_| "<unknown>".to_string()))
        .collect())
}

/// Live input stream feeding the detection pipeline on its own thread.
///
/// The stream stays open for the lifetime of this value; dropping it stops
/// and joins the analysis thread.
pub struct AudioCapture {
    _stream: cpal::Stream,
    stop: Arc<AtomicBool>,
    analyzer: Option<thread::JoinHandle<()>>,
    device_name: String,
    sample_rate_hz: u32,
}

impl AudioCapture {
    /// Opens the input matching `device_query`, or the default one, and starts
    /// the detection thread.
    pub fn start(
        device_query: Option<&str>,
        detection: &DetectionConfig,
        smoothing: &SmootherConfig,
        detector: Arc<AudioDetector>,
        running: RunFlag,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = select_input_device(&host, device_query)?;
        let device_name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
        let supported = device
            .default_input_config()
            .map_err(|err| VisualHiveError::NoTempoSource(format!("{device_name}: {err}")))?;
        let sample_rate_hz = supported.sample_rate().0;
        let channels = supported.channels().max(1) as usize;
        let config: cpal::StreamConfig = supported.clone().into();

        let rb = HeapRb::<f32>::new((sample_rate_hz as usize).saturating_mul(4));
        let (mut prod, mut cons) = rb.split();

        let err_fn = |err| tracing::warn!(%err, "audio stream error");
        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _| push_interleaved(data, channels, &mut prod),
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _| push_interleaved(data, channels, &mut prod),
                err_fn,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _| push_interleaved(data, channels, &mut prod),
                err_fn,
                None,
            ),
            format => {
                return Err(VisualHiveError::NoTempoSource(format!(
                    "unsupported sample format {format:?}"
                )))
            }
        }
        .map_err(|err| VisualHiveError::NoTempoSource(format!("{device_name}: {err}")))?;

        stream
            .play()
            .map_err(|err| VisualHiveError::NoTempoSource(format!("{device_name}: {err}")))?;

        let estimator = TempoEstimator::new(sample_rate_hz, detection)?;
        let pipeline = DetectionPipeline::new(detection, smoothing);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);

        let analyzer = thread::Builder::new()
            .name("tempo-detection".into())
            .spawn(move || {
                analyze_loop(
                    &mut cons,
                    estimator,
                    pipeline,
                    &detector,
                    &stop_for_thread,
                    &running,
                )
            })?;

        tracing::info!(device = %device_name, sample_rate_hz, channels, "audio capture started");
        Ok(Self {
            _stream: stream,
            stop,
            analyzer: Some(analyzer),
            device_name,
            sample_rate_hz,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Sample rate the stream was opened with.
    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.analyzer.take() {
            let _ = handle.join();
        }
    }
}

impl fmt::Debug for AudioCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioCapture")
            .field("device_name", &self.device_name)
            .field("sample_rate_hz", &self.sample_rate_hz)
            .finish()
    }
}

/// Case-insensitive substring match on the device name, else the host
/// default.
fn select_input_device(host: &cpal::Host, device_query: Option<&str>) -> Result<cpal::Device> {
    if let Some(query) = device_query.map(str::to_lowercase) {
        let devices = host
            .input_devices()
            .map_err(|err| VisualHiveError::NoTempoSource(err.to_string()))?;
        for device in devices {
            let matches = device
                .name()
                .map(|name| name.to_lowercase().contains(&query))
                .unwrap_or(false);
            if matches {
                return Ok(device);
            }
        }
        tracing::warn!(query = %query, "no input device matched, using default");
    }

    host.default_input_device()
        .ok_or_else(|| VisualHiveError::NoTempoSource("no audio input device".into()))
}

fn push_interleaved<T>(data: &[T], channels: usize, prod: &mut HeapProd<f32>)
where
    T: SizedSample + Sample<Float = f32>,
{
    for frame in data.chunks(channels) {
        let sum: f32 = frame.iter().map(|sample| sample.to_float_sample()).sum();
        let _ = prod.try_push(sum / channels as f32);
    }
}

fn analyze_loop(
    cons: &mut HeapCons<f32>,
    mut estimator: TempoEstimator,
    mut pipeline: DetectionPipeline,
    detector: &AudioDetector,
    stop: &AtomicBool,
    running: &RunFlag,
) {
    let mut block = Vec::with_capacity(4_096);
    while !stop.load(Ordering::Relaxed) && running.is_running() {
        block.clear();
        block.extend(std::iter::from_fn(|| cons.try_pop()).take(4_096));

        let raw = if block.is_empty() {
            thread::sleep(IDLE_SLEEP);
            estimator.tempo_bpm()
        } else {
            match estimator.push_samples(&block) {
                Ok(raw) => raw,
                Err(err) => {
                    tracing::warn!(%err, "tempo analysis failed");
                    None
                }
            }
        };

        if let Err(err) = pipeline.drive(raw, Instant::now(), detector) {
            tracing::warn!(%err, "publishing detected tempo failed");
        }
    }
    tracing::debug!("tempo detection stopped");
}
