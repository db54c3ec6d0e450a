//! Audio Level Monitor.
//!
//! Runs a 256-point frequency analysis over the microphone ten times a
//! second and reduces it to a 0-100 level. The status is advisory only:
//! callers may gate "start" on [`MicStatus::Active`], but nothing here ever
//! fails a recording.

use std::sync::Arc;
use std::time::Duration;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::Serialize;
use swingcast_common::error::SwingError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::media::{MediaBackend, MicrophoneStream};

pub const FFT_SIZE: usize = 256;
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
pub const ACTIVE_THRESHOLD: u8 = 5;
pub const MIC_TEST_DURATION: Duration = Duration::from_secs(5);

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;
const SMOOTHING: f32 = 0.8;

/// Coarse microphone state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MicStatus {
    #[default]
    Idle,
    /// Level exceeded the activity threshold at least once.
    Active,
    /// Permission was refused.
    Denied,
    /// Acquisition failed for any other reason.
    Error,
}

/// Latest monitor output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct MicReading {
    pub level: u8,
    pub peak: u8,
    pub status: MicStatus,
}

/// Byte-scaled magnitude spectrum with exponential smoothing.
pub struct FrequencyAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl FrequencyAnalyzer {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let window = (0..FFT_SIZE)
            .map(|i| {
                let a = 2.0 * std::f32::consts::PI * i as f32 / FFT_SIZE as f32;
                0.42 - 0.5 * a.cos() + 0.08 * (2.0 * a).cos()
            })
            .collect();
        Self {
            fft,
            window,
            smoothed: vec![0.0; FFT_SIZE / 2],
            buffer: vec![Complex::default(); FFT_SIZE],
        }
    }

    /// Number of frequency bins produced per analysis.
    pub fn bin_count(&self) -> usize {
        FFT_SIZE / 2
    }

    /// Analyze the newest [`FFT_SIZE`] samples into byte magnitudes.
    pub fn byte_frequency_data(&mut self, samples: &[f32]) -> Vec<u8> {
        let start = samples.len().saturating_sub(FFT_SIZE);
        let tail = &samples[start..];
        let pad = FFT_SIZE - tail.len();

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { tail[i - pad] };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.buffer);

        let range = MAX_DECIBELS - MIN_DECIBELS;
        self.smoothed
            .iter_mut()
            .zip(self.buffer.iter())
            .map(|(smoothed, bin)| {
                let magnitude = bin.norm() / FFT_SIZE as f32;
                *smoothed = SMOOTHING * *smoothed + (1.0 - SMOOTHING) * magnitude;
                let db = 20.0 * smoothed.max(f32::MIN_POSITIVE).log10();
                (255.0 * (db - MIN_DECIBELS) / range).clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    /// Normalized 0-100 level: `min(100, floor(average / 128 * 100))`.
    pub fn level(&mut self, samples: &[f32]) -> u8 {
        let data = self.byte_frequency_data(samples);
        level_from_bytes(&data)
    }
}

impl Default for FrequencyAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn level_from_bytes(data: &[u8]) -> u8 {
    if data.is_empty() {
        return 0;
    }
    let average = data.iter().map(|&b| b as f64).sum::<f64>() / data.len() as f64;
    ((average / 128.0) * 100.0).floor().min(100.0) as u8
}

/// Samples a microphone on a fixed interval and publishes readings.
pub struct AudioLevelMonitor {
    reading_tx: watch::Sender<MicReading>,
    task: Option<JoinHandle<()>>,
}

impl AudioLevelMonitor {
    pub fn new() -> Self {
        Self {
            reading_tx: watch::channel(MicReading::default()).0,
            task: None,
        }
    }

    pub fn reading(&self) -> MicReading {
        *self.reading_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<MicReading> {
        self.reading_tx.subscribe()
    }

    pub fn is_attached(&self) -> bool {
        self.task.is_some()
    }

    /// Start sampling `mic`. Replaces any previous attachment.
    pub fn attach(&mut self, mic: Arc<dyn MicrophoneStream>) {
        self.detach();
        let tx = self.reading_tx.clone();
        self.task = Some(tokio::spawn(async move {
            let mut analyzer = FrequencyAnalyzer::new();
            let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
            loop {
                ticker.tick().await;
                let level = analyzer.level(&mic.recent_samples(FFT_SIZE));
                tx.send_modify(|r| {
                    r.level = level;
                    r.peak = r.peak.max(level);
                    if level > ACTIVE_THRESHOLD && r.status == MicStatus::Idle {
                        tracing::debug!(level, "Microphone active");
                        r.status = MicStatus::Active;
                    }
                });
            }
        }));
    }

    /// Record an acquisition failure as a status flag.
    pub fn report_failure(&mut self, error: &SwingError) {
        self.detach();
        let status = match error {
            SwingError::Permission { .. } => MicStatus::Denied,
            _ => MicStatus::Error,
        };
        tracing::warn!(?status, %error, "Microphone unavailable");
        self.reading_tx.send_modify(|r| {
            r.level = 0;
            r.status = status;
        });
    }

    /// Stop sampling. The last status is kept; the level drops to zero.
    pub fn detach(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.reading_tx.send_modify(|r| r.level = 0);
        }
    }

    /// Detach and return to [`MicStatus::Idle`].
    pub fn reset(&mut self) {
        self.detach();
        self.reading_tx.send_replace(MicReading::default());
    }
}

impl Default for AudioLevelMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioLevelMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Acquire the microphone, monitor it for `duration`, then release it.
pub async fn test_microphone(backend: &dyn MediaBackend, duration: Duration) -> MicReading {
    let mut monitor = AudioLevelMonitor::new();
    match backend.acquire_microphone().await {
        Ok(mic) => {
            monitor.attach(mic.clone());
            tokio::time::sleep(duration).await;
            monitor.detach();
            mic.stop();
        }
        Err(e) => monitor.report_failure(&e),
    }
    let reading = monitor.reading();
    tracing::info!(peak = reading.peak, status = ?reading.status, "Microphone test finished");
    reading
}
