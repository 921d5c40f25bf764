//! # MFCC Extraction
//!
//! Mel-frequency cepstral coefficients averaged over time, computed with the
//! same defaults the models were trained against:
//!
//! 1. Down-mix to mono by averaging channels; amplitudes stay on the `i16` scale
//! 2. Zero-pad windows shorter than `n_fft` up to `n_fft`
//! 3. Centered STFT (`n_fft / 2` zeros on both sides), periodic Hann window
//! 4. Power spectrum → Slaney mel filterbank (Slaney area normalization)
//! 5. `power_to_db` with `amin` floor and a `top_db` dynamic-range clamp
//! 6. Orthonormal DCT-II, keep the first `n_mfcc` coefficients
//! 7. Mean of each coefficient across frames
//!
//! The FFT itself comes from `rustfft`; a plan is built once per extractor and
//! mel filterbanks are cached per sample rate.

use crate::audio::Window;
use crate::features::{FeatureExtractionError, FeatureExtractor, FeatureVector};
use crate::pipeline::error::{PipelineError, PipelineResult};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Analysis parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MfccConfig {
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub n_mfcc: usize,
    pub amin: f64,
    pub top_db: f64,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            n_mfcc: 15,
            amin: 1e-10,
            top_db: 80.0,
        }
    }
}

impl MfccConfig {
    /// Defaults with a custom coefficient count.
    pub fn with_coefficients(n_mfcc: usize) -> Self {
        Self {
            n_mfcc,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.n_fft < 2 || self.n_fft % 2 != 0 {
            return Err(PipelineError::InvalidInput(format!(
                "n_fft must be an even number >= 2, got {}",
                self.n_fft
            )));
        }
        if self.hop_length == 0 {
            return Err(PipelineError::InvalidInput(
                "hop_length must be greater than 0".to_string(),
            ));
        }
        if self.n_mfcc == 0 || self.n_mfcc > self.n_mels {
            return Err(PipelineError::InvalidInput(format!(
                "n_mfcc must be between 1 and n_mels ({}), got {}",
                self.n_mels, self.n_mfcc
            )));
        }
        if self.amin <= 0.0 || self.top_db < 0.0 {
            return Err(PipelineError::InvalidInput(
                "amin must be positive and top_db non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// MFCC implementation of `FeatureExtractor`.
pub struct MfccExtractor {
    config: MfccConfig,
    fft: Arc<dyn Fft<f32>>,
    hann: Vec<f32>,
    /// Row-major `n_mfcc x n_mels` orthonormal DCT-II basis.
    dct: Vec<f64>,
    /// Row-major `n_mels x (n_fft / 2 + 1)` filterbanks, keyed by sample rate.
    mel_banks: RwLock<HashMap<u32, Arc<Vec<f64>>>>,
}

impl MfccExtractor {
    pub fn new(config: MfccConfig) -> PipelineResult<Self> {
        config.validate()?;

        let fft = FftPlanner::<f32>::new().plan_fft_forward(config.n_fft);
        let hann = hann_window(config.n_fft);
        let dct = dct_basis(config.n_mfcc, config.n_mels);

        debug!(
            n_fft = config.n_fft,
            hop_length = config.hop_length,
            n_mels = config.n_mels,
            n_mfcc = config.n_mfcc,
            "MFCC extractor ready"
        );

        Ok(Self {
            config,
            fft,
            hann,
            dct,
            mel_banks: RwLock::new(HashMap::new()),
        })
    }

    fn mel_bank(&self, sample_rate: u32) -> Arc<Vec<f64>> {
        if let Some(bank) = self
            .mel_banks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&sample_rate)
        {
            return Arc::clone(bank);
        }

        let bank = Arc::new(mel_filterbank(
            sample_rate,
            self.config.n_fft,
            self.config.n_mels,
        ));
        self.mel_banks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(sample_rate)
            .or_insert_with(|| Arc::clone(&bank))
            .clone()
    }

    /// Power spectrogram as `frames x (n_fft / 2 + 1)`.
    fn power_spectrogram(&self, signal: &[f32]) -> Vec<Vec<f64>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let pad = n_fft / 2;

        let mut padded = vec![0.0f32; signal.len() + 2 * pad];
        padded[pad..pad + signal.len()].copy_from_slice(signal);

        let num_frames = 1 + (padded.len() - n_fft) / hop;
        let bins = n_fft / 2 + 1;
        let mut frame = vec![Complex::new(0.0f32, 0.0); n_fft];
        let mut spectrogram = Vec::with_capacity(num_frames);

        for frame_idx in 0..num_frames {
            let start = frame_idx * hop;
            for (i, slot) in frame.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + i] * self.hann[i], 0.0);
            }
            self.fft.process(&mut frame);
            spectrogram.push(frame[..bins].iter().map(|c| c.norm_sqr() as f64).collect());
        }

        spectrogram
    }
}

impl FeatureExtractor for MfccExtractor {
    fn name(&self) -> &str {
        "mfcc"
    }

    fn dimensionality(&self) -> usize {
        self.config.n_mfcc
    }

    fn extract(&self, window: &Window<'_>) -> Result<FeatureVector, FeatureExtractionError> {
        if window.samples.is_empty() {
            return Err(FeatureExtractionError::EmptyWindow(window.index));
        }
        if window.sample_rate == 0 {
            return Err(FeatureExtractionError::InvalidSampleRate {
                window_index: window.index,
                sample_rate: window.sample_rate,
            });
        }

        let mut signal = downmix(window.samples, window.channels as usize);
        if signal.len() < self.config.n_fft {
            signal.resize(self.config.n_fft, 0.0);
        }

        let spectrogram = self.power_spectrogram(&signal);
        let bank = self.mel_bank(window.sample_rate);
        let n_mels = self.config.n_mels;
        let bins = self.config.n_fft / 2 + 1;

        // Mel energies in dB, frame by frame.
        let mut log_mel: Vec<Vec<f64>> = spectrogram
            .iter()
            .map(|power| {
                (0..n_mels)
                    .map(|m| {
                        let filter = &bank[m * bins..(m + 1) * bins];
                        let energy: f64 = filter.iter().zip(power).map(|(w, p)| w * p).sum();
                        10.0 * energy.max(self.config.amin).log10()
                    })
                    .collect()
            })
            .collect();

        let peak = log_mel
            .iter()
            .flatten()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let floor = peak - self.config.top_db;
        for value in log_mel.iter_mut().flatten() {
            *value = value.max(floor);
        }

        let n_mfcc = self.config.n_mfcc;
        let mut means = vec![0.0f64; n_mfcc];
        for frame in &log_mel {
            for (k, mean) in means.iter_mut().enumerate() {
                let basis = &self.dct[k * n_mels..(k + 1) * n_mels];
                *mean += basis.iter().zip(frame).map(|(b, x)| b * x).sum::<f64>();
            }
        }
        let frames = log_mel.len() as f64;
        let values: Vec<f32> = means.into_iter().map(|sum| (sum / frames) as f32).collect();

        if let Some(coefficient) = values.iter().position(|v| !v.is_finite()) {
            return Err(FeatureExtractionError::NonFinite {
                window_index: window.index,
                coefficient,
            });
        }
        if values.len() != n_mfcc {
            return Err(FeatureExtractionError::Dimensionality {
                window_index: window.index,
                expected: n_mfcc,
                actual: values.len(),
            });
        }

        Ok(FeatureVector {
            window_index: window.index,
            values,
        })
    }
}

/// Average interleaved channels into one mono signal.
fn downmix(samples: &[i16], channels: usize) -> Vec<f32> {
    let channels = channels.max(1);
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().map(|&s| s as f32).sum::<f32>() / channels as f32)
        .collect()
}

/// Periodic Hann window.
fn hann_window(length: usize) -> Vec<f32> {
    (0..length)
        .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / length as f64).cos()) as f32)
        .collect()
}

fn hz_to_mel(hz: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;

    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;

    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        f_sp * mel
    }
}

/// Slaney-normalized triangular filters from 0 Hz to Nyquist.
fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Vec<f64> {
    let bins = n_fft / 2 + 1;
    let fft_freqs: Vec<f64> = (0..bins)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let max_mel = hz_to_mel(sample_rate as f64 / 2.0);
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(max_mel * i as f64 / (n_mels + 1) as f64))
        .collect();
    let widths: Vec<f64> = mel_points.windows(2).map(|w| w[1] - w[0]).collect();

    let mut bank = vec![0.0f64; n_mels * bins];
    for m in 0..n_mels {
        let norm = 2.0 / (mel_points[m + 2] - mel_points[m]);
        for (k, freq) in fft_freqs.iter().enumerate() {
            let lower = (freq - mel_points[m]) / widths[m];
            let upper = (mel_points[m + 2] - freq) / widths[m + 1];
            bank[m * bins + k] = lower.min(upper).max(0.0) * norm;
        }
    }
    bank
}

/// Orthonormal DCT-II rows, truncated to `n_out` coefficients.
fn dct_basis(n_out: usize, n_in: usize) -> Vec<f64> {
    let n = n_in as f64;
    let mut basis = Vec::with_capacity(n_out * n_in);
    for k in 0..n_out {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        for i in 0..n_in {
            basis.push(scale * (PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n)).cos());
        }
    }
    basis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::AudioBuffer;
    use std::time::Duration;

    fn tone(frames: usize, sample_rate: u32, hz: f64, amplitude: f64) -> Vec<i16> {
        (0..frames)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                (amplitude * (2.0 * PI * hz * t).sin()) as i16
            })
            .collect()
    }

    fn first_window(buffer: &AudioBuffer) -> Window<'_> {
        buffer
            .windows(Duration::from_millis(500))
            .unwrap()
            .next()
            .unwrap()
    }

    #[test]
    fn test_silence_gives_floor_energy_only() {
        let extractor = MfccExtractor::new(MfccConfig::default()).unwrap();
        let buffer = AudioBuffer::silent(8000, 16000, 1).unwrap();

        let features = extractor.extract(&first_window(&buffer)).unwrap();

        assert_eq!(features.len(), 15);
        // Every mel band sits at 10 * log10(amin) = -100 dB.
        let expected_c0 = -100.0 * (128.0f32).sqrt();
        assert!((features.values[0] - expected_c0).abs() < 0.05, "{}", features.values[0]);
        for value in &features.values[1..] {
            assert!(value.abs() < 0.01, "{}", value);
        }
    }

    #[test]
    fn test_tone_differs_from_silence() {
        let extractor = MfccExtractor::new(MfccConfig::default()).unwrap();
        let silent = AudioBuffer::silent(8000, 16000, 1).unwrap();
        let loud = AudioBuffer::new(tone(8000, 16000, 440.0, 8000.0), 16000, 1).unwrap();

        let silent_features = extractor.extract(&first_window(&silent)).unwrap();
        let tone_features = extractor.extract(&first_window(&loud)).unwrap();

        assert!(tone_features.values.iter().all(|v| v.is_finite()));
        assert!(tone_features.values[0] > silent_features.values[0]);
    }

    #[test]
    fn test_short_window_is_padded_not_rejected() {
        let extractor = MfccExtractor::new(MfccConfig::default()).unwrap();
        let buffer = AudioBuffer::new(tone(100, 16000, 1000.0, 4000.0), 16000, 1).unwrap();

        let features = extractor.extract(&first_window(&buffer)).unwrap();
        assert_eq!(features.window_index, 0);
        assert_eq!(features.len(), 15);
        assert!(features.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_identical_channels_match_mono() {
        let extractor = MfccExtractor::new(MfccConfig::default()).unwrap();
        let mono_samples = tone(4000, 8000, 300.0, 5000.0);
        let stereo_samples: Vec<i16> = mono_samples.iter().flat_map(|&s| [s, s]).collect();

        let mono = AudioBuffer::new(mono_samples, 8000, 1).unwrap();
        let stereo = AudioBuffer::new(stereo_samples, 8000, 2).unwrap();

        assert_eq!(
            extractor.extract(&first_window(&mono)).unwrap().values,
            extractor.extract(&first_window(&stereo)).unwrap().values
        );
    }

    #[test]
    fn test_extractor_reuses_filterbank_per_rate() {
        let extractor = MfccExtractor::new(MfccConfig::default()).unwrap();
        let a = extractor.mel_bank(16000);
        let b = extractor.mel_bank(16000);
        let c = extractor.mel_bank(44100);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(MfccExtractor::new(MfccConfig::with_coefficients(0)).is_err());
        assert!(MfccExtractor::new(MfccConfig::with_coefficients(200)).is_err());
        let odd = MfccConfig {
            n_fft: 1023,
            ..MfccConfig::default()
        };
        assert!(MfccExtractor::new(odd).is_err());
    }

    #[test]
    fn test_dct_basis_is_orthonormal() {
        let n = 16;
        let basis = dct_basis(n, n);
        for a in 0..n {
            for b in 0..n {
                let dot: f64 = (0..n).map(|i| basis[a * n + i] * basis[b * n + i]).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-9);
            }
        }
    }
}
