//! # Pipeline Orchestrator
//!
//! Runs one job from upload bytes to a redacted WAV:
//!
//! ```text
//! decode → window → extract → classify → merge/redact → encode
//! ```
//!
//! The orchestrator is synchronous and owns nothing shared except the
//! read-only extractor/classifier pair it is handed; it reports progress
//! through a callback so the job store can advance the job's status.
//! Any error stops the run immediately and nothing partial is returned.

use crate::audio::{decode, encode_wav, AudioFormat, WindowSpan};
use crate::classifier::{predict_with_timeout, ClassificationError, VariantBinding};
use crate::config::PipelineConfig;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::state::JobStatus;
use crate::redaction::{apply_redaction, merge_flagged, ScoredWindow};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Timing parameters shared by every job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub segment_duration: Duration,
    pub classifier_timeout: Duration,
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            segment_duration: config.segment_duration(),
            classifier_timeout: config.classifier_timeout(),
        }
    }
}

/// A validated upload waiting to be processed.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub filename: String,
    pub format: AudioFormat,
    pub bytes: Vec<u8>,
}

impl AudioUpload {
    /// Check the payload before a job is created for it.
    ///
    /// ## Errors:
    /// `InvalidInput` for an empty payload, one larger than `max_bytes`, or a
    /// filename that is not `.wav` / `.mp3`.
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>, max_bytes: usize) -> PipelineResult<Self> {
        let filename = filename.into();
        if filename.trim().is_empty() {
            return Err(PipelineError::InvalidInput("No selected file".to_string()));
        }
        if bytes.is_empty() {
            return Err(PipelineError::InvalidInput(format!("File '{}' is empty", filename)));
        }
        if bytes.len() > max_bytes {
            return Err(PipelineError::InvalidInput(format!(
                "File '{}' is {} bytes, the limit is {} bytes",
                filename,
                bytes.len(),
                max_bytes
            )));
        }
        let format = AudioFormat::from_filename(&filename)?;

        Ok(Self {
            filename,
            format,
            bytes,
        })
    }
}

/// Summary of what a finished job did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedactionReport {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_ms: u64,
    pub window_count: usize,
    pub scored_windows: usize,
    /// Windows whose features could not be computed; never redacted.
    pub unscored_windows: Vec<usize>,
    pub flagged_windows: usize,
    /// `[start_ms, end_ms)` of every silenced interval.
    pub flagged_intervals_ms: Vec<(u64, u64)>,
    pub processing_time_ms: u64,
}

/// Everything a successful job produces.
#[derive(Debug, Clone)]
pub struct JobArtifact {
    /// The redacted audio encoded as 16-bit PCM WAV.
    pub wav: Vec<u8>,
    pub report: RedactionReport,
}

pub struct Orchestrator {
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(settings: PipelineSettings) -> Self {
        Self { settings }
    }

    /// Run every stage for one upload.
    ///
    /// `on_stage` is called after each completed stage from `Decoded` through
    /// `Redacted`; moving to `Exported` is left to whoever stores the artifact.
    /// `held` travels with the classifier call and is released when that call
    /// really ends, even after a timeout.
    pub fn run(
        &self,
        upload: &AudioUpload,
        binding: &VariantBinding,
        held: impl Send + 'static,
        mut on_stage: impl FnMut(JobStatus),
    ) -> PipelineResult<JobArtifact> {
        let started = Instant::now();

        let buffer = decode(&upload.bytes, upload.format)?;
        if buffer.frames() == 0 || buffer.duration().is_zero() {
            return Err(PipelineError::InvalidInput(format!(
                "File '{}' contains no audio",
                upload.filename
            )));
        }
        on_stage(JobStatus::Decoded);

        let windows = buffer.windows(self.settings.segment_duration)?;
        let window_count = windows.len();
        debug!(
            window_count,
            segment_ms = self.settings.segment_duration.as_millis() as u64,
            "Audio segmented"
        );
        on_stage(JobStatus::Segmented);

        let mut spans: Vec<WindowSpan> = Vec::with_capacity(window_count);
        let mut features = Vec::with_capacity(window_count);
        let mut unscored_windows = Vec::new();
        for window in windows {
            spans.push(window.span());
            match binding.extractor.extract(&window) {
                Ok(vector) => features.push(vector),
                Err(e) => {
                    warn!(window = window.index, "Window left unscored: {}", e);
                    unscored_windows.push(window.index);
                }
            }
        }
        if features.is_empty() {
            return Err(PipelineError::FeatureExtraction(format!(
                "none of the {} windows could be scored",
                window_count
            )));
        }
        let scored_windows = features.len();
        on_stage(JobStatus::Featurized);

        let classifications = predict_with_timeout(
            Arc::clone(&binding.classifier),
            features,
            self.settings.classifier_timeout,
            held,
        )?;
        on_stage(JobStatus::Classified);

        let mut scored: Vec<ScoredWindow> = spans
            .into_iter()
            .map(|span| ScoredWindow {
                span,
                classification: None,
            })
            .collect();
        for classification in classifications {
            let slot = scored.get_mut(classification.window_index).ok_or_else(|| {
                PipelineError::Classification(ClassificationError::Inference(format!(
                    "classification refers to window {} of {}",
                    classification.window_index, window_count
                )))
            })?;
            slot.classification = Some(classification);
        }
        let flagged_windows = scored.iter().filter(|w| w.is_flagged()).count();

        let intervals = merge_flagged(&scored);
        let redacted = apply_redaction(&buffer, &intervals)?;
        debug!(
            flagged_windows,
            intervals = redacted.intervals.len(),
            "Flagged windows silenced"
        );
        on_stage(JobStatus::Redacted);

        let wav = encode_wav(&redacted.audio)?;

        let sample_rate = buffer.sample_rate();
        let report = RedactionReport {
            sample_rate,
            channels: buffer.channels(),
            duration_ms: buffer.duration().as_millis() as u64,
            window_count,
            scored_windows,
            unscored_windows,
            flagged_windows,
            flagged_intervals_ms: redacted
                .intervals
                .iter()
                .map(|interval| interval.to_millis(sample_rate))
                .collect(),
            processing_time_ms: started.elapsed().as_millis() as u64,
        };

        Ok(JobArtifact { wav, report })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::{AudioBuffer, Window};
    use crate::classifier::tests::{FlagWindows, Stalled};
    use crate::classifier::{Classifier, ModelVariant};
    use crate::features::{
        FeatureExtractionError, FeatureExtractor, FeatureVector, MfccConfig, MfccExtractor,
    };
    use std::collections::HashSet;

    pub(crate) const RATE: u32 = 16000;

    /// 440 Hz tone; every sample is non-zero except where the sine crosses zero.
    pub(crate) fn tone_buffer(duration_ms: u64, channels: u16) -> AudioBuffer {
        let frames = (duration_ms * RATE as u64 / 1000) as usize;
        let samples = (0..frames)
            .flat_map(|i| {
                let t = i as f64 / RATE as f64;
                let value = (6000.0 * (2.0 * std::f64::consts::PI * 440.0 * t).sin()) as i16;
                std::iter::repeat(value).take(channels as usize)
            })
            .collect();
        AudioBuffer::new(samples, RATE, channels).unwrap()
    }

    pub(crate) fn wav_upload(buffer: &AudioBuffer, name: &str) -> AudioUpload {
        AudioUpload::new(name, encode_wav(buffer).unwrap(), usize::MAX).unwrap()
    }

    pub(crate) fn binding(classifier: Arc<dyn Classifier>) -> VariantBinding {
        VariantBinding {
            variant: ModelVariant::Audio,
            extractor: Arc::new(MfccExtractor::new(MfccConfig::default()).unwrap()),
            classifier,
        }
    }

    fn orchestrator(timeout: Duration) -> Orchestrator {
        Orchestrator::new(PipelineSettings {
            segment_duration: Duration::from_millis(500),
            classifier_timeout: timeout,
        })
    }

    /// Fails on selected windows, returns zeros for the rest.
    struct FailOn {
        windows: HashSet<usize>,
    }

    impl FeatureExtractor for FailOn {
        fn name(&self) -> &str {
            "fail-on"
        }

        fn dimensionality(&self) -> usize {
            15
        }

        fn extract(&self, window: &Window<'_>) -> Result<FeatureVector, FeatureExtractionError> {
            if self.windows.contains(&window.index) {
                return Err(FeatureExtractionError::NonFinite {
                    window_index: window.index,
                    coefficient: 0,
                });
            }
            Ok(FeatureVector {
                window_index: window.index,
                values: vec![0.0; 15],
            })
        }
    }

    #[test]
    fn test_end_to_end_silences_flagged_middle() {
        let source = tone_buffer(2000, 1);
        let upload = wav_upload(&source, "speech.wav");
        let binding = binding(Arc::new(FlagWindows::new(15, &[1, 2])));

        let mut stages = Vec::new();
        let artifact = orchestrator(Duration::from_secs(5))
            .run(&upload, &binding, (), |status| stages.push(status))
            .unwrap();

        let redacted = decode(&artifact.wav, AudioFormat::Wav).unwrap();
        let out = redacted.samples();
        let (a, b) = (8000, 24000);
        assert_eq!(out.len(), source.samples().len());
        assert_eq!(&out[..a], &source.samples()[..a]);
        assert!(out[a..b].iter().all(|&s| s == 0));
        assert_eq!(&out[b..], &source.samples()[b..]);

        assert_eq!(artifact.report.window_count, 4);
        assert_eq!(artifact.report.flagged_windows, 2);
        assert_eq!(artifact.report.flagged_intervals_ms, vec![(500, 1500)]);
        assert_eq!(
            stages,
            vec![
                JobStatus::Decoded,
                JobStatus::Segmented,
                JobStatus::Featurized,
                JobStatus::Classified,
                JobStatus::Redacted
            ]
        );
        assert_eq!(redacted.sample_rate(), RATE);
    }

    #[test]
    fn test_clean_audio_comes_back_unchanged() {
        let source = tone_buffer(1250, 2);
        let upload = wav_upload(&source, "clean.wav");
        let artifact = orchestrator(Duration::from_secs(5))
            .run(&upload, &binding(Arc::new(FlagWindows::new(15, &[]))), (), |_| {})
            .unwrap();

        assert_eq!(decode(&artifact.wav, AudioFormat::Wav).unwrap(), source);
        assert!(artifact.report.flagged_intervals_ms.is_empty());
        assert_eq!(artifact.report.window_count, 3);
        assert_eq!(artifact.report.duration_ms, 1250);
    }

    #[test]
    fn test_unscored_window_is_reported_and_kept() {
        let source = tone_buffer(1500, 1);
        let upload = wav_upload(&source, "partial.wav");
        let binding = VariantBinding {
            variant: ModelVariant::Text,
            extractor: Arc::new(FailOn {
                windows: [1].into_iter().collect(),
            }),
            classifier: Arc::new(FlagWindows::new(15, &[0, 1, 2])),
        };

        let artifact = orchestrator(Duration::from_secs(5)).run(&upload, &binding, (), |_| {}).unwrap();

        assert_eq!(artifact.report.unscored_windows, vec![1]);
        assert_eq!(artifact.report.scored_windows, 2);
        // Window 1 was never scored, so it splits the flagged run in two.
        assert_eq!(artifact.report.flagged_intervals_ms, vec![(0, 500), (1000, 1500)]);
        let redacted = decode(&artifact.wav, AudioFormat::Wav).unwrap();
        assert_eq!(&redacted.samples()[8000..16000], &source.samples()[8000..16000]);
    }

    #[test]
    fn test_all_windows_unscored_fails() {
        let upload = wav_upload(&tone_buffer(1000, 1), "broken.wav");
        let binding = VariantBinding {
            variant: ModelVariant::Audio,
            extractor: Arc::new(FailOn {
                windows: [0, 1].into_iter().collect(),
            }),
            classifier: Arc::new(FlagWindows::new(15, &[])),
        };

        let err = orchestrator(Duration::from_secs(5)).run(&upload, &binding, (), |_| {}).unwrap_err();
        assert!(matches!(err, PipelineError::FeatureExtraction(_)));
    }

    #[test]
    fn test_classifier_timeout_fails_job() {
        let upload = wav_upload(&tone_buffer(1000, 1), "slow.wav");
        let binding = binding(Arc::new(Stalled {
            width: 15,
            delay: Duration::from_millis(500),
        }));

        let mut stages = Vec::new();
        let err = orchestrator(Duration::from_millis(20))
            .run(&upload, &binding, (), |status| stages.push(status))
            .unwrap_err();

        assert_eq!(err, PipelineError::Timeout(20));
        assert_eq!(stages.last(), Some(&JobStatus::Featurized));
    }

    #[test]
    fn test_zero_duration_audio_is_invalid() {
        // 44-byte header announcing 16 kHz mono 16-bit PCM and an empty data chunk.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&36u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&RATE.to_le_bytes());
        bytes.extend_from_slice(&(RATE * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&0u32.to_le_bytes());
        let upload = AudioUpload::new("empty.wav", bytes, usize::MAX).unwrap();

        let mut stages = Vec::new();
        let err = orchestrator(Duration::from_secs(1))
            .run(&upload, &binding(Arc::new(FlagWindows::new(15, &[]))), (), |s| stages.push(s))
            .unwrap_err();

        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert!(stages.is_empty());
    }

    #[test]
    fn test_upload_validation() {
        assert!(AudioUpload::new("a.wav", vec![1, 2, 3], 10).is_ok());
        assert!(AudioUpload::new("a.wav", Vec::new(), 10).is_err());
        assert!(AudioUpload::new("a.wav", vec![0; 11], 10).is_err());
        assert!(AudioUpload::new("a.flac", vec![0; 4], 10).is_err());
        assert!(AudioUpload::new("", vec![0; 4], 10).is_err());
    }
}
