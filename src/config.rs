//! # Configuration Management
//!
//! Loads the service configuration from, in increasing priority:
//! 1. Built-in defaults (`impl Default for AppConfig`)
//! 2. `config.toml` in the working directory (optional)
//! 3. `APP_`-prefixed environment variables, `__` between nested keys
//!    (`APP_PIPELINE__SEGMENT_DURATION_MS=250`, `APP_MODELS__DEVICE=cpu`)
//! 4. Plain `HOST` / `PORT`, as set by most deployment platforms
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: every section derives `Serialize` + `Deserialize`, so the same
//!   structs feed the `config` crate, the `/api/v1/config` endpoint and tests
//! - **Newtype helpers**: durations are stored as plain integers in the file and
//!   exposed as `std::time::Duration` through accessor methods
//! - **Result<T, E>**: `load` and `validate` return `anyhow::Result` so `main`
//!   can print one readable error and exit

use crate::classifier::ModelVariant;
use crate::device::DevicePreference;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Complete service configuration.
///
/// ## Sections:
/// - `server`: where to listen and how large an upload may be
/// - `pipeline`: windowing, feature width and classifier deadline
/// - `models`: which weights to load, on which device
/// - `jobs`: result retention and concurrency limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub models: ModelsConfig,
    pub jobs: JobsConfig,
}

/// HTTP listener settings.
///
/// - `host = "127.0.0.1"` accepts local connections only; `"0.0.0.0"` accepts all
/// - `max_upload_bytes` caps the size of one audio upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

/// Redaction pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Length of one classification window.
    pub segment_duration_ms: u64,
    /// Feature vector length; must equal every model's input width.
    pub feature_dimensionality: usize,
    /// Upper bound for one classifier batch call.
    pub classifier_timeout_ms: u64,
}

/// Classifier weights and inference device.
///
/// ## Model files:
/// Safetensors files holding `layers.{i}.weight` / `layers.{i}.bias` for a
/// dense network of shape
/// `feature_dimensionality → hidden_layers[0] → ... → 2`.
/// A variant whose file is missing stays unavailable; the service still starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub default_variant: ModelVariant,
    pub audio_model_path: PathBuf,
    pub text_model_path: PathBuf,
    /// Widths of the hidden layers, input side first.
    pub hidden_layers: Vec<usize>,
    pub device: DevicePreference,
}

/// Job store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobsConfig {
    /// How long a finished, unretrieved result is kept.
    pub result_retention_seconds: u64,
    /// How often the eviction sweep runs.
    pub cleanup_interval_seconds: u64,
    /// Jobs allowed in flight at once; further submissions are rejected.
    pub max_concurrent_jobs: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                max_upload_bytes: 50 * 1024 * 1024,
            },
            pipeline: PipelineConfig {
                segment_duration_ms: 500,
                feature_dimensionality: 15,
                classifier_timeout_ms: 30_000,
            },
            models: ModelsConfig {
                default_variant: ModelVariant::Audio,
                audio_model_path: PathBuf::from("models/audio_classifier.safetensors"),
                text_model_path: PathBuf::from("models/text_classifier.safetensors"),
                hidden_layers: vec![128, 64],
                device: DevicePreference::Auto,
            },
            jobs: JobsConfig {
                result_retention_seconds: 600,
                cleanup_interval_seconds: 60,
                max_concurrent_jobs: 8,
            },
        }
    }
}

impl PipelineConfig {
    pub fn segment_duration(&self) -> Duration {
        Duration::from_millis(self.segment_duration_ms)
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier_timeout_ms)
    }
}

impl ModelsConfig {
    pub fn model_path(&self, variant: ModelVariant) -> &PathBuf {
        match variant {
            ModelVariant::Audio => &self.audio_model_path,
            ModelVariant::Text => &self.text_model_path,
        }
    }
}

impl JobsConfig {
    pub fn result_retention(&self) -> Duration {
        Duration::from_secs(self.result_retention_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`
    /// - `APP_MODELS__AUDIO_MODEL_PATH=/srv/models/audio.safetensors`
    /// - `APP_MODELS__HIDDEN_LAYERS=256,64`
    /// - `APP_JOBS__RESULT_RETENTION_SECONDS=120`
    /// - `HOST=0.0.0.0`, `PORT=3000`
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("models.hidden_layers")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }
        if self.pipeline.segment_duration_ms == 0 {
            return Err(anyhow::anyhow!("Segment duration must be greater than 0"));
        }
        if self.pipeline.feature_dimensionality == 0 {
            return Err(anyhow::anyhow!("Feature dimensionality must be greater than 0"));
        }
        if self.pipeline.classifier_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Classifier timeout must be greater than 0"));
        }
        if self.models.hidden_layers.iter().any(|&width| width == 0) {
            return Err(anyhow::anyhow!("Hidden layer widths must be greater than 0"));
        }
        if self.jobs.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("Max concurrent jobs must be greater than 0"));
        }
        if self.jobs.cleanup_interval_seconds == 0 {
            return Err(anyhow::anyhow!("Cleanup interval must be greater than 0"));
        }
        if self.jobs.result_retention_seconds == 0 {
            return Err(anyhow::anyhow!("Result retention must be greater than 0"));
        }

        Ok(())
    }
}
