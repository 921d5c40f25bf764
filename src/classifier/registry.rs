//! # Model Registry
//!
//! Maps each `ModelVariant` to the extractor/classifier pair that implements
//! it. The registry is built once at startup and never changes afterwards, so
//! it is shared by plain `Arc` without a lock.
//!
//! ## Availability:
//! A variant whose weights cannot be loaded (missing file, wrong shapes, width
//! that disagrees with the feature extractor) is kept in the registry as
//! `Unavailable` with the reason. Jobs that select it are rejected up front;
//! the other variant keeps working.

use crate::classifier::{CandleClassifier, Classifier, ModelVariant};
use crate::config::{ModelsConfig, PipelineConfig};
use crate::device::DeviceManager;
use crate::features::FeatureExtractor;
use crate::pipeline::error::{PipelineError, PipelineResult};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

/// The steps a variant contributes to a pipeline run.
#[derive(Clone)]
pub struct VariantBinding {
    pub variant: ModelVariant,
    pub extractor: Arc<dyn FeatureExtractor>,
    pub classifier: Arc<dyn Classifier>,
}

impl std::fmt::Debug for VariantBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariantBinding")
            .field("variant", &self.variant)
            .field("extractor", &self.extractor.name())
            .field("classifier", &self.classifier.name())
            .finish()
    }
}

/// Whether a variant can take jobs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VariantStatus {
    Ready {
        extractor: String,
        classifier: String,
        input_width: usize,
    },
    Unavailable {
        reason: String,
    },
}

impl VariantStatus {
    #[cfg(test)]
    pub fn is_ready(&self) -> bool {
        matches!(self, VariantStatus::Ready { .. })
    }
}

/// One row of `GET /api/v1/models`.
#[derive(Debug, Clone, Serialize)]
pub struct VariantSummary {
    pub variant: ModelVariant,
    pub label: &'static str,
    pub is_default: bool,
    #[serde(flatten)]
    pub status: VariantStatus,
}

#[derive(Default)]
pub struct ModelRegistry {
    bindings: HashMap<ModelVariant, VariantBinding>,
    unavailable: HashMap<ModelVariant, String>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every variant named in the config, sharing one feature extractor.
    ///
    /// Load failures are logged and recorded, never returned.
    pub fn load_from_config(
        models: &ModelsConfig,
        pipeline: &PipelineConfig,
        extractor: Arc<dyn FeatureExtractor>,
    ) -> Self {
        let device = DeviceManager::resolve(models.device);
        let mut registry = Self::new();

        for variant in ModelVariant::ALL {
            let path = models.model_path(variant);
            let loaded = CandleClassifier::load(
                variant.label(),
                path,
                pipeline.feature_dimensionality,
                &models.hidden_layers,
                device.clone(),
            );

            match loaded {
                Ok(classifier) => {
                    if let Err(e) = registry.register(variant, Arc::clone(&extractor), Arc::new(classifier)) {
                        error!(variant = %variant, "Rejected classifier: {}", e);
                        registry.mark_unavailable(variant, e.to_string());
                    }
                }
                Err(e) => {
                    error!(variant = %variant, path = %path.display(), "Failed to load classifier: {:#}", e);
                    registry.mark_unavailable(variant, format!("{:#}", e));
                }
            }
        }

        registry
    }

    /// Bind a variant to an extractor/classifier pair.
    ///
    /// ## Errors:
    /// `InvalidInput` when the extractor's output width differs from the
    /// classifier's input width.
    pub fn register(
        &mut self,
        variant: ModelVariant,
        extractor: Arc<dyn FeatureExtractor>,
        classifier: Arc<dyn Classifier>,
    ) -> PipelineResult<()> {
        if extractor.dimensionality() != classifier.input_width() {
            return Err(PipelineError::InvalidInput(format!(
                "{} extractor produces {} features but classifier '{}' expects {}",
                extractor.name(),
                extractor.dimensionality(),
                classifier.name(),
                classifier.input_width()
            )));
        }

        info!(
            variant = %variant,
            extractor = extractor.name(),
            classifier = classifier.name(),
            "Model variant ready"
        );
        self.unavailable.remove(&variant);
        self.bindings.insert(
            variant,
            VariantBinding {
                variant,
                extractor,
                classifier,
            },
        );
        Ok(())
    }

    pub fn mark_unavailable(&mut self, variant: ModelVariant, reason: String) {
        self.bindings.remove(&variant);
        self.unavailable.insert(variant, reason);
    }

    /// The pipeline steps for `variant`, or `InvalidInput` if it cannot run.
    pub fn binding(&self, variant: ModelVariant) -> PipelineResult<VariantBinding> {
        if let Some(binding) = self.bindings.get(&variant) {
            return Ok(binding.clone());
        }
        let reason = self
            .unavailable
            .get(&variant)
            .map(String::as_str)
            .unwrap_or("not configured");
        Err(PipelineError::InvalidInput(format!(
            "Model variant '{}' is unavailable: {}",
            variant, reason
        )))
    }

    pub fn status(&self, variant: ModelVariant) -> VariantStatus {
        match self.bindings.get(&variant) {
            Some(binding) => VariantStatus::Ready {
                extractor: binding.extractor.name().to_string(),
                classifier: binding.classifier.name().to_string(),
                input_width: binding.classifier.input_width(),
            },
            None => VariantStatus::Unavailable {
                reason: self
                    .unavailable
                    .get(&variant)
                    .cloned()
                    .unwrap_or_else(|| "not configured".to_string()),
            },
        }
    }

    pub fn ready_count(&self) -> usize {
        self.bindings.len()
    }

    pub fn summary(&self, default_variant: ModelVariant) -> Vec<VariantSummary> {
        ModelVariant::ALL
            .iter()
            .map(|&variant| VariantSummary {
                variant,
                label: variant.label(),
                is_default: variant == default_variant,
                status: self.status(variant),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::FlagWindows;
    use crate::features::{MfccConfig, MfccExtractor};

    fn mfcc() -> Arc<dyn FeatureExtractor> {
        Arc::new(MfccExtractor::new(MfccConfig::default()).unwrap())
    }

    #[test]
    fn test_register_and_bind() {
        let mut registry = ModelRegistry::new();
        registry
            .register(ModelVariant::Audio, mfcc(), Arc::new(FlagWindows::new(15, &[])))
            .unwrap();

        let binding = registry.binding(ModelVariant::Audio).unwrap();
        assert_eq!(binding.variant, ModelVariant::Audio);
        assert_eq!(binding.classifier.name(), "flag-windows");
        assert!(registry.status(ModelVariant::Audio).is_ready());
        assert_eq!(registry.ready_count(), 1);
    }

    #[test]
    fn test_width_mismatch_is_refused() {
        let mut registry = ModelRegistry::new();
        let result = registry.register(ModelVariant::Text, mfcc(), Arc::new(FlagWindows::new(20, &[])));
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
        assert!(registry.binding(ModelVariant::Text).is_err());
    }

    #[test]
    fn test_missing_weights_leave_variant_unavailable() {
        let mut models = missing_models();
        models.device = crate::device::DevicePreference::Cpu;
        let pipeline = crate::config::AppConfig::default().pipeline;

        let registry = ModelRegistry::load_from_config(&models, &pipeline, mfcc());

        assert_eq!(registry.ready_count(), 0);
        assert!(matches!(
            registry.binding(ModelVariant::Audio),
            Err(PipelineError::InvalidInput(_))
        ));
        let summary = registry.summary(ModelVariant::Audio);
        assert_eq!(summary.len(), 2);
        assert!(summary[0].is_default);
        assert!(!summary[0].status.is_ready());

        let json = serde_json::to_value(&summary[1]).unwrap();
        assert_eq!(json["variant"], "text");
        assert_eq!(json["status"], "unavailable");
    }

    fn missing_models() -> ModelsConfig {
        let mut models = crate::config::AppConfig::default().models;
        let dir = std::env::temp_dir().join(format!("no-models-{}", uuid::Uuid::new_v4()));
        models.audio_model_path = dir.join("audio.safetensors");
        models.text_model_path = dir.join("text.safetensors");
        models
    }
}
