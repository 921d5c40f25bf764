//! # Dense Classifier (candle)
//!
//! A small feed-forward network over feature vectors: ReLU hidden layers and a
//! two-way softmax output. Weights are read once from a safetensors file with
//! tensors named `layers.{i}.weight` / `layers.{i}.bias`, outermost layer last.
//!
//! ## Loading Process:
//! 1. Memory-map the safetensors file onto the selected device
//! 2. Build one `Linear` per layer, checking every shape against the config
//! 3. Run a warm-up prediction on a zero vector
//!
//! After that the model is immutable and shared across jobs through an `Arc`.

use crate::classifier::{check_input_width, Classification, ClassificationError, Classifier};
use crate::device::DeviceManager;
use crate::features::FeatureVector;
use anyhow::{Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder};
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Number of output classes: clean and flagged.
pub const OUTPUT_CLASSES: usize = 2;

pub struct CandleClassifier {
    name: String,
    layers: Vec<Linear>,
    input_width: usize,
    device: Device,
}

impl CandleClassifier {
    /// Load weights from a safetensors file and warm the model up.
    pub fn load(
        name: &str,
        path: &Path,
        input_width: usize,
        hidden_layers: &[usize],
        device: Device,
    ) -> Result<Self> {
        let start = Instant::now();
        if !path.exists() {
            anyhow::bail!("model weights not found at {}", path.display());
        }

        // Safety: the file is mapped read-only and not modified while the
        // process runs.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, &device) }
            .with_context(|| format!("failed to map {}", path.display()))?;

        let classifier = Self::from_var_builder(name, vb, input_width, hidden_layers, device)?;
        classifier.warm_up()?;

        info!(
            model = name,
            path = %path.display(),
            device = DeviceManager::describe(&classifier.device),
            load_ms = start.elapsed().as_millis() as u64,
            "Classifier loaded"
        );
        Ok(classifier)
    }

    /// Build the network from any `VarBuilder` (file-backed or in-memory).
    pub fn from_var_builder(
        name: &str,
        vb: VarBuilder,
        input_width: usize,
        hidden_layers: &[usize],
        device: Device,
    ) -> Result<Self> {
        if input_width == 0 {
            anyhow::bail!("input width must be greater than 0");
        }

        let mut dims = Vec::with_capacity(hidden_layers.len() + 2);
        dims.push(input_width);
        dims.extend_from_slice(hidden_layers);
        dims.push(OUTPUT_CLASSES);

        let layers = dims
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                candle_nn::linear(pair[0], pair[1], vb.pp(format!("layers.{i}")))
                    .with_context(|| format!("layer {} ({} -> {})", i, pair[0], pair[1]))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.to_string(),
            layers,
            input_width,
            device,
        })
    }

    fn warm_up(&self) -> Result<()> {
        let probe = FeatureVector {
            window_index: 0,
            values: vec![0.0; self.input_width],
        };
        self.predict(&[probe])
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("warm-up prediction failed: {}", e))
    }

    fn forward(&self, input: &Tensor) -> candle_core::Result<Tensor> {
        let last = self.layers.len() - 1;
        let mut x = input.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x)?;
            if i < last {
                x = x.relu()?;
            }
        }
        candle_nn::ops::softmax_last_dim(&x)
    }
}

impl Classifier for CandleClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_width(&self) -> usize {
        self.input_width
    }

    fn predict(&self, batch: &[FeatureVector]) -> Result<Vec<Classification>, ClassificationError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        check_input_width(batch, self.input_width)?;

        let flat: Vec<f32> = batch.iter().flat_map(|fv| fv.values.iter().copied()).collect();
        let probabilities = Tensor::from_vec(flat, (batch.len(), self.input_width), &self.device)
            .and_then(|input| self.forward(&input))
            .and_then(|output| output.to_vec2::<f32>())
            .map_err(|e| ClassificationError::Inference(e.to_string()))?;

        batch
            .iter()
            .zip(probabilities)
            .map(|(fv, scores)| Classification::from_scores(fv.window_index, scores))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// One linear layer: logit(clean) = 0, logit(flagged) = x[0].
    fn first_feature_tensors(width: usize) -> HashMap<String, Tensor> {
        let mut weight = vec![0.0f32; OUTPUT_CLASSES * width];
        weight[width] = 1.0;

        let mut tensors = HashMap::new();
        tensors.insert(
            "layers.0.weight".to_string(),
            Tensor::from_vec(weight, (OUTPUT_CLASSES, width), &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "layers.0.bias".to_string(),
            Tensor::zeros(OUTPUT_CLASSES, DType::F32, &Device::Cpu).unwrap(),
        );
        tensors
    }

    fn first_feature_classifier(width: usize) -> CandleClassifier {
        let vb = VarBuilder::from_tensors(first_feature_tensors(width), DType::F32, &Device::Cpu);
        CandleClassifier::from_var_builder("test", vb, width, &[], Device::Cpu).unwrap()
    }

    fn vector(window_index: usize, first: f32, width: usize) -> FeatureVector {
        let mut values = vec![0.0; width];
        values[0] = first;
        FeatureVector { window_index, values }
    }

    #[test]
    fn test_predict_follows_weights() {
        let classifier = first_feature_classifier(15);
        let batch = vec![vector(4, 5.0, 15), vector(5, -5.0, 15), vector(9, 3.0, 15)];

        let result = classifier.predict(&batch).unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result.iter().map(|c| c.window_index).collect::<Vec<_>>(), vec![4, 5, 9]);
        assert!(result[0].is_flagged());
        assert!(!result[1].is_flagged());
        assert!(result[2].is_flagged());
        for classification in &result {
            let total: f32 = classification.scores.iter().sum();
            assert!((total - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_hidden_layers_and_empty_batch() {
        let width = 3;
        let mut tensors = HashMap::new();
        // Hidden layer passes x[0] through; output layer is the same trick as above.
        tensors.insert(
            "layers.0.weight".to_string(),
            Tensor::from_vec(vec![1.0f32, 0.0, 0.0, 0.0, 0.0, 0.0], (2, width), &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "layers.0.bias".to_string(),
            Tensor::zeros(2, DType::F32, &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "layers.1.weight".to_string(),
            Tensor::from_vec(vec![0.0f32, 0.0, 1.0, 0.0], (2, 2), &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "layers.1.bias".to_string(),
            Tensor::zeros(2, DType::F32, &Device::Cpu).unwrap(),
        );
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &Device::Cpu);
        let classifier = CandleClassifier::from_var_builder("deep", vb, width, &[2], Device::Cpu).unwrap();

        assert!(classifier.predict(&[]).unwrap().is_empty());
        let result = classifier.predict(&[vector(0, 2.0, width), vector(1, -2.0, width)]).unwrap();
        assert!(result[0].is_flagged());
        // ReLU zeroes the negative input, leaving a 50/50 split that resolves to clean.
        assert!(!result[1].is_flagged());
    }

    #[test]
    fn test_shape_mismatch_fails_to_build() {
        let vb = VarBuilder::from_tensors(first_feature_tensors(15), DType::F32, &Device::Cpu);
        assert!(CandleClassifier::from_var_builder("bad", vb, 13, &[], Device::Cpu).is_err());
    }

    #[test]
    fn test_wrong_width_batch_is_rejected() {
        let classifier = first_feature_classifier(15);
        let err = classifier.predict(&[vector(0, 1.0, 12)]).unwrap_err();
        assert!(matches!(err, ClassificationError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_load_from_safetensors_file() {
        let path = std::env::temp_dir().join(format!("classifier-{}.safetensors", uuid::Uuid::new_v4()));
        candle_core::safetensors::save(&first_feature_tensors(15), &path).unwrap();

        let classifier = CandleClassifier::load("file", &path, 15, &[], Device::Cpu).unwrap();
        let result = classifier.predict(&[vector(0, 4.0, 15)]).unwrap();
        assert!(result[0].is_flagged());

        std::fs::remove_file(&path).unwrap();
        assert!(CandleClassifier::load("missing", &path, 15, &[], Device::Cpu).is_err());
    }
}
