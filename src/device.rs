//! # Inference Device Selection
//!
//! Picks the candle device the classifiers run on. Detection is done once per
//! process and cached: CUDA first, then Metal, then CPU.

use candle_core::Device;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

static BEST_DEVICE: OnceLock<Device> = OnceLock::new();

/// Configured device preference (`models.device`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    /// Falls back to CPU when no CUDA device is present.
    #[serde(alias = "gpu")]
    Cuda,
    /// Falls back to CPU when no Metal device is present.
    Metal,
}

pub struct DeviceManager;

impl DeviceManager {
    /// Resolve a preference to a concrete device.
    pub fn resolve(preference: DevicePreference) -> Device {
        match preference {
            DevicePreference::Auto => Self::best_device(),
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => Self::cuda_device().unwrap_or_else(|| {
                warn!("CUDA requested but unavailable, classifiers will run on CPU");
                Device::Cpu
            }),
            DevicePreference::Metal => Self::metal_device().unwrap_or_else(|| {
                warn!("Metal requested but unavailable, classifiers will run on CPU");
                Device::Cpu
            }),
        }
    }

    /// Best available device, detected once.
    pub fn best_device() -> Device {
        BEST_DEVICE.get_or_init(Self::detect).clone()
    }

    fn detect() -> Device {
        if let Some(device) = Self::cuda_device() {
            info!("Selected CUDA GPU for classifier inference");
            return device;
        }
        if let Some(device) = Self::metal_device() {
            info!("Selected Metal GPU for classifier inference");
            return device;
        }
        info!("Using CPU for classifier inference");
        Device::Cpu
    }

    fn cuda_device() -> Option<Device> {
        Device::new_cuda(0)
            .map_err(|e| debug!("CUDA not available: {}", e))
            .ok()
    }

    fn metal_device() -> Option<Device> {
        Device::new_metal(0)
            .map_err(|e| debug!("Metal not available: {}", e))
            .ok()
    }

    pub fn describe(device: &Device) -> &'static str {
        match device {
            Device::Cpu => "cpu",
            Device::Cuda(_) => "cuda",
            Device::Metal(_) => "metal",
        }
    }
}
