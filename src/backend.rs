//! Backend abstraction - Multi-backend support
//!
//! Supports CUDA (GPU) and NdArray (CPU) backends, chosen by cargo feature,
//! plus a runtime precision switch for mixed-precision runs.

use burn::backend::Autodiff;
use serde::{Deserialize, Serialize};

// --------------------------------------------------------------------------------
// BACKEND SELECTION: CUDA (preferred) or NdArray (fallback)
// --------------------------------------------------------------------------------

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

/// Reduced-precision variant of the default backend
#[cfg(feature = "cuda")]
pub type HalfBackend = burn_cuda::Cuda<burn::tensor::f16, i32>;

#[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
pub type DefaultBackend = burn_ndarray::NdArray;

/// NdArray has no f16 kernels, so half precision maps back to f32
#[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
pub type HalfBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray")))]
compile_error!("At least one backend (cuda or ndarray) must be enabled!");

/// The default autodiff backend for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Autodiff backend for half-precision training
pub type HalfTrainingBackend = Autodiff<HalfBackend>;

/// Device type shared by both precisions of the selected backend
pub type Device = <DefaultBackend as burn::tensor::backend::Backend>::Device;

/// Floating-point precision used for training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 32-bit floats
    Full,
    /// 16-bit floats where the backend supports them
    #[default]
    Half,
}

impl Precision {
    /// Whether the compiled backend really runs this precision natively
    pub fn is_native(&self) -> bool {
        match self {
            Precision::Full => true,
            Precision::Half => supports_half(),
        }
    }

    /// Precision actually used by the compiled backend
    pub fn effective(&self) -> Precision {
        if self.is_native() {
            *self
        } else {
            Precision::Full
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Precision::Full => write!(f, "32-bit"),
            Precision::Half => write!(f, "16-bit"),
        }
    }
}

impl std::str::FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" | "32" | "f32" => Ok(Precision::Full),
            "half" | "16" | "f16" => Ok(Precision::Half),
            other => Err(format!("Unknown precision '{}', expected 'full' or 'half'", other)),
        }
    }
}

/// Whether the compiled backend has native f16 support
pub fn supports_half() -> bool {
    cfg!(feature = "cuda")
}

/// Get the device with the given accelerator index
///
/// The CPU backend has a single device; any index maps onto it.
pub fn device_for_index(index: usize) -> Device {
    #[cfg(feature = "cuda")]
    {
        burn_cuda::CudaDevice::new(index)
    }

    #[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
    {
        if index != 0 {
            tracing::warn!("Device index {} requested on the CPU backend, using the CPU", index);
        }
        Device::default()
    }
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
    {
        "NdArray (CPU)"
    }
}
