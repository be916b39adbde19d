//! Execution device selection.
//!
//! The device is chosen once at startup and registered as the process-wide
//! ONNX Runtime default, so every session created afterwards runs on it.

use std::fmt;
use std::str::FromStr;

use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};

/// Which device the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// CUDA when available, otherwise CPU.
    #[default]
    Auto,
    /// Always CPU.
    Cpu,
    /// CUDA, falling back to CPU with a warning.
    Cuda,
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(format!("unknown device '{other}', expected auto, cpu or cuda")),
        }
    }
}

/// The device inference actually runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionDevice {
    /// General-purpose processor.
    Cpu,
    /// NVIDIA accelerator via CUDA.
    Cuda,
}

impl ExecutionDevice {
    /// Whether this is an accelerator, which turns on the memory-saving guidance mode.
    #[must_use]
    pub const fn is_accelerator(&self) -> bool {
        matches!(self, Self::Cuda)
    }
}

impl fmt::Display for ExecutionDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("CPU"),
            Self::Cuda => f.write_str("GPU (CUDA)"),
        }
    }
}

/// Resolve `preference` to a device and register it with ONNX Runtime.
#[must_use]
pub fn select_device(preference: DevicePreference) -> ExecutionDevice {
    if preference == DevicePreference::Cpu {
        return ExecutionDevice::Cpu;
    }

    let cuda = CUDAExecutionProvider::default();
    if !matches!(cuda.is_available(), Ok(true)) {
        if preference == DevicePreference::Cuda {
            tracing::warn!("CUDA requested but not available, using CPU");
        }
        return ExecutionDevice::Cpu;
    }

    match ort::init().with_execution_providers([cuda.build()]).commit() {
        Ok(_) => ExecutionDevice::Cuda,
        Err(err) => {
            tracing::warn!("Failed to register CUDA execution provider, using CPU: {err}");
            ExecutionDevice::Cpu
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preference() {
        assert_eq!("auto".parse::<DevicePreference>(), Ok(DevicePreference::Auto));
        assert_eq!("CPU".parse::<DevicePreference>(), Ok(DevicePreference::Cpu));
        assert_eq!("gpu".parse::<DevicePreference>(), Ok(DevicePreference::Cuda));
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_cpu_preference_is_honoured() {
        let device = select_device(DevicePreference::Cpu);

        assert_eq!(device, ExecutionDevice::Cpu);
        assert!(!device.is_accelerator());
        assert_eq!(device.to_string(), "CPU");
    }
}
