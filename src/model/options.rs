use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// Half precision on CUDA, float32 on CPU.
    #[default]
    Auto,
    Float32,
    Float16,
    BFloat16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSpec {
    /// First CUDA device when present, CPU otherwise.
    #[default]
    Auto,
    Cpu,
    Cuda(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantizationMode {
    #[default]
    None,
    /// Load the int8 TorchScript artifact instead of the full-precision one.
    Int8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadOptions {
    pub precision: Precision,
    pub device: DeviceSpec,
    pub quantization: QuantizationMode,
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "auto" => Ok(Precision::Auto),
            "float32" | "fp32" | "f32" => Ok(Precision::Float32),
            "float16" | "fp16" | "f16" | "half" => Ok(Precision::Float16),
            "bfloat16" | "bf16" => Ok(Precision::BFloat16),
            other => Err(format!("unknown precision '{other}'")),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Precision::Auto => "auto",
            Precision::Float32 => "float32",
            Precision::Float16 => "float16",
            Precision::BFloat16 => "bfloat16",
        })
    }
}

impl FromStr for DeviceSpec {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lower = raw.trim().to_lowercase();
        if lower == "auto" {
            Ok(DeviceSpec::Auto)
        } else if lower == "cpu" {
            Ok(DeviceSpec::Cpu)
        } else if lower.starts_with("cuda") {
            let idx = match lower.split(':').nth(1) {
                Some(raw_idx) => raw_idx
                    .parse::<usize>()
                    .map_err(|_| format!("invalid cuda index '{raw_idx}'"))?,
                None => 0,
            };
            Ok(DeviceSpec::Cuda(idx))
        } else {
            Err(format!("unknown device '{raw}'"))
        }
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Auto => f.write_str("auto"),
            DeviceSpec::Cpu => f.write_str("cpu"),
            DeviceSpec::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

impl FromStr for QuantizationMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "none" | "" | "off" => Ok(QuantizationMode::None),
            "int8" | "8bit" | "load_in_8bit" => Ok(QuantizationMode::Int8),
            other => Err(format!("unsupported quantization '{other}'")),
        }
    }
}

#[cfg(feature = "tch-backend")]
mod torch {
    use tch::{Device, Kind};

    use super::{DeviceSpec, Precision};

    impl DeviceSpec {
        pub fn resolve(self) -> Device {
            match self {
                DeviceSpec::Cpu => Device::Cpu,
                DeviceSpec::Auto => Device::cuda_if_available(),
                DeviceSpec::Cuda(idx) => {
                    if tch::Cuda::is_available() {
                        Device::Cuda(idx)
                    } else {
                        tracing::warn!(idx, "CUDA requested but not available, using CPU");
                        Device::Cpu
                    }
                }
            }
        }
    }

    impl Precision {
        pub fn resolve(self, device: Device) -> Kind {
            match self {
                Precision::Auto if device.is_cuda() => Kind::Half,
                Precision::Auto | Precision::Float32 => Kind::Float,
                Precision::Float16 => Kind::Half,
                Precision::BFloat16 => Kind::BFloat16,
            }
        }
    }
}
