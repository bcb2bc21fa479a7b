use std::{fs, path::Path};

use serde::Serialize;

use crate::{config::AppConfig, model::QuantizationMode};

/// On-disk size of the full-precision and int8 artifacts, when present.
#[derive(Debug, Clone, Serialize)]
pub struct QuantizationSummary {
    pub mode: QuantizationMode,
    pub full_precision_size_bytes: Option<u64>,
    pub quantized_size_bytes: Option<u64>,
    pub size_reduction_percent: Option<f64>,
}

impl QuantizationSummary {
    pub fn from_config(config: &AppConfig) -> QuantizationSummary {
        Self::from_sizes(
            config.load.quantization,
            file_size(&config.model_path),
            file_size(&config.quantized_model_path),
        )
    }

    pub fn from_sizes(
        mode: QuantizationMode,
        full_precision: Option<u64>,
        quantized: Option<u64>,
    ) -> QuantizationSummary {
        let reduction = match (full_precision, quantized) {
            (Some(0), Some(_)) => Some(0.0),
            (Some(full), Some(q)) => {
                let diff = full.saturating_sub(q) as f64;
                Some((diff / full as f64) * 100.0)
            }
            _ => None,
        };

        QuantizationSummary {
            mode,
            full_precision_size_bytes: full_precision,
            quantized_size_bytes: quantized,
            size_reduction_percent: reduction,
        }
    }
}

fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| m.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduction_is_relative_to_full_precision() {
        let summary = QuantizationSummary::from_sizes(QuantizationMode::Int8, Some(400), Some(100));
        assert_eq!(summary.size_reduction_percent, Some(75.0));
    }

    #[test]
    fn missing_artifact_leaves_reduction_unknown() {
        let summary = QuantizationSummary::from_sizes(QuantizationMode::None, Some(400), None);
        assert!(summary.size_reduction_percent.is_none());
    }

    #[test]
    fn reads_sizes_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::from_lookup(|_| None);
        config.model_path = dir.path().join("model.pt");
        config.quantized_model_path = dir.path().join("model_int8.pt");
        std::fs::write(&config.model_path, vec![0u8; 200]).unwrap();
        std::fs::write(&config.quantized_model_path, vec![0u8; 50]).unwrap();

        let summary = QuantizationSummary::from_config(&config);
        assert_eq!(summary.full_precision_size_bytes, Some(200));
        assert_eq!(summary.quantized_size_bytes, Some(50));
        assert_eq!(summary.size_reduction_percent, Some(75.0));
    }
}
