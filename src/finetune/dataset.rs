use std::{fs, path::Path};

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// One supervised sample: a natural-language description and the Verilog
/// that implements it. Datasets spell the fields either
/// `description`/`code` or `Instruction`/`Response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    #[serde(alias = "Instruction", alias = "instruction")]
    pub description: String,
    #[serde(alias = "Response", alias = "response", default)]
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train: Vec<TrainingExample>,
    pub eval: Vec<TrainingExample>,
}

/// Reads a JSON array or a JSON Lines file.
pub fn load_examples(path: &Path) -> Result<Vec<TrainingExample>, ServiceError> {
    let raw = fs::read_to_string(path)?;
    let trimmed = raw.trim_start();
    let examples = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)
            .map_err(|e| ServiceError::Dataset(format!("{}: {e}", path.display())))?
    } else {
        let mut examples = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let example = serde_json::from_str(line).map_err(|e| {
                ServiceError::Dataset(format!("{}:{}: {e}", path.display(), idx + 1))
            })?;
            examples.push(example);
        }
        examples
    };
    if examples.is_empty() {
        return Err(ServiceError::Dataset(format!(
            "{} contains no examples",
            path.display()
        )));
    }
    Ok(examples)
}

/// Shuffles with `seed` and holds out `ceil(test_size * n)` examples.
/// The same inputs always give the same split.
pub fn train_test_split(
    mut examples: Vec<TrainingExample>,
    test_size: f64,
    seed: u64,
) -> Result<DatasetSplit, ServiceError> {
    let total = examples.len();
    let n_test = (test_size * total as f64).ceil() as usize;
    if n_test == 0 || n_test >= total {
        return Err(ServiceError::Dataset(format!(
            "cannot split {total} examples with test_size {test_size}"
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    examples.shuffle(&mut rng);
    let eval = examples.split_off(total - n_test);
    Ok(DatasetSplit {
        train: examples,
        eval,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn examples(n: usize) -> Vec<TrainingExample> {
        (0..n)
            .map(|i| TrainingExample {
                description: format!("module {i}"),
                code: format!("module m{i}; endmodule"),
            })
            .collect()
    }

    #[test]
    fn split_is_reproducible_and_partitions() {
        let a = train_test_split(examples(50), 0.1, 7).unwrap();
        let b = train_test_split(examples(50), 0.1, 7).unwrap();
        assert_eq!(a.train, b.train);
        assert_eq!(a.eval, b.eval);
        assert_eq!(a.eval.len(), 5);
        assert_eq!(a.train.len(), 45);

        let mut all: Vec<_> = a.train.iter().chain(&a.eval).map(|e| e.description.clone()).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 50);
    }

    #[test]
    fn different_seed_gives_different_order() {
        let a = train_test_split(examples(50), 0.1, 1).unwrap();
        let b = train_test_split(examples(50), 0.1, 2).unwrap();
        assert_ne!(a.train, b.train);
    }

    #[test]
    fn too_small_to_split() {
        assert!(train_test_split(examples(1), 0.1, 0).is_err());
    }

    #[test]
    fn loads_jsonl_with_either_field_spelling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtl.jsonl");
        fs::write(
            &path,
            "{\"description\": \"and gate\", \"code\": \"assign y = a & b;\"}\n\n\
             {\"Instruction\": \"or gate\", \"Response\": \"assign y = a | b;\"}\n",
        )
        .unwrap();
        let loaded = load_examples(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].description, "or gate");
        assert_eq!(loaded[1].code, "assign y = a | b;");
    }

    #[test]
    fn loads_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtl.json");
        fs::write(&path, r#"[{"description": "buffer", "code": "assign y = a;"}]"#).unwrap();
        assert_eq!(load_examples(&path).unwrap().len(), 1);
    }

    #[test]
    fn reports_bad_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtl.jsonl");
        fs::write(&path, "{\"description\": \"ok\"}\nnot json\n").unwrap();
        let err = load_examples(&path).unwrap_err().to_string();
        assert!(err.contains(":2:"), "{err}");
    }
}
