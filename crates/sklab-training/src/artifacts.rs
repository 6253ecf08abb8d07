use crate::dataset::Vocabulary;
use crate::error::{TrainingError, TrainingResult};
use crate::learner::TrainedModel;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Model,
    Vocabulary,
    Results,
    Predictions,
    Summary,
}

/// A file written by a run, with its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub sha256: String,
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Write `bytes` to a uniquely named sibling temporary file, then rename it
/// over `path`.
///
/// Readers never observe a partially written file, and concurrent writers of
/// the same path do not share a temporary file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> TrainingResult<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| TrainingError::Config(format!("not a file path: {}", path.display())))?;
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name.to_string_lossy()))
        .suffix(".tmp")
        .tempfile_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

pub fn make_artifact(kind: ArtifactKind, path: PathBuf) -> TrainingResult<Artifact> {
    if !path.exists() {
        return Err(TrainingError::Input(format!("artifact path does not exist: {}", path.display())));
    }
    let sha256 = sha256_file(&path)?;
    Ok(Artifact { kind, path, sha256 })
}

impl TrainedModel {
    /// Serialize the model as JSON to `path`.
    pub fn save(&self, path: &Path) -> TrainingResult<Artifact> {
        write_atomic(path, &serde_json::to_vec(self)?)?;
        let artifact = make_artifact(ArtifactKind::Model, path.to_path_buf())?;
        tracing::debug!(path = %path.display(), sha256 = %artifact.sha256, "saved model");
        Ok(artifact)
    }

    pub fn load(path: &Path) -> TrainingResult<Self> {
        let bytes = std::fs::read(path)?;
        let model: Self = serde_json::from_slice(&bytes)?;
        tracing::debug!(path = %path.display(), learner = %model.kind(), "loaded model");
        Ok(model)
    }
}

/// Write the fit-time feature names, one per line, in column order.
pub fn save_vocabulary(vocabulary: &Vocabulary, path: &Path) -> TrainingResult<Artifact> {
    let mut text = vocabulary.names().join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    write_atomic(path, text.as_bytes())?;
    make_artifact(ArtifactKind::Vocabulary, path.to_path_buf())
}

pub fn load_vocabulary(path: &Path) -> TrainingResult<Vocabulary> {
    let text = std::fs::read_to_string(path)?;
    Ok(Vocabulary::from_names(text.lines().filter(|l| !l.is_empty())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Example, FeatureSet, Label};
    use crate::estimators::ModelKind;
    use crate::learner::{Learner, LearnerConfig};
    use crate::metrics::Objective;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("out.txt");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_concurrent_writers_do_not_collide() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("shared.txt");
        std::thread::scope(|scope| {
            for i in 0..8 {
                let path = &path;
                scope.spawn(move || write_atomic(path, format!("writer {i}").as_bytes()).unwrap());
            }
        });
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("writer "), "{text}");
        let entries: Vec<_> = std::fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_saved_model_predicts_identically() {
        let examples: Vec<Example> = (0..12)
            .map(|i| Example {
                id: format!("e{i}"),
                label: Some(Label::from(if i % 2 == 0 { "a" } else { "b" })),
                features: [(if i % 2 == 0 { "x" } else { "y" }.to_string(), 1.0 + i as f64)].into_iter().collect(),
            })
            .collect();
        let fs = FeatureSet::from_examples("fs", &examples).unwrap();
        let mut learner = Learner::new(LearnerConfig::new(ModelKind::LogisticRegression)).unwrap();
        learner.train(&fs, None, Objective::Accuracy, 1).unwrap();

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fs.model");
        let artifact = learner.model().unwrap().save(&path).unwrap();
        assert_eq!(artifact.sha256.len(), 64);

        let restored = Learner::from_model(TrainedModel::load(&path).unwrap());
        assert_eq!(restored.predict(&fs).unwrap(), learner.predict(&fs).unwrap());
    }

    #[test]
    fn test_vocabulary_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fs.vocab");
        let vocab = Vocabulary::from_names(["b", "a", "c"]);
        save_vocabulary(&vocab, &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\nc\n");
        assert_eq!(load_vocabulary(&path).unwrap(), vocab);
    }
}
