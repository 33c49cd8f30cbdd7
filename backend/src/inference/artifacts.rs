use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shared::ArtifactStatus;

use super::booster::GradientBoostedTrees;
use super::extractor::FeatureExtractor;
use super::labels::LabelDecoder;
use super::model::InferencePipeline;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed artifact: {0}")]
    Format(String),
    #[error("unsupported {0}")]
    Unsupported(String),
    #[cfg(feature = "torch")]
    #[error("torch: {0}")]
    Torch(#[from] tch::TchError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub dir: PathBuf,
    pub feature_extractor: PathBuf,
    pub classifier: PathBuf,
    pub labels: PathBuf,
    /// Feed the extractor NCHW instead of NHWC.
    pub channels_first: bool,
    /// Try loading at startup instead of waiting for the first prediction.
    pub eager_load: bool,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
            feature_extractor: PathBuf::from("cnn_feature_extractor.pt"),
            classifier: PathBuf::from("xgb_classifier_model.json"),
            labels: PathBuf::from("label_encoder_classes.npy"),
            channels_first: false,
            eager_load: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub feature_extractor: PathBuf,
    pub classifier: PathBuf,
    pub labels: PathBuf,
}

impl ArtifactPaths {
    pub fn from_config(config: &ArtifactConfig) -> Self {
        let resolve = |file: &Path| {
            if file.is_absolute() {
                file.to_path_buf()
            } else {
                config.dir.join(file)
            }
        };
        Self {
            feature_extractor: resolve(config.feature_extractor.as_path()),
            classifier: resolve(config.classifier.as_path()),
            labels: resolve(config.labels.as_path()),
        }
    }

    /// Presence and size of each artifact file.
    pub fn report(&self) -> Vec<ArtifactStatus> {
        [
            ("feature_extractor", &self.feature_extractor),
            ("classifier", &self.classifier),
            ("labels", &self.labels),
        ]
        .into_iter()
        .map(|(name, path)| {
            let size_bytes = std::fs::metadata(path)
                .ok()
                .filter(|meta| meta.is_file())
                .map(|meta| meta.len());
            ArtifactStatus {
                name: name.to_string(),
                path: path.display().to_string(),
                present: size_bytes.is_some(),
                size_bytes,
            }
        })
        .collect()
    }

    pub fn log_report(&self) {
        for status in self.report() {
            match status.size_bytes {
                Some(size) => log::info!(
                    "Artifact {} found at {} ({:.1} MB)",
                    status.name,
                    status.path,
                    size as f64 / 1024.0 / 1024.0
                ),
                None => log::warn!("Artifact {} not found at {}", status.name, status.path),
            }
        }
    }
}

/// Source of a ready-to-use inference pipeline.
pub trait ArtifactLoader: Send + Sync {
    fn load(&self) -> Result<InferencePipeline, ArtifactError>;

    fn report(&self) -> Vec<ArtifactStatus> {
        Vec::new()
    }
}

/// Loads the three artifacts from disk.
pub struct FileArtifactLoader {
    paths: ArtifactPaths,
    #[cfg_attr(not(feature = "torch"), allow(dead_code))]
    channels_first: bool,
}

impl FileArtifactLoader {
    pub fn new(config: &ArtifactConfig) -> Self {
        Self {
            paths: ArtifactPaths::from_config(config),
            channels_first: config.channels_first,
        }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    fn load_extractor(&self) -> Result<Box<dyn FeatureExtractor>, ArtifactError> {
        let path = &self.paths.feature_extractor;
        std::fs::metadata(path).map_err(|source| ArtifactError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.open_extractor(path)
    }

    #[cfg(feature = "torch")]
    fn open_extractor(&self, path: &Path) -> Result<Box<dyn FeatureExtractor>, ArtifactError> {
        let extractor = super::extractor::TorchFeatureExtractor::load(path, self.channels_first)?;
        Ok(Box::new(extractor))
    }

    #[cfg(not(feature = "torch"))]
    fn open_extractor(&self, _path: &Path) -> Result<Box<dyn FeatureExtractor>, ArtifactError> {
        Err(ArtifactError::Unsupported(
            "TorchScript feature extractor: server was built without the `torch` feature"
                .to_string(),
        ))
    }
}

impl ArtifactLoader for FileArtifactLoader {
    fn load(&self) -> Result<InferencePipeline, ArtifactError> {
        let extractor = self.load_extractor()?;
        let classifier = GradientBoostedTrees::from_file(&self.paths.classifier)?;
        let labels = LabelDecoder::from_file(&self.paths.labels)?;
        InferencePipeline::new(extractor, classifier, labels)
    }

    fn report(&self) -> Vec<ArtifactStatus> {
        self.paths.report()
    }
}
