pub mod artifacts;
pub mod booster;
pub mod extractor;
pub mod handle;
pub mod labels;
pub mod model;
pub mod preprocess;

pub use artifacts::{ArtifactError, ArtifactLoader, ArtifactPaths, FileArtifactLoader};
pub use booster::GradientBoostedTrees;
pub use extractor::FeatureExtractor;
pub use handle::ModelHandle;
pub use labels::LabelDecoder;
pub use model::{InferencePipeline, PredictionResult};
pub use preprocess::{ChannelOrder, ImageTensor, PreprocessConfig, preprocess};

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// The uploaded file could not be interpreted as an image.
    #[error("Image could not be decoded: {0}")]
    Decode(String),
    #[error("Failed to load models: {0}")]
    ModelUnavailable(String),
    #[error("Prediction error: {0}")]
    Prediction(String),
}
