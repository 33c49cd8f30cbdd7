use super::InferenceError;
use super::preprocess::ImageTensor;

/// Maps a preprocessed image batch to a flat feature vector.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, tensor: &ImageTensor) -> Result<Vec<f32>, InferenceError>;
}

#[cfg(feature = "torch")]
pub use torch::TorchFeatureExtractor;

#[cfg(feature = "torch")]
mod torch {
    use std::path::Path;
    use std::sync::Mutex;

    use tch::{CModule, Device, Kind, Tensor};

    use super::FeatureExtractor;
    use crate::inference::InferenceError;
    use crate::inference::artifacts::ArtifactError;
    use crate::inference::preprocess::ImageTensor;

    /// TorchScript network whose forward pass returns the feature vector.
    pub struct TorchFeatureExtractor {
        module: Mutex<CModule>,
        device: Device,
        channels_first: bool,
    }

    impl TorchFeatureExtractor {
        pub fn load(path: &Path, channels_first: bool) -> Result<Self, ArtifactError> {
            let device = Device::cuda_if_available();
            let module = CModule::load_on_device(path, device)?;
            log::info!(
                "Loaded feature extractor {} on {:?}",
                path.display(),
                device
            );
            Ok(Self {
                module: Mutex::new(module),
                device,
                channels_first,
            })
        }
    }

    impl FeatureExtractor for TorchFeatureExtractor {
        fn extract(&self, tensor: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
            let [batch, height, width, channels] = tensor.shape();
            let input = Tensor::from_slice(&tensor.to_vec())
                .view([batch as i64, height as i64, width as i64, channels as i64])
                .to_device(self.device);
            let input = if self.channels_first {
                input.permute([0, 3, 1, 2]).contiguous()
            } else {
                input
            };

            let module = self.module.lock().map_err(|_| {
                InferenceError::Prediction("feature extractor lock poisoned".to_string())
            })?;
            let output = module
                .forward_ts(&[input])
                .map_err(|e| InferenceError::Prediction(format!("feature extractor: {}", e)))?;

            let flat = output
                .to_kind(Kind::Float)
                .to_device(Device::Cpu)
                .view([-1]);
            Vec::<f32>::try_from(&flat)
                .map_err(|e| InferenceError::Prediction(format!("feature extractor: {}", e)))
        }
    }
}
