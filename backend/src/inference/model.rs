use super::InferenceError;
use super::artifacts::ArtifactError;
use super::booster::GradientBoostedTrees;
use super::extractor::FeatureExtractor;
use super::labels::LabelDecoder;
use super::preprocess::ImageTensor;

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub label: String,
    pub class_index: usize,
    /// Highest class probability as a percentage, unrounded.
    pub confidence: f64,
}

/// Feature extractor, classifier and label decoder composed into one call.
///
/// Immutable once built, so one instance serves concurrent requests.
pub struct InferencePipeline {
    extractor: Box<dyn FeatureExtractor>,
    classifier: GradientBoostedTrees,
    labels: LabelDecoder,
}

impl InferencePipeline {
    pub fn new(
        extractor: Box<dyn FeatureExtractor>,
        classifier: GradientBoostedTrees,
        labels: LabelDecoder,
    ) -> Result<Self, ArtifactError> {
        if labels.len() < classifier.num_classes() {
            return Err(ArtifactError::Format(format!(
                "{} labels for a classifier with {} classes",
                labels.len(),
                classifier.num_classes()
            )));
        }
        Ok(Self {
            extractor,
            classifier,
            labels,
        })
    }

    pub fn labels(&self) -> &LabelDecoder {
        &self.labels
    }

    /// Class probability distribution for one image.
    pub fn inference(&self, tensor: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
        let features = self.extractor.extract(tensor)?;
        self.classifier.predict_proba(&features)
    }

    pub fn predict(&self, tensor: &ImageTensor) -> Result<PredictionResult, InferenceError> {
        let predictions = self.inference(tensor)?;
        let (class_index, confidence) = calculate_result(&predictions).ok_or_else(|| {
            InferenceError::Prediction("classifier returned no probabilities".to_string())
        })?;
        let label = self.labels.inverse_transform(class_index)?.to_string();
        Ok(PredictionResult {
            label,
            class_index,
            confidence,
        })
    }
}

/// Index of the first maximum and that probability as a percentage.
pub fn calculate_result(predictions: &[f32]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &p) in predictions.iter().enumerate() {
        if best.is_none_or(|(_, max)| p > max) {
            best = Some((index, p));
        }
    }
    best.map(|(index, p)| (index, (f64::from(p) * 100.0).clamp(0.0, 100.0)))
}
