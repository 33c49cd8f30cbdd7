use std::io::Cursor;
use std::sync::Arc;

use actix_web::web;
use image::{ImageFormat, Rgb, RgbImage};
use leafguard_server::inference::artifacts::ArtifactError;
use leafguard_server::inference::{
    ArtifactLoader, FeatureExtractor, GradientBoostedTrees, ImageTensor, InferenceError,
    InferencePipeline, LabelDecoder, ModelHandle, PreprocessConfig,
};
use leafguard_server::knowledge::KnowledgeBase;
use leafguard_server::storage::{UploadConfig, UploadService};
use tempfile::TempDir;

pub const BOUNDARY: &str = "leafguard-test-boundary";

/// Builds an initialized test service from a [`TestState`].
macro_rules! test_app {
    ($state:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data($state.model.clone())
                .app_data($state.knowledge.clone())
                .app_data($state.uploads.clone())
                .app_data($state.preprocessing.clone())
                .configure(|cfg| leafguard_server::routes::configure_routes(cfg, None)),
        )
        .await
    };
}

/// Mean of each channel, so a solid colour picks its dominant channel.
struct ChannelMeans;

impl FeatureExtractor for ChannelMeans {
    fn extract(&self, tensor: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
        let data = tensor.as_array();
        let pixels = (data.len() / 3).max(1) as f32;
        Ok((0..3)
            .map(|c| data.slice(ndarray::s![.., .., .., c]).sum() / pixels)
            .collect())
    }
}

/// One stump per class, each voting for its class when the matching
/// feature is above 0.5.
fn stump_model_json() -> String {
    let stump = |feature: usize| {
        serde_json::json!({
            "left_children": [1, -1, -1],
            "right_children": [2, -1, -1],
            "split_indices": [feature, 0, 0],
            "split_conditions": [0.5, -1.0, 2.0],
            "default_left": [1, 0, 0]
        })
    };
    serde_json::json!({
        "learner": {
            "gradient_booster": {
                "name": "gbtree",
                "model": { "trees": [stump(0), stump(1), stump(2)], "tree_info": [0, 1, 2] }
            },
            "learner_model_param": { "base_score": "5E-1", "num_class": "3", "num_feature": "3" },
            "objective": { "name": "multi:softprob" }
        }
    })
    .to_string()
}

pub struct StubLoader {
    labels: Vec<String>,
    fail: bool,
}

impl StubLoader {
    /// Classes indexed by BGR channel: blue, green, red.
    pub fn with_labels(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            labels: Vec::new(),
            fail: true,
        }
    }
}

impl ArtifactLoader for StubLoader {
    fn load(&self) -> Result<InferencePipeline, ArtifactError> {
        if self.fail {
            return Err(ArtifactError::Format(
                "models/xgb_classifier_model.json is missing".to_string(),
            ));
        }
        InferencePipeline::new(
            Box::new(ChannelMeans),
            GradientBoostedTrees::from_json_str(&stump_model_json())?,
            LabelDecoder::new(self.labels.clone()),
        )
    }
}

pub struct TestState {
    pub upload_dir: TempDir,
    pub model: web::Data<ModelHandle>,
    pub knowledge: web::Data<KnowledgeBase>,
    pub uploads: web::Data<UploadService>,
    pub preprocessing: web::Data<PreprocessConfig>,
}

impl TestState {
    pub fn new(loader: StubLoader) -> Self {
        Self::with_max_bytes(loader, UploadConfig::default().max_bytes)
    }

    pub fn with_max_bytes(loader: StubLoader, max_bytes: usize) -> Self {
        let upload_dir = TempDir::new().unwrap();
        let config = UploadConfig {
            dir: upload_dir.path().to_path_buf(),
            max_bytes,
            ..Default::default()
        };
        Self {
            model: web::Data::new(ModelHandle::new(Arc::new(loader))),
            knowledge: web::Data::new(KnowledgeBase::embedded().unwrap()),
            uploads: web::Data::new(UploadService::new(&config).unwrap()),
            preprocessing: web::Data::new(PreprocessConfig::default()),
            upload_dir,
        }
    }

    pub fn stored_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.upload_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

pub fn png_bytes(color: [u8; 3]) -> Vec<u8> {
    let mut bytes = Vec::new();
    RgbImage::from_pixel(32, 24, Rgb(color))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// A single-part `multipart/form-data` body. `filename: None` omits the
/// filename parameter entirely.
pub fn multipart_body(field: &str, filename: Option<&str>, data: &[u8]) -> Vec<u8> {
    let disposition = match filename {
        Some(name) => format!("form-data; name=\"{}\"; filename=\"{}\"", field, name),
        None => format!("form-data; name=\"{}\"", field),
    };
    let mut body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: {disposition}\r\n\
         Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn predict_request(body: Vec<u8>) -> actix_web::test::TestRequest {
    actix_web::test::TestRequest::post()
        .uri("/api/predict")
        .insert_header((
            actix_web::http::header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        ))
        .set_payload(body)
}
