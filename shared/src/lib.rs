use serde::{Deserialize, Serialize};

/// Treatment advice is either a list of steps or a single note
/// (the `healthy` record only carries a note).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum Treatment {
    Steps(Vec<String>),
    Note(String),
}

impl Default for Treatment {
    fn default() -> Self {
        Treatment::Steps(Vec::new())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DiseaseRecord {
    pub description: String,
    pub symptoms: Vec<String>,
    pub causes: String,
    pub prevention: Vec<String>,
    pub treatment: Treatment,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PredictionResponse {
    pub disease: String,
    pub disease_key: String,
    pub confidence: f64,
    pub description: String,
    pub symptoms: Vec<String>,
    pub causes: String,
    pub prevention: Vec<String>,
    pub treatment: Treatment,
    pub image_path: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DiseaseSummary {
    pub key: String,
    pub name: String,
    pub description: String,
    pub symptoms_count: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DiseaseDetail {
    pub key: String,
    pub name: String,
    #[serde(flatten)]
    pub record: DiseaseRecord,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ArtifactStatus {
    pub name: String,
    pub path: String,
    pub present: bool,
    pub size_bytes: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub models_loaded: bool,
    pub load_attempts: usize,
    pub artifacts: Vec<ArtifactStatus>,
}
