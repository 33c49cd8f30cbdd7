use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use shared::{DiseaseRecord, DiseaseSummary, Treatment};

const EMBEDDED_DISEASES: &str = include_str!("../../resources/diseases.yaml");

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeBaseError {
    #[error("Failed to read knowledge base {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid knowledge base: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Duplicate disease key: {0}")]
    DuplicateKey(String),
    #[error("Disease key must not be empty")]
    EmptyKey,
}

#[derive(Debug, Deserialize)]
struct KnowledgeFile {
    diseases: Vec<DiseaseEntry>,
}

#[derive(Debug, Deserialize)]
struct DiseaseEntry {
    key: String,
    description: String,
    #[serde(default)]
    symptoms: Vec<String>,
    #[serde(default)]
    causes: String,
    #[serde(default)]
    prevention: Vec<String>,
    #[serde(default)]
    treatment: Treatment,
}

/// Read-only table of disease descriptions keyed by normalized label.
///
/// Built once at startup and shared by every request; entries keep the
/// order in which they appear in the source document.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    entries: Vec<(String, DiseaseRecord)>,
    index: HashMap<String, usize>,
}

impl KnowledgeBase {
    /// The ten-entry table compiled into the binary.
    pub fn embedded() -> Result<Self, KnowledgeBaseError> {
        Self::from_yaml_str(EMBEDDED_DISEASES)
    }

    pub fn from_file(path: &Path) -> Result<Self, KnowledgeBaseError> {
        let content = std::fs::read_to_string(path).map_err(|source| KnowledgeBaseError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, KnowledgeBaseError> {
        let file: KnowledgeFile = serde_yaml::from_str(content)?;
        let mut entries = Vec::with_capacity(file.diseases.len());
        let mut index = HashMap::with_capacity(file.diseases.len());

        for entry in file.diseases {
            let key = normalize_key(&entry.key);
            if key.is_empty() {
                return Err(KnowledgeBaseError::EmptyKey);
            }
            if index.contains_key(&key) {
                return Err(KnowledgeBaseError::DuplicateKey(key));
            }
            index.insert(key.clone(), entries.len());
            entries.push((
                key,
                DiseaseRecord {
                    description: entry.description,
                    symptoms: entry.symptoms,
                    causes: entry.causes,
                    prevention: entry.prevention,
                    treatment: entry.treatment,
                },
            ));
        }

        Ok(Self { entries, index })
    }

    pub fn lookup(&self, label: &str) -> Option<&DiseaseRecord> {
        self.index
            .get(&normalize_key(label))
            .map(|&position| &self.entries[position].1)
    }

    /// Lookup that degrades to an empty record for labels without an entry.
    pub fn record_or_default(&self, label: &str) -> DiseaseRecord {
        match self.lookup(label) {
            Some(record) => record.clone(),
            None => {
                log::warn!("No knowledge base entry for label '{}'", label);
                DiseaseRecord::default()
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DiseaseRecord)> {
        self.entries
            .iter()
            .map(|(key, record)| (key.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summaries(&self) -> Vec<DiseaseSummary> {
        self.iter()
            .map(|(key, record)| DiseaseSummary {
                key: key.to_string(),
                name: title_case(key),
                description: record.description.clone(),
                symptoms_count: record.symptoms.len(),
            })
            .collect()
    }

    /// Labels known to the classifier that have no record here.
    pub fn missing_labels<'a>(&self, labels: &'a [String]) -> Vec<&'a str> {
        labels
            .iter()
            .filter(|label| self.lookup(label).is_none())
            .map(String::as_str)
            .collect()
    }
}

/// Lower case, trimmed, inner whitespace collapsed to single spaces.
pub fn normalize_key(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Upper-cases every letter that follows a non-letter and lower-cases the rest,
/// so "two-spotted" becomes "Two-Spotted".
pub fn title_case(text: &str) -> String {
    let mut titled = String::with_capacity(text.len());
    let mut previous_is_letter = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if previous_is_letter {
                titled.extend(ch.to_lowercase());
            } else {
                titled.extend(ch.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            titled.push(ch);
            previous_is_letter = false;
        }
    }
    titled
}
