use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

const MAX_NAME_ATTEMPTS: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Invalid file format. Allowed: {0}")]
    InvalidFormat(String),
    #[error("File too large. Maximum size is {0}")]
    FileTooLarge(String),
    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub dir: PathBuf,
    pub max_bytes: usize,
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("uploads"),
            max_bytes: 16 * 1024 * 1024,
            allowed_extensions: ["png", "jpg", "jpeg", "gif", "bmp"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredUpload {
    pub file_name: String,
    pub path: PathBuf,
}

/// Validates uploads and keeps them on local disk for re-serving.
#[derive(Debug, Clone)]
pub struct UploadService {
    dir: PathBuf,
    max_bytes: usize,
    allowed_extensions: Vec<String>,
}

impl UploadService {
    pub fn new(config: &UploadConfig) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.dir)?;
        Ok(Self {
            dir: config.dir.clone(),
            max_bytes: config.max_bytes,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    /// True when the text after the last '.' is an allowed extension.
    pub fn allowed_file(&self, filename: &str) -> bool {
        filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .is_some_and(|ext| self.allowed_extensions.contains(&ext))
    }

    pub fn validate_extension(&self, filename: &str) -> Result<(), UploadError> {
        if self.allowed_file(filename) {
            Ok(())
        } else {
            Err(UploadError::InvalidFormat(self.allowed_extensions.join(", ")))
        }
    }

    pub fn validate_size(&self, size: usize) -> Result<(), UploadError> {
        if size > self.max_bytes {
            return Err(UploadError::FileTooLarge(human_size(self.max_bytes)));
        }
        Ok(())
    }

    pub fn save(&self, original_name: &str, data: &[u8]) -> Result<StoredUpload, UploadError> {
        self.save_at(original_name, data, Local::now())
    }

    /// Writes `data` under a timestamped, sanitized name, never overwriting
    /// an existing upload.
    pub fn save_at(
        &self,
        original_name: &str,
        data: &[u8],
        now: DateTime<Local>,
    ) -> Result<StoredUpload, UploadError> {
        self.validate_extension(original_name)?;
        self.validate_size(data.len())?;

        let base = stored_name(original_name, now);
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let file_name = with_suffix(&base, attempt);
            let path = self.dir.join(&file_name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(data)?;
                    log::info!("Stored upload {} ({} bytes)", file_name, data.len());
                    return Ok(StoredUpload { file_name, path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(UploadError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free file name for {}", base),
        )))
    }

    /// Path of a stored upload. Names that are not already sanitized never
    /// resolve, which keeps lookups inside the upload directory.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        if file_name.is_empty() || secure_filename(file_name) != file_name {
            return None;
        }
        let path = self.dir.join(file_name);
        path.is_file().then_some(path)
    }
}

pub fn stored_name(original_name: &str, now: DateTime<Local>) -> String {
    secure_filename(&format!("{}_{}", now.format("%Y%m%d_%H%M%S"), original_name))
}

/// ASCII-only file name with separators and unusual characters removed.
/// Accented letters are decomposed first, so "ñ" keeps its base "n".
pub fn secure_filename(name: &str) -> String {
    let ascii: String = name
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

fn with_suffix(name: &str, attempt: usize) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{}_{}.{}", stem, attempt, ext),
        None => format!("{}_{}", name, attempt),
    }
}

fn human_size(bytes: usize) -> String {
    const MIB: usize = 1024 * 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else {
        format!("{} bytes", bytes)
    }
}
