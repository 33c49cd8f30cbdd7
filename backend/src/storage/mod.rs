pub mod upload_service;

pub use upload_service::{StoredUpload, UploadConfig, UploadError, UploadService, secure_filename};
