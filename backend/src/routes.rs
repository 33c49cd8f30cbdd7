use std::path::PathBuf;

use actix_files::{Files, NamedFile};
use actix_multipart::Multipart;
use actix_web::http::header::{self, ContentType};
use actix_web::{HttpRequest, HttpResponse, web};
use futures::TryStreamExt;
use log::info;
use shared::{DiseaseDetail, HealthResponse, PredictionResponse};

use crate::error::ApiError;
use crate::inference::{ModelHandle, PreprocessConfig, preprocess};
use crate::knowledge::{KnowledgeBase, normalize_key, title_case};
use crate::pages;
use crate::storage::UploadService;

const FILE_FIELD: &str = "file";

pub fn configure_routes(cfg: &mut web::ServiceConfig, static_dir: Option<PathBuf>) {
    cfg.service(web::resource("/").route(web::get().to(home)))
        .service(web::resource("/predictor").route(web::get().to(predictor)))
        .service(web::resource("/disease/{name}").route(web::get().to(disease_detail)))
        .service(web::resource("/api/predict").route(web::post().to(handle_predict)))
        .service(web::resource("/api/diseases").route(web::get().to(list_diseases)))
        .service(web::resource("/api/diseases/{name}").route(web::get().to(get_disease)))
        .service(web::resource("/api/health").route(web::get().to(health)))
        .service(web::resource("/uploads/{filename}").route(web::get().to(uploaded_file)));

    if let Some(dir) = static_dir {
        cfg.service(Files::new("/static", dir));
    }
    cfg.default_service(web::to(not_found));
}

struct UploadedImage {
    filename: String,
    data: Vec<u8>,
}

async fn handle_predict(
    req: HttpRequest,
    payload: Multipart,
    model: web::Data<ModelHandle>,
    knowledge: web::Data<KnowledgeBase>,
    uploads: web::Data<UploadService>,
    preprocessing: web::Data<PreprocessConfig>,
) -> Result<HttpResponse, ApiError> {
    if let Some(length) = content_length(&req) {
        uploads.validate_size(length)?;
    }

    let UploadedImage { filename, data } = read_upload(payload, &uploads).await?;

    let storage = uploads.clone();
    let stored = web::block(move || storage.save(&filename, &data)).await??;

    let pipeline = model.pipeline().await?;
    let config = preprocessing.clone();
    let image_path = stored.path.clone();
    let prediction = web::block(move || {
        let tensor = preprocess(&image_path, &config)?;
        pipeline.predict(&tensor)
    })
    .await??;

    info!(
        "Predicted '{}' ({:.2}%) for {}",
        prediction.label, prediction.confidence, stored.file_name
    );

    let record = knowledge.record_or_default(&prediction.label);
    Ok(HttpResponse::Ok().json(PredictionResponse {
        disease: title_case(&prediction.label),
        disease_key: prediction.label,
        confidence: round_percent(prediction.confidence),
        description: record.description,
        symptoms: record.symptoms,
        causes: record.causes,
        prevention: record.prevention,
        treatment: record.treatment,
        image_path: format!("/uploads/{}", stored.file_name),
    }))
}

/// Pulls the `file` field out of the form, enforcing name, extension and
/// size rules before anything touches the disk.
async fn read_upload(
    mut payload: Multipart,
    uploads: &UploadService,
) -> Result<UploadedImage, ApiError> {
    let mut upload = None;

    while let Some(mut field) = payload.try_next().await? {
        if upload.is_some() || field.name() != Some(FILE_FIELD) {
            while field.try_next().await?.is_some() {}
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or_default()
            .to_string();
        if filename.is_empty() {
            return Err(ApiError::NoFileSelected);
        }
        uploads.validate_extension(&filename)?;

        let mut data = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            uploads.validate_size(data.len() + chunk.len())?;
            data.extend_from_slice(&chunk);
        }
        if data.is_empty() {
            return Err(ApiError::EmptyFile);
        }
        upload = Some(UploadedImage { filename, data });
    }

    upload.ok_or(ApiError::NoFile)
}

fn content_length(req: &HttpRequest) -> Option<usize> {
    req.headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

fn round_percent(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

async fn uploaded_file(
    path: web::Path<String>,
    uploads: web::Data<UploadService>,
) -> Result<NamedFile, ApiError> {
    let name = path.into_inner();
    let missing = || ApiError::NotFound(format!("Upload {}", name));
    let file_path = uploads.resolve(&name).ok_or_else(missing)?;
    NamedFile::open_async(file_path)
        .await
        .map_err(|_| missing())
}

async fn home(knowledge: web::Data<KnowledgeBase>) -> HttpResponse {
    html(pages::render_home(&knowledge))
}

async fn predictor(uploads: web::Data<UploadService>) -> HttpResponse {
    html(pages::render_predictor(
        uploads.allowed_extensions(),
        uploads.max_bytes(),
    ))
}

async fn disease_detail(
    path: web::Path<String>,
    knowledge: web::Data<KnowledgeBase>,
) -> HttpResponse {
    let key = normalize_key(&path);
    match knowledge.lookup(&key) {
        Some(record) => html(pages::render_disease(&key, record)),
        None => {
            info!("Disease page requested for unknown '{}'", path.as_str());
            HttpResponse::NotFound()
                .content_type(ContentType::plaintext())
                .body("Disease not found")
        }
    }
}

async fn list_diseases(knowledge: web::Data<KnowledgeBase>) -> HttpResponse {
    HttpResponse::Ok().json(knowledge.summaries())
}

async fn get_disease(
    path: web::Path<String>,
    knowledge: web::Data<KnowledgeBase>,
) -> Result<HttpResponse, ApiError> {
    let key = normalize_key(&path);
    let record = knowledge
        .lookup(&key)
        .ok_or_else(|| ApiError::NotFound("Disease".to_string()))?;
    Ok(HttpResponse::Ok().json(DiseaseDetail {
        name: title_case(&key),
        key,
        record: record.clone(),
    }))
}

async fn health(model: web::Data<ModelHandle>) -> HttpResponse {
    let models_loaded = model.is_loaded();
    HttpResponse::Ok().json(HealthResponse {
        status: if models_loaded { "ok" } else { "models_not_loaded" }.to_string(),
        models_loaded,
        load_attempts: model.load_attempts(),
        artifacts: model.artifact_report(),
    })
}

async fn not_found() -> HttpResponse {
    HttpResponse::NotFound()
        .content_type(ContentType::html())
        .body(pages::render_not_found())
}

fn html(body: String) -> HttpResponse {
    HttpResponse::Ok().content_type(ContentType::html()).body(body)
}
