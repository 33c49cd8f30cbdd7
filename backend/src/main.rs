use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use leafguard_server::config::AppConfig;
use leafguard_server::inference::{FileArtifactLoader, ModelHandle};
use leafguard_server::knowledge::KnowledgeBase;
use leafguard_server::routes::configure_routes;
use leafguard_server::storage::UploadService;

fn startup_error(context: &str, err: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::other(format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = std::env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    let config = AppConfig::load().map_err(|e| startup_error("Configuration", e))?;

    let knowledge = match &config.knowledge_base {
        Some(path) => KnowledgeBase::from_file(path),
        None => KnowledgeBase::embedded(),
    }
    .map_err(|e| startup_error("Knowledge base", e))?;
    log::info!("Knowledge base has {} diseases", knowledge.len());

    let uploads = UploadService::new(&config.uploads)
        .map_err(|e| startup_error("Upload folder", e))?;
    log::info!("Storing uploads in {}", uploads.dir().display());

    let loader = FileArtifactLoader::new(&config.artifacts);
    loader.paths().log_report();
    let model = ModelHandle::new(Arc::new(loader));

    if config.artifacts.eager_load {
        match model.pipeline().await {
            Ok(pipeline) => {
                for label in knowledge.missing_labels(pipeline.labels().classes()) {
                    log::warn!("No knowledge base entry for class '{}'", label);
                }
            }
            Err(e) => {
                log::warn!("{}", e);
                log::warn!("Models will be loaded on first prediction attempt");
            }
        }
    }

    let model = web::Data::new(model);
    let knowledge = web::Data::new(knowledge);
    let uploads = web::Data::new(uploads);
    let preprocessing = web::Data::new(config.preprocessing.clone());
    let static_dir = config.server.static_dir.clone();
    let bind_address = config.bind_address();

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .wrap(middleware::Logger::default())
            .app_data(model.clone())
            .app_data(knowledge.clone())
            .app_data(uploads.clone())
            .app_data(preprocessing.clone())
            .configure(|cfg| configure_routes(cfg, static_dir.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
