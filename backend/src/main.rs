mod auth;
mod config;
mod db;
mod errors;
mod imaging;
mod inference;
mod predictions;
mod routes;
mod storage;

#[cfg(test)]
mod test_support;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use auth::jwt::{JwtService, JwtSettings};
use auth::password::PasswordManager;
use auth::{AuthMiddleware, AuthService};
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use config::Config;
use db::postgres_repository::PgRepository;
use imaging::{ImageIntake, PreprocessConfig};
use inference::{InferenceEngine, ModelArtifact};
use predictions::PredictionService;
use routes::configure_routes;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use storage::s3_service::S3Service;

fn startup_error(context: &str, err: impl std::fmt::Display) -> std::io::Error {
    log::error!("{}: {}", context, err);
    std::io::Error::other(format!("{}: {}", context, err))
}

fn build_cors(origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            actix_web::http::header::AUTHORIZATION,
            actix_web::http::header::ACCEPT,
            actix_web::http::header::CONTENT_TYPE,
        ])
        .max_age(3600);

    if origins.iter().any(|o| o == "*") {
        return cors.allow_any_origin();
    }
    origins
        .iter()
        .fold(cors.supports_credentials(), |cors, origin| cors.allowed_origin(origin))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env().map_err(|e| startup_error("Invalid configuration", e))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .map_err(|e| startup_error("Failed to connect to Postgres", e))?;
    let repository = Arc::new(PgRepository::new(pool));
    repository
        .run_migrations()
        .await
        .map_err(|e| startup_error("Failed to run migrations", e))?;

    let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let s3_service = Arc::new(S3Service::new(
        S3Client::new(&aws_config),
        config.s3_bucket.clone(),
    ));

    let engine = Arc::new(InferenceEngine::new(
        Arc::new(ModelArtifact::new(config.model_path.clone())),
        config.stage_timeout,
    ));
    // A failed preload is retried on the first prediction request.
    if let Err(e) = engine.load().await {
        log::error!("Failed to preload model at startup: {}", e);
    }

    let preprocess = match &config.preprocess_config {
        Some(path) => PreprocessConfig::load(path)
            .map_err(|e| startup_error("Invalid preprocessing settings", e))?,
        None => PreprocessConfig::default(),
    };

    let jwt_service = JwtService::new(&JwtSettings {
        secret: config.jwt_secret.clone(),
        algorithm: config.jwt_algorithm,
        access_ttl: config.access_token_ttl,
        refresh_ttl: config.refresh_token_ttl,
    });
    let auth_service = Arc::new(AuthService::new(
        repository.clone(),
        jwt_service,
        PasswordManager::new(),
    ));

    let prediction_service = Arc::new(PredictionService::new(
        repository.clone(),
        repository.clone(),
        s3_service,
        engine,
        ImageIntake::new(config.max_upload_bytes, preprocess),
        config.presigned_url_ttl,
        config.stage_timeout,
    ));

    let auth_middleware = AuthMiddleware::new(auth_service.clone());
    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting server on {}", bind_address);

    let cors_origins = config.cors_origins.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(build_cors(&cors_origins))
            .app_data(web::Data::from(auth_service.clone()))
            .app_data(web::Data::from(prediction_service.clone()))
            .configure(|cfg| configure_routes(cfg, auth_middleware.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
