use actix_multipart::{Field, Multipart};
use actix_web::{HttpResponse, web};
use bytes::BytesMut;
use futures::{StreamExt, TryStreamExt};
use neumo_shared::{
    ApiResponse, ImageValidationResponse, ListResponse, MessageResponse, PatientGender,
    PredictionSummary, PredictionUpdate,
};
use serde::Deserialize;

use crate::auth::{self, AuthMiddleware, AuthenticatedUser, SuperUser};
use crate::db::models::{Page, PatientContext};
use crate::errors::ServiceError;
use crate::imaging::{ImageError, UploadedImage};
use crate::predictions::PredictionService;

const MAX_FORM_FIELD_BYTES: usize = 16 * 1024;

pub fn configure_routes(cfg: &mut web::ServiceConfig, auth_middleware: AuthMiddleware) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/api/v1/auth/register").route(web::post().to(auth::routes::register)))
        .service(web::resource("/api/v1/auth/login").route(web::post().to(auth::routes::login)))
        .service(web::resource("/api/v1/auth/refresh").route(web::post().to(auth::routes::refresh)))
        .service(
            web::scope("/api/v1")
                .wrap(auth_middleware)
                .service(web::resource("/auth/logout").route(web::post().to(auth::routes::logout)))
                .service(web::resource("/auth/me").route(web::get().to(auth::routes::me)))
                .service(
                    web::resource("/auth/verify-token")
                        .route(web::get().to(auth::routes::verify_token)),
                )
                .service(web::resource("/predictions/predict").route(web::post().to(create_prediction)))
                .service(
                    web::resource("/predictions/validate-image").route(web::post().to(validate_image)),
                )
                .service(web::resource("/predictions/flagged").route(web::get().to(list_flagged)))
                .service(
                    web::resource("/predictions/class/{prediction_class}")
                        .route(web::get().to(list_by_class)),
                )
                .service(
                    web::resource("/predictions")
                        .route(web::get().to(list_predictions)),
                )
                .service(
                    web::resource("/predictions/{prediction_id}")
                        .route(web::get().to(get_prediction))
                        .route(web::put().to(update_prediction))
                        .route(web::delete().to(delete_prediction)),
                )
                .service(
                    web::resource("/predictions/{prediction_id}/flag")
                        .route(web::post().to(flag_prediction)),
                ),
        );
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    skip: Option<i64>,
    limit: Option<i64>,
    #[serde(default)]
    include_images: bool,
}

impl ListQuery {
    fn page(&self) -> Page {
        Page::new(self.skip, self.limit)
    }
}

struct UploadForm {
    upload: UploadedImage,
    patient: PatientContext,
}

async fn read_field(field: &mut Field, limit: usize) -> Result<BytesMut, ServiceError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| ServiceError::Validation(format!("Malformed upload: {}", e)))?;
        if buf.len() + chunk.len() > limit {
            return Err(ImageError::TooLarge {
                size: buf.len() + chunk.len(),
                max: limit,
            }
            .into());
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

async fn read_text(field: &mut Field) -> Result<Option<String>, ServiceError> {
    let name = field.name().unwrap_or_default().to_string();
    let raw = read_field(field, MAX_FORM_FIELD_BYTES)
        .await
        .map_err(|_| ServiceError::Validation(format!("Form field '{}' is too long", name)))?;
    let text = String::from_utf8(raw.to_vec())
        .map_err(|_| ServiceError::Validation(format!("Form field '{}' is not UTF-8", name)))?;
    let text = text.trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

/// Reads the `file` part and optional patient fields. The file is capped at
/// `max_file_bytes` while streaming, so oversized uploads are never fully
/// buffered.
async fn read_upload_form(mut payload: Multipart, max_file_bytes: usize) -> Result<UploadForm, ServiceError> {
    let mut upload = None;
    let mut patient = PatientContext::default();

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ServiceError::Validation(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .unwrap_or("upload")
                    .to_string();
                let content_type = field.content_type().map(|m| m.essence_str().to_string());
                let bytes = read_field(&mut field, max_file_bytes).await?;
                upload = Some(UploadedImage::new(file_name, content_type, bytes.freeze()));
            }
            "patient_age" => {
                patient.age = read_text(&mut field)
                    .await?
                    .map(|v| {
                        v.parse::<i32>()
                            .map_err(|_| ServiceError::Validation("Patient age must be an integer".to_string()))
                    })
                    .transpose()?;
            }
            "patient_gender" => {
                patient.gender = read_text(&mut field)
                    .await?
                    .map(|v| {
                        v.parse::<PatientGender>().map_err(|_| {
                            ServiceError::Validation("Patient gender must be Male, Female or Other".to_string())
                        })
                    })
                    .transpose()?;
            }
            "patient_symptoms" => {
                patient.symptoms = read_text(&mut field).await?;
            }
            other => {
                log::debug!("Ignoring multipart field '{}'", other);
                while field.try_next().await.ok().flatten().is_some() {}
            }
        }
    }

    let upload = upload.ok_or_else(|| ServiceError::Validation("No file uploaded".to_string()))?;
    Ok(UploadForm { upload, patient })
}

fn summaries(predictions: &[crate::db::models::Prediction]) -> Vec<PredictionSummary> {
    predictions.iter().map(|p| p.summary()).collect()
}

async fn create_prediction(
    user: AuthenticatedUser,
    service: web::Data<PredictionService>,
    payload: Multipart,
) -> Result<HttpResponse, ServiceError> {
    let form = read_upload_form(payload, service.intake().max_bytes()).await?;
    log::info!(
        "Prediction requested by user {} for {} ({} bytes)",
        user.0.id,
        form.upload.file_name,
        form.upload.size()
    );

    let prediction = service
        .create_prediction(user.0.id, form.upload, form.patient)
        .await?;
    let view = service.view(prediction).await;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Prediction created successfully", view)))
}

async fn list_predictions(
    user: AuthenticatedUser,
    service: web::Data<PredictionService>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ServiceError> {
    let page = query.page();
    let listing = service
        .list_for_user(user.0.id, page, query.include_images)
        .await?;
    Ok(HttpResponse::Ok().json(ListResponse {
        success: true,
        message: "Predictions retrieved successfully".to_string(),
        total: listing.len(),
        data: listing,
        page: page.page_number(),
        per_page: page.limit,
    }))
}

async fn get_prediction(
    user: AuthenticatedUser,
    service: web::Data<PredictionService>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ServiceError> {
    let view = service
        .get_with_access_url(path.into_inner(), user.0.id)
        .await?
        .ok_or(ServiceError::NotFoundOrForbidden)?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Prediction retrieved successfully", view)))
}

async fn update_prediction(
    user: AuthenticatedUser,
    service: web::Data<PredictionService>,
    path: web::Path<i64>,
    body: web::Json<PredictionUpdate>,
) -> Result<HttpResponse, ServiceError> {
    let updated = service
        .update_review(path.into_inner(), user.0.id, body.into_inner())
        .await?
        .ok_or(ServiceError::NotFoundOrForbidden)?;
    let view = service.view(updated).await;
    Ok(HttpResponse::Ok().json(ApiResponse::ok("Prediction updated successfully", view)))
}

async fn delete_prediction(
    user: AuthenticatedUser,
    service: web::Data<PredictionService>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ServiceError> {
    if !service.delete(path.into_inner(), user.0.id).await? {
        return Err(ServiceError::NotFoundOrForbidden);
    }
    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "Prediction and associated image deleted successfully".to_string(),
    }))
}

async fn list_by_class(
    user: AuthenticatedUser,
    service: web::Data<PredictionService>,
    path: web::Path<String>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ServiceError> {
    let class = path.into_inner();
    let page = query.page();
    let predictions = service.list_by_class(&class, user.0.id, page).await?;
    let data = summaries(&predictions);
    Ok(HttpResponse::Ok().json(ListResponse {
        success: true,
        message: format!("Predictions with class '{}' retrieved successfully", class),
        total: data.len(),
        data,
        page: page.page_number(),
        per_page: page.limit,
    }))
}

async fn flag_prediction(
    user: AuthenticatedUser,
    service: web::Data<PredictionService>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ServiceError> {
    service
        .flag(path.into_inner(), user.0.id)
        .await?
        .ok_or(ServiceError::NotFoundOrForbidden)?;
    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "Prediction flagged successfully".to_string(),
    }))
}

async fn list_flagged(
    _reviewer: SuperUser,
    service: web::Data<PredictionService>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ServiceError> {
    let page = query.page();
    let data = summaries(&service.list_flagged(page).await?);
    Ok(HttpResponse::Ok().json(ListResponse {
        success: true,
        message: "Flagged predictions retrieved successfully".to_string(),
        total: data.len(),
        data,
        page: page.page_number(),
        per_page: page.limit,
    }))
}

async fn validate_image(
    _user: AuthenticatedUser,
    service: web::Data<PredictionService>,
    payload: Multipart,
) -> Result<HttpResponse, ServiceError> {
    let form = read_upload_form(payload, service.intake().max_bytes()).await?;
    let metadata = service.validate_image_only(form.upload).await?;
    Ok(HttpResponse::Ok().json(ImageValidationResponse {
        valid: true,
        message: "Image is valid for prediction".to_string(),
        metadata,
    }))
}

async fn health(service: web::Data<PredictionService>) -> HttpResponse {
    let status = service.health().await;
    if status.database == "connected" {
        HttpResponse::Ok().json(status)
    } else {
        HttpResponse::ServiceUnavailable().json(status)
    }
}
