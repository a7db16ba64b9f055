use neumo_shared::{
    HealthStatus, ImageMetadata, PredictionClass, PredictionListing, PredictionUpdate,
    PredictionView,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::db::models::{NewPrediction, Page, PatientContext, Prediction};
use crate::db::{PredictionRepository, UserRepository};
use crate::errors::ServiceError;
use crate::imaging::{ImageIntake, UploadedImage};
use crate::inference::{Classification, InferenceEngine};
use crate::storage::{BlobStore, StorageError};

const MAX_PATIENT_AGE: i32 = 150;

struct PipelineOutcome {
    classification: Classification,
    image_key: String,
    inference_time_ms: f64,
}

/// Runs the upload → classify → store pipeline and serves prediction
/// records to their owners.
pub struct PredictionService {
    predictions: Arc<dyn PredictionRepository>,
    users: Arc<dyn UserRepository>,
    blobs: Arc<dyn BlobStore>,
    engine: Arc<InferenceEngine>,
    intake: ImageIntake,
    presign_ttl: Duration,
    stage_timeout: Duration,
}

impl PredictionService {
    pub fn new(
        predictions: Arc<dyn PredictionRepository>,
        users: Arc<dyn UserRepository>,
        blobs: Arc<dyn BlobStore>,
        engine: Arc<InferenceEngine>,
        intake: ImageIntake,
        presign_ttl: Duration,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            predictions,
            users,
            blobs,
            engine,
            intake,
            presign_ttl,
            stage_timeout,
        }
    }

    pub fn intake(&self) -> &ImageIntake {
        &self.intake
    }

    /// Validation and owner lookup failures write nothing. Once the pipeline
    /// has started, every attempt leaves exactly one row: `completed` on
    /// success, otherwise a `failed` row before the error is returned.
    pub async fn create_prediction(
        &self,
        user_id: i64,
        upload: UploadedImage,
        patient: PatientContext,
    ) -> Result<Prediction, ServiceError> {
        self.intake.validate(&upload)?;
        validate_patient(&patient)?;

        let owner = self
            .users
            .get_user_by_id(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        let started = Instant::now();
        let outcome = match self.run_pipeline(owner.id, &upload, started).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let elapsed = elapsed_ms(started);
                log::error!(
                    "Prediction for user {} failed after {:.1} ms: {}",
                    owner.id,
                    elapsed,
                    err
                );
                self.record_failure(owner.id, &upload, elapsed, patient).await;
                return Err(err);
            }
        };

        let row = NewPrediction::completed(
            owner.id,
            upload.file_name.clone(),
            outcome.image_key.clone(),
            outcome.classification.label,
            outcome.classification.confidence,
            outcome.classification.distribution,
            outcome.inference_time_ms,
            patient,
        );

        match self.predictions.create_prediction(row).await {
            Ok(prediction) => {
                log::info!(
                    "Prediction {} for user {}: {} ({:.3})",
                    prediction.id,
                    owner.id,
                    prediction.prediction_class,
                    prediction.confidence_score
                );
                Ok(prediction)
            }
            Err(err) => {
                // Only uploads that finished are known here. A put abandoned on
                // timeout may still land in the bucket and is not cleaned up.
                if let Err(cleanup) = self.blobs.delete(&outcome.image_key).await {
                    log::warn!(
                        "Could not remove orphaned upload {}: {}",
                        outcome.image_key,
                        cleanup
                    );
                }
                Err(err.into())
            }
        }
    }

    async fn run_pipeline(
        &self,
        owner_id: i64,
        upload: &UploadedImage,
        started: Instant,
    ) -> Result<PipelineOutcome, ServiceError> {
        self.engine.load().await?;

        let tensor = self.intake.normalize(upload.bytes.clone()).await?;
        let classification = self.engine.classify(tensor).await?;
        let inference_time_ms = elapsed_ms(started);

        let content_type = upload
            .canonical_content_type()
            .unwrap_or_else(|| "image/jpeg".to_string());
        let put = self
            .blobs
            .put(upload.bytes.clone(), &content_type, owner_id, &upload.file_name);
        // Dropping the put on timeout does not cancel a write already in flight.
        let image_key = tokio::time::timeout(self.stage_timeout, put)
            .await
            .map_err(|_| StorageError::Timeout(self.stage_timeout))??;

        Ok(PipelineOutcome {
            classification,
            image_key,
            inference_time_ms,
        })
    }

    async fn record_failure(
        &self,
        owner_id: i64,
        upload: &UploadedImage,
        elapsed: f64,
        patient: PatientContext,
    ) {
        let row = NewPrediction::failed(owner_id, upload.file_name.clone(), elapsed, patient);
        if let Err(e) = self.predictions.create_prediction(row).await {
            log::error!("Could not record failed prediction for user {}: {}", owner_id, e);
        }
    }

    /// Full view with a freshly presigned image URL. A presign failure
    /// yields a view without a URL.
    pub async fn view(&self, prediction: Prediction) -> PredictionView {
        let url = match prediction.image_key.as_deref() {
            Some(key) => match self.blobs.presign(key, self.presign_ttl).await {
                Ok(url) => Some(url),
                Err(e) => {
                    log::warn!("Could not presign {} for prediction {}: {}", key, prediction.id, e);
                    None
                }
            },
            None => None,
        };
        prediction.into_view(url)
    }

    async fn owned(&self, id: i64, requester_id: i64) -> Result<Option<Prediction>, ServiceError> {
        Ok(self
            .predictions
            .get_prediction(id)
            .await?
            .filter(|p| p.user_id == requester_id))
    }

    pub async fn get_with_access_url(
        &self,
        id: i64,
        requester_id: i64,
    ) -> Result<Option<PredictionView>, ServiceError> {
        match self.owned(id, requester_id).await? {
            Some(prediction) => Ok(Some(self.view(prediction).await)),
            None => Ok(None),
        }
    }

    pub async fn list_for_user(
        &self,
        user_id: i64,
        page: Page,
        include_urls: bool,
    ) -> Result<PredictionListing, ServiceError> {
        let predictions = self.predictions.list_user_predictions(user_id, page).await?;
        if !include_urls {
            return Ok(PredictionListing::Summaries(
                predictions.iter().map(Prediction::summary).collect(),
            ));
        }

        let mut views = Vec::with_capacity(predictions.len());
        for prediction in predictions {
            views.push(self.view(prediction).await);
        }
        Ok(PredictionListing::Detailed(views))
    }

    pub async fn update_review(
        &self,
        id: i64,
        requester_id: i64,
        patch: PredictionUpdate,
    ) -> Result<Option<Prediction>, ServiceError> {
        validate_review(&patch)?;

        if self.owned(id, requester_id).await?.is_none() {
            return Ok(None);
        }
        let updated = self.predictions.update_review(id, &patch).await?;
        if updated.is_some() {
            log::info!("Prediction {} updated by user {}", id, requester_id);
        }
        Ok(updated)
    }

    pub async fn flag(&self, id: i64, requester_id: i64) -> Result<Option<Prediction>, ServiceError> {
        let patch = PredictionUpdate {
            is_flagged: Some(true),
            ..Default::default()
        };
        self.update_review(id, requester_id, patch).await
    }

    /// Removes the stored image (best effort) and then the row.
    pub async fn delete(&self, id: i64, requester_id: i64) -> Result<bool, ServiceError> {
        let Some(prediction) = self.owned(id, requester_id).await? else {
            return Ok(false);
        };

        if let Some(key) = prediction.image_key.as_deref() {
            if let Err(e) = self.blobs.delete(key).await {
                log::warn!("Could not delete image {} for prediction {}: {}", key, id, e);
            }
        }

        let deleted = self.predictions.delete_prediction(id).await?;
        if deleted {
            log::info!("Prediction {} deleted by user {}", id, requester_id);
        }
        Ok(deleted)
    }

    pub async fn list_flagged(&self, page: Page) -> Result<Vec<Prediction>, ServiceError> {
        Ok(self.predictions.list_flagged_predictions(page).await?)
    }

    pub async fn list_by_class(
        &self,
        class: &str,
        requester_id: i64,
        page: Page,
    ) -> Result<Vec<Prediction>, ServiceError> {
        let class = PredictionClass::parse_diagnostic(class).ok_or_else(|| {
            ServiceError::Validation(
                "Invalid prediction class. Must be 'NORMAL' or 'PNEUMONIA'".to_string(),
            )
        })?;
        Ok(self
            .predictions
            .list_predictions_by_class(class, requester_id, page)
            .await?)
    }

    pub async fn validate_image_only(&self, upload: UploadedImage) -> Result<ImageMetadata, ServiceError> {
        self.intake.validate(&upload)?;
        Ok(self.intake.metadata(upload.bytes).await?)
    }

    pub async fn health(&self) -> HealthStatus {
        let database = match self.predictions.ping().await {
            Ok(()) => "connected",
            Err(e) => {
                log::error!("Database health check failed: {}", e);
                "disconnected"
            }
        };
        HealthStatus {
            status: if database == "connected" { "healthy" } else { "unhealthy" }.to_string(),
            database: database.to_string(),
            model_loaded: self.engine.is_loaded(),
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn validate_patient(patient: &PatientContext) -> Result<(), ServiceError> {
    match patient.age {
        Some(age) if !(0..=MAX_PATIENT_AGE).contains(&age) => Err(ServiceError::Validation(format!(
            "Patient age must be between 0 and {}",
            MAX_PATIENT_AGE
        ))),
        _ => Ok(()),
    }
}

fn validate_review(patch: &PredictionUpdate) -> Result<(), ServiceError> {
    let has_notes = patch
        .doctor_notes
        .as_deref()
        .is_some_and(|notes| !notes.trim().is_empty());
    if patch.reviewed_by_doctor == Some(true) && !has_notes {
        return Err(ServiceError::Validation(
            "Doctor notes are required when marking as reviewed".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_repository::MemoryRepository;
    use crate::test_support::{CountingLoader, FixedLogits, Harness, jpeg_upload};
    use bytes::Bytes;
    use neumo_shared::{DoctorDiagnosis, PatientGender, PredictionStatus};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn successful_pipeline_stores_image_and_completed_row() {
        let h = Harness::new();
        let user = h.user("ana").await;
        let patient = PatientContext {
            age: Some(42),
            gender: Some(PatientGender::Female),
            symptoms: Some("cough".into()),
        };

        let upload = jpeg_upload("chest.jpg");
        let original = upload.bytes.clone();
        let p = h
            .service
            .create_prediction(user.id, upload, patient.clone())
            .await
            .unwrap();

        assert_eq!(p.status, PredictionStatus::Completed);
        assert_eq!(p.prediction_class, PredictionClass::Pneumonia);
        assert!((0.0..=1.0).contains(&p.confidence_score));
        let sum: f32 = p.class_probabilities.iter().map(|c| c.probability).sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(p.inference_time_ms.unwrap() >= 0.0);
        assert_eq!(p.original_filename, "chest.jpg");
        assert_eq!(p.patient_age, patient.age);

        let key = p.image_key.as_deref().unwrap();
        assert!(key.starts_with(&format!("predictions/{}/", user.id)));
        assert_eq!(h.blobs.object(key), Some(original));
        assert_eq!(h.repo.prediction_count(), 1);
    }

    #[tokio::test]
    async fn storage_failure_leaves_a_single_failed_row() {
        let h = Harness::new();
        let user = h.user("ana").await;
        h.blobs.fail_uploads(true);

        let err = h
            .service
            .create_prediction(user.id, jpeg_upload("chest.jpg"), PatientContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Storage(_)));

        let rows = h.repo.all_predictions();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, PredictionStatus::Failed);
        assert_eq!(rows[0].prediction_class, PredictionClass::Unknown);
        assert_eq!(rows[0].confidence_score, 0.0);
        assert!(rows[0].image_key.is_none());
        assert!(rows[0].inference_time_ms.is_some());
        assert_eq!(h.blobs.len(), 0);
    }

    #[tokio::test]
    async fn undecodable_image_is_recorded_as_failed() {
        let h = Harness::new();
        let user = h.user("ana").await;
        let upload = UploadedImage::new(
            "broken.png",
            Some("image/png".into()),
            Bytes::from_static(b"\x89PNG but not really"),
        );

        let err = h
            .service
            .create_prediction(user.id, upload, PatientContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ImageDecode(_)));
        assert_eq!(h.repo.all_predictions()[0].status, PredictionStatus::Failed);
        assert_eq!(h.blobs.len(), 0);
    }

    #[tokio::test]
    async fn model_load_failure_is_recorded_and_retried() {
        let loader = Arc::new(CountingLoader::failing());
        let h = Harness::with_loader(loader.clone());
        let user = h.user("ana").await;

        for _ in 0..2 {
            let err = h
                .service
                .create_prediction(user.id, jpeg_upload("chest.jpg"), PatientContext::default())
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::ModelLoad(_)));
        }
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.repo.prediction_count(), 2);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_without_a_row() {
        let h = Harness::new();
        let user = h.user("ana").await;
        let upload = UploadedImage::new(
            "huge.jpg",
            Some("image/jpeg".into()),
            Bytes::from(vec![0u8; 20 * 1024 * 1024]),
        );

        let err = h
            .service
            .create_prediction(user.id, upload, PatientContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(h.repo.prediction_count(), 0);
        assert_eq!(h.loader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bad_content_type_or_age_writes_nothing() {
        let h = Harness::new();
        let user = h.user("ana").await;

        let mut pdf = jpeg_upload("scan.pdf");
        pdf.content_type = Some("application/pdf".into());
        assert!(matches!(
            h.service
                .create_prediction(user.id, pdf, PatientContext::default())
                .await,
            Err(ServiceError::Validation(_))
        ));

        let patient = PatientContext {
            age: Some(200),
            ..Default::default()
        };
        assert!(matches!(
            h.service
                .create_prediction(user.id, jpeg_upload("chest.jpg"), patient)
                .await,
            Err(ServiceError::Validation(_))
        ));
        assert_eq!(h.repo.prediction_count(), 0);
    }

    #[tokio::test]
    async fn unknown_owner_writes_nothing() {
        let h = Harness::new();
        let err = h
            .service
            .create_prediction(999, jpeg_upload("chest.jpg"), PatientContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UserNotFound));
        assert_eq!(h.repo.prediction_count(), 0);
    }

    #[tokio::test]
    async fn failed_insert_removes_the_uploaded_image() {
        // Users resolve, but the prediction store has no matching user row.
        let h = Harness::with_prediction_store(MemoryRepository::new());
        let user = h.user("ana").await;

        let err = h
            .service
            .create_prediction(user.id, jpeg_upload("chest.jpg"), PatientContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Database(_)));
        assert_eq!(h.blobs.len(), 0);
    }

    #[tokio::test]
    async fn only_the_owner_sees_a_prediction() {
        let h = Harness::new();
        let owner = h.user("ana").await;
        let other = h.user("bob").await;
        let p = h.create(owner.id).await;

        let view = h.service.get_with_access_url(p.id, owner.id).await.unwrap().unwrap();
        assert!(view.image_url.unwrap().contains(p.image_key.as_deref().unwrap()));
        assert!(h.service.get_with_access_url(p.id, other.id).await.unwrap().is_none());
        assert!(h.service.get_with_access_url(p.id + 100, owner.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn presign_failure_still_returns_the_record() {
        let h = Harness::new();
        let owner = h.user("ana").await;
        let p = h.create(owner.id).await;
        h.blobs.fail_presigns(true);

        let view = h.service.get_with_access_url(p.id, owner.id).await.unwrap().unwrap();
        assert_eq!(view.id, p.id);
        assert!(view.image_url.is_none());
    }

    #[tokio::test]
    async fn non_owner_cannot_update_flag_or_delete() {
        let h = Harness::new();
        let owner = h.user("ana").await;
        let other = h.user("bob").await;
        let p = h.create(owner.id).await;

        let patch = PredictionUpdate {
            reviewed_by_doctor: Some(true),
            doctor_notes: Some("looks clear".into()),
            ..Default::default()
        };
        assert!(h.service.update_review(p.id, other.id, patch).await.unwrap().is_none());
        assert!(h.service.flag(p.id, other.id).await.unwrap().is_none());
        assert!(!h.service.delete(p.id, other.id).await.unwrap());

        let stored = h.repo.all_predictions().remove(0);
        assert!(!stored.reviewed_by_doctor);
        assert!(!stored.is_flagged);
        assert!(h.blobs.contains(p.image_key.as_deref().unwrap()));
    }

    #[tokio::test]
    async fn owner_review_is_a_partial_update() {
        let h = Harness::new();
        let owner = h.user("ana").await;
        let p = h.create(owner.id).await;

        let reviewed = h
            .service
            .update_review(
                p.id,
                owner.id,
                PredictionUpdate {
                    reviewed_by_doctor: Some(true),
                    doctor_notes: Some("consolidation right lower lobe".into()),
                    doctor_diagnosis: Some(DoctorDiagnosis::Pneumonia),
                    is_flagged: None,
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(reviewed.reviewed_by_doctor);
        assert_eq!(reviewed.doctor_diagnosis, Some(DoctorDiagnosis::Pneumonia));

        let flagged = h.service.flag(p.id, owner.id).await.unwrap().unwrap();
        assert!(flagged.is_flagged);
        assert!(flagged.reviewed_by_doctor);
        assert_eq!(flagged.doctor_notes.as_deref(), Some("consolidation right lower lobe"));
    }

    #[tokio::test]
    async fn marking_reviewed_requires_notes() {
        let h = Harness::new();
        let owner = h.user("ana").await;
        let p = h.create(owner.id).await;

        for notes in [None, Some("   ".to_string())] {
            let patch = PredictionUpdate {
                reviewed_by_doctor: Some(true),
                doctor_notes: notes,
                ..Default::default()
            };
            assert!(matches!(
                h.service.update_review(p.id, owner.id, patch).await,
                Err(ServiceError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn owner_delete_removes_row_and_image() {
        let h = Harness::new();
        let owner = h.user("ana").await;
        let p = h.create(owner.id).await;
        let key = p.image_key.clone().unwrap();

        assert!(h.service.delete(p.id, owner.id).await.unwrap());
        assert_eq!(h.repo.prediction_count(), 0);
        assert!(!h.blobs.contains(&key));
        assert!(!h.service.delete(p.id, owner.id).await.unwrap());
    }

    #[tokio::test]
    async fn blob_delete_failure_does_not_block_row_delete() {
        let h = Harness::new();
        let owner = h.user("ana").await;
        let p = h.create(owner.id).await;
        h.blobs.fail_deletes(true);

        assert!(h.service.delete(p.id, owner.id).await.unwrap());
        assert_eq!(h.repo.prediction_count(), 0);
    }

    #[tokio::test]
    async fn listings_are_newest_first_and_paginated() {
        let h = Harness::new();
        let owner = h.user("ana").await;
        let other = h.user("bob").await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(h.create(owner.id).await.id);
        }
        h.create(other.id).await;

        let PredictionListing::Summaries(all) = h
            .service
            .list_for_user(owner.id, Page::default(), false)
            .await
            .unwrap()
        else {
            panic!("expected summaries");
        };
        let listed: Vec<i64> = all.iter().map(|s| s.id).collect();
        ids.reverse();
        assert_eq!(listed, ids);

        let detailed = h
            .service
            .list_for_user(owner.id, Page::new(Some(1), Some(1)), true)
            .await
            .unwrap();
        match detailed {
            PredictionListing::Detailed(views) => {
                assert_eq!(views.len(), 1);
                assert_eq!(views[0].id, ids[1]);
                assert!(views[0].image_url.is_some());
            }
            other => panic!("expected detailed views, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn class_listing_validates_and_scopes_to_requester() {
        let h = Harness::new();
        let owner = h.user("ana").await;
        let other = h.user("bob").await;
        h.create(owner.id).await;
        h.create(other.id).await;

        let mine = h
            .service
            .list_by_class("PNEUMONIA", owner.id, Page::default())
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert!(mine.iter().all(|p| p.user_id == owner.id));

        assert!(
            h.service
                .list_by_class("NORMAL", owner.id, Page::default())
                .await
                .unwrap()
                .is_empty()
        );
        for bad in ["UNKNOWN", "pneumonia", "COVID"] {
            assert!(matches!(
                h.service.list_by_class(bad, owner.id, Page::default()).await,
                Err(ServiceError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn flagged_listing_spans_all_users() {
        let h = Harness::new();
        let ana = h.user("ana").await;
        let bob = h.user("bob").await;
        let a = h.create(ana.id).await;
        let b = h.create(bob.id).await;
        h.create(bob.id).await;
        h.service.flag(a.id, ana.id).await.unwrap();
        h.service.flag(b.id, bob.id).await.unwrap();

        let flagged = h.service.list_flagged(Page::default()).await.unwrap();
        let ids: Vec<i64> = flagged.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[tokio::test]
    async fn validate_image_only_reports_metadata_without_writing() {
        let h = Harness::new();
        let meta = h.service.validate_image_only(jpeg_upload("chest.jpg")).await.unwrap();
        assert_eq!(meta.format.as_deref(), Some("JPEG"));
        assert!(meta.width > 0 && meta.height > 0);
        assert_eq!(h.repo.prediction_count(), 0);
        assert_eq!(h.blobs.len(), 0);
    }

    #[tokio::test]
    async fn classification_is_stable_across_uploads_of_the_same_bytes() {
        let h = Harness::with_loader(Arc::new(CountingLoader::new(FixedLogits(vec![1.25, -0.5]))));
        let user = h.user("ana").await;

        let a = h
            .service
            .create_prediction(user.id, jpeg_upload("a.jpg"), PatientContext::default())
            .await
            .unwrap();
        let b = h
            .service
            .create_prediction(user.id, jpeg_upload("b.jpg"), PatientContext::default())
            .await
            .unwrap();
        assert_eq!(a.prediction_class, PredictionClass::Normal);
        assert_eq!(a.prediction_class, b.prediction_class);
        assert_eq!(a.confidence_score, b.confidence_score);
        assert_eq!(a.class_probabilities, b.class_probabilities);
    }

    #[tokio::test]
    async fn health_reports_model_state() {
        let h = Harness::new();
        let before = h.service.health().await;
        assert_eq!(before.database, "connected");
        assert!(!before.model_loaded);

        h.engine.load().await.unwrap();
        assert!(h.service.health().await.model_loaded);
    }
}
