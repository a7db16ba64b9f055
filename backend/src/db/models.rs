use chrono::{DateTime, Utc};
use neumo_shared::{
    ClassProbability, DoctorDiagnosis, PatientGender, PredictionClass, PredictionStatus,
    PredictionSummary, PredictionView, UserView,
};

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub hashed_password: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            is_active: user.is_active,
            is_superuser: user.is_superuser,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub hashed_password: String,
}

/// Optional patient fields supplied alongside an upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientContext {
    pub age: Option<i32>,
    pub gender: Option<PatientGender>,
    pub symptoms: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Prediction {
    pub id: i64,
    pub user_id: i64,
    pub image_key: Option<String>,
    pub original_filename: String,
    pub prediction_class: PredictionClass,
    pub confidence_score: f32,
    pub class_probabilities: Vec<ClassProbability>,
    pub inference_time_ms: Option<f64>,
    pub patient_age: Option<i32>,
    pub patient_gender: Option<PatientGender>,
    pub patient_symptoms: Option<String>,
    pub reviewed_by_doctor: bool,
    pub doctor_notes: Option<String>,
    pub doctor_diagnosis: Option<DoctorDiagnosis>,
    pub is_flagged: bool,
    pub status: PredictionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prediction {
    pub fn into_view(self, image_url: Option<String>) -> PredictionView {
        PredictionView {
            id: self.id,
            user_id: self.user_id,
            original_filename: self.original_filename,
            image_url,
            prediction_class: self.prediction_class,
            confidence_score: self.confidence_score,
            class_probabilities: self.class_probabilities,
            inference_time_ms: self.inference_time_ms,
            patient_age: self.patient_age,
            patient_gender: self.patient_gender,
            patient_symptoms: self.patient_symptoms,
            reviewed_by_doctor: self.reviewed_by_doctor,
            doctor_notes: self.doctor_notes,
            doctor_diagnosis: self.doctor_diagnosis,
            is_flagged: self.is_flagged,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn summary(&self) -> PredictionSummary {
        PredictionSummary {
            id: self.id,
            prediction_class: self.prediction_class,
            confidence_score: self.confidence_score,
            created_at: self.created_at,
            status: self.status,
            is_flagged: self.is_flagged,
            reviewed_by_doctor: self.reviewed_by_doctor,
        }
    }
}

/// Row written exactly once per prediction attempt.
#[derive(Debug, Clone)]
pub struct NewPrediction {
    pub user_id: i64,
    pub image_key: Option<String>,
    pub original_filename: String,
    pub prediction_class: PredictionClass,
    pub confidence_score: f32,
    pub class_probabilities: Vec<ClassProbability>,
    pub inference_time_ms: Option<f64>,
    pub patient: PatientContext,
    pub status: PredictionStatus,
}

impl NewPrediction {
    #[allow(clippy::too_many_arguments)]
    pub fn completed(
        user_id: i64,
        original_filename: String,
        image_key: String,
        prediction_class: PredictionClass,
        confidence_score: f32,
        class_probabilities: Vec<ClassProbability>,
        inference_time_ms: f64,
        patient: PatientContext,
    ) -> Self {
        Self {
            user_id,
            image_key: Some(image_key),
            original_filename,
            prediction_class,
            confidence_score: confidence_score.clamp(0.0, 1.0),
            class_probabilities,
            inference_time_ms: Some(inference_time_ms),
            patient,
            status: PredictionStatus::Completed,
        }
    }

    pub fn failed(
        user_id: i64,
        original_filename: String,
        inference_time_ms: f64,
        patient: PatientContext,
    ) -> Self {
        Self {
            user_id,
            image_key: None,
            original_filename,
            prediction_class: PredictionClass::Unknown,
            confidence_score: 0.0,
            class_probabilities: Vec::new(),
            inference_time_ms: Some(inference_time_ms),
            patient,
            status: PredictionStatus::Failed,
        }
    }
}

/// Offset pagination as accepted by the list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: i64,
    pub limit: i64,
}

impl Page {
    pub const MAX_LIMIT: i64 = 100;

    pub fn new(skip: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            skip: skip.unwrap_or(0).max(0),
            limit: limit.unwrap_or(Self::MAX_LIMIT).clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn page_number(&self) -> i64 {
        self.skip / self.limit + 1
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}
