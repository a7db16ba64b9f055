use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Label produced by the classifier. `Unknown` is only ever written for
/// failed prediction attempts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum PredictionClass {
    Normal,
    Pneumonia,
    Unknown,
}

impl PredictionClass {
    /// The closed label set of the classifier, in output-logit order.
    pub const LABELS: [PredictionClass; 2] = [PredictionClass::Normal, PredictionClass::Pneumonia];

    /// Parses a class usable as a listing filter. `UNKNOWN` is not a
    /// diagnostic class and is rejected.
    pub fn parse_diagnostic(value: &str) -> Option<Self> {
        match value.parse::<PredictionClass>() {
            Ok(PredictionClass::Unknown) | Err(_) => None,
            Ok(class) => Some(class),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PredictionStatus {
    Completed,
    Failed,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum DoctorDiagnosis {
    Normal,
    Pneumonia,
    Inconclusive,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum PatientGender {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassProbability {
    pub class: PredictionClass,
    pub probability: f32,
}

// ---- auth ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

impl TokenPair {
    pub fn bearer(access_token: String, refresh_token: String) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// Public view of a user account. Never carries the password hash or the
/// stored refresh token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenStatus {
    pub valid: bool,
    pub user_id: i64,
    pub expires_at: i64,
}

// ---- predictions ----

/// A prediction record as returned to clients. `image_url` is a freshly
/// presigned link and is absent when the record has no stored image or
/// presigning failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionView {
    pub id: i64,
    pub user_id: i64,
    pub original_filename: String,
    pub image_url: Option<String>,
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

/// Lightweight projection used by list views that skip presigning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub id: i64,
    pub prediction_class: PredictionClass,
    pub confidence_score: f32,
    pub created_at: DateTime<Utc>,
    pub status: PredictionStatus,
    pub is_flagged: bool,
    pub reviewed_by_doctor: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionListing {
    Summaries(Vec<PredictionSummary>),
    Detailed(Vec<PredictionView>),
}

impl PredictionListing {
    pub fn len(&self) -> usize {
        match self {
            PredictionListing::Summaries(items) => items.len(),
            PredictionListing::Detailed(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Review annotation patch. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictionUpdate {
    #[serde(default)]
    pub reviewed_by_doctor: Option<bool>,
    #[serde(default)]
    pub doctor_notes: Option<String>,
    #[serde(default)]
    pub doctor_diagnosis: Option<DoctorDiagnosis>,
    #[serde(default)]
    pub is_flagged: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: Option<String>,
    pub color_type: String,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageValidationResponse {
    pub valid: bool,
    pub message: String,
    pub metadata: ImageMetadata,
}

// ---- envelopes ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
    pub total: usize,
    pub page: i64,
    pub per_page: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub database: String,
    pub model_loaded: bool,
}
