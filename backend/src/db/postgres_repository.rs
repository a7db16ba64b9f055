use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neumo_shared::{
    ClassProbability, DoctorDiagnosis, PatientGender, PredictionClass, PredictionStatus,
    PredictionUpdate,
};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

use super::models::{NewPrediction, NewUser, Page, Prediction, User};
use super::{PredictionRepository, RepositoryError, UniqueField, UserRepository};

const USER_COLUMNS: &str = "id, email, username, full_name, hashed_password, is_active, \
     is_superuser, refresh_token, created_at, updated_at";

const PREDICTION_COLUMNS: &str = "id, user_id, image_key, original_filename, prediction_class, \
     confidence_score, class_probabilities, inference_time_ms, patient_age, patient_gender, \
     patient_symptoms, reviewed_by_doctor, doctor_notes, doctor_diagnosis, is_flagged, status, \
     created_at, updated_at";

#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))
    }
}

#[derive(FromRow)]
struct UserRow {
    id: i64,
    email: String,
    username: String,
    full_name: Option<String>,
    hashed_password: String,
    is_active: bool,
    is_superuser: bool,
    refresh_token: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            username: row.username,
            full_name: row.full_name,
            hashed_password: row.hashed_password,
            is_active: row.is_active,
            is_superuser: row.is_superuser,
            refresh_token: row.refresh_token,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct PredictionRow {
    id: i64,
    user_id: i64,
    image_key: Option<String>,
    original_filename: String,
    prediction_class: String,
    confidence_score: f32,
    class_probabilities: Json<Vec<ClassProbability>>,
    inference_time_ms: Option<f64>,
    patient_age: Option<i32>,
    patient_gender: Option<String>,
    patient_symptoms: Option<String>,
    reviewed_by_doctor: bool,
    doctor_notes: Option<String>,
    doctor_diagnosis: Option<String>,
    is_flagged: bool,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn parse_column<T: FromStr>(column: &str, value: &str) -> Result<T, RepositoryError> {
    value
        .parse::<T>()
        .map_err(|_| RepositoryError::InvalidData(format!("{} = '{}'", column, value)))
}

fn parse_optional<T: FromStr>(column: &str, value: Option<String>) -> Result<Option<T>, RepositoryError> {
    value.map(|v| parse_column(column, &v)).transpose()
}

impl TryFrom<PredictionRow> for Prediction {
    type Error = RepositoryError;

    fn try_from(row: PredictionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            image_key: row.image_key,
            original_filename: row.original_filename,
            prediction_class: parse_column::<PredictionClass>("prediction_class", &row.prediction_class)?,
            confidence_score: row.confidence_score,
            class_probabilities: row.class_probabilities.0,
            inference_time_ms: row.inference_time_ms,
            patient_age: row.patient_age,
            patient_gender: parse_optional::<PatientGender>("patient_gender", row.patient_gender)?,
            patient_symptoms: row.patient_symptoms,
            reviewed_by_doctor: row.reviewed_by_doctor,
            doctor_notes: row.doctor_notes,
            doctor_diagnosis: parse_optional::<DoctorDiagnosis>("doctor_diagnosis", row.doctor_diagnosis)?,
            is_flagged: row.is_flagged,
            status: parse_column::<PredictionStatus>("status", &row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn collect_predictions(rows: Vec<PredictionRow>) -> Result<Vec<Prediction>, RepositoryError> {
    rows.into_iter().map(Prediction::try_from).collect()
}

fn map_sqlx_error(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let constraint = db_err.constraint().unwrap_or_default();
            if constraint.contains("email") {
                return RepositoryError::UniqueViolation(UniqueField::Email);
            }
            if constraint.contains("username") {
                return RepositoryError::UniqueViolation(UniqueField::Username);
            }
        }
    }
    RepositoryError::Database(err.to_string())
}

#[async_trait]
impl UserRepository for PgRepository {
    async fn create_user(&self, new_user: NewUser) -> Result<User, RepositoryError> {
        log::info!("Creating user: {}", new_user.email);
        let sql = format!(
            "INSERT INTO users (email, username, full_name, hashed_password) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            USER_COLUMNS
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&new_user.email)
            .bind(&new_user.username)
            .bind(&new_user.full_name)
            .bind(&new_user.hashed_password)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(User::from))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(User::from))
    }

    async fn find_conflicting_users(
        &self,
        email: &str,
        username: &str,
    ) -> Result<Vec<User>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM users WHERE email = $1 OR username = $2",
            USER_COLUMNS
        );
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .bind(username)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn set_refresh_token(
        &self,
        user_id: i64,
        refresh_token: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE users SET refresh_token = $1, updated_at = now() WHERE id = $2")
            .bind(refresh_token)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        log::debug!("Refresh token updated for user {}", user_id);
        Ok(())
    }
}

#[async_trait]
impl PredictionRepository for PgRepository {
    async fn create_prediction(&self, new: NewPrediction) -> Result<Prediction, RepositoryError> {
        let sql = format!(
            "INSERT INTO predictions (user_id, image_key, original_filename, prediction_class, \
             confidence_score, class_probabilities, inference_time_ms, patient_age, \
             patient_gender, patient_symptoms, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {}",
            PREDICTION_COLUMNS
        );
        let row = sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(new.user_id)
            .bind(&new.image_key)
            .bind(&new.original_filename)
            .bind(new.prediction_class.as_ref())
            .bind(new.confidence_score)
            .bind(Json(&new.class_probabilities))
            .bind(new.inference_time_ms)
            .bind(new.patient.age)
            .bind(new.patient.gender.map(|g| g.to_string()))
            .bind(&new.patient.symptoms)
            .bind(new.status.as_ref())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let prediction = Prediction::try_from(row)?;
        log::info!(
            "Stored prediction {} for user {} with status {}",
            prediction.id,
            prediction.user_id,
            prediction.status
        );
        Ok(prediction)
    }

    async fn get_prediction(&self, id: i64) -> Result<Option<Prediction>, RepositoryError> {
        let sql = format!("SELECT {} FROM predictions WHERE id = $1", PREDICTION_COLUMNS);
        let row = sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(Prediction::try_from).transpose()
    }

    async fn list_user_predictions(
        &self,
        user_id: i64,
        page: Page,
    ) -> Result<Vec<Prediction>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM predictions WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC OFFSET $2 LIMIT $3",
            PREDICTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(user_id)
            .bind(page.skip)
            .bind(page.limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        collect_predictions(rows)
    }

    async fn list_flagged_predictions(&self, page: Page) -> Result<Vec<Prediction>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM predictions WHERE is_flagged = TRUE \
             ORDER BY created_at DESC, id DESC OFFSET $1 LIMIT $2",
            PREDICTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(page.skip)
            .bind(page.limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        collect_predictions(rows)
    }

    async fn list_predictions_by_class(
        &self,
        class: PredictionClass,
        user_id: i64,
        page: Page,
    ) -> Result<Vec<Prediction>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM predictions WHERE prediction_class = $1 AND user_id = $2 \
             ORDER BY created_at DESC, id DESC OFFSET $3 LIMIT $4",
            PREDICTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(class.as_ref())
            .bind(user_id)
            .bind(page.skip)
            .bind(page.limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        collect_predictions(rows)
    }

    async fn update_review(
        &self,
        id: i64,
        patch: &PredictionUpdate,
    ) -> Result<Option<Prediction>, RepositoryError> {
        let sql = format!(
            "UPDATE predictions SET \
             reviewed_by_doctor = COALESCE($2, reviewed_by_doctor), \
             doctor_notes = COALESCE($3, doctor_notes), \
             doctor_diagnosis = COALESCE($4, doctor_diagnosis), \
             is_flagged = COALESCE($5, is_flagged), \
             updated_at = now() \
             WHERE id = $1 RETURNING {}",
            PREDICTION_COLUMNS
        );
        let row = sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(id)
            .bind(patch.reviewed_by_doctor)
            .bind(&patch.doctor_notes)
            .bind(patch.doctor_diagnosis.map(|d| d.to_string()))
            .bind(patch.is_flagged)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(Prediction::try_from).transpose()
    }

    async fn delete_prediction(&self, id: i64) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM predictions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
