use async_trait::async_trait;
use chrono::Utc;
use neumo_shared::{PredictionClass, PredictionUpdate};
use std::sync::{Arc, Mutex, MutexGuard};

use super::models::{NewPrediction, NewUser, Page, Prediction, User};
use super::{PredictionRepository, RepositoryError, UniqueField, UserRepository};

#[derive(Default)]
struct State {
    users: Vec<User>,
    predictions: Vec<Prediction>,
    next_user_id: i64,
    next_prediction_id: i64,
}

/// In-process stand-in for the Postgres repository, honouring the same
/// unique constraints and ordering.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    state: Arc<Mutex<State>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn prediction_count(&self) -> usize {
        self.lock().predictions.len()
    }

    pub fn all_predictions(&self) -> Vec<Prediction> {
        self.lock().predictions.clone()
    }

    pub fn set_active(&self, user_id: i64, active: bool) {
        if let Some(user) = self.lock().users.iter_mut().find(|u| u.id == user_id) {
            user.is_active = active;
        }
    }

    pub fn set_superuser(&self, user_id: i64, superuser: bool) {
        if let Some(user) = self.lock().users.iter_mut().find(|u| u.id == user_id) {
            user.is_superuser = superuser;
        }
    }
}

fn newest_first(mut predictions: Vec<Prediction>, page: Page) -> Vec<Prediction> {
    predictions.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
    predictions
        .into_iter()
        .skip(page.skip as usize)
        .take(page.limit as usize)
        .collect()
}

#[async_trait]
impl UserRepository for MemoryRepository {
    async fn create_user(&self, new_user: NewUser) -> Result<User, RepositoryError> {
        let mut state = self.lock();
        if state.users.iter().any(|u| u.email == new_user.email) {
            return Err(RepositoryError::UniqueViolation(UniqueField::Email));
        }
        if state.users.iter().any(|u| u.username == new_user.username) {
            return Err(RepositoryError::UniqueViolation(UniqueField::Username));
        }
        state.next_user_id += 1;
        let now = Utc::now();
        let user = User {
            id: state.next_user_id,
            email: new_user.email,
            username: new_user.username,
            full_name: new_user.full_name,
            hashed_password: new_user.hashed_password,
            is_active: true,
            is_superuser: false,
            refresh_token: None,
            created_at: now,
            updated_at: now,
        };
        state.users.push(user.clone());
        Ok(user)
    }

    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>, RepositoryError> {
        Ok(self.lock().users.iter().find(|u| u.id == user_id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self.lock().users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_conflicting_users(
        &self,
        email: &str,
        username: &str,
    ) -> Result<Vec<User>, RepositoryError> {
        Ok(self
            .lock()
            .users
            .iter()
            .filter(|u| u.email == email || u.username == username)
            .cloned()
            .collect())
    }

    async fn set_refresh_token(
        &self,
        user_id: i64,
        refresh_token: Option<&str>,
    ) -> Result<(), RepositoryError> {
        if let Some(user) = self.lock().users.iter_mut().find(|u| u.id == user_id) {
            user.refresh_token = refresh_token.map(str::to_string);
            user.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl PredictionRepository for MemoryRepository {
    async fn create_prediction(&self, new: NewPrediction) -> Result<Prediction, RepositoryError> {
        let mut state = self.lock();
        if !state.users.iter().any(|u| u.id == new.user_id) {
            return Err(RepositoryError::Database(format!(
                "foreign key violation: user {} does not exist",
                new.user_id
            )));
        }
        state.next_prediction_id += 1;
        let now = Utc::now();
        let prediction = Prediction {
            id: state.next_prediction_id,
            user_id: new.user_id,
            image_key: new.image_key,
            original_filename: new.original_filename,
            prediction_class: new.prediction_class,
            confidence_score: new.confidence_score,
            class_probabilities: new.class_probabilities,
            inference_time_ms: new.inference_time_ms,
            patient_age: new.patient.age,
            patient_gender: new.patient.gender,
            patient_symptoms: new.patient.symptoms,
            reviewed_by_doctor: false,
            doctor_notes: None,
            doctor_diagnosis: None,
            is_flagged: false,
            status: new.status,
            created_at: now,
            updated_at: now,
        };
        state.predictions.push(prediction.clone());
        Ok(prediction)
    }

    async fn get_prediction(&self, id: i64) -> Result<Option<Prediction>, RepositoryError> {
        Ok(self.lock().predictions.iter().find(|p| p.id == id).cloned())
    }

    async fn list_user_predictions(
        &self,
        user_id: i64,
        page: Page,
    ) -> Result<Vec<Prediction>, RepositoryError> {
        let matching = self
            .lock()
            .predictions
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(matching, page))
    }

    async fn list_flagged_predictions(&self, page: Page) -> Result<Vec<Prediction>, RepositoryError> {
        let matching = self
            .lock()
            .predictions
            .iter()
            .filter(|p| p.is_flagged)
            .cloned()
            .collect();
        Ok(newest_first(matching, page))
    }

    async fn list_predictions_by_class(
        &self,
        class: PredictionClass,
        user_id: i64,
        page: Page,
    ) -> Result<Vec<Prediction>, RepositoryError> {
        let matching = self
            .lock()
            .predictions
            .iter()
            .filter(|p| p.prediction_class == class && p.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(matching, page))
    }

    async fn update_review(
        &self,
        id: i64,
        patch: &PredictionUpdate,
    ) -> Result<Option<Prediction>, RepositoryError> {
        let mut state = self.lock();
        let Some(prediction) = state.predictions.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        if let Some(reviewed) = patch.reviewed_by_doctor {
            prediction.reviewed_by_doctor = reviewed;
        }
        if let Some(notes) = &patch.doctor_notes {
            prediction.doctor_notes = Some(notes.clone());
        }
        if let Some(diagnosis) = patch.doctor_diagnosis {
            prediction.doctor_diagnosis = Some(diagnosis);
        }
        if let Some(flagged) = patch.is_flagged {
            prediction.is_flagged = flagged;
        }
        prediction.updated_at = Utc::now();
        Ok(Some(prediction.clone()))
    }

    async fn delete_prediction(&self, id: i64) -> Result<bool, RepositoryError> {
        let mut state = self.lock();
        let before = state.predictions.len();
        state.predictions.retain(|p| p.id != id);
        Ok(state.predictions.len() < before)
    }
}
