pub mod models;
pub mod postgres_repository;

#[cfg(test)]
pub mod memory_repository;

use async_trait::async_trait;
use neumo_shared::{PredictionClass, PredictionUpdate};

use models::{NewPrediction, NewUser, Page, Prediction, User};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Unique constraint violated on {0}")]
    UniqueViolation(UniqueField),
    #[error("Invalid data format: {0}")]
    InvalidData(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Email,
    Username,
}

impl std::fmt::Display for UniqueField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UniqueField::Email => write!(f, "email"),
            UniqueField::Username => write!(f, "username"),
        }
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, new_user: NewUser) -> Result<User, RepositoryError>;

    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>, RepositoryError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    /// Every user whose email or username matches, in one lookup.
    async fn find_conflicting_users(
        &self,
        email: &str,
        username: &str,
    ) -> Result<Vec<User>, RepositoryError>;

    /// Overwrites (or clears) the single stored refresh token. Last writer wins.
    async fn set_refresh_token(
        &self,
        user_id: i64,
        refresh_token: Option<&str>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait PredictionRepository: Send + Sync {
    async fn create_prediction(&self, new: NewPrediction) -> Result<Prediction, RepositoryError>;

    async fn get_prediction(&self, id: i64) -> Result<Option<Prediction>, RepositoryError>;

    async fn list_user_predictions(
        &self,
        user_id: i64,
        page: Page,
    ) -> Result<Vec<Prediction>, RepositoryError>;

    async fn list_flagged_predictions(&self, page: Page) -> Result<Vec<Prediction>, RepositoryError>;

    async fn list_predictions_by_class(
        &self,
        class: PredictionClass,
        user_id: i64,
        page: Page,
    ) -> Result<Vec<Prediction>, RepositoryError>;

    /// Applies only the fields present in `patch`.
    async fn update_review(
        &self,
        id: i64,
        patch: &PredictionUpdate,
    ) -> Result<Option<Prediction>, RepositoryError>;

    async fn delete_prediction(&self, id: i64) -> Result<bool, RepositoryError>;

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}
