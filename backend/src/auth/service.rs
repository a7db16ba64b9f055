use neumo_shared::{RegisterRequest, TokenPair, TokenStatus};
use std::sync::Arc;
use validator::ValidateEmail;

use super::jwt::JwtService;
use super::models::TokenKind;
use super::password::PasswordManager;
use crate::db::models::{NewUser, User};
use crate::db::{RepositoryError, UniqueField, UserRepository};
use crate::errors::ServiceError;

const MIN_USERNAME_LEN: usize = 3;
const MIN_PASSWORD_LEN: usize = 8;

/// Registration, credential checks and the access/refresh token lifecycle.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    jwt: JwtService,
    passwords: PasswordManager,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserRepository>, jwt: JwtService, passwords: PasswordManager) -> Self {
        Self {
            users,
            jwt,
            passwords,
        }
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<User, ServiceError> {
        let email = request.email.trim().to_string();
        let username = request.username.trim().to_string();
        validate_registration(&email, &username, &request.password)?;

        // Email collisions are reported ahead of username collisions.
        let conflicts = self.users.find_conflicting_users(&email, &username).await?;
        if conflicts.iter().any(|u| u.email == email) {
            return Err(ServiceError::DuplicateEmail);
        }
        if conflicts.iter().any(|u| u.username == username) {
            return Err(ServiceError::DuplicateUsername);
        }

        let hashed_password = self.hash_password(request.password).await?;
        let user = self
            .users
            .create_user(NewUser {
                email,
                username,
                full_name: request.full_name.filter(|n| !n.trim().is_empty()),
                hashed_password,
            })
            .await
            .map_err(|e| match e {
                RepositoryError::UniqueViolation(UniqueField::Email) => ServiceError::DuplicateEmail,
                RepositoryError::UniqueViolation(UniqueField::Username) => {
                    ServiceError::DuplicateUsername
                }
                other => other.into(),
            })?;

        log::info!("Registered user {} ({})", user.id, user.username);
        Ok(user)
    }

    /// `None` for an unknown email, a wrong password or an inactive account.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>, ServiceError> {
        let Some(user) = self.users.get_user_by_email(email.trim()).await? else {
            let passwords = self.passwords.clone();
            let candidate = password.to_string();
            tokio::task::spawn_blocking(move || passwords.verify_placeholder(&candidate))
                .await
                .map_err(|e| ServiceError::Upstream(e.to_string()))?;
            return Ok(None);
        };

        let passwords = self.passwords.clone();
        let candidate = password.to_string();
        let stored = user.hashed_password.clone();
        let matches = tokio::task::spawn_blocking(move || passwords.verify(&candidate, &stored))
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;

        if !matches || !user.is_active {
            return Ok(None);
        }
        Ok(Some(user))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, ServiceError> {
        let Some(user) = self.authenticate(email, password).await? else {
            log::info!("Rejected login attempt");
            return Err(ServiceError::InvalidCredentials);
        };

        let pair = self.start_session(user.id).await?;
        log::info!("User {} logged in", user.id);
        Ok(pair)
    }

    /// Exchanges the current refresh token for a new pair. The presented
    /// token must equal the stored one, so each refresh token works once.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ServiceError> {
        let claims = self.jwt.verify(refresh_token, TokenKind::Refresh)?;
        let user_id = claims.user_id().ok_or(ServiceError::InvalidToken)?;

        let user = self
            .users
            .get_user_by_id(user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or(ServiceError::InvalidToken)?;

        if user.refresh_token.as_deref() != Some(refresh_token) {
            log::debug!("Refresh token for user {} does not match the stored one", user_id);
            return Err(ServiceError::InvalidToken);
        }

        let pair = self.start_session(user.id).await?;
        log::info!("Rotated refresh token for user {}", user.id);
        Ok(pair)
    }

    pub async fn logout(&self, user_id: i64) -> Result<(), ServiceError> {
        self.users.set_refresh_token(user_id, None).await?;
        log::info!("User {} logged out", user_id);
        Ok(())
    }

    pub async fn current_user(&self, access_token: &str) -> Result<User, ServiceError> {
        let claims = self.jwt.verify(access_token, TokenKind::Access)?;
        let user_id = claims.user_id().ok_or(ServiceError::InvalidToken)?;

        match self.users.get_user_by_id(user_id).await? {
            Some(user) if user.is_active => Ok(user),
            Some(_) => {
                log::debug!("Token subject {} is inactive", user_id);
                Err(ServiceError::InvalidToken)
            }
            None => Err(ServiceError::InvalidToken),
        }
    }

    pub fn verify_token(&self, access_token: &str) -> Result<TokenStatus, ServiceError> {
        let claims = self.jwt.verify(access_token, TokenKind::Access)?;
        Ok(TokenStatus {
            valid: true,
            user_id: claims.user_id().ok_or(ServiceError::InvalidToken)?,
            expires_at: claims.exp,
        })
    }

    /// Issues a fresh token pair and stores the refresh token, replacing
    /// any previous one.
    pub async fn start_session(&self, user_id: i64) -> Result<TokenPair, ServiceError> {
        let access = self.jwt.issue_access(user_id)?;
        let refresh = self.jwt.issue_refresh(user_id)?;
        self.users.set_refresh_token(user_id, Some(&refresh)).await?;
        Ok(TokenPair::bearer(access, refresh))
    }

    async fn hash_password(&self, password: String) -> Result<String, ServiceError> {
        let passwords = self.passwords.clone();
        tokio::task::spawn_blocking(move || passwords.hash(&password))
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?
            .map_err(|e| ServiceError::Upstream(e.to_string()))
    }
}

fn validate_registration(email: &str, username: &str, password: &str) -> Result<(), ServiceError> {
    if !email.validate_email() {
        return Err(ServiceError::Validation("Invalid email address".to_string()));
    }
    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(ServiceError::Validation(format!(
            "Username must be at least {} characters",
            MIN_USERNAME_LEN
        )));
    }
    if !username.chars().all(char::is_alphanumeric) {
        return Err(ServiceError::Validation("Username must be alphanumeric".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServiceError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}
