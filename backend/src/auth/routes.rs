use actix_web::{HttpResponse, web};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use neumo_shared::{LoginRequest, MessageResponse, RefreshTokenRequest, RegisterRequest, UserView};

use super::middleware::AuthenticatedUser;
use super::service::AuthService;
use crate::errors::ServiceError;

pub async fn register(
    auth: web::Data<AuthService>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ServiceError> {
    let user = auth.register(body.into_inner()).await?;
    let tokens = auth.start_session(user.id).await?;
    Ok(HttpResponse::Created().json(tokens))
}

pub async fn login(
    auth: web::Data<AuthService>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ServiceError> {
    let tokens = auth.login(&body.email, &body.password).await?;
    Ok(HttpResponse::Ok().json(tokens))
}

pub async fn refresh(
    auth: web::Data<AuthService>,
    body: web::Json<RefreshTokenRequest>,
) -> Result<HttpResponse, ServiceError> {
    let tokens = auth.refresh(&body.refresh_token).await?;
    Ok(HttpResponse::Ok().json(tokens))
}

pub async fn logout(
    user: AuthenticatedUser,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, ServiceError> {
    auth.logout(user.0.id).await?;
    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "Successfully logged out".to_string(),
    }))
}

pub async fn me(user: AuthenticatedUser) -> HttpResponse {
    log::debug!("/auth/me called for user {}", user.0.id);
    HttpResponse::Ok().json(UserView::from(&user.0))
}

pub async fn verify_token(
    _user: AuthenticatedUser,
    credentials: BearerAuth,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, ServiceError> {
    let status = auth.verify_token(credentials.token())?;
    Ok(HttpResponse::Ok().json(status))
}
