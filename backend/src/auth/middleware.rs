use super::service::AuthService;
use crate::db::models::User;
use crate::errors::ServiceError;
use actix_web::http::header::Header;
use actix_web::{
    Error, HttpMessage, ResponseError,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use actix_web::{FromRequest, HttpRequest};
use actix_web_httpauth::headers::authorization::{Authorization, Bearer};
use futures::future::{Ready, ready};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

/// Resolves the bearer access token to an active user and stores it in the
/// request extensions. Requests without one get a 401.
#[derive(Clone)]
pub struct AuthMiddleware {
    auth: Arc<AuthService>,
}

impl AuthMiddleware {
    pub fn new(auth: Arc<AuthService>) -> Self {
        Self { auth }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service: Rc::new(service),
            auth: self.auth.clone(),
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
    auth: Arc<AuthService>,
}

fn bearer_token(req: &ServiceRequest) -> Option<String> {
    Authorization::<Bearer>::parse(req)
        .ok()
        .map(|header| header.as_ref().token().to_string())
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let auth = self.auth.clone();

        Box::pin(async move {
            let outcome = match bearer_token(&req) {
                Some(token) => auth.current_user(&token).await,
                None => Err(ServiceError::InvalidToken),
            };

            match outcome {
                Ok(user) => {
                    log::debug!("Authenticated user {} for {}", user.id, req.path());
                    req.extensions_mut().insert(user);
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
                Err(err) => {
                    log::warn!("Rejected unauthenticated request to {}: {}", req.path(), err);
                    let response = err.error_response().map_into_right_body();
                    Ok(req.into_response(response))
                }
            }
        })
    }
}

/// The active user resolved by [`AuthMiddleware`].
pub struct AuthenticatedUser(pub User);

impl FromRequest for AuthenticatedUser {
    type Error = ServiceError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        match req.extensions().get::<User>() {
            Some(user) => ready(Ok(AuthenticatedUser(user.clone()))),
            None => {
                log::warn!("No authenticated user on {}; is the route outside the protected scope?", req.path());
                ready(Err(ServiceError::InvalidToken))
            }
        }
    }
}

/// An authenticated user holding the superuser capability.
pub struct SuperUser(pub User);

impl FromRequest for SuperUser {
    type Error = ServiceError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        ready(match req.extensions().get::<User>() {
            Some(user) if user.is_superuser => Ok(SuperUser(user.clone())),
            Some(_) => Err(ServiceError::Forbidden),
            None => Err(ServiceError::InvalidToken),
        })
    }
}
