pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod routes;
pub mod service;

pub use middleware::{AuthMiddleware, AuthenticatedUser, SuperUser};
pub use service::AuthService;
