//! Middleware for Web API.

pub mod auth;
pub mod cors;

pub use auth::{issue_token, jwt_auth, AuthOwner, JwtClaims, JwtState};
pub use cors::create_cors_layer;
