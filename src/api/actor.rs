//! Caller identity. Authentication happens upstream; the identity provider
//! forwards the actor id and role as request headers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::access::{Actor, Role};
use crate::api::response::ApiError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, ApiError> {
        let id = header(parts, ACTOR_ID_HEADER)
            .ok_or_else(|| ApiError::unauthorized("Missing X-Actor-Id header"))?;
        let role: Role = header(parts, ACTOR_ROLE_HEADER)
            .ok_or_else(|| ApiError::unauthorized("Missing X-Actor-Role header"))?
            .parse()
            .map_err(ApiError::unauthorized)?;
        Ok(Actor::new(id, role))
    }
}
