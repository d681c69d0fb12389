//! Caller identity. Authentication happens upstream; the gateway forwards
//! the authenticated id and role in `x-actor-id` and `x-actor-role`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use domains::Actor;
use uuid::Uuid;

use crate::error::ApiError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

#[derive(Debug, Clone)]
pub struct CurrentActor(pub Actor);

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, ApiError> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| ApiError::Unauthenticated(format!("missing {name} header")))?
        .to_str()
        .map_err(|_| ApiError::Unauthenticated(format!("malformed {name} header")))
}

impl<S: Send + Sync> FromRequestParts<S> for CurrentActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = Uuid::parse_str(header(parts, ACTOR_ID_HEADER)?)
            .map_err(|_| ApiError::Unauthenticated(format!("{ACTOR_ID_HEADER} is not a UUID")))?;
        let actor = match header(parts, ACTOR_ROLE_HEADER)? {
            "admin" => Actor::admin(id),
            "client" => Actor::client(id),
            "relay" => Actor::relay(id),
            other => return Err(ApiError::Unauthenticated(format!("unknown role {other}"))),
        };
        Ok(CurrentActor(actor))
    }
}
