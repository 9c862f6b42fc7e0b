//! Actor extraction.
//!
//! Authentication happens upstream. The auth proxy forwards who is calling
//! as two trusted headers, and handlers receive them as an [`Actor`].

use axum::{extract::FromRequestParts, http::request::Parts};

use dosirak_core::{Actor, Role};

use crate::error::AppError;

/// Role of the caller: `buyer`, `seller` (or `partner`), or `admin`.
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Buyer uid, store id, or admin uid, depending on the role.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";

/// Extractor that requires actor headers.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(RequireActor(actor): RequireActor) -> impl IntoResponse {
///     format!("Hello, {actor}!")
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireActor(pub Actor);

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, AppError> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Unauthenticated(format!("missing {name} header")))
}

impl<S> FromRequestParts<S> for RequireActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role: Role = header(parts, ACTOR_ROLE_HEADER)?
            .parse()
            .map_err(AppError::Unauthenticated)?;
        let id = header(parts, ACTOR_ID_HEADER)?.to_string();

        tracing::Span::current().record("actor", tracing::field::display(role));

        Ok(Self(Actor { role, id }))
    }
}
