//! Gateway-injected identity headers extractors.

use axum::extract::FromRequestParts;
use http::StatusCode;
use http::request::Parts;
use uuid::Uuid;

pub const X_COURIER_USER_ID: &str = "x-courier-user-id";
pub const X_COURIER_USER_ROLE: &str = "x-courier-user-role";

/// Minimum role allowed to drive dispatch, reconcile and inspection endpoints.
pub const OPERATOR_ROLE: u8 = 1;

/// Caller identity injected by the gateway via `x-courier-user-id` and `x-courier-user-role`.
///
/// Returns 401 if either header is absent or malformed.
#[derive(Debug, Clone)]
pub struct IdentityHeaders {
    pub user_id: Uuid,
    pub user_role: u8,
}

fn parse_identity(parts: &Parts) -> Result<IdentityHeaders, StatusCode> {
    let user_id = parts
        .headers
        .get(X_COURIER_USER_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<Uuid>().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let user_role = parts
        .headers
        .get(X_COURIER_USER_ROLE)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u8>().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    Ok(IdentityHeaders { user_id, user_role })
}

impl<S> FromRequestParts<S> for IdentityHeaders
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    // Parse synchronously and return a 'static future; `async fn` here trips
    // E0195 against axum-core's `impl Future + Send` signature.
    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let identity = parse_identity(parts);
        async move { identity }
    }
}

/// An identity whose role is at least [`OPERATOR_ROLE`].
///
/// Rejects with 401 when identity headers are missing and 403 when the role is too low.
#[derive(Debug, Clone)]
pub struct Operator(pub IdentityHeaders);

impl<S> FromRequestParts<S> for Operator
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let operator = parse_identity(parts).and_then(|identity| {
            if identity.user_role >= OPERATOR_ROLE {
                Ok(Operator(identity))
            } else {
                Err(StatusCode::FORBIDDEN)
            }
        });
        async move { operator }
    }
}
