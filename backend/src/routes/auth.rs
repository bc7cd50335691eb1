use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use tracing::error;

use crate::models::identity::VerifiedIdentity;
use crate::responses::JsonResponse;
use crate::services::identity::IdentityError;
use crate::state::AppState;

/// The verified caller of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub identity: VerifiedIdentity,
}

impl AuthSession {
    pub fn is_privileged(&self) -> bool {
        self.identity.is_admin()
    }
}

impl FromRequestParts<AppState> for AuthSession {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    JsonResponse::unauthorized("Missing bearer token").into_response()
                })?;

        match state.identity.verify(bearer.token()).await {
            Ok(identity) => Ok(AuthSession { identity }),
            Err(IdentityError::InvalidToken) => {
                Err(JsonResponse::unauthorized("Invalid or expired token").into_response())
            }
            Err(err) => {
                error!(?err, path = %parts.uri.path(), "identity verification failed");
                Err(JsonResponse::error_with_code(
                    StatusCode::BAD_GATEWAY,
                    "Identity service unavailable",
                    "integration",
                )
                .into_response())
            }
        }
    }
}
