use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::config::IdentitySettings;
use crate::models::identity::VerifiedIdentity;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("identity service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("identity service responded with status {status}: {message}")]
    UnexpectedStatus { status: StatusCode, message: String },
    #[error("identity service returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Resolves a bearer token to the caller it belongs to. Identity is owned by an
/// external service; this crate never issues or stores credentials.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdentityError>;
}

pub struct HttpIdentityVerifier {
    client: Client,
    base_url: String,
}

impl HttpIdentityVerifier {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Builds its own client so a stalled identity service cannot hold a request open.
    pub fn from_settings(settings: &IdentitySettings) -> Result<Self, IdentityError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self::new(client, settings.base_url.clone()))
    }

    fn verify_url(&self) -> String {
        format!("{}/verify", self.base_url.trim_end_matches('/'))
    }
}

fn extract_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
    }

    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdentityError> {
        let response = self
            .client
            .get(self.verify_url())
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(IdentityError::InvalidToken);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::UnexpectedStatus {
                status,
                message: extract_error_message(&body),
            });
        }

        response
            .json::<VerifiedIdentity>()
            .await
            .map_err(|err| IdentityError::InvalidResponse(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::identity::UserRole;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn verify_sends_bearer_and_parses_identity() {
        let server = httpmock::MockServer::start();
        let user_id = uuid::Uuid::new_v4();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/verify")
                .header("authorization", "Bearer good-token");
            then.status(200)
                .header("content-type", "application/json")
                .body(
                    json!({
                        "user_id": user_id,
                        "email": "collector@example.test",
                        "name": "Ada",
                        "role": "admin"
                    })
                    .to_string(),
                );
        });

        let verifier = HttpIdentityVerifier::new(Client::new(), server.url("/"));
        let identity = verifier.verify("good-token").await.expect("identity");

        mock.assert();
        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.role, UserRole::Admin);
        assert!(identity.is_admin());
    }

    #[tokio::test]
    async fn unauthorized_maps_to_invalid_token() {
        let server = httpmock::MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/verify");
            then.status(401);
        });

        let verifier = HttpIdentityVerifier::new(Client::new(), server.url(""));
        let result = verifier.verify("expired").await;
        assert!(matches!(result, Err(IdentityError::InvalidToken)));
    }

    #[tokio::test]
    async fn server_error_surfaces_message() {
        let server = httpmock::MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/verify");
            then.status(503)
                .header("content-type", "application/json")
                .body(json!({ "message": "maintenance" }).to_string());
        });

        let verifier = HttpIdentityVerifier::new(Client::new(), server.url(""));
        match verifier.verify("token").await {
            Err(IdentityError::UnexpectedStatus { status, message }) => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(message, "maintenance");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_identity_service_times_out() {
        let server = httpmock::MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/verify");
            then.status(200).delay(Duration::from_millis(500));
        });

        let verifier = HttpIdentityVerifier::from_settings(&IdentitySettings {
            base_url: server.url(""),
            request_timeout: Duration::from_millis(50),
        })
        .expect("client builds");
        match verifier.verify("token").await {
            Err(IdentityError::Http(err)) => assert!(err.is_timeout()),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
