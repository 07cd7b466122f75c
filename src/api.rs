// kyc-realtime-kit/src/api.rs

//! The portal's REST boundary.
//!
//! Every endpoint answers with the same envelope:
//!
//! ```json
//! { "success": true, "message": "optional text", "data": { ... } }
//! ```
//!
//! [`KycApi`] is the seam the [`Portal`](crate::portal::Portal) talks to.
//! [`RestClient`] implements it over `reqwest` when the `rest` feature is
//! enabled; tests substitute their own implementation.

use crate::auth::Credential;
use crate::role::Role;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[cfg(feature = "rest")]
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("not authorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("response carried no data")]
    MissingData,
}

impl ApiError {
    /// The server-provided message, if the server produced one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized { message, .. } | ApiError::Rejected { message, .. } => {
                Some(message)
            }
            _ => None,
        }
    }
}

/// The `{ success, message, data }` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Unwraps the payload of a response received with HTTP `status`.
    pub fn into_data(self, status: u16) -> Result<T, ApiError> {
        if !self.success || !(200..300).contains(&status) {
            let message = self
                .message
                .unwrap_or_else(|| format!("request failed with status {status}"));
            return Err(match status {
                401 | 403 => ApiError::Unauthorized { status, message },
                _ => ApiError::Rejected { status, message },
            });
        }
        self.data.ok_or(ApiError::MissingData)
    }
}

/// What the login endpoint decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// A one-time password was sent; finish with `verify_otp`.
    OtpRequired { email: String },
    Authenticated(Credential),
}

/// `data` of the login and OTP verification responses.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    #[serde(default)]
    pub requires_otp: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

impl AuthPayload {
    pub fn into_outcome(self, email: &str) -> Result<LoginOutcome, ApiError> {
        if self.requires_otp {
            return Ok(LoginOutcome::OtpRequired {
                email: email.to_owned(),
            });
        }
        match (self.token, self.role) {
            (Some(token), Some(role)) => Ok(LoginOutcome::Authenticated(Credential::new(token, role))),
            _ => Err(ApiError::MissingData),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    NotSubmitted,
    Pending,
    UnderReview,
    Verified,
    Rejected,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KycDocument {
    pub id: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub file_name: String,
    pub status: DocumentStatus,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

/// The signed-in client's own KYC state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KycStatus {
    pub status: SubmissionStatus,
    #[serde(default)]
    pub documents: Vec<KycDocument>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// One company's submission as reviewers see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub company_name: String,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub documents: Vec<KycDocument>,
    #[serde(default)]
    pub submitted_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripartyOverview {
    #[serde(default)]
    pub submissions: Vec<Submission>,
}

/// A reviewer's verdict on one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ReviewDecision {
    Approved,
    Rejected { reason: String },
}

/// A file the client uploads for review.
#[derive(Clone, PartialEq, Eq)]
pub struct DocumentUpload {
    pub doc_type: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for DocumentUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentUpload")
            .field("doc_type", &self.doc_type)
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// The KYC endpoints the portal consumes.
#[async_trait]
pub trait KycApi: Send + Sync + 'static {
    async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, ApiError>;
    async fn verify_otp(&self, email: &str, otp: &str) -> Result<Credential, ApiError>;

    async fn client_status(&self, token: &str) -> Result<KycStatus, ApiError>;
    async fn admin_submissions(&self, token: &str) -> Result<Vec<Submission>, ApiError>;
    async fn admin_submission(&self, token: &str, id: &str) -> Result<Submission, ApiError>;
    async fn triparty_overview(&self, token: &str) -> Result<TripartyOverview, ApiError>;

    async fn upload_document(&self, token: &str, upload: DocumentUpload) -> Result<KycDocument, ApiError>;
    async fn review_document(
        &self,
        token: &str,
        document_id: &str,
        decision: &ReviewDecision,
    ) -> Result<KycDocument, ApiError>;
}

#[cfg(feature = "rest")]
pub use rest::RestClient;

#[cfg(feature = "rest")]
mod rest {
    use super::*;
    use reqwest::{RequestBuilder, multipart};
    use serde::de::DeserializeOwned;
    use serde_json::json;
    use tracing::{debug, instrument, warn};

    /// [`KycApi`] over HTTP.
    #[derive(Debug, Clone)]
    pub struct RestClient {
        http: reqwest::Client,
        base_url: String,
    }

    impl RestClient {
        pub fn new(base_url: impl Into<String>) -> Self {
            Self::with_client(reqwest::Client::new(), base_url)
        }

        pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
            let base_url = base_url.into().trim_end_matches('/').to_owned();
            Self { http, base_url }
        }

        pub fn base_url(&self) -> &str {
            &self.base_url
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base_url, path)
        }

        async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
            let response = request.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            debug!(status = status.as_u16(), len = body.len(), "API response received.");

            match serde_json::from_slice::<ApiResponse<T>>(&body) {
                Ok(envelope) => envelope.into_data(status.as_u16()),
                Err(e) if status.is_success() => Err(e.into()),
                Err(_) => {
                    warn!(status = status.as_u16(), "API error without a response envelope.");
                    let message = status
                        .canonical_reason()
                        .unwrap_or("unexpected response")
                        .to_owned();
                    ApiResponse::<T> {
                        success: false,
                        message: Some(message),
                        data: None,
                    }
                    .into_data(status.as_u16())
                }
            }
        }
    }

    #[async_trait]
    impl KycApi for RestClient {
        #[instrument(skip(self, password))]
        async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, ApiError> {
            let request = self
                .http
                .post(self.url("/auth/login"))
                .json(&json!({ "email": email, "password": password }));
            self.send::<AuthPayload>(request).await?.into_outcome(email)
        }

        #[instrument(skip(self, otp))]
        async fn verify_otp(&self, email: &str, otp: &str) -> Result<Credential, ApiError> {
            let request = self
                .http
                .post(self.url("/auth/verify-otp"))
                .json(&json!({ "email": email, "otp": otp }));
            match self.send::<AuthPayload>(request).await?.into_outcome(email)? {
                LoginOutcome::Authenticated(credential) => Ok(credential),
                LoginOutcome::OtpRequired { .. } => Err(ApiError::MissingData),
            }
        }

        #[instrument(skip_all)]
        async fn client_status(&self, token: &str) -> Result<KycStatus, ApiError> {
            self.send(self.http.get(self.url("/kyc/status")).bearer_auth(token))
                .await
        }

        #[instrument(skip_all)]
        async fn admin_submissions(&self, token: &str) -> Result<Vec<Submission>, ApiError> {
            self.send(self.http.get(self.url("/kyc/admin/submissions")).bearer_auth(token))
                .await
        }

        #[instrument(skip(self, token))]
        async fn admin_submission(&self, token: &str, id: &str) -> Result<Submission, ApiError> {
            let url = self.url(&format!("/kyc/admin/submissions/{id}"));
            self.send(self.http.get(url).bearer_auth(token)).await
        }

        #[instrument(skip_all)]
        async fn triparty_overview(&self, token: &str) -> Result<TripartyOverview, ApiError> {
            self.send(self.http.get(self.url("/kyc/triparty/overview")).bearer_auth(token))
                .await
        }

        #[instrument(skip(self, token, upload), fields(doc_type = %upload.doc_type))]
        async fn upload_document(&self, token: &str, upload: DocumentUpload) -> Result<KycDocument, ApiError> {
            let mut part = multipart::Part::bytes(upload.bytes).file_name(upload.file_name);
            if let Some(content_type) = upload.content_type.as_deref() {
                part = part.mime_str(content_type)?;
            }
            let form = multipart::Form::new()
                .text("type", upload.doc_type)
                .part("file", part);

            let request = self
                .http
                .post(self.url("/kyc/documents"))
                .bearer_auth(token)
                .multipart(form);
            self.send(request).await
        }

        #[instrument(skip(self, token))]
        async fn review_document(
            &self,
            token: &str,
            document_id: &str,
            decision: &ReviewDecision,
        ) -> Result<KycDocument, ApiError> {
            let url = self.url(&format!("/kyc/admin/documents/{document_id}/status"));
            self.send(self.http.put(url).bearer_auth(token).json(decision))
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failed_envelope_carries_the_server_message() {
        let envelope: ApiResponse<KycStatus> =
            serde_json::from_value(json!({ "success": false, "message": "Document too large" })).unwrap();

        let err = envelope.into_data(413).unwrap_err();
        assert!(matches!(err, ApiError::Rejected { status: 413, .. }));
        assert_eq!(err.server_message(), Some("Document too large"));
    }

    #[test]
    fn success_flag_false_is_an_error_even_with_http_200() {
        let envelope: ApiResponse<Vec<Submission>> =
            serde_json::from_value(json!({ "success": false, "data": [] })).unwrap();

        assert!(matches!(
            envelope.into_data(200),
            Err(ApiError::Rejected { status: 200, .. })
        ));
    }

    #[test]
    fn expired_token_maps_to_unauthorized() {
        let envelope: ApiResponse<KycStatus> =
            serde_json::from_value(json!({ "success": false, "message": "jwt expired" })).unwrap();

        assert!(matches!(envelope.into_data(401), Err(ApiError::Unauthorized { .. })));
    }

    #[test]
    fn login_payload_distinguishes_otp_from_token() {
        let otp: AuthPayload = serde_json::from_value(json!({ "requiresOtp": true })).unwrap();
        assert_eq!(
            otp.into_outcome("a@b.co").unwrap(),
            LoginOutcome::OtpRequired { email: "a@b.co".into() }
        );

        let done: AuthPayload =
            serde_json::from_value(json!({ "token": "t", "role": "admin" })).unwrap();
        assert_eq!(
            done.into_outcome("a@b.co").unwrap(),
            LoginOutcome::Authenticated(Credential::new("t", Role::Admin))
        );

        let partial: AuthPayload = serde_json::from_value(json!({ "token": "t" })).unwrap();
        assert!(matches!(partial.into_outcome("a@b.co"), Err(ApiError::MissingData)));
    }

    #[test]
    fn review_decision_wire_shape() {
        assert_eq!(
            serde_json::to_value(ReviewDecision::Approved).unwrap(),
            json!({ "status": "approved" })
        );
        assert_eq!(
            serde_json::to_value(ReviewDecision::Rejected { reason: "blurry".into() }).unwrap(),
            json!({ "status": "rejected", "reason": "blurry" })
        );
    }

    #[test]
    fn unknown_submission_status_does_not_fail_decoding() {
        let submission: Submission = serde_json::from_value(json!({
            "id": "co1",
            "companyName": "Acme",
            "status": "escalated",
        }))
        .unwrap();
        assert_eq!(submission.status, SubmissionStatus::Unknown);
        assert!(submission.documents.is_empty());
    }
}
