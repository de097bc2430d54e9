//! Authentication errors.
//!
//! An [`AuthenticationError`] carries two things: the OAuth2 error code that
//! the client may see, and the server-side reason that only goes to logs and
//! audit events. `Display` and the rendered response only ever expose the
//! code.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::method::ClientAuthenticationMethod;

/// Why a request was malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestFault {
    /// No `client_id` parameter.
    #[error("client_id parameter is missing")]
    MissingClientId,
    /// `client_id` present but blank.
    #[error("client_id parameter is empty")]
    EmptyClientId,
    /// `client_id` sent more than once.
    #[error("client_id parameter is repeated")]
    DuplicateClientId,
}

/// Attempt stage that a timeout interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStage {
    /// Client registry lookup.
    Registry,
    /// Trust anchor lookup.
    TrustStore,
    /// Online revocation check.
    Revocation,
}

impl std::fmt::Display for LookupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Registry => "registry",
            Self::TrustStore => "trust store",
            Self::Revocation => "revocation",
        })
    }
}

/// Server-side reason behind an `invalid_client` decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    /// No registration for the presented `client_id`.
    #[error("client is not registered")]
    UnknownClient,
    /// The registration uses the other mTLS method.
    #[error("client is registered for {registered}, presented chain implies {presented}")]
    MethodMismatch {
        /// Method configured for the client.
        registered: ClientAuthenticationMethod,
        /// Method implied by the chain length.
        presented: ClientAuthenticationMethod,
    },
    /// Self-signed leaf is not byte-identical to a pinned certificate.
    #[error("certificate does not match any pinned certificate")]
    PinnedCertificateMismatch,
    /// A certificate in the chain is past `notAfter`.
    #[error("certificate has expired")]
    Expired,
    /// A certificate in the chain is before `notBefore`.
    #[error("certificate is not yet valid")]
    NotYetValid,
    /// A certificate in the chain is revoked.
    #[error("certificate has been revoked")]
    Revoked,
    /// Chain does not verify to a trust anchor.
    #[error("certificate chain is not trusted: {0}")]
    UntrustedChain(String),
    /// Certificate bytes could not be parsed.
    #[error("certificate is malformed: {0}")]
    MalformedCertificate(String),
    /// Leaf subject or SAN does not match the registration.
    #[error("certificate subject does not match registration: {0}")]
    SubjectMismatch(String),
    /// Revocation status could not be established under a fail-closed policy.
    #[error("revocation status unavailable: {0}")]
    RevocationUnavailable(String),
    /// A bounded lookup did not finish in time.
    #[error("{0} lookup timed out")]
    Timeout(LookupStage),
}

/// OAuth2 error codes produced by the engine (RFC 6749 §5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed request.
    InvalidRequest,
    /// Client authentication failed.
    InvalidClient,
    /// Infrastructure fault.
    ServerError,
}

impl ErrorCode {
    /// Wire value of the code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::ServerError => "server_error",
        }
    }

    /// HTTP status the error handling layer should answer with.
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::InvalidClient => StatusCode::UNAUTHORIZED,
            Self::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Failure of a client certificate authentication attempt.
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// `client_id` missing, blank or repeated.
    #[error("invalid_request")]
    InvalidRequest(RequestFault),
    /// The client could not be authenticated.
    #[error("invalid_client")]
    InvalidClient(FailureReason),
    /// Registry or trust store unavailable.
    #[error("server_error")]
    ServerError(String),
}

impl AuthenticationError {
    /// OAuth2 error code for this failure.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::InvalidClient(_) => ErrorCode::InvalidClient,
            Self::ServerError(_) => ErrorCode::ServerError,
        }
    }

    /// Detailed reason for logs and audit events. Never send this to clients.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::InvalidRequest(fault) => fault.to_string(),
            Self::InvalidClient(reason) => reason.to_string(),
            Self::ServerError(msg) => msg.clone(),
        }
    }

    /// The `invalid_client` reason, if this is one.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match self {
            Self::InvalidClient(reason) => Some(reason),
            _ => None,
        }
    }

    /// Client-facing error body.
    #[must_use]
    pub fn to_oauth2_error(&self) -> OAuth2Error {
        OAuth2Error::new(self.code())
    }
}

impl From<FailureReason> for AuthenticationError {
    fn from(reason: FailureReason) -> Self {
        Self::InvalidClient(reason)
    }
}

impl From<RequestFault> for AuthenticationError {
    fn from(fault: RequestFault) -> Self {
        Self::InvalidRequest(fault)
    }
}

/// RFC 6749 §5.2 error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Error {
    /// Error code.
    pub error: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    /// Link to documentation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

impl OAuth2Error {
    /// Body carrying only the error code.
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self {
            error: code.as_str().to_string(),
            error_description: None,
            error_uri: None,
        }
    }
}

impl IntoResponse for AuthenticationError {
    fn into_response(self) -> Response {
        let code = self.code();
        let mut response = (code.status(), Json(self.to_oauth2_error())).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        response
    }
}
