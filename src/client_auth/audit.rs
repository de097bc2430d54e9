//! Audit events for client authentication attempts.
//!
//! Every event is emitted via `tracing::info!` with the JSON-serialized event
//! in the `audit` field. Events carry the server-side failure detail that the
//! client never sees.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `client_auth.authenticated` | The presented certificate authenticated the client |
//! | `client_auth.rejected` | `invalid_client` or `server_error` |
//! | `client_auth.invalid_request` | `client_id` missing, empty or repeated |

use serde::Serialize;

use super::error::AuthenticationError;
use super::method::ClientAuthenticationMethod;
use super::result::ClientAuthentication;

/// Structured audit event for one authentication attempt.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"client_auth.authenticated"`).
    pub event: &'static str,
    /// Presented `client_id`, when one could be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Method implied by the chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<ClientAuthenticationMethod>,
    /// Leaf thumbprint of an authenticated client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x5t_s256: Option<String>,
    /// OAuth2 error code returned to the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    /// Server-side reason for the failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    /// Construct a `client_auth.authenticated` event.
    #[must_use]
    pub fn authenticated(auth: &ClientAuthentication) -> Self {
        Self {
            event: "client_auth.authenticated",
            client_id: Some(auth.client_id().to_string()),
            method: Some(auth.method()),
            x5t_s256: Some(auth.thumbprint().to_string()),
            error: None,
            reason: None,
        }
    }

    /// Construct the event for a failed attempt.
    ///
    /// `invalid_request` maps to `client_auth.invalid_request`; everything
    /// else is `client_auth.rejected`.
    #[must_use]
    pub fn failed(
        err: &AuthenticationError,
        client_id: Option<&str>,
        method: Option<ClientAuthenticationMethod>,
    ) -> Self {
        let event = match err {
            AuthenticationError::InvalidRequest(_) => "client_auth.invalid_request",
            AuthenticationError::InvalidClient(_) | AuthenticationError::ServerError(_) => {
                "client_auth.rejected"
            }
        };
        Self {
            event,
            client_id: client_id.map(str::to_string),
            method,
            x5t_s256: None,
            error: Some(err.code().as_str()),
            reason: Some(err.detail()),
        }
    }
}

/// Emit an audit event via `tracing::info!` with structured fields.
///
/// ```text
/// INFO mtls_client_auth::client_auth::audit audit={"event":"client_auth.rejected",...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "client_auth audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
