//! OAuth2 mutual-TLS client authentication (RFC 8705)
//!
//! Authenticates OAuth2 clients at a token, introspection or revocation
//! endpoint from the client certificate presented during the TLS handshake.
//!
//! # Features
//!
//! - **Both RFC 8705 methods**: `tls_client_auth` (CA-issued chain plus
//!   subject DN or SAN) and `self_signed_tls_client_auth` (pinned certificate)
//! - **Chain-length method selection**: no downgrade through client metadata
//! - **Certificate-bound tokens**: `cnf` / `x5t#S256` confirmation
//! - **Enumeration resistance**: unknown clients fail exactly like bad certificates
//! - **Revocation**: CRLs and a pluggable online checker, fail-open or fail-closed
//!
//! # Quick start
//!
//! ```no_run
//! use mtls_client_auth::client_auth::{
//!     AuthenticationOutcome, AuthenticationRequest, ClientCertificateAuthenticator,
//!     RequestParameters,
//! };
//! use mtls_client_auth::config::Config;
//!
//! # async fn run(body: &[u8], extensions: &axum::http::Extensions) -> mtls_client_auth::Result<()> {
//! let config = Config::load(Some("mtls.yaml".as_ref()))?;
//! let engine = ClientCertificateAuthenticator::from_config(&config)?;
//!
//! let request = AuthenticationRequest::from_extensions(
//!     RequestParameters::from_form_urlencoded(body),
//!     extensions,
//! );
//! match engine.authenticate(&request).await {
//!     Ok(AuthenticationOutcome::Authenticated(auth)) => println!("{}", auth.client_id()),
//!     Ok(AuthenticationOutcome::NotApplicable) => { /* try other client auth methods */ }
//!     Err(_e) => { /* respond with _e.into_response() */ }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod client_auth;
pub mod config;
pub mod error;
pub mod tls;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber.with(fmt::layer().with_writer(std::io::stderr)).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("tracing setup failed: {e}")))
}
