//! OAuth2 mutual-TLS client authentication (RFC 8705).
//!
//! An attempt runs through a fixed pipeline, each stage producing the type
//! the next one consumes:
//!
//! ```text
//! PeerCertificates ──extract──▶ CertificateChain
//!        ──select──▶ ClientAuthenticationMethod
//!        ──bind────▶ BoundClient          (registry lookup, bounded)
//!        ──validate▶ ValidatedClient      (pin / chain + subject / revocation)
//!        ──assemble▶ ClientAuthentication (x5t#S256 thumbprint)
//! ```
//!
//! No chain means mutual TLS does not apply and the caller should try its
//! other authentication methods. Once a chain is present the method is fixed
//! by the chain length and there is no fallback.

pub mod audit;
pub mod binder;
pub mod chain;
pub mod dn;
pub mod error;
pub mod method;
pub mod params;
pub mod registry;
pub mod result;
pub mod revocation;
pub mod thumbprint;
pub mod trust_store;
pub mod validator;

use std::sync::Arc;
use std::time::Duration;

use axum::http::Extensions;
use tracing::{debug, instrument};

pub use chain::{CertificateChain, PeerCertificates};
pub use dn::{DistinguishedName, DnPattern};
pub use error::{AuthenticationError, ErrorCode, FailureReason, OAuth2Error, RequestFault};
pub use method::ClientAuthenticationMethod;
pub use params::{AdditionalParameters, ParameterValue, RequestParameters};
pub use registry::{
    ClientRegistry, ClientTrust, InMemoryClientRegistry, RegisteredClient, SubjectMatcher,
};
pub use result::ClientAuthentication;
pub use revocation::{RevocationChecker, RevocationPolicy, RevocationStatus};
pub use thumbprint::{CertificateConfirmation, x5t_s256};
pub use trust_store::{StaticTrustStore, TrustAnchors, TrustStore};

use self::audit::AuditEvent;
use self::revocation::OnlineRevocation;
use self::validator::CertificateValidator;
use crate::config::{Config, TimeoutConfig};

/// Input of one authentication attempt.
#[derive(Debug, Clone, Default)]
pub struct AuthenticationRequest {
    parameters: RequestParameters,
    chain: Option<CertificateChain>,
}

impl AuthenticationRequest {
    /// Request with explicit parameters and peer chain.
    #[must_use]
    pub fn new(parameters: RequestParameters, chain: Option<CertificateChain>) -> Self {
        Self { parameters, chain }
    }

    /// Request whose chain comes from the connection layer's
    /// [`PeerCertificates`] extension.
    #[must_use]
    pub fn from_extensions(parameters: RequestParameters, extensions: &Extensions) -> Self {
        Self::new(parameters, chain::extract(extensions))
    }

    /// Request parameters.
    #[must_use]
    pub fn parameters(&self) -> &RequestParameters {
        &self.parameters
    }

    /// Peer chain, if the client presented one.
    #[must_use]
    pub fn chain(&self) -> Option<&CertificateChain> {
        self.chain.as_ref()
    }
}

/// Result of an attempt that did not fail.
#[derive(Debug, Clone)]
pub enum AuthenticationOutcome {
    /// No client certificate; another authentication method should run.
    NotApplicable,
    /// The client is authenticated.
    Authenticated(Box<ClientAuthentication>),
}

impl AuthenticationOutcome {
    /// The authentication, if any.
    #[must_use]
    pub fn into_authenticated(self) -> Option<ClientAuthentication> {
        match self {
            Self::Authenticated(auth) => Some(*auth),
            Self::NotApplicable => None,
        }
    }

    /// `true` for [`AuthenticationOutcome::Authenticated`].
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

/// The client certificate authentication engine.
///
/// Holds no per-request state; share it behind an `Arc` across tasks.
#[derive(Clone)]
pub struct ClientCertificateAuthenticator {
    registry: Arc<dyn ClientRegistry>,
    validator: CertificateValidator,
    timeouts: TimeoutConfig,
}

impl std::fmt::Debug for ClientCertificateAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCertificateAuthenticator")
            .field("validator", &self.validator)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl ClientCertificateAuthenticator {
    /// Engine over a registry and trust store.
    #[must_use]
    pub fn new(
        registry: Arc<dyn ClientRegistry>,
        trust_store: Arc<dyn TrustStore>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            registry,
            validator: CertificateValidator::new(trust_store, timeouts.trust_store),
            timeouts,
        }
    }

    /// Build the engine from configuration: in-memory registry from the
    /// `clients` section, trust anchors and CRLs from `trust` and
    /// `revocation`.
    ///
    /// # Errors
    ///
    /// Returns an error when a client entry is invalid or PEM material cannot
    /// be loaded.
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let registry = InMemoryClientRegistry::from_config(&config.clients)?;
        let trust_store = StaticTrustStore::from_config(config)?;
        Ok(Self::new(
            Arc::new(registry),
            Arc::new(trust_store),
            config.timeouts.clone(),
        ))
    }

    /// Consult `checker` after chain verification, applying `policy` when it
    /// cannot give an answer. Bounded by the revocation timeout.
    #[must_use]
    pub fn with_revocation_checker(
        mut self,
        checker: Arc<dyn RevocationChecker>,
        policy: RevocationPolicy,
    ) -> Self {
        let online = OnlineRevocation::new(checker, policy, self.timeouts.revocation);
        self.validator = self.validator.with_revocation(online);
        self
    }

    /// Authenticate the client behind `request`.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` when `client_id` is missing, empty or repeated.
    /// - `InvalidClient` for an unknown client, a method mismatch, any
    ///   certificate validation failure, or a lookup timeout.
    /// - `ServerError` when the registry or trust store fails.
    #[instrument(skip_all, fields(client_id, method))]
    pub async fn authenticate(
        &self,
        request: &AuthenticationRequest,
    ) -> Result<AuthenticationOutcome, AuthenticationError> {
        let Some(chain) = request.chain() else {
            debug!("No client certificate, mTLS not applicable");
            return Ok(AuthenticationOutcome::NotApplicable);
        };
        let method = ClientAuthenticationMethod::select(chain);
        tracing::Span::current().record("method", method.as_str());

        let client_id = match request.parameters().client_id() {
            Ok(client_id) => client_id,
            Err(fault) => {
                let err = AuthenticationError::from(fault);
                audit::emit(&AuditEvent::failed(&err, None, Some(method)));
                return Err(err);
            }
        };
        tracing::Span::current().record("client_id", client_id);

        match self.attempt(request.parameters(), chain, client_id, method).await {
            Ok(auth) => {
                audit::emit(&AuditEvent::authenticated(&auth));
                Ok(AuthenticationOutcome::Authenticated(Box::new(auth)))
            }
            Err(err) => {
                audit::emit(&AuditEvent::failed(&err, Some(client_id), Some(method)));
                Err(err)
            }
        }
    }

    async fn attempt(
        &self,
        parameters: &RequestParameters,
        chain: &CertificateChain,
        client_id: &str,
        method: ClientAuthenticationMethod,
    ) -> Result<ClientAuthentication, AuthenticationError> {
        let additional = params::authorization_code_parameters(parameters, &[params::CLIENT_ID]);
        let bound = binder::bind(
            self.registry.as_ref(),
            client_id,
            method,
            self.registry_timeout(),
        )
        .await?;
        let validated = self.validator.validate(bound, chain).await?;
        Ok(result::assemble(validated, additional))
    }

    fn registry_timeout(&self) -> Duration {
        self.timeouts.registry
    }
}

#[cfg(test)]
mod tests {
    use rcgen::{CertificateParams, KeyPair};
    use rustls::pki_types::CertificateDer;

    use super::*;

    fn self_signed() -> CertificateDer<'static> {
        let key = KeyPair::generate().unwrap();
        CertificateParams::new(vec!["device.local".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap()
            .der()
            .clone()
    }

    fn engine_with_device(pin: CertificateDer<'static>) -> ClientCertificateAuthenticator {
        let registry = InMemoryClientRegistry::new();
        registry.register(RegisteredClient {
            client_id: "device".into(),
            trust: ClientTrust::PinnedCertificates(vec![pin]),
            certificate_bound_access_tokens: true,
        });
        ClientCertificateAuthenticator::new(
            Arc::new(registry),
            Arc::new(StaticTrustStore::new(TrustAnchors::empty())),
            TimeoutConfig::default(),
        )
    }

    fn request(pairs: &[(&str, &str)], chain: Option<CertificateChain>) -> AuthenticationRequest {
        AuthenticationRequest::new(RequestParameters::from_pairs(pairs.iter().copied()), chain)
    }

    #[tokio::test]
    async fn no_chain_is_not_applicable() {
        let engine = engine_with_device(self_signed());
        let outcome = engine
            .authenticate(&request(&[("client_id", "device")], None))
            .await
            .unwrap();
        assert!(!outcome.is_authenticated());
        assert!(outcome.into_authenticated().is_none());
    }

    #[tokio::test]
    async fn no_chain_wins_over_missing_client_id() {
        let engine = engine_with_device(self_signed());
        let outcome = engine.authenticate(&request(&[], None)).await;
        assert!(matches!(outcome, Ok(AuthenticationOutcome::NotApplicable)));
    }

    #[tokio::test]
    async fn pinned_device_authenticates_with_thumbprint() {
        // GIVEN: a device pinned to its self-signed certificate
        let pin = self_signed();
        let engine = engine_with_device(pin.clone());

        // WHEN: it presents exactly that certificate
        let chain = CertificateChain::new(vec![pin.clone()]).unwrap();
        let auth = engine
            .authenticate(&request(&[("client_id", "device")], Some(chain)))
            .await
            .unwrap()
            .into_authenticated()
            .unwrap();

        // THEN: the result is bound to the certificate
        assert_eq!(auth.client_id(), "device");
        assert_eq!(auth.method(), ClientAuthenticationMethod::SelfSignedTlsClientAuth);
        assert_eq!(auth.thumbprint(), x5t_s256(&pin));
        assert_eq!(
            auth.cnf_claim(),
            Some(serde_json::json!({ "x5t#S256": x5t_s256(&pin) }))
        );
        assert!(auth.additional_parameters().is_empty());
    }

    #[tokio::test]
    async fn authorization_code_parameters_are_carried_through() {
        let pin = self_signed();
        let engine = engine_with_device(pin.clone());
        let chain = CertificateChain::new(vec![pin]).unwrap();
        let req = request(
            &[
                ("client_id", "device"),
                ("grant_type", "authorization_code"),
                ("code", "abc123"),
                ("redirect_uri", "https://device.example/cb"),
            ],
            Some(chain),
        );

        let auth = engine
            .authenticate(&req)
            .await
            .unwrap()
            .into_authenticated()
            .unwrap();
        let params = auth.additional_parameters();
        assert_eq!(params.get("code"), Some(&ParameterValue::Single("abc123".into())));
        assert!(params.contains_key("redirect_uri"));
        assert!(!params.contains_key("client_id"));
    }

    #[tokio::test]
    async fn duplicate_client_id_is_invalid_request_before_certificate_work() {
        let engine = engine_with_device(self_signed());
        let chain = CertificateChain::new(vec![self_signed()]).unwrap();
        let err = engine
            .authenticate(&request(
                &[("client_id", "device"), ("client_id", "other")],
                Some(chain),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn request_built_from_extensions_uses_peer_certificates() {
        let pin = self_signed();
        let engine = engine_with_device(pin.clone());
        let mut extensions = Extensions::new();
        extensions.insert(PeerCertificates::from(vec![pin]));

        let req = AuthenticationRequest::from_extensions(
            RequestParameters::from_pairs([("client_id", "device")]),
            &extensions,
        );
        assert!(engine.authenticate(&req).await.unwrap().is_authenticated());
    }
}
