//! Trust anchors for `tls_client_auth` chain verification.
//!
//! Chain-of-trust checks are delegated to the rustls `WebPkiClientVerifier`:
//! signatures, validity windows, basic constraints, `clientAuth` extended key
//! usage when present, and CRL revocation when CRLs are configured. The
//! verifier is built once per [`TrustAnchors`] and reused for every request.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, CertificateRevocationListDer, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::server::danger::ClientCertVerifier;
use thiserror::Error;
use tracing::{debug, info};

use super::chain::CertificateChain;
use super::error::FailureReason;
use super::revocation::RevocationPolicy;
use crate::config::Config;
use crate::tls::{load_certs, load_crls};
use crate::{Error, Result};

/// CRL-based revocation settings for the chain verifier.
#[derive(Debug, Clone)]
pub struct CrlRevocation {
    /// Revocation lists, DER.
    pub crls: Vec<CertificateRevocationListDer<'static>>,
    /// Behaviour when no CRL covers a certificate.
    pub policy: RevocationPolicy,
    /// Check only the leaf, not intermediates.
    pub end_entity_only: bool,
}

/// A prepared set of trust anchors.
pub struct TrustAnchors {
    verifier: Option<Arc<dyn ClientCertVerifier>>,
    anchor_count: usize,
}

impl std::fmt::Debug for TrustAnchors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustAnchors")
            .field("anchor_count", &self.anchor_count)
            .finish_non_exhaustive()
    }
}

impl TrustAnchors {
    /// Anchors that trust nothing. Every PKI chain fails against them.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            verifier: None,
            anchor_count: 0,
        }
    }

    /// Build anchors from CA certificates and optional CRLs.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when a CA certificate is not a usable trust
    /// anchor, a CRL cannot be parsed by the verifier, or `fail_closed`
    /// revocation is requested without any CRL.
    pub fn new(
        ca_certificates: Vec<CertificateDer<'static>>,
        revocation: Option<CrlRevocation>,
    ) -> Result<Self> {
        if ca_certificates.is_empty() {
            return Ok(Self::empty());
        }

        let mut roots = RootCertStore::empty();
        for cert in ca_certificates {
            roots
                .add(cert)
                .map_err(|e| Error::Config(format!("invalid trust anchor: {e}")))?;
        }
        let anchor_count = roots.len();

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let mut builder = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
        if let Some(rev) = revocation {
            // The verifier skips revocation entirely without CRLs.
            if rev.crls.is_empty() && rev.policy == RevocationPolicy::FailClosed {
                return Err(Error::Config(
                    "fail_closed CRL revocation needs at least one CRL".to_string(),
                ));
            }
            builder = builder.with_crls(rev.crls);
            if rev.end_entity_only {
                builder = builder.only_check_end_entity_revocation();
            }
            if rev.policy == RevocationPolicy::FailOpen {
                builder = builder.allow_unknown_revocation_status();
            }
        }
        let verifier: Arc<dyn ClientCertVerifier> = builder
            .build()
            .map_err(|e| Error::Config(format!("cannot build chain verifier: {e}")))?;

        Ok(Self {
            verifier: Some(verifier),
            anchor_count,
        })
    }

    /// Number of trust anchors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.anchor_count
    }

    /// `true` when no anchor is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.anchor_count == 0
    }

    /// Verify a presented chain at `now`.
    ///
    /// # Errors
    ///
    /// Returns the failure reason when the chain does not verify.
    pub fn verify_chain(
        &self,
        chain: &CertificateChain,
        now: UnixTime,
    ) -> std::result::Result<(), FailureReason> {
        let Some(ref verifier) = self.verifier else {
            return Err(FailureReason::UntrustedChain(
                "no trust anchors configured".to_string(),
            ));
        };
        verifier
            .verify_client_cert(chain.leaf(), chain.intermediates(), now)
            .map(|_| ())
            .map_err(map_verifier_error)
    }
}

/// Current time in the form the verifier expects.
#[must_use]
pub fn unix_now() -> UnixTime {
    UnixTime::since_unix_epoch(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default(),
    )
}

fn map_verifier_error(err: rustls::Error) -> FailureReason {
    use rustls::CertificateError as E;

    match err {
        rustls::Error::InvalidCertificate(cert_err) => match cert_err {
            E::Expired | E::ExpiredContext { .. } => FailureReason::Expired,
            E::NotValidYet | E::NotValidYetContext { .. } => FailureReason::NotYetValid,
            E::Revoked => FailureReason::Revoked,
            E::UnknownRevocationStatus => FailureReason::RevocationUnavailable(
                "no CRL covers the certificate".to_string(),
            ),
            E::BadEncoding => FailureReason::MalformedCertificate("bad DER encoding".to_string()),
            other => FailureReason::UntrustedChain(format!("{other:?}")),
        },
        other => FailureReason::UntrustedChain(other.to_string()),
    }
}

/// Trust store lookup failure not attributable to the client.
#[derive(Debug, Error)]
pub enum TrustStoreError {
    /// Backend could not be reached.
    #[error("trust store unavailable: {0}")]
    Unavailable(String),
}

/// Source of trust anchors for PKI-mode validation.
#[async_trait::async_trait]
pub trait TrustStore: Send + Sync + 'static {
    /// Current trust anchors.
    async fn trust_anchors(&self) -> std::result::Result<Arc<TrustAnchors>, TrustStoreError>;
}

/// Trust store holding anchors loaded from PEM files.
///
/// Anchors can be swapped at runtime (CA rotation); in-flight attempts keep
/// the `Arc` they already obtained.
#[derive(Debug)]
pub struct StaticTrustStore {
    anchors: RwLock<Arc<TrustAnchors>>,
}

impl StaticTrustStore {
    /// Wrap prepared anchors.
    #[must_use]
    pub fn new(anchors: TrustAnchors) -> Self {
        Self {
            anchors: RwLock::new(Arc::new(anchors)),
        }
    }

    /// Load CA bundles and CRLs named in the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when a PEM file cannot be read or holds no usable
    /// material.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut ca_certificates = Vec::new();
        for path in &config.trust.ca_certificates {
            let certs = load_certs(path)?;
            debug!(path = %path, count = certs.len(), "Loaded trust anchors");
            ca_certificates.extend(certs);
        }

        let revocation = match config.revocation {
            Some(ref rev) => {
                let mut crls = Vec::new();
                for path in &rev.crls {
                    crls.extend(load_crls(path)?);
                }
                Some(CrlRevocation {
                    crls,
                    policy: rev.policy,
                    end_entity_only: rev.only_end_entity,
                })
            }
            None => None,
        };

        let anchors = TrustAnchors::new(ca_certificates, revocation)?;
        info!(anchors = anchors.len(), "Trust store ready");
        Ok(Self::new(anchors))
    }

    /// Replace the anchors.
    pub fn replace(&self, anchors: TrustAnchors) {
        *self.anchors.write() = Arc::new(anchors);
    }
}

#[async_trait::async_trait]
impl TrustStore for StaticTrustStore {
    async fn trust_anchors(&self) -> std::result::Result<Arc<TrustAnchors>, TrustStoreError> {
        Ok(Arc::clone(&self.anchors.read()))
    }
}
