//! Certificate validation against a client's registered trust material.
//!
//! - `self_signed_tls_client_auth`: the leaf must be byte-identical to one of
//!   the pinned certificates. Compared in constant time; no chain walk.
//! - `tls_client_auth`: the chain must verify to a trust anchor, then the leaf
//!   must satisfy the registered subject DN or SAN, then the optional online
//!   revocation check runs.
//!
//! An unbound client (unknown, or registered for the other method) is run
//! through the same path for its method against decoy material and then
//! rejected.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::CertificateDer;
use subtle::{Choice, ConstantTimeEq};
use tracing::debug;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

use super::binder::BoundClient;
use super::chain::CertificateChain;
use super::dn::DistinguishedName;
use super::error::{AuthenticationError, FailureReason, LookupStage};
use super::method::ClientAuthenticationMethod;
use super::registry::{ClientTrust, RegisteredClient, SubjectMatcher};
use super::revocation::OnlineRevocation;
use super::trust_store::{TrustAnchors, TrustStore, unix_now};

/// A client whose certificate has been accepted.
///
/// Only [`CertificateValidator::validate`] constructs this type.
#[derive(Debug, Clone)]
pub struct ValidatedClient {
    client: Arc<RegisteredClient>,
    method: ClientAuthenticationMethod,
    chain: CertificateChain,
}

impl ValidatedClient {
    /// The authenticated registration.
    #[must_use]
    pub fn client(&self) -> &Arc<RegisteredClient> {
        &self.client
    }

    /// The method that succeeded.
    #[must_use]
    pub fn method(&self) -> ClientAuthenticationMethod {
        self.method
    }

    /// The chain that passed validation.
    #[must_use]
    pub fn chain(&self) -> &CertificateChain {
        &self.chain
    }
}

/// Validates presented chains.
#[derive(Clone)]
pub struct CertificateValidator {
    trust_store: Arc<dyn TrustStore>,
    trust_store_timeout: Duration,
    revocation: Option<OnlineRevocation>,
}

impl std::fmt::Debug for CertificateValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateValidator")
            .field("trust_store_timeout", &self.trust_store_timeout)
            .field("revocation", &self.revocation)
            .finish_non_exhaustive()
    }
}

impl CertificateValidator {
    /// Validator using `trust_store` for PKI anchors.
    #[must_use]
    pub fn new(trust_store: Arc<dyn TrustStore>, trust_store_timeout: Duration) -> Self {
        Self {
            trust_store,
            trust_store_timeout,
            revocation: None,
        }
    }

    /// Consult an online revocation checker after chain verification.
    #[must_use]
    pub fn with_revocation(mut self, revocation: OnlineRevocation) -> Self {
        self.revocation = Some(revocation);
        self
    }

    /// Validate `chain` for a bound client.
    ///
    /// # Errors
    ///
    /// `InvalidClient` with the reason for any rejection, `ServerError` when
    /// the trust store fails.
    pub async fn validate(
        &self,
        bound: BoundClient,
        chain: &CertificateChain,
    ) -> Result<ValidatedClient, AuthenticationError> {
        let Some(client) = bound.registration().cloned() else {
            self.decoy(bound.method(), chain).await?;
            let reason = bound.rejection().unwrap_or(FailureReason::UnknownClient);
            return Err(reason.into());
        };

        match client.trust {
            ClientTrust::PinnedCertificates(ref pins) => {
                if !matches_pinned(chain.leaf(), pins) {
                    return Err(FailureReason::PinnedCertificateMismatch.into());
                }
            }
            ClientTrust::Pki(ref matcher) => {
                let anchors = self.anchors().await?;
                anchors.verify_chain(chain, unix_now())?;
                match_subject(chain.leaf(), matcher)?;
                if let Some(ref revocation) = self.revocation {
                    revocation.enforce(chain).await?;
                }
            }
        }

        debug!(client_id = %client.client_id, method = %bound.method(), "Certificate accepted");
        Ok(ValidatedClient {
            client,
            method: bound.method(),
            chain: chain.clone(),
        })
    }

    async fn anchors(&self) -> Result<Arc<TrustAnchors>, AuthenticationError> {
        tokio::time::timeout(self.trust_store_timeout, self.trust_store.trust_anchors())
            .await
            .map_err(|_| FailureReason::Timeout(LookupStage::TrustStore))?
            .map_err(|e| AuthenticationError::ServerError(e.to_string()))
    }

    /// Perform the validation work of `method` against material that cannot
    /// match, discarding the verdict.
    ///
    /// Trust store failures propagate exactly as on the real PKI path, so an
    /// outage answers the same for registered and unknown clients.
    async fn decoy(
        &self,
        method: ClientAuthenticationMethod,
        chain: &CertificateChain,
    ) -> Result<(), AuthenticationError> {
        match method {
            ClientAuthenticationMethod::SelfSignedTlsClientAuth => {
                let decoy = CertificateDer::from(vec![0u8; chain.leaf().len()]);
                std::hint::black_box(matches_pinned(chain.leaf(), std::slice::from_ref(&decoy)));
            }
            ClientAuthenticationMethod::TlsClientAuth => {
                let anchors = self.anchors().await?;
                let _ = std::hint::black_box(anchors.verify_chain(chain, unix_now()));
            }
        }
        Ok(())
    }
}

/// Constant-time comparison against every pin; no early exit on a match.
fn matches_pinned(leaf: &CertificateDer<'_>, pins: &[CertificateDer<'static>]) -> bool {
    let found = pins.iter().fold(Choice::from(0), |acc, pin| {
        acc | leaf.as_ref().ct_eq(pin.as_ref())
    });
    found.into()
}

fn match_subject(
    leaf: &CertificateDer<'_>,
    matcher: &SubjectMatcher,
) -> Result<(), FailureReason> {
    let (_, cert) = X509Certificate::from_der(leaf.as_ref())
        .map_err(|e| FailureReason::MalformedCertificate(e.to_string()))?;

    if let SubjectMatcher::SubjectDn(ref pattern) = *matcher {
        let subject = DistinguishedName::from_x509(cert.subject())
            .map_err(FailureReason::MalformedCertificate)?;
        return if pattern.matches(&subject) {
            Ok(())
        } else {
            Err(FailureReason::SubjectMismatch(format!(
                "subject '{subject}' does not match '{pattern}'"
            )))
        };
    }

    let sans = cert
        .subject_alternative_name()
        .map_err(|e| FailureReason::MalformedCertificate(e.to_string()))?;
    let names: &[GeneralName<'_>] = sans
        .as_ref()
        .map(|ext| ext.value.general_names.as_slice())
        .unwrap_or_default();

    let found = names.iter().any(|name| match (matcher, name) {
        (SubjectMatcher::SanDns(expected), GeneralName::DNSName(dns)) => {
            dns.eq_ignore_ascii_case(expected)
        }
        (SubjectMatcher::SanUri(expected), GeneralName::URI(uri)) => *uri == expected.as_str(),
        (SubjectMatcher::SanEmail(expected), GeneralName::RFC822Name(email)) => {
            *email == expected.as_str()
        }
        (SubjectMatcher::SanIp(expected), GeneralName::IPAddress(bytes)) => {
            ip_from_bytes(bytes).is_some_and(|ip| ip == *expected)
        }
        _ => false,
    });

    if found {
        Ok(())
    } else {
        Err(FailureReason::SubjectMismatch(format!(
            "no subject alternative name matches {}",
            describe(matcher)
        )))
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}

fn describe(matcher: &SubjectMatcher) -> String {
    match matcher {
        SubjectMatcher::SubjectDn(p) => format!("subject_dn '{p}'"),
        SubjectMatcher::SanDns(v) => format!("san_dns '{v}'"),
        SubjectMatcher::SanUri(v) => format!("san_uri '{v}'"),
        SubjectMatcher::SanIp(v) => format!("san_ip '{v}'"),
        SubjectMatcher::SanEmail(v) => format!("san_email '{v}'"),
    }
}
