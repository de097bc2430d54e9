//! Client registrations and the registry seam.
//!
//! The [`ClientRegistry`] trait abstracts over registration storage. The
//! engine only reads from it. [`InMemoryClientRegistry`] is backed by a
//! `DashMap` and is filled from configuration at startup; other backends
//! implement the trait and handle their own concurrency.

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use rustls::pki_types::CertificateDer;
use thiserror::Error;
use tracing::debug;

use super::dn::DnPattern;
use super::method::ClientAuthenticationMethod;
use crate::config::ClientConfig;
use crate::tls::load_certs_from;
use crate::{Error, Result};

/// What a PKI client's leaf certificate must carry (RFC 8705 §2.1.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectMatcher {
    /// `tls_client_auth_subject_dn`
    SubjectDn(DnPattern),
    /// `tls_client_auth_san_dns`
    SanDns(String),
    /// `tls_client_auth_san_uri`
    SanUri(String),
    /// `tls_client_auth_san_ip`
    SanIp(IpAddr),
    /// `tls_client_auth_san_email`
    SanEmail(String),
}

/// Trust material registered for a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientTrust {
    /// Self-signed certificates the client may present. Several entries allow
    /// rotation; any exact match is accepted.
    PinnedCertificates(Vec<CertificateDer<'static>>),
    /// CA-issued certificates whose leaf satisfies the matcher.
    Pki(SubjectMatcher),
}

impl ClientTrust {
    /// The mTLS method this trust material implies.
    #[must_use]
    pub fn method(&self) -> ClientAuthenticationMethod {
        match self {
            Self::PinnedCertificates(_) => ClientAuthenticationMethod::SelfSignedTlsClientAuth,
            Self::Pki(_) => ClientAuthenticationMethod::TlsClientAuth,
        }
    }
}

/// A registered mTLS client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredClient {
    /// OAuth2 client identifier.
    pub client_id: String,
    /// Trust material.
    pub trust: ClientTrust,
    /// `tls_client_certificate_bound_access_tokens`: whether tokens issued to
    /// this client carry the `cnf` confirmation.
    pub certificate_bound_access_tokens: bool,
}

impl RegisteredClient {
    /// Build a registration from its configuration entry.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the entry does not configure exactly one
    /// kind of trust material, a DN pattern is malformed, pinned certificates
    /// cannot be loaded, or an explicit `token_endpoint_auth_method`
    /// contradicts the trust material.
    pub fn from_config(cfg: &ClientConfig) -> Result<Self> {
        let client_id = cfg.client_id.trim();
        if client_id.is_empty() {
            return Err(Error::Config("client entry has an empty client_id".into()));
        }

        let mut candidates: Vec<ClientTrust> = Vec::new();
        if let Some(ref dn) = cfg.tls_client_auth_subject_dn {
            let pattern = DnPattern::parse(dn).map_err(|e| {
                Error::Config(format!(
                    "client '{client_id}': invalid tls_client_auth_subject_dn '{dn}': {e}"
                ))
            })?;
            candidates.push(ClientTrust::Pki(SubjectMatcher::SubjectDn(pattern)));
        }
        if let Some(ref dns) = cfg.tls_client_auth_san_dns {
            candidates.push(ClientTrust::Pki(SubjectMatcher::SanDns(dns.clone())));
        }
        if let Some(ref uri) = cfg.tls_client_auth_san_uri {
            candidates.push(ClientTrust::Pki(SubjectMatcher::SanUri(uri.clone())));
        }
        if let Some(ip) = cfg.tls_client_auth_san_ip {
            candidates.push(ClientTrust::Pki(SubjectMatcher::SanIp(ip)));
        }
        if let Some(ref email) = cfg.tls_client_auth_san_email {
            candidates.push(ClientTrust::Pki(SubjectMatcher::SanEmail(email.clone())));
        }
        if !cfg.self_signed_certificates.is_empty() {
            let mut pinned = Vec::new();
            for source in &cfg.self_signed_certificates {
                pinned.extend(load_certs_from(source).map_err(|e| {
                    Error::Config(format!("client '{client_id}': pinned certificate: {e}"))
                })?);
            }
            candidates.push(ClientTrust::PinnedCertificates(pinned));
        }

        let trust = match candidates.len() {
            1 => candidates.remove(0),
            0 => {
                return Err(Error::Config(format!(
                    "client '{client_id}': no mTLS trust material configured"
                )));
            }
            _ => {
                return Err(Error::Config(format!(
                    "client '{client_id}': exactly one of tls_client_auth_subject_dn, \
                     tls_client_auth_san_* or self_signed_certificates may be set"
                )));
            }
        };

        if let Some(declared) = cfg.token_endpoint_auth_method {
            if declared != trust.method() {
                return Err(Error::Config(format!(
                    "client '{client_id}': token_endpoint_auth_method is {declared} but the \
                     configured trust material requires {}",
                    trust.method()
                )));
            }
        }

        Ok(Self {
            client_id: client_id.to_string(),
            trust,
            certificate_bound_access_tokens: cfg.tls_client_certificate_bound_access_tokens,
        })
    }

    /// The mTLS method this client is registered for.
    #[must_use]
    pub fn method(&self) -> ClientAuthenticationMethod {
        self.trust.method()
    }
}

/// Registry failure not attributable to the client.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Backend could not be reached.
    #[error("client registry unavailable: {0}")]
    Unavailable(String),
}

/// Read access to client registrations.
///
/// Implementations must be `Send + Sync`: the registry is shared by every
/// request task.
#[async_trait::async_trait]
pub trait ClientRegistry: Send + Sync + 'static {
    /// Look up a registration. `Ok(None)` means the client is unknown.
    async fn find_by_client_id(
        &self,
        client_id: &str,
    ) -> std::result::Result<Option<Arc<RegisteredClient>>, RegistryError>;
}

/// In-memory registry backed by a `DashMap`.
#[derive(Debug, Default)]
pub struct InMemoryClientRegistry {
    clients: DashMap<String, Arc<RegisteredClient>>,
}

impl InMemoryClientRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configuration entries.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid entry or a duplicate
    /// `client_id`.
    pub fn from_config(clients: &[ClientConfig]) -> Result<Self> {
        let registry = Self::new();
        for cfg in clients {
            let client = RegisteredClient::from_config(cfg)?;
            let client_id = client.client_id.clone();
            if registry.register(client).is_some() {
                return Err(Error::Config(format!(
                    "client '{client_id}' is registered more than once"
                )));
            }
        }
        debug!(clients = registry.len(), "Client registry loaded");
        Ok(registry)
    }

    /// Add or replace a registration. Returns the replaced entry.
    pub fn register(&self, client: RegisteredClient) -> Option<Arc<RegisteredClient>> {
        self.clients
            .insert(client.client_id.clone(), Arc::new(client))
    }

    /// Remove a registration.
    pub fn remove(&self, client_id: &str) -> Option<Arc<RegisteredClient>> {
        self.clients.remove(client_id).map(|(_, client)| client)
    }

    /// Number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// `true` when no client is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait::async_trait]
impl ClientRegistry for InMemoryClientRegistry {
    async fn find_by_client_id(
        &self,
        client_id: &str,
    ) -> std::result::Result<Option<Arc<RegisteredClient>>, RegistryError> {
        Ok(self.clients.get(client_id).map(|entry| Arc::clone(entry.value())))
    }
}
