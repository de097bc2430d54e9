//! Peer certificate chain acquisition.
//!
//! The connection layer records the client's chain in a typed
//! [`PeerCertificates`] request extension once the TLS handshake completes.
//! [`extract`] turns that into a [`CertificateChain`], or `None` when the
//! connection carried no client certificate at all.

use std::sync::Arc;

use axum::http::Extensions;
use rustls::pki_types::CertificateDer;

/// Ordered peer certificate chain, leaf first. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain(Arc<[CertificateDer<'static>]>);

impl CertificateChain {
    /// Wrap a leaf-first chain. Returns `None` for an empty chain.
    #[must_use]
    pub fn new(certs: Vec<CertificateDer<'static>>) -> Option<Self> {
        if certs.is_empty() {
            return None;
        }
        Some(Self(certs.into()))
    }

    /// The end-entity certificate presented by the client.
    #[must_use]
    pub fn leaf(&self) -> &CertificateDer<'static> {
        &self.0[0]
    }

    /// Every certificate after the leaf, in presentation order.
    #[must_use]
    pub fn intermediates(&self) -> &[CertificateDer<'static>] {
        &self.0[1..]
    }

    /// Number of certificates in the chain (at least one).
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; present for API symmetry with slices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The whole chain as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[CertificateDer<'static>] {
        &self.0
    }
}

/// Request extension deposited by the connection layer.
///
/// Holds the DER chain exactly as the client sent it in its `Certificate`
/// handshake message.
#[derive(Debug, Clone)]
pub struct PeerCertificates(pub Arc<Vec<CertificateDer<'static>>>);

impl PeerCertificates {
    /// Capture the peer chain of an established server-side TLS connection.
    ///
    /// Returns `None` when the client did not send a certificate.
    #[must_use]
    pub fn from_connection(conn: &rustls::ServerConnection) -> Option<Self> {
        conn.peer_certificates()
            .filter(|certs| !certs.is_empty())
            .map(|certs| Self(Arc::new(certs.to_vec())))
    }
}

impl From<Vec<CertificateDer<'static>>> for PeerCertificates {
    fn from(certs: Vec<CertificateDer<'static>>) -> Self {
        Self(Arc::new(certs))
    }
}

/// Obtain the peer chain for the current request.
///
/// `None` means mutual TLS does not apply to this request (plain TLS, no
/// client certificate, or a non-TLS listener).
#[must_use]
pub fn extract(extensions: &Extensions) -> Option<CertificateChain> {
    let peer = extensions.get::<PeerCertificates>()?;
    CertificateChain::new(peer.0.as_ref().clone())
}
