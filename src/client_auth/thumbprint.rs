//! Certificate thumbprints for certificate-bound access tokens (RFC 8705 §3).

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rustls::pki_types::CertificateDer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// `x5t#S256`: base64url (no padding) SHA-256 of the certificate DER.
#[must_use]
pub fn x5t_s256(cert: &CertificateDer<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cert.as_ref());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// The `cnf` confirmation member of a certificate-bound token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateConfirmation {
    /// SHA-256 thumbprint of the client certificate.
    #[serde(rename = "x5t#S256")]
    pub x5t_s256: String,
}

impl CertificateConfirmation {
    /// Confirmation for a validated client certificate.
    #[must_use]
    pub fn for_certificate(cert: &CertificateDer<'_>) -> Self {
        Self {
            x5t_s256: x5t_s256(cert),
        }
    }

    /// Check a certificate presented to a resource server against the
    /// confirmation carried by its access token.
    #[must_use]
    pub fn matches(&self, presented: &CertificateDer<'_>) -> bool {
        let presented = x5t_s256(presented);
        presented.as_bytes().ct_eq(self.x5t_s256.as_bytes()).into()
    }

    /// The `cnf` claim object: `{"x5t#S256": "..."}`.
    #[must_use]
    pub fn to_claim(&self) -> serde_json::Value {
        serde_json::json!({ "x5t#S256": self.x5t_s256 })
    }
}
