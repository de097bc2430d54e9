//! RFC 8705 mutual-TLS client authentication methods.
//!
//! The method is decided by the shape of the presented chain alone, never by
//! what the client registered. A registration that disagrees with the chain
//! is rejected later by the binder.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::chain::CertificateChain;

/// The two mTLS client authentication methods defined by RFC 8705 §2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientAuthenticationMethod {
    /// PKI mutual-TLS: the client certificate chains to a trusted CA.
    #[serde(rename = "tls_client_auth")]
    TlsClientAuth,
    /// Self-signed mutual-TLS: the certificate is pinned to the registration.
    #[serde(rename = "self_signed_tls_client_auth")]
    SelfSignedTlsClientAuth,
}

impl ClientAuthenticationMethod {
    /// Select the method for a presented chain.
    ///
    /// A lone certificate means self-signed trust; anything longer carries
    /// issuer certificates and is treated as a PKI chain.
    #[must_use]
    pub fn select(chain: &CertificateChain) -> Self {
        if chain.len() == 1 {
            Self::SelfSignedTlsClientAuth
        } else {
            Self::TlsClientAuth
        }
    }

    /// The registered OAuth2 identifier of the method.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TlsClientAuth => "tls_client_auth",
            Self::SelfSignedTlsClientAuth => "self_signed_tls_client_auth",
        }
    }
}

impl fmt::Display for ClientAuthenticationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientAuthenticationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tls_client_auth" => Ok(Self::TlsClientAuth),
            "self_signed_tls_client_auth" => Ok(Self::SelfSignedTlsClientAuth),
            other => Err(format!("unsupported client authentication method '{other}'")),
        }
    }
}
