//! The authenticated client handed to the provider chain and token issuer.

use serde::Serialize;

use super::chain::CertificateChain;
use super::method::ClientAuthenticationMethod;
use super::params::AdditionalParameters;
use super::thumbprint::CertificateConfirmation;
use super::validator::ValidatedClient;

/// Successful client authentication.
///
/// Only [`assemble`] creates this, and only from a [`ValidatedClient`].
#[derive(Debug, Clone)]
pub struct ClientAuthentication {
    client_id: String,
    method: ClientAuthenticationMethod,
    chain: CertificateChain,
    confirmation: CertificateConfirmation,
    additional_parameters: AdditionalParameters,
    certificate_bound_access_tokens: bool,
}

impl ClientAuthentication {
    /// The authenticated `client_id`.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The method that authenticated the client.
    #[must_use]
    pub fn method(&self) -> ClientAuthenticationMethod {
        self.method
    }

    /// The chain the client presented, leaf first.
    #[must_use]
    pub fn chain(&self) -> &CertificateChain {
        &self.chain
    }

    /// Confirmation of the leaf certificate.
    #[must_use]
    pub fn confirmation(&self) -> &CertificateConfirmation {
        &self.confirmation
    }

    /// `x5t#S256` thumbprint of the leaf certificate.
    #[must_use]
    pub fn thumbprint(&self) -> &str {
        &self.confirmation.x5t_s256
    }

    /// Grant parameters carried through for authorization-code requests.
    #[must_use]
    pub fn additional_parameters(&self) -> &AdditionalParameters {
        &self.additional_parameters
    }

    /// Whether the client asked for certificate-bound access tokens.
    #[must_use]
    pub fn certificate_bound_access_tokens(&self) -> bool {
        self.certificate_bound_access_tokens
    }

    /// The `cnf` claim to embed in issued access tokens, or `None` when the
    /// client does not use certificate-bound tokens.
    #[must_use]
    pub fn cnf_claim(&self) -> Option<serde_json::Value> {
        self.certificate_bound_access_tokens
            .then(|| self.confirmation.to_claim())
    }

    /// Serializable view for logs and the CLI. Carries no certificate bytes.
    #[must_use]
    pub fn summary(&self) -> AuthenticationSummary<'_> {
        AuthenticationSummary {
            client_id: &self.client_id,
            method: self.method,
            chain_length: self.chain.len(),
            cnf: &self.confirmation,
            certificate_bound_access_tokens: self.certificate_bound_access_tokens,
            additional_parameters: &self.additional_parameters,
        }
    }
}

/// JSON summary of a [`ClientAuthentication`].
#[derive(Debug, Serialize)]
pub struct AuthenticationSummary<'a> {
    /// Authenticated client.
    pub client_id: &'a str,
    /// Method used.
    pub method: ClientAuthenticationMethod,
    /// Certificates presented.
    pub chain_length: usize,
    /// Leaf confirmation.
    pub cnf: &'a CertificateConfirmation,
    /// Client metadata flag.
    pub certificate_bound_access_tokens: bool,
    /// Pass-through grant parameters.
    pub additional_parameters: &'a AdditionalParameters,
}

/// Build the result for a validated client.
///
/// The thumbprint is computed here from the leaf of the chain carried by
/// `validated`; no other chain can reach the result.
#[must_use]
pub fn assemble(
    validated: ValidatedClient,
    additional_parameters: AdditionalParameters,
) -> ClientAuthentication {
    let confirmation = CertificateConfirmation::for_certificate(validated.chain().leaf());
    let client = validated.client();
    ClientAuthentication {
        client_id: client.client_id.clone(),
        method: validated.method(),
        certificate_bound_access_tokens: client.certificate_bound_access_tokens,
        chain: validated.chain().clone(),
        confirmation,
        additional_parameters,
    }
}
