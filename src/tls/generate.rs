//! `rcgen`-backed certificate generation for development and test setups.
//!
//! Backs the `mtls-client-auth tls` CLI commands: a root CA, client
//! certificates issued by it (with the `clientAuth` extended key usage), and
//! self-signed client certificates for `self_signed_tls_client_auth`.

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rcgen::string::Ia5String;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, DistinguishedName,
    DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyIdMethod, KeyPair, KeyUsagePurpose,
    RevokedCertParams, SanType, SerialNumber,
};
use rustls::pki_types::CertificateDer;
use time::OffsetDateTime;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::{Error, Result};

/// Parameters for generating a CA certificate.
#[derive(Debug)]
pub struct CaParams<'a> {
    /// Common Name for the CA (e.g. `"Example Client CA"`).
    pub cn: &'a str,
    /// Validity period in days.
    pub validity_days: u32,
}

/// Validity window of a generated client certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// Valid from one hour ago for the given number of days.
    Days(u32),
    /// Expired yesterday. For exercising rejection paths.
    Expired,
}

/// Parameters for generating a client certificate.
#[derive(Debug)]
pub struct ClientCertParams<'a> {
    /// Common Name.
    pub cn: &'a str,
    /// Organization (optional).
    pub organization: Option<&'a str>,
    /// Organizational Unit (optional).
    pub ou: Option<&'a str>,
    /// Subject Alternative Names, DNS entries.
    pub san_dns: Vec<String>,
    /// Subject Alternative Names, URI entries (e.g. SPIFFE IDs).
    pub san_uris: Vec<String>,
    /// Validity window.
    pub validity: Validity,
}

impl<'a> ClientCertParams<'a> {
    /// Client certificate with only a Common Name, valid for a year.
    #[must_use]
    pub fn new(cn: &'a str) -> Self {
        Self {
            cn,
            organization: None,
            ou: None,
            san_dns: Vec::new(),
            san_uris: Vec::new(),
            validity: Validity::Days(365),
        }
    }
}

/// Generated certificate and key pair.
#[derive(Debug, Clone)]
pub struct GeneratedCert {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
    /// DER-encoded certificate.
    pub cert_der: CertificateDer<'static>,
}

/// A CA able to issue certificates and CRLs.
pub struct CertificateAuthority {
    issuer: Issuer<'static, KeyPair>,
    cert: GeneratedCert,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("cert_pem", &self.cert.cert_pem)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Reload a CA from its PEM certificate and key.
    ///
    /// # Errors
    ///
    /// Returns an error if either PEM block cannot be parsed.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let key = KeyPair::from_pem(key_pem)
            .map_err(|e| Error::Config(format!("Failed to parse CA key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(cert_pem, key)
            .map_err(|e| Error::Config(format!("Failed to parse CA cert: {e}")))?;
        let cert_der = crate::tls::load_certs_from(cert_pem)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Config("CA PEM holds no certificate".into()))?;

        Ok(Self {
            issuer,
            cert: GeneratedCert {
                cert_pem: cert_pem.to_string(),
                key_pem: key_pem.to_string(),
                cert_der,
            },
        })
    }

    /// The CA certificate and key.
    #[must_use]
    pub fn cert(&self) -> &GeneratedCert {
        &self.cert
    }
}

/// Certificate generator backed by `rcgen`.
///
/// Generates CA, client and self-signed certificates without requiring
/// `openssl` or other external tools.
pub struct CertGenerator;

impl CertGenerator {
    /// Generate a self-signed root CA.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or certificate serialisation fails.
    pub fn init_ca(params: &CaParams<'_>) -> Result<CertificateAuthority> {
        let key_pair = generate_key()?;
        let mut ca_params = ca_params(params)?;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

        let ca_cert = ca_params
            .self_signed(&key_pair)
            .map_err(|e| Error::Config(format!("CA cert generation failed: {e}")))?;
        let cert = GeneratedCert {
            cert_pem: ca_cert.pem(),
            key_pem: key_pair.serialize_pem(),
            cert_der: ca_cert.der().clone(),
        };

        Ok(CertificateAuthority {
            issuer: Issuer::new(ca_params, key_pair),
            cert,
        })
    }

    /// Issue an intermediate CA signed by `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or signing fails.
    pub fn issue_intermediate(
        params: &CaParams<'_>,
        parent: &CertificateAuthority,
    ) -> Result<CertificateAuthority> {
        let key_pair = generate_key()?;
        let mut ca_params = ca_params(params)?;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));

        let ca_cert = ca_params
            .signed_by(&key_pair, &parent.issuer)
            .map_err(|e| Error::Config(format!("Intermediate signing failed: {e}")))?;
        let cert = GeneratedCert {
            cert_pem: ca_cert.pem(),
            key_pem: key_pair.serialize_pem(),
            cert_der: ca_cert.der().clone(),
        };

        Ok(CertificateAuthority {
            issuer: Issuer::new(ca_params, key_pair),
            cert,
        })
    }

    /// Issue a client certificate signed by `ca`.
    ///
    /// # Errors
    ///
    /// Returns an error if a SAN is not a valid IA5 string, key generation
    /// fails, or signing fails.
    pub fn issue_client(
        params: &ClientCertParams<'_>,
        ca: &CertificateAuthority,
    ) -> Result<GeneratedCert> {
        let key_pair = generate_key()?;
        let leaf_params = client_params(params)?;
        let cert = leaf_params
            .signed_by(&key_pair, &ca.issuer)
            .map_err(|e| Error::Config(format!("Client cert signing failed: {e}")))?;

        Ok(GeneratedCert {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
            cert_der: cert.der().clone(),
        })
    }

    /// Generate a self-signed client certificate for pinning.
    ///
    /// # Errors
    ///
    /// Returns an error if a SAN is invalid or generation fails.
    pub fn self_signed_client(params: &ClientCertParams<'_>) -> Result<GeneratedCert> {
        let key_pair = generate_key()?;
        let cert = client_params(params)?
            .self_signed(&key_pair)
            .map_err(|e| Error::Config(format!("Self-signed cert generation failed: {e}")))?;

        Ok(GeneratedCert {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
            cert_der: cert.der().clone(),
        })
    }

    /// Issue a CRL from `ca` revoking `revoked`. Returns the PEM encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if a revoked certificate cannot be parsed or the CRL
    /// cannot be signed.
    pub fn issue_crl(ca: &CertificateAuthority, revoked: &[&GeneratedCert]) -> Result<String> {
        let now = now()?;
        let mut revoked_certs = Vec::with_capacity(revoked.len());
        for cert in revoked {
            let (_, parsed) = X509Certificate::from_der(cert.cert_der.as_ref())
                .map_err(|e| Error::Config(format!("Cannot parse revoked cert: {e}")))?;
            revoked_certs.push(RevokedCertParams {
                serial_number: SerialNumber::from_slice(parsed.raw_serial()),
                revocation_time: now,
                reason_code: None,
                invalidity_date: None,
            });
        }

        let crl = CertificateRevocationListParams {
            this_update: now,
            next_update: add_days(now, 30)?,
            crl_number: SerialNumber::from(1u64),
            issuing_distribution_point: None,
            revoked_certs,
            key_identifier_method: KeyIdMethod::Sha256,
        }
        .signed_by(&ca.issuer)
        .map_err(|e| Error::Config(format!("CRL signing failed: {e}")))?;

        crl.pem()
            .map_err(|e| Error::Config(format!("CRL serialisation failed: {e}")))
    }

    /// Write a [`GeneratedCert`] to disk.
    ///
    /// Writes `<stem>.crt` and `<stem>.key` under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the files
    /// cannot be written.
    pub fn write_to_dir(cert: &GeneratedCert, dir: &Path, stem: &str) -> Result<()> {
        fs::create_dir_all(dir)
            .map_err(|e| Error::Config(format!("Cannot create dir '{}': {e}", dir.display())))?;

        fs::write(dir.join(format!("{stem}.crt")), &cert.cert_pem)
            .map_err(|e| Error::Config(format!("Cannot write cert: {e}")))?;

        fs::write(dir.join(format!("{stem}.key")), &cert.key_pem)
            .map_err(|e| Error::Config(format!("Cannot write key: {e}")))?;

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Private helpers
// ─────────────────────────────────────────────────────────────────────────────

fn generate_key() -> Result<KeyPair> {
    KeyPair::generate().map_err(|e| Error::Config(format!("Failed to generate key: {e}")))
}

fn ca_params(params: &CaParams<'_>) -> Result<CertificateParams> {
    let now = now()?;
    let mut ca_params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, params.cn);
    ca_params.distinguished_name = dn;
    ca_params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    ca_params.not_before = add_days(now, -1)?;
    ca_params.not_after = add_days(now, i64::from(params.validity_days))?;
    Ok(ca_params)
}

fn client_params(params: &ClientCertParams<'_>) -> Result<CertificateParams> {
    let mut leaf = CertificateParams::default();

    // Encoded least specific first so the RFC 4514 form reads CN=..,OU=..,O=..
    let mut dn = DistinguishedName::new();
    if let Some(org) = params.organization {
        dn.push(DnType::OrganizationName, org);
    }
    if let Some(ou) = params.ou {
        dn.push(DnType::OrganizationalUnitName, ou);
    }
    dn.push(DnType::CommonName, params.cn);
    leaf.distinguished_name = dn;

    leaf.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    leaf.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];

    let mut sans: Vec<SanType> = Vec::new();
    for dns in &params.san_dns {
        let ia5 = Ia5String::try_from(dns.as_str())
            .map_err(|e| Error::Config(format!("Invalid DNS SAN '{dns}': {e}")))?;
        sans.push(SanType::DnsName(ia5));
    }
    for uri in &params.san_uris {
        let ia5 = Ia5String::try_from(uri.as_str())
            .map_err(|e| Error::Config(format!("Invalid URI SAN '{uri}': {e}")))?;
        sans.push(SanType::URI(ia5));
    }
    leaf.subject_alt_names = sans;

    let now = now()?;
    let (not_before, not_after) = match params.validity {
        Validity::Days(days) => (
            now - time::Duration::hours(1),
            add_days(now, i64::from(days))?,
        ),
        Validity::Expired => (add_days(now, -30)?, add_days(now, -1)?),
    };
    leaf.not_before = not_before;
    leaf.not_after = not_after;

    Ok(leaf)
}

fn now() -> Result<OffsetDateTime> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Config(format!("System time error: {e}")))?
        .as_secs();
    OffsetDateTime::from_unix_timestamp(i64::try_from(secs).unwrap_or(i64::MAX))
        .map_err(|e| Error::Config(format!("Date calculation error: {e}")))
}

fn add_days(at: OffsetDateTime, days: i64) -> Result<OffsetDateTime> {
    at.checked_add(time::Duration::days(days))
        .ok_or_else(|| Error::Config(format!("Validity of {days} days is out of range")))
}
