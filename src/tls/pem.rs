//! PEM loading for certificates, CRLs and private keys.
//!
//! All material is expected in **PEM format**. DER files are not supported
//! (openssl, cfssl and cert-manager all default to PEM).

use std::fs;

use rustls::pki_types::{CertificateDer, CertificateRevocationListDer, PrivateKeyDer};

use crate::{Error, Result};

const PEM_MARKER: &str = "-----BEGIN";

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no valid PEM
/// certificate blocks.
pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    parse_certs(&pem_data, path)
}

/// Load certificates from either inline PEM text or a file path.
///
/// Client registrations may embed the pinned certificate directly in the
/// configuration; anything starting with a PEM header is treated as inline.
///
/// # Errors
///
/// Returns an error if the PEM is malformed, holds no certificate, or the
/// file cannot be read.
pub fn load_certs_from(source: &str) -> Result<Vec<CertificateDer<'static>>> {
    if source.trim_start().starts_with(PEM_MARKER) {
        parse_certs(source.as_bytes(), "inline PEM")
    } else {
        load_certs(source)
    }
}

/// Load CRL entries from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, a CRL block is malformed, or
/// the file holds no CRL.
pub fn load_crls(path: &str) -> Result<Vec<CertificateRevocationListDer<'static>>> {
    let pem_data = read_file(path)?;
    let crls: Vec<CertificateRevocationListDer<'static>> =
        rustls_pemfile::crls(&mut pem_data.as_slice())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Config(format!("Failed to parse CRL from '{path}': {e}")))?;

    if crls.is_empty() {
        return Err(Error::Config(format!("No CRLs found in '{path}'")));
    }

    Ok(crls)
}

/// Load the first private key from a PEM file.
///
/// Supports RSA (`RSA PRIVATE KEY`), PKCS#8 (`PRIVATE KEY`), and EC keys.
///
/// # Errors
///
/// Returns an error if the file cannot be read, contains no private key, or
/// the key format is unsupported.
pub fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    let key = rustls_pemfile::private_key(&mut pem_data.as_slice())
        .map_err(|e| Error::Config(format!("Failed to parse private key from '{path}': {e}")))?
        .ok_or_else(|| Error::Config(format!("No private key found in '{path}'")))?;

    Ok(key)
}

fn parse_certs(mut pem: &[u8], origin: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("Failed to parse certs from '{origin}': {e}")))?;

    if certs.is_empty() {
        return Err(Error::Config(format!("No certificates found in '{origin}'")));
    }

    Ok(certs)
}

fn read_file(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Config(format!("Cannot read '{path}': {e}")))
}
