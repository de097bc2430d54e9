//! TLS plumbing around the authentication engine.
//!
//! Provides:
//! - [`build_server_config`]: a `rustls::ServerConfig` that asks for client
//!   certificates without enforcing trust at the handshake
//! - [`load_certs`] / [`load_certs_from`] / [`load_crls`] / [`load_private_key`]: PEM loading
//! - [`CertGenerator`]: `rcgen`-backed generation for the `tls` CLI commands

mod generate;
mod pem;
mod verifier;

use std::sync::Arc;

use rustls::ServerConfig;
use tracing::debug;

pub use generate::{
    CaParams, CertGenerator, CertificateAuthority, ClientCertParams, GeneratedCert, Validity,
};
pub use pem::{load_certs, load_certs_from, load_crls, load_private_key};
pub use verifier::HandshakeOnlyClientVerifier;

use crate::{Error, Result};

/// Build a `rustls::ServerConfig` for an mTLS-capable token endpoint.
///
/// Clients may connect with or without a certificate. A presented chain is
/// only checked for proof of key possession; the peer chain is then handed
/// to the engine via [`crate::client_auth::PeerCertificates`].
///
/// # Errors
///
/// Returns an error if the certificate or key file cannot be read or parsed,
/// or if the rustls config cannot be built (e.g. mismatched cert/key pair).
pub fn build_server_config(server_cert: &str, server_key: &str) -> Result<ServerConfig> {
    let server_certs = load_certs(server_cert)?;
    let key = load_private_key(server_key)?;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let verifier = Arc::new(HandshakeOnlyClientVerifier::new(&provider));

    // TLS 1.3 only.
    let mut tls_cfg = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| Error::Config(format!("TLS protocol setup failed: {e}")))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(server_certs, key)
        .map_err(|e| Error::Config(format!("TLS config error (cert/key mismatch?): {e}")))?;

    // Prefer HTTP/2, fall back to HTTP/1.1
    tls_cfg.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    debug!(server_cert = %server_cert, "mTLS server config built");
    Ok(tls_cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_builds_from_generated_material() {
        // GIVEN: a CA-issued server certificate on disk
        let dir = tempfile::tempdir().unwrap();
        let ca = CertGenerator::init_ca(&CaParams {
            cn: "Server CA",
            validity_days: 30,
        })
        .unwrap();
        let mut params = ClientCertParams::new("auth.example.com");
        params.san_dns = vec!["auth.example.com".into()];
        let server = CertGenerator::issue_client(&params, &ca).unwrap();
        CertGenerator::write_to_dir(&server, dir.path(), "server").unwrap();

        // WHEN: building the server config
        let cfg = build_server_config(
            dir.path().join("server.crt").to_str().unwrap(),
            dir.path().join("server.key").to_str().unwrap(),
        )
        .unwrap();

        // THEN: ALPN is set
        assert_eq!(cfg.alpn_protocols[0], b"h2");
    }

    #[test]
    fn missing_key_file_is_a_config_error() {
        let result = build_server_config("/nonexistent/server.crt", "/nonexistent/server.key");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    fn pump(client: &mut rustls::ClientConnection, server: &mut rustls::ServerConnection) {
        let mut wire = Vec::new();
        for _ in 0..16 {
            if !client.is_handshaking() && !server.is_handshaking() {
                return;
            }
            while client.wants_write() {
                client.write_tls(&mut wire).unwrap();
            }
            let mut rd = wire.as_slice();
            while !rd.is_empty() {
                server.read_tls(&mut rd).unwrap();
            }
            wire.clear();
            server.process_new_packets().unwrap();

            while server.wants_write() {
                server.write_tls(&mut wire).unwrap();
            }
            let mut rd = wire.as_slice();
            while !rd.is_empty() {
                client.read_tls(&mut rd).unwrap();
            }
            wire.clear();
            client.process_new_packets().unwrap();
        }
        panic!("handshake did not complete");
    }

    /// Root CA plus a `ServerConfig` for `localhost` issued under it.
    fn localhost_server(dir: &std::path::Path) -> (CertificateAuthority, ServerConfig) {
        let root = CertGenerator::init_ca(&CaParams {
            cn: "Handshake Root",
            validity_days: 30,
        })
        .unwrap();
        let issuer = rcgen::Issuer::from_ca_cert_pem(
            &root.cert().cert_pem,
            rcgen::KeyPair::from_pem(&root.cert().key_pem).unwrap(),
        )
        .unwrap();
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .signed_by(&key, &issuer)
            .unwrap();
        std::fs::write(dir.join("server.crt"), cert.pem()).unwrap();
        std::fs::write(dir.join("server.key"), key.serialize_pem()).unwrap();
        let cfg = build_server_config(
            dir.join("server.crt").to_str().unwrap(),
            dir.join("server.key").to_str().unwrap(),
        )
        .unwrap();
        (root, cfg)
    }

    fn client_builder(
        root: &CertificateAuthority,
    ) -> rustls::ConfigBuilder<rustls::ClientConfig, rustls::client::WantsClientCert> {
        let mut roots = rustls::RootCertStore::empty();
        roots.add(root.cert().cert_der.clone()).unwrap();
        rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::aws_lc_rs::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .unwrap()
        .with_root_certificates(roots)
    }

    fn connect(
        client_cfg: rustls::ClientConfig,
        server_cfg: ServerConfig,
    ) -> (rustls::ClientConnection, rustls::ServerConnection) {
        let name = rustls::pki_types::ServerName::try_from("localhost").unwrap();
        let client = rustls::ClientConnection::new(Arc::new(client_cfg), name).unwrap();
        let server = rustls::ServerConnection::new(Arc::new(server_cfg)).unwrap();
        (client, server)
    }

    #[test]
    fn peer_chain_is_captured_from_a_live_handshake() {
        use crate::client_auth::PeerCertificates;

        // GIVEN: the endpoint config and a client holding leaf + intermediate
        let dir = tempfile::tempdir().unwrap();
        let (root, server_cfg) = localhost_server(dir.path());
        let intermediate = CertGenerator::issue_intermediate(
            &CaParams {
                cn: "Handshake Issuing CA",
                validity_days: 30,
            },
            &root,
        )
        .unwrap();
        let leaf = CertGenerator::issue_client(&ClientCertParams::new("client1"), &intermediate)
            .unwrap();
        let leaf_key = rustls_pemfile::private_key(&mut leaf.key_pem.as_bytes())
            .unwrap()
            .unwrap();
        let client_cfg = client_builder(&root)
            .with_client_auth_cert(
                vec![leaf.cert_der.clone(), intermediate.cert().cert_der.clone()],
                leaf_key,
            )
            .unwrap();
        let (mut client, mut server) = connect(client_cfg, server_cfg);
        assert!(PeerCertificates::from_connection(&server).is_none());

        // WHEN: the handshake completes in memory
        pump(&mut client, &mut server);

        // THEN: the server sees the chain exactly as sent, leaf first
        let peer = PeerCertificates::from_connection(&server).unwrap();
        assert_eq!(
            peer.0.as_slice(),
            &[leaf.cert_der.clone(), intermediate.cert().cert_der.clone()]
        );
    }

    #[test]
    fn connection_without_client_certificate_has_no_peer_chain() {
        use crate::client_auth::PeerCertificates;

        let dir = tempfile::tempdir().unwrap();
        let (root, server_cfg) = localhost_server(dir.path());
        let (mut client, mut server) =
            connect(client_builder(&root).with_no_client_auth(), server_cfg);

        pump(&mut client, &mut server);

        assert!(PeerCertificates::from_connection(&server).is_none());
    }
}
