//! End-to-end client certificate authentication tests
//!
//! Builds real PKI material with the bundled generator, loads it through
//! YAML configuration and runs the full engine:
//! - `tls_client_auth` over root -> intermediate -> leaf chains
//! - `self_signed_tls_client_auth` with pinned certificates
//! - Enumeration resistance, request validation, CRLs and timeouts

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::response::IntoResponse;
use mtls_client_auth::client_auth::error::LookupStage;
use mtls_client_auth::client_auth::registry::RegistryError;
use mtls_client_auth::client_auth::trust_store::TrustStoreError;
use mtls_client_auth::client_auth::{
    AuthenticationError, AuthenticationOutcome, AuthenticationRequest, CertificateChain,
    ClientAuthentication, ClientAuthenticationMethod, ClientCertificateAuthenticator,
    ClientRegistry, ClientTrust, ErrorCode, FailureReason, RegisteredClient, RequestParameters,
    DnPattern, InMemoryClientRegistry, StaticTrustStore, SubjectMatcher, TrustAnchors,
    TrustStore, x5t_s256,
};
use mtls_client_auth::config::{Config, TimeoutConfig};
use mtls_client_auth::tls::{
    CaParams, CertGenerator, CertificateAuthority, ClientCertParams, GeneratedCert, Validity,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

struct Pki {
    dir: TempDir,
    root: CertificateAuthority,
    intermediate: CertificateAuthority,
}

impl Pki {
    fn new() -> Self {
        let root = CertGenerator::init_ca(&CaParams {
            cn: "Test Root CA",
            validity_days: 30,
        })
        .unwrap();
        let intermediate = CertGenerator::issue_intermediate(
            &CaParams {
                cn: "Test Issuing CA",
                validity_days: 30,
            },
            &root,
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("root.pem"), &root.cert().cert_pem).unwrap();
        Self {
            dir,
            root,
            intermediate,
        }
    }

    fn path(&self, name: &str) -> String {
        self.dir.path().join(name).display().to_string()
    }

    fn leaf(&self, cn: &str) -> GeneratedCert {
        let mut params = ClientCertParams::new(cn);
        params.organization = Some("Example");
        CertGenerator::issue_client(&params, &self.intermediate).unwrap()
    }

    fn chain(&self, leaf: &GeneratedCert) -> CertificateChain {
        CertificateChain::new(vec![
            leaf.cert_der.clone(),
            self.intermediate.cert().cert_der.clone(),
        ])
        .unwrap()
    }

    fn write(&self, name: &str, contents: &str) -> String {
        std::fs::write(self.dir.path().join(name), contents).unwrap();
        self.path(name)
    }
}

fn load_engine(dir: &Path, yaml: &str) -> ClientCertificateAuthenticator {
    let path = dir.join("mtls.yaml");
    std::fs::write(&path, yaml).unwrap();
    let config = Config::load(Some(&path)).unwrap();
    ClientCertificateAuthenticator::from_config(&config).unwrap()
}

fn request(client_id: &str, chain: CertificateChain) -> AuthenticationRequest {
    AuthenticationRequest::new(
        RequestParameters::from_pairs([("client_id", client_id)]),
        Some(chain),
    )
}

async fn authenticated(
    engine: &ClientCertificateAuthenticator,
    request: &AuthenticationRequest,
) -> ClientAuthentication {
    engine
        .authenticate(request)
        .await
        .unwrap()
        .into_authenticated()
        .unwrap()
}

async fn rejected(
    engine: &ClientCertificateAuthenticator,
    request: &AuthenticationRequest,
) -> AuthenticationError {
    engine.authenticate(request).await.unwrap_err()
}

async fn response_body(err: AuthenticationError) -> (u16, String) {
    let response = err.into_response();
    let status = response.status().as_u16();
    let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn pki_engine(pki: &Pki, extra: &str) -> ClientCertificateAuthenticator {
    let yaml = format!(
        r#"
trust:
  ca_certificates:
    - {root}
clients:
  - client_id: client1
    tls_client_auth_subject_dn: "CN=client1,O=Example"
    tls_client_certificate_bound_access_tokens: true
{extra}"#,
        root = pki.path("root.pem"),
    );
    load_engine(pki.dir.path(), &yaml)
}

// ─────────────────────────────────────────────────────────────────────────────
// tls_client_auth
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pki_client_with_matching_subject_authenticates() {
    // GIVEN: client1 registered with a subject DN, trusting the root CA
    let pki = Pki::new();
    let engine = pki_engine(&pki, "");
    let leaf = pki.leaf("client1");

    // WHEN: client1 presents leaf + intermediate
    let auth = authenticated(&engine, &request("client1", pki.chain(&leaf))).await;

    // THEN: authenticated via tls_client_auth with a leaf-bound cnf
    assert_eq!(auth.client_id(), "client1");
    assert_eq!(auth.method(), ClientAuthenticationMethod::TlsClientAuth);
    assert_eq!(auth.chain().len(), 2);
    assert_eq!(auth.thumbprint(), x5t_s256(&leaf.cert_der));
    assert_eq!(
        auth.cnf_claim(),
        Some(serde_json::json!({ "x5t#S256": x5t_s256(&leaf.cert_der) }))
    );
}

#[tokio::test]
async fn test_pki_client_with_other_subject_is_rejected() {
    let pki = Pki::new();
    let engine = pki_engine(&pki, "");
    let leaf = pki.leaf("client2");

    let err = rejected(&engine, &request("client1", pki.chain(&leaf))).await;

    assert_eq!(err.code(), ErrorCode::InvalidClient);
    assert!(matches!(
        err.failure_reason(),
        Some(FailureReason::SubjectMismatch(_))
    ));
}

#[tokio::test]
async fn test_expired_leaf_is_rejected() {
    let pki = Pki::new();
    let engine = pki_engine(&pki, "");
    let mut params = ClientCertParams::new("client1");
    params.organization = Some("Example");
    params.validity = Validity::Expired;
    let leaf = CertGenerator::issue_client(&params, &pki.intermediate).unwrap();

    let err = rejected(&engine, &request("client1", pki.chain(&leaf))).await;

    assert_eq!(err.failure_reason(), Some(&FailureReason::Expired));
}

#[tokio::test]
async fn test_chain_from_foreign_ca_is_rejected() {
    let pki = Pki::new();
    let engine = pki_engine(&pki, "");
    let foreign = Pki::new();
    let leaf = foreign.leaf("client1");

    let err = rejected(&engine, &request("client1", foreign.chain(&leaf))).await;

    assert!(matches!(
        err.failure_reason(),
        Some(FailureReason::UntrustedChain(_))
    ));
}

#[tokio::test]
async fn test_san_dns_registration() {
    let pki = Pki::new();
    let extra = "  - client_id: api-gw\n    tls_client_auth_san_dns: GW.example.com\n";
    let engine = pki_engine(&pki, extra);

    let mut params = ClientCertParams::new("gateway");
    params.san_dns = vec!["gw.example.com".to_string()];
    let leaf = CertGenerator::issue_client(&params, &pki.intermediate).unwrap();

    let auth = authenticated(&engine, &request("api-gw", pki.chain(&leaf))).await;
    assert_eq!(auth.client_id(), "api-gw");
    assert!(!auth.certificate_bound_access_tokens());
    assert_eq!(auth.cnf_claim(), None);
}

// ─────────────────────────────────────────────────────────────────────────────
// Enumeration resistance
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_client_looks_like_wrong_certificate() {
    // GIVEN: one registered client
    let pki = Pki::new();
    let engine = pki_engine(&pki, "");

    // WHEN: an unregistered id and a registered id with the wrong cert are tried
    let unknown = rejected(&engine, &request("nobody", pki.chain(&pki.leaf("client1")))).await;
    let wrong = rejected(&engine, &request("client1", pki.chain(&pki.leaf("client2")))).await;

    // THEN: reasons differ server-side, responses are identical
    assert_eq!(unknown.failure_reason(), Some(&FailureReason::UnknownClient));
    assert_ne!(unknown.failure_reason(), wrong.failure_reason());
    assert_eq!(unknown.to_string(), wrong.to_string());
    assert_eq!(response_body(unknown).await, response_body(wrong).await);
}

#[tokio::test]
async fn test_method_mismatch_is_invalid_client() {
    // A self-signed single certificate presented for a PKI-registered client
    let pki = Pki::new();
    let engine = pki_engine(&pki, "");
    let cert = CertGenerator::self_signed_client(&ClientCertParams::new("client1")).unwrap();
    let chain = CertificateChain::new(vec![cert.cert_der]).unwrap();

    let err = rejected(&engine, &request("client1", chain)).await;

    assert_eq!(err.code(), ErrorCode::InvalidClient);
    assert!(matches!(
        err.failure_reason(),
        Some(FailureReason::MethodMismatch { .. })
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// self_signed_tls_client_auth
// ─────────────────────────────────────────────────────────────────────────────

fn pinned_engine(dir: &Path, pem_path: &str) -> ClientCertificateAuthenticator {
    let yaml = format!(
        r#"
clients:
  - client_id: device-7
    token_endpoint_auth_method: self_signed_tls_client_auth
    self_signed_certificates:
      - {pem_path}
    tls_client_certificate_bound_access_tokens: true
"#
    );
    load_engine(dir, &yaml)
}

#[tokio::test]
async fn test_pinned_certificate_exact_match() {
    let dir = tempfile::tempdir().unwrap();
    let cert = CertGenerator::self_signed_client(&ClientCertParams::new("device-7")).unwrap();
    CertGenerator::write_to_dir(&cert, dir.path(), "device").unwrap();
    let engine = pinned_engine(dir.path(), &dir.path().join("device.crt").display().to_string());

    let chain = CertificateChain::new(vec![cert.cert_der.clone()]).unwrap();
    let auth = authenticated(&engine, &request("device-7", chain)).await;

    assert_eq!(auth.method(), ClientAuthenticationMethod::SelfSignedTlsClientAuth);
    assert_eq!(auth.thumbprint(), x5t_s256(&cert.cert_der));
}

#[tokio::test]
async fn test_pinned_certificate_single_byte_flip_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cert = CertGenerator::self_signed_client(&ClientCertParams::new("device-7")).unwrap();
    CertGenerator::write_to_dir(&cert, dir.path(), "device").unwrap();
    let engine = pinned_engine(dir.path(), &dir.path().join("device.crt").display().to_string());

    let mut tampered = cert.cert_der.to_vec();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;
    let chain = CertificateChain::new(vec![tampered.into()]).unwrap();

    let err = rejected(&engine, &request("device-7", chain)).await;
    assert_eq!(
        err.failure_reason(),
        Some(&FailureReason::PinnedCertificateMismatch)
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Request validation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_client_id_must_be_present_once_and_non_empty() {
    let pki = Pki::new();
    let engine = pki_engine(&pki, "");
    let chain = pki.chain(&pki.leaf("client1"));

    let cases: [&[(&str, &str)]; 3] = [
        &[],
        &[("client_id", "")],
        &[("client_id", "client1"), ("client_id", "client1")],
    ];
    for pairs in cases {
        let request = AuthenticationRequest::new(
            RequestParameters::from_pairs(pairs.iter().copied()),
            Some(chain.clone()),
        );
        let err = rejected(&engine, &request).await;
        assert_eq!(err.code(), ErrorCode::InvalidRequest, "pairs: {pairs:?}");
        assert_eq!(response_body(err).await.0, 400);
    }
}

#[tokio::test]
async fn test_no_certificate_is_not_applicable() {
    let pki = Pki::new();
    let engine = pki_engine(&pki, "");
    let request = AuthenticationRequest::new(
        RequestParameters::from_pairs([("client_id", "client1")]),
        None,
    );

    let outcome = engine.authenticate(&request).await.unwrap();
    assert!(matches!(outcome, AuthenticationOutcome::NotApplicable));
}

#[tokio::test]
async fn test_authorization_code_parameters_are_returned() {
    let pki = Pki::new();
    let engine = pki_engine(&pki, "");
    let request = AuthenticationRequest::new(
        RequestParameters::from_form_urlencoded(
            b"grant_type=authorization_code&code=abc123&client_id=client1&scope=a&scope=b",
        ),
        Some(pki.chain(&pki.leaf("client1"))),
    );

    let auth = authenticated(&engine, &request).await;

    let additional = auth.additional_parameters();
    assert!(!additional.contains_key("client_id"));
    assert!(additional.contains_key("code"));
    assert!(additional.contains_key("scope"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Revocation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_crl_revoked_leaf_is_rejected() {
    // GIVEN: a root issuing leaves directly, with a CRL revoking one of them
    let pki = Pki::new();
    let mut params = ClientCertParams::new("client1");
    params.organization = Some("Example");
    let revoked = CertGenerator::issue_client(&params, &pki.root).unwrap();
    let good = CertGenerator::issue_client(&params, &pki.root).unwrap();
    let crl = pki.write("root.crl", &CertGenerator::issue_crl(&pki.root, &[&revoked]).unwrap());

    let extra = format!("revocation:\n  policy: fail_closed\n  crls:\n    - {crl}\n");
    let engine = pki_engine(&pki, &extra);
    let chain = |leaf: &GeneratedCert| {
        CertificateChain::new(vec![leaf.cert_der.clone(), pki.root.cert().cert_der.clone()])
            .unwrap()
    };

    // WHEN / THEN: the revoked leaf fails, its sibling passes
    let err = rejected(&engine, &request("client1", chain(&revoked))).await;
    assert_eq!(err.failure_reason(), Some(&FailureReason::Revoked));
    authenticated(&engine, &request("client1", chain(&good))).await;
}

#[test]
fn test_revocation_section_requires_policy() {
    let pki = Pki::new();
    let path = pki.dir.path().join("mtls.yaml");
    std::fs::write(&path, "revocation:\n  crls: []\n").unwrap();

    assert!(Config::load(Some(&path)).is_err());
}

#[test]
fn test_fail_closed_revocation_without_crls_is_rejected_at_load() {
    // GIVEN: revocation enabled with no CRL files
    let pki = Pki::new();
    let path = pki.dir.path().join("mtls.yaml");
    std::fs::write(&path, "revocation:\n  policy: fail_closed\n").unwrap();

    // WHEN / THEN: loading fails instead of silently skipping revocation
    let err = Config::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("revocation.crls"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Timeouts and infrastructure faults
// ─────────────────────────────────────────────────────────────────────────────

struct SlowRegistry;

#[async_trait::async_trait]
impl ClientRegistry for SlowRegistry {
    async fn find_by_client_id(
        &self,
        _client_id: &str,
    ) -> Result<Option<Arc<RegisteredClient>>, RegistryError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(None)
    }
}

struct DownRegistry;

#[async_trait::async_trait]
impl ClientRegistry for DownRegistry {
    async fn find_by_client_id(
        &self,
        _client_id: &str,
    ) -> Result<Option<Arc<RegisteredClient>>, RegistryError> {
        Err(RegistryError::Unavailable("connection refused".into()))
    }
}

fn engine_over(registry: Arc<dyn ClientRegistry>) -> ClientCertificateAuthenticator {
    ClientCertificateAuthenticator::new(
        registry,
        Arc::new(StaticTrustStore::new(TrustAnchors::empty())),
        TimeoutConfig {
            registry: Duration::from_millis(50),
            ..TimeoutConfig::default()
        },
    )
}

#[tokio::test]
async fn test_slow_registry_times_out_as_invalid_client() {
    let pki = Pki::new();
    let engine = engine_over(Arc::new(SlowRegistry));

    let err = rejected(&engine, &request("client1", pki.chain(&pki.leaf("client1")))).await;

    assert_eq!(err.code(), ErrorCode::InvalidClient);
    assert_eq!(
        err.failure_reason(),
        Some(&FailureReason::Timeout(LookupStage::Registry))
    );
}

#[tokio::test]
async fn test_registry_outage_is_server_error() {
    let pki = Pki::new();
    let engine = engine_over(Arc::new(DownRegistry));

    let err = rejected(&engine, &request("client1", pki.chain(&pki.leaf("client1")))).await;

    assert_eq!(err.code(), ErrorCode::ServerError);
    let (status, body) = response_body(err).await;
    assert_eq!(status, 500);
    assert!(!body.contains("connection refused"));
}

struct DownTrustStore;

#[async_trait::async_trait]
impl TrustStore for DownTrustStore {
    async fn trust_anchors(&self) -> Result<Arc<TrustAnchors>, TrustStoreError> {
        Err(TrustStoreError::Unavailable("anchor backend offline".into()))
    }
}

#[tokio::test]
async fn test_trust_store_outage_is_server_error_for_unknown_clients_too() {
    // GIVEN: client1 registered for tls_client_auth, trust store down
    let registry = InMemoryClientRegistry::new();
    registry.register(RegisteredClient {
        client_id: "client1".into(),
        trust: ClientTrust::Pki(SubjectMatcher::SubjectDn(
            DnPattern::parse("CN=client1,O=Example").unwrap(),
        )),
        certificate_bound_access_tokens: false,
    });
    let engine = ClientCertificateAuthenticator::new(
        Arc::new(registry),
        Arc::new(DownTrustStore),
        TimeoutConfig::default(),
    );
    let pki = Pki::new();
    let chain = pki.chain(&pki.leaf("client1"));

    // WHEN: the registered id and an unregistered id present the same chain
    let known = rejected(&engine, &request("client1", chain.clone())).await;
    let unknown = rejected(&engine, &request("nobody", chain)).await;

    // THEN: both surface the outage, indistinguishably
    assert_eq!(known.code(), ErrorCode::ServerError);
    assert_eq!(unknown.code(), ErrorCode::ServerError);
    let known = response_body(known).await;
    assert_eq!(known.0, 500);
    assert!(!known.1.contains("anchor backend offline"));
    assert_eq!(known, response_body(unknown).await);
}
