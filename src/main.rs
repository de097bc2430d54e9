//! mtls-client-auth - OAuth2 mutual-TLS client authentication tooling
//!
//! Offline verification of client certificate chains, thumbprints,
//! configuration checks and test PKI generation.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mtls_client_auth::{
    cli::{Cli, Command, SubjectArgs, TlsCommand},
    client_auth::{
        AuthenticationOutcome, AuthenticationRequest, CertificateChain,
        ClientCertificateAuthenticator, RequestParameters, params::CLIENT_ID, x5t_s256,
    },
    config::Config,
    setup_tracing,
    tls::{
        CaParams, CertGenerator, CertificateAuthority, ClientCertParams, GeneratedCert, Validity,
        load_certs,
    },
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Command::Verify {
            ref client_id,
            ref chain,
            ref params,
        } => run_verify(cli.config.as_deref(), client_id.as_deref(), chain, params).await,
        Command::Thumbprint { ref cert } => run_thumbprint(cert),
        Command::CheckConfig => run_check_config(cli.config.as_deref()),
        Command::Tls(cmd) => run_tls_command(cmd),
    }
}

fn load_engine(config_path: Option<&Path>) -> Option<(Config, ClientCertificateAuthenticator)> {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            eprintln!("❌ {e}");
            return None;
        }
    };
    match ClientCertificateAuthenticator::from_config(&config) {
        Ok(engine) => Some((config, engine)),
        Err(e) => {
            eprintln!("❌ {e}");
            None
        }
    }
}

/// Run the engine against a PEM chain
async fn run_verify(
    config_path: Option<&Path>,
    client_id: Option<&str>,
    chain: &Path,
    extra: &[(String, String)],
) -> ExitCode {
    let Some((_, engine)) = load_engine(config_path) else {
        return ExitCode::FAILURE;
    };

    let certs = match load_certs(&chain.to_string_lossy()) {
        Ok(certs) => certs,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut parameters = RequestParameters::new();
    if let Some(client_id) = client_id {
        parameters.append(CLIENT_ID, client_id);
    }
    for (name, value) in extra {
        parameters.append(name.as_str(), value.as_str());
    }

    let request = AuthenticationRequest::new(parameters, CertificateChain::new(certs));
    match engine.authenticate(&request).await {
        Ok(AuthenticationOutcome::Authenticated(auth)) => {
            println!("✅ {} authenticated ({})", auth.client_id(), auth.method());
            match serde_json::to_string_pretty(&auth.summary()) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("❌ Failed to serialize result: {e}"),
            }
            ExitCode::SUCCESS
        }
        Ok(AuthenticationOutcome::NotApplicable) => {
            println!("No client certificate presented, mTLS not applicable");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("❌ {} ({}): {}", e.code().as_str(), e.code().status(), e.detail());
            ExitCode::FAILURE
        }
    }
}

/// Print the `x5t#S256` of a certificate
fn run_thumbprint(cert: &Path) -> ExitCode {
    match load_certs(&cert.to_string_lossy()) {
        Ok(certs) => {
            // load_certs never returns an empty list
            if let Some(leaf) = certs.first() {
                println!("{}", x5t_s256(leaf));
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

/// Validate configuration and referenced PEM material
fn run_check_config(config_path: Option<&Path>) -> ExitCode {
    let Some((config, _)) = load_engine(config_path) else {
        return ExitCode::FAILURE;
    };

    println!("✅ Configuration valid");
    println!("   Trust anchor files: {}", config.trust.ca_certificates.len());
    match config.revocation {
        Some(ref rev) => println!("   Revocation: {:?}, {} CRL file(s)", rev.policy, rev.crls.len()),
        None => println!("   Revocation: disabled"),
    }
    println!("   Clients: {}", config.clients.len());
    info!(clients = config.clients.len(), "Configuration checked");
    ExitCode::SUCCESS
}

/// Run certificate generation commands
fn run_tls_command(cmd: TlsCommand) -> ExitCode {
    let result = match cmd {
        TlsCommand::InitCa { cn, days, out_dir } => CertGenerator::init_ca(&CaParams {
            cn: &cn,
            validity_days: days,
        })
        .and_then(|ca| {
            CertGenerator::write_to_dir(ca.cert(), &out_dir, "ca")?;
            Ok(format!("CA written to {}/ca.crt", out_dir.display()))
        }),

        TlsCommand::IssueClient {
            ca_cert,
            ca_key,
            name,
            subject,
            out_dir,
        } => issue_client(&ca_cert, &ca_key, &name, &subject, &out_dir),

        TlsCommand::SelfSigned {
            name,
            subject,
            out_dir,
        } => CertGenerator::self_signed_client(&client_params(&subject)).and_then(|cert| {
            CertGenerator::write_to_dir(&cert, &out_dir, &name)?;
            Ok(format!(
                "Self-signed certificate written to {}/{name}.crt (x5t#S256 {})",
                out_dir.display(),
                x5t_s256(&cert.cert_der)
            ))
        }),
    };

    match result {
        Ok(message) => {
            println!("✅ {message}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

fn issue_client(
    ca_cert: &Path,
    ca_key: &Path,
    name: &str,
    subject: &SubjectArgs,
    out_dir: &Path,
) -> mtls_client_auth::Result<String> {
    let ca = CertificateAuthority::from_pem(
        &std::fs::read_to_string(ca_cert)?,
        &std::fs::read_to_string(ca_key)?,
    )?;
    let cert: GeneratedCert = CertGenerator::issue_client(&client_params(subject), &ca)?;
    CertGenerator::write_to_dir(&cert, out_dir, name)?;

    let chain_path = out_dir.join(format!("{name}-chain.pem"));
    std::fs::write(&chain_path, format!("{}{}", cert.cert_pem, ca.cert().cert_pem))?;

    Ok(format!(
        "Client certificate written to {}/{name}.crt, chain to {}",
        out_dir.display(),
        chain_path.display()
    ))
}

fn client_params(subject: &SubjectArgs) -> ClientCertParams<'_> {
    ClientCertParams {
        cn: &subject.cn,
        organization: subject.org.as_deref(),
        ou: subject.ou.as_deref(),
        san_dns: subject.san_dns.clone(),
        san_uris: subject.san_uri.clone(),
        validity: if subject.expired {
            Validity::Expired
        } else {
            Validity::Days(subject.days)
        },
    }
}
