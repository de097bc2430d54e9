//! Command-line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// OAuth2 mutual-TLS client authentication (RFC 8705)
#[derive(Parser, Debug)]
#[command(name = "mtls-client-auth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MTLS_AUTH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "warn",
        env = "MTLS_AUTH_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MTLS_AUTH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Authenticate a client offline against a PEM certificate chain
    Verify {
        /// `client_id` request parameter (omit to test `invalid_request`)
        #[arg(long)]
        client_id: Option<String>,

        /// PEM file with the presented chain, leaf first
        #[arg(long, required = true)]
        chain: PathBuf,

        /// Extra request parameter as `name=value` (repeatable)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },

    /// Print the `x5t#S256` thumbprint of the first certificate in a PEM file
    Thumbprint {
        /// PEM certificate file
        #[arg(required = true)]
        cert: PathBuf,
    },

    /// Load and validate configuration and every referenced PEM file
    CheckConfig,

    /// Certificate generation for development and test setups
    #[command(subcommand)]
    Tls(TlsCommand),
}

/// Certificate generation subcommands
#[derive(Subcommand, Debug)]
pub enum TlsCommand {
    /// Generate a root CA (`ca.crt`, `ca.key`)
    InitCa {
        /// Common Name of the CA
        #[arg(long, default_value = "mtls-client-auth Root CA")]
        cn: String,

        /// Validity in days
        #[arg(long, default_value_t = 3650)]
        days: u32,

        /// Output directory
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Issue a client certificate signed by a CA
    IssueClient {
        /// CA certificate (PEM)
        #[arg(long, default_value = "ca.crt")]
        ca_cert: PathBuf,

        /// CA private key (PEM)
        #[arg(long, default_value = "ca.key")]
        ca_key: PathBuf,

        /// Output file stem (`<name>.crt`, `<name>.key`, `<name>-chain.pem`)
        #[arg(long, default_value = "client")]
        name: String,

        #[command(flatten)]
        subject: SubjectArgs,

        /// Output directory
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Generate a self-signed client certificate for pinning
    SelfSigned {
        /// Output file stem (`<name>.crt`, `<name>.key`)
        #[arg(long, default_value = "client")]
        name: String,

        #[command(flatten)]
        subject: SubjectArgs,

        /// Output directory
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

/// Subject and validity of a generated client certificate
#[derive(Args, Debug)]
pub struct SubjectArgs {
    /// Common Name
    #[arg(long, required = true)]
    pub cn: String,

    /// Organization
    #[arg(long)]
    pub org: Option<String>,

    /// Organizational Unit
    #[arg(long)]
    pub ou: Option<String>,

    /// DNS subject alternative name (repeatable)
    #[arg(long)]
    pub san_dns: Vec<String>,

    /// URI subject alternative name, e.g. a SPIFFE ID (repeatable)
    #[arg(long)]
    pub san_uri: Vec<String>,

    /// Validity in days
    #[arg(long, default_value_t = 365, conflicts_with = "expired")]
    pub days: u32,

    /// Generate an already expired certificate
    #[arg(long)]
    pub expired: bool,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))
}
