//! Zentinel WS-SecurityPolicy binary.
//!
//! Run with: `zentinel-wss-policy check --config policy.yaml message.xml`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_wss_policy::derivation::{
    derive_key_from_password, derive_secret_key, DEFAULT_ITERATIONS, DEFAULT_LABEL,
};
use zentinel_wss_policy::{MessageOptions, PolicyValidator, Verdict, WssPolicyConfig};

/// WS-SecurityPolicy enforcement for SOAP messages.
///
/// Checks messages against a security policy and derives keys from
/// UsernameToken passwords.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check SOAP messages against a policy
    Check {
        /// Path to configuration file (YAML)
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,

        /// Treat the messages as received over a secured transport
        #[arg(long)]
        transport_secure: bool,

        /// Print one JSON object per message
        #[arg(long)]
        json: bool,

        /// Message files
        #[arg(required = true)]
        messages: Vec<PathBuf>,
    },

    /// Derive key material from a UsernameToken password
    Derive {
        #[arg(short, long)]
        password: String,

        /// Salt for the password-derived key (hex)
        #[arg(long, default_value = "")]
        salt_hex: String,

        #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
        iterations: u32,

        /// Derive a P_SHA1 secret key instead, using this nonce (hex)
        #[arg(long, requires = "created")]
        nonce_hex: Option<String>,

        /// Creation time mixed into the secret key seed
        #[arg(long)]
        created: Option<String>,

        #[arg(long, default_value = DEFAULT_LABEL)]
        label: String,

        /// Secret key length in bytes
        #[arg(long, default_value_t = 32)]
        length: usize,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match args.command {
        Command::Check {
            config,
            transport_secure,
            json,
            messages,
        } => check(&config, transport_secure, json, &messages).await,
        Command::Derive {
            password,
            salt_hex,
            iterations,
            nonce_hex,
            created,
            label,
            length,
        } => {
            let key = match (nonce_hex, created) {
                (Some(nonce_hex), Some(created)) => {
                    let nonce = hex::decode(&nonce_hex).context("Invalid nonce hex")?;
                    derive_secret_key(password.as_bytes(), &label, &nonce, &created, length)?
                }
                _ => {
                    let salt = hex::decode(&salt_hex).context("Invalid salt hex")?;
                    derive_key_from_password(&password, &salt, iterations).to_vec()
                }
            };
            println!("{}", hex::encode(key));
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn load_config(path: &Path) -> Result<WssPolicyConfig> {
    if !path.exists() {
        info!("Config file not found, using defaults");
        return Ok(WssPolicyConfig::default());
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .context("Failed to read config file")?;
    WssPolicyConfig::from_yaml_str(&content).context("Failed to parse config file")
}

async fn check(
    config_path: &Path,
    transport_secure: bool,
    json: bool,
    messages: &[PathBuf],
) -> Result<ExitCode> {
    info!("Config file: {}", config_path.display());
    let config = load_config(config_path).await?;

    info!(
        version = %config.version,
        envelope = %config.envelope.namespace,
        transport_security = config.transport.security_active || transport_secure,
        bsp_enforced = config.bsp.enforce,
        "Configuration loaded"
    );

    let validator = PolicyValidator::new(config).context("Invalid policy configuration")?;
    let mut all_satisfied = true;

    for path in messages {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let options = MessageOptions {
            transport_security_active: transport_secure.then_some(true),
            ..Default::default()
        };

        let (status, detail) = match validator.validate_with(&data, options) {
            Ok(result) => match result.verdict {
                Verdict::Satisfied => ("satisfied", String::new()),
                Verdict::Violated(violation) => ("violated", violation.to_string()),
                Verdict::Incomplete(reason) => ("incomplete", reason),
            },
            Err(e) => ("error", format!("{} ({})", e, e.code())),
        };
        all_satisfied &= status == "satisfied";

        if json {
            let line = serde_json::json!({
                "message": path.display().to_string(),
                "status": status,
                "detail": detail,
            });
            println!("{}", line);
        } else if detail.is_empty() {
            println!("{}: {}", path.display(), status);
        } else {
            println!("{}: {}: {}", path.display(), status, detail);
        }
    }

    Ok(if all_satisfied {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
