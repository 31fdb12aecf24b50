//! Command-line validator for signed client certificates.
//!
//! # Purpose
//! Reads a compact token from a file or stdin, validates it against the
//! configured trust lists and prints the result as JSON.
//!
//! # Notes
//! Configuration comes from `CERTS_*` environment variables or the YAML file
//! named by `CERTS_CONFIG`; command-line flags win over both. The exit status
//! is 0 for a trusted token, 1 for a valid but untrusted one and 2 otherwise.
mod observability;

use anyhow::{Context, Result};
use certs_trust::{KeyHint, TrustConfig, TrustValidator, ValidationResult};
use clap::Parser;
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "certs-validate")]
#[command(about = "Validate a signed client certificate against trusted lists")]
struct Args {
    /// File holding the token; stdin when omitted or "-"
    token: Option<PathBuf>,

    /// Fetch timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Additional trusted list URI, searched after the default list
    #[arg(long = "trusted-list")]
    trusted_lists: Vec<String>,

    /// Do not consult the default trusted list
    #[arg(long)]
    no_default_list: bool,

    /// Print the key resolved with this JSON hint instead of validating
    #[arg(long)]
    hint: Option<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "CERTS_LOG", default_value = "warn")]
    log: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    observability::init_tracing(&args.log);
    match run(args).await {
        Ok(status) => ExitCode::from(status),
        Err(error) => {
            let message = format!("{error:#}");
            tracing::error!(error = %message, "certs-validate failed");
            eprintln!("error: {message}");
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> Result<u8> {
    let config = apply_args(TrustConfig::from_env_or_yaml()?, &args);
    let token = read_token(args.token.as_deref(), std::io::stdin().lock())?;
    let validator = TrustValidator::with_http(config.cache_policy());

    if let Some(hint) = &args.hint {
        let hint: Value = serde_json::from_str(hint).context("parse --hint as JSON")?;
        let hint = KeyHint::from_json(&hint)?;
        let jwk = validator
            .resolve_key_for_signature(&token, &hint, Duration::from_millis(config.timeout_ms))
            .await?;
        println!("{}", serde_json::to_string_pretty(&jwk)?);
        return Ok(0);
    }

    let result = validator.validate(&token, &config.validate_options()).await;
    tracing::info!(trusted = result.trusted, valid = result.valid, "validated token");
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(status(&result))
}

fn apply_args(mut config: TrustConfig, args: &Args) -> TrustConfig {
    if let Some(timeout_ms) = args.timeout_ms.filter(|value| *value > 0) {
        config.timeout_ms = timeout_ms;
    }
    config
        .additional_trusted_list_uris
        .extend(args.trusted_lists.iter().cloned());
    if args.no_default_list {
        config.disable_default_trusted_list_uri = true;
    }
    config
}

fn read_token(path: Option<&Path>, mut stdin: impl Read) -> Result<String> {
    let raw = match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("read token file {}", path.display()))?,
        _ => {
            let mut raw = String::new();
            stdin.read_to_string(&mut raw).context("read token from stdin")?;
            raw
        }
    };
    let token = raw.trim();
    anyhow::ensure!(!token.is_empty(), "no token given");
    Ok(token.to_string())
}

fn status(result: &ValidationResult) -> u8 {
    match (result.trusted, result.valid) {
        (true, _) => 0,
        (false, true) => 1,
        (false, false) => 2,
    }
}
