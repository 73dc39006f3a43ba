//! gadq: run action descriptions behind a signed capability token.
//!
//! - `gadq run <file>`: one gated run, composite result printed as JSON
//! - `gadq issue` / `gadq verify`: token tooling
//! - `gadq rotate`: force audit log rotation

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use gadq_core::error::{GadqError, Result};
use gadq_gateway::{app_state::AppState, config};

#[derive(Parser)]
#[command(name = "gadq", version, about)]
struct Cli {
    /// YAML config; built-in defaults are used when the file does not exist.
    #[arg(long, global = true, default_value = "gadq.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute one action description.
    Run {
        file: PathBuf,
        #[arg(long)]
        origin: Option<String>,
        #[arg(long)]
        ttl: Option<i64>,
    },
    /// Issue a token and print it.
    Issue {
        #[arg(long)]
        origin: String,
        #[arg(long)]
        target: String,
        #[arg(long)]
        ttl: Option<i64>,
    },
    /// Validate a token stored as JSON.
    Verify { token: PathBuf },
    /// Rotate the audit log now.
    Rotate,
}

#[tokio::main]
async fn main() -> ExitCode {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.code().as_str(), error = %e, "gadq failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = if std::path::Path::new(&cli.config).exists() {
        config::load_from_file(&cli.config)?
    } else {
        tracing::info!(path = %cli.config, "config not found; using defaults");
        config::GadqConfig::with_defaults()
    };
    let state = AppState::new(cfg)?;

    match cli.command {
        Command::Run { file, origin, ttl } => {
            let exec = &state.cfg().executor;
            let origin = origin.unwrap_or_else(|| exec.default_origin.clone());
            let ttl = ttl.unwrap_or(exec.default_ttl);

            let rotator = state.spawn_rotator();
            let outcome = state.executor().run(&file, &origin, ttl).await;
            if let Some(r) = rotator {
                r.stop().await;
            }
            print_json(&outcome?)
        }
        Command::Issue { origin, target, ttl } => {
            let ttl = ttl.unwrap_or(state.cfg().executor.default_ttl);
            let perms = state.cfg().executor.permissions.clone();
            let token = state.tokens().generate(&origin, &target, &perms, ttl)?;
            print_json(&token)
        }
        Command::Verify { token } => {
            let raw = std::fs::read_to_string(&token)
                .map_err(|e| GadqError::BadRequest(format!("{}: {e}", token.display())))?;
            let value: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|e| GadqError::BadRequest(format!("token is not json: {e}")))?;
            let valid = state.tokens().validate_value(&value, false);
            print_json(&serde_json::json!({ "valid": valid }))
        }
        Command::Rotate => {
            let archive = state.audit().rotate()?;
            let archive = archive.map(|p| p.display().to_string());
            print_json(&serde_json::json!({ "archive": archive }))
        }
    }
}

fn print_json<T: serde::Serialize>(v: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(v)
        .map_err(|e| GadqError::Internal(format!("encode output: {e}")))?;
    println!("{s}");
    Ok(())
}
