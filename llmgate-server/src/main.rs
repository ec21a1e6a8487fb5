//! LLM Gateway - Headless Daemon
//!
//! An OpenAI-compatible reverse proxy that:
//! - Authenticates callers with Argon2id-hashed API keys
//! - Routes `/azure/openai/v1/*` and `/openai/v1/*` to the registered upstream
//! - Streams responses back chunk by chunk
//!
//! Access via: http://localhost:8000

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod bootstrap;
mod cli;

use cli::{Cli, Commands, GenerateKeyArgs};
use llmgate_core::auth::{generate_key, Argon2idHasher, NewKey};
use llmgate_core::proxy::{build_router, serve};
use llmgate_types::AuthConfig;

fn init_tracing(level: &str) -> Result<WorkerGuard> {
    tracing_log::LogTracer::init().context("failed to bridge log records")?;

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; variables may come from the environment.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(&cli.log_level)?;

    let config = cli.gateway.to_config();
    config.check().context("invalid configuration")?;

    match &cli.command {
        Some(Commands::GenerateKey(args)) => issue_key(&config.auth, args),
        Some(Commands::Serve) | None => run_server(&cli, &config).await,
    }
}

async fn run_server(cli: &Cli, config: &llmgate_types::GatewayConfig) -> Result<()> {
    info!("LLM Gateway v{} starting...", env!("CARGO_PKG_VERSION"));

    let deps = bootstrap::build_dependencies(
        config,
        cli.gateway.keys_file.as_deref(),
        cli.gateway.policies_file.as_deref(),
    )
    .await?;
    let router = build_router(deps);

    let addr = config.proxy.socket_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    serve(listener, router).await.context("server error")?;
    info!("Server shutdown complete");
    Ok(())
}

fn issue_key(auth: &AuthConfig, args: &GenerateKeyArgs) -> Result<()> {
    let hasher = Argon2idHasher::from(auth);
    let expires_at = args
        .expires_in_days
        .map(|days| chrono::Utc::now() + chrono::Duration::days(i64::from(days)));
    let new_key = NewKey {
        tenant: args.tenant.clone(),
        app: args.app.clone(),
        user_id: args.user_id.clone(),
        expires_at,
        metadata: args.metadata_map(),
    };

    let (token, record) = generate_key(&hasher, new_key).context("failed to hash key")?;
    info!(key_id = %record.key_id, tenant = %record.tenant, app = %record.app, "Issued API key");

    // The token is shown once; only the record is meant to be stored.
    println!("token: {token}");
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
