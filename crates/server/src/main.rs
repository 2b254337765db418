//! Blueprint Server
//!
//! `blueprint serve` starts the HTTP API; `blueprint run` executes a single
//! stage from the command line against the same database.

use anyhow::{Context, Result};
use blueprint_core::models::RadkitModelClient;
use blueprint_core::state::{BlueprintDb, DEFAULT_DB_PATH};
use blueprint_core::swarm::{
    CoordinatorConfig, ExecutionContext, ProjectScope, StageRequest, DEFAULT_CONFIG_PATH,
};
use blueprint_server::{router, AppState};
use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Clone)]
#[command(author, version, about = "Blueprint - staged product document generation")]
struct Args {
    /// SQLite database path
    #[arg(long, env = "BLUEPRINT_DB", default_value = DEFAULT_DB_PATH, global = true)]
    db: PathBuf,
    /// Coordinator config (JSON)
    #[arg(long, env = "BLUEPRINT_CONFIG", default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,
    /// Override the global LLM provider (anthropic, openai, gemini, ...)
    #[arg(long, env = "BLUEPRINT_PROVIDER", global = true)]
    provider: Option<String>,
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the HTTP server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "BLUEPRINT_PORT", default_value = "8080")]
        port: u16,
        /// Interface to bind
        #[arg(long, env = "BLUEPRINT_HOST", default_value = "127.0.0.1")]
        host: IpAddr,
    },
    /// Run one stage and print the resulting document
    Run {
        #[arg(short, long)]
        tenant: String,
        #[arg(short, long)]
        project: String,
        /// 1 about, 2 standards, 3 architecture, 4 plan
        step: u8,
        /// Stage input as JSON, e.g. '{"idea_description": "..."}'
        #[arg(short, long, default_value = "{}")]
        input: String,
        /// Output language
        #[arg(short, long)]
        language: Option<String>,
        /// Retry when the generated document fails validation
        #[arg(long)]
        regenerate: bool,
    },
}

fn init_tracing() -> Result<()> {
    // JSON logs in production (BLUEPRINT_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("BLUEPRINT_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env()
        .add_directive("blueprint_server=info".parse()?)
        .add_directive("blueprint_core=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn build_state(args: &Args) -> Result<AppState> {
    let mut config = CoordinatorConfig::load_from(&args.config)?;
    if let Some(provider) = &args.provider {
        config.routing.override_provider(provider)?;
    }
    let db = BlueprintDb::open_at(&args.db)?;
    let model = Arc::new(RadkitModelClient::new(config.routing.clone()));
    Ok(AppState::new(config, &db, model))
}

async fn serve(state: AppState, host: IpAddr, port: u16) -> Result<()> {
    let app = router(Arc::new(state));

    let addr = SocketAddr::new(host, port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Blueprint server running at http://{}", addr);
    tracing::info!("   Stages:    POST /api/v1/projects/:project_id/stages/:step");
    tracing::info!("   Events:    GET  /api/v1/projects/:project_id/events");
    tracing::info!("   Documents: GET  /api/v1/projects/:project_id/documents/:type/latest");
    tracing::info!("   OpenAPI:   GET  /api/v1/openapi.json");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_once(
    state: AppState,
    ctx: ExecutionContext,
    request: StageRequest,
) -> Result<()> {
    let mut progress = state.bus.subscribe(ProjectScope::new(ctx.tenant_id(), ctx.project_id()));
    let mut printer = tokio::spawn(async move {
        while let Some(event) = progress.recv().await {
            let terminal = event.status.is_terminal();
            eprintln!(
                "[{:>3}%] {:?}{}",
                event.progress_percent,
                event.status,
                event.message.as_deref().map(|m| format!(": {}", m)).unwrap_or_default()
            );
            if terminal {
                break;
            }
        }
    });

    let result = state.coordinator.run_stage(&ctx, request).await;
    // A failed insert of the execution row publishes nothing
    if tokio::time::timeout(Duration::from_millis(250), &mut printer)
        .await
        .is_err()
    {
        printer.abort();
    }

    match result {
        Ok(outcome) => {
            eprintln!(
                "{} v{} (correlation {})",
                outcome.document.document_type, outcome.document.version, outcome.correlation_id
            );
            println!("{}", outcome.document.content);
            Ok(())
        }
        Err(e) => {
            let public = e.public();
            anyhow::bail!("{} [{}] correlation {}", public.message, public.code, public.correlation_id)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    dotenvy::from_path(".blueprint/.env").ok();
    init_tracing()?;

    let args = Args::parse();
    let state = build_state(&args)?;

    match args.command.clone() {
        None => serve(state, IpAddr::from([127, 0, 0, 1]), 8080).await,
        Some(CliCommand::Serve { port, host }) => serve(state, host, port).await,
        Some(CliCommand::Run {
            tenant,
            project,
            step,
            input,
            language,
            regenerate,
        }) => {
            let input: serde_json::Value =
                serde_json::from_str(&input).context("--input must be valid JSON")?;
            let mut builder = ExecutionContext::builder(tenant, project, step);
            if let Some(language) = language {
                builder = builder.language(language);
            }
            let ctx = builder.build().map_err(|e| anyhow::anyhow!("{}", e))?;
            run_once(
                state,
                ctx,
                StageRequest {
                    input,
                    regenerate_on_invalid: regenerate,
                },
            )
            .await
        }
    }
}
