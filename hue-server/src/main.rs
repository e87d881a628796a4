use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hf_hub::api::tokio::ApiBuilder;
use hue_core::{Generator, StableDiffusionLoader};
use hue_server::{config::Args, credentials, router, AppState};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let credential = credentials::resolve(args.hf_token.clone(), &args.secrets_file)?;
    tracing::info!(source = ?credential.source, "resolved hub credential");
    let mut api = ApiBuilder::new().with_progress(false);
    if let Some(token) = credential.token {
        api = api.with_token(Some(token));
    }
    let api = api.build().context("failed to create hf hub API")?;

    let spec = args.control_spec();
    let loader = StableDiffusionLoader::new(api, args.pipeline_options(&spec));
    tracing::info!(
        profile = %spec.profile,
        model = %args.model,
        deadline_secs = spec.deadline.map(|d| d.as_secs()),
        "configured generator"
    );

    // Build application state and wrap in Arc.
    let state = Arc::new(AppState::new(Generator::new(spec, loader), args.max_sessions));
    if args.preload {
        state.generator.pipeline().get().await?;
    }

    // --- Build axum router with shared state ---
    let app = router(state);

    // --- Start the server ---
    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!("started server on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
