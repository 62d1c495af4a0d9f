use anyhow::Context;
use roofscan_backend::{create_app, init_tracing, pipeline_from_env, AppState, PipelineConfig, ServerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting RoofScan Backend Server");

    let pipeline_config = PipelineConfig::from_env();
    let server_config = ServerConfig::from_env();
    info!("Pipeline config: {:?}", pipeline_config);

    let addr = server_config.bind_addr.clone();
    let app = create_app(AppState::new(pipeline_from_env(pipeline_config), server_config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
