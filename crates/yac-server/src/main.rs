//! yac — the configurator's HTTP process: reads `YAC_*` environment
//! configuration (§6.2), constructs the shared repo gate and OIDC
//! verifier, and serves the §6.1 route table.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use yac_core::config::Config;
use yac_server::auth::OidcVerifier;
use yac_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("yac={},tower_http=info", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let repo = yac_repo::gate::GitRepo::new(
        "/tmp/yac-repo",
        config.repo.url.clone(),
        config.repo.branch.clone(),
        config.repo.ssh_key_file.clone(),
        config.repo.ssh_known_hosts_file.clone(),
        config.repo.dirty_max_age_minutes,
    );
    let verifier: Box<dyn yac_server::auth::Verifier> = Box::new(OidcVerifier::new(config.oidc.url.clone()));

    let state = Arc::new(AppState::new(config, repo, verifier)?);
    let app = yac_server::router(state.clone());

    let bind_addr: SocketAddr = format!("0.0.0.0:{}", std::env::var("YAC_PORT").unwrap_or_else(|_| "8080".into()))
        .parse()
        .expect("invalid bind address");

    info!("{} v{} starting", yac_core::consts::TITLE, yac_core::consts::VERSION);
    info!("  Listening on: {bind_addr}");
    info!("  Root path:    {}", state.config.root_path);
    info!("  Repo plugin:  {}", state.config.repo_plugin);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
