use adsync::api::{create_router, AppState};
use adsync::config::AppConfig;
use adsync::oauth::OAuthExchange;
use adsync::providers::google::GoogleAdsAdapter;
use adsync::providers::meta::MetaAdsAdapter;
use adsync::store::{CampaignStore, IntegrationStore};
use adsync::sync::scheduler::SyncScheduler;
use adsync::sync::SyncOrchestrator;
use adsync::vault::Vault;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adsync=info".into()),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    info!(db_path = %config.db_path, "adsync starting");

    let vault = Arc::new(Vault::new(&config.encryption_secret));
    let integrations = Arc::new(
        IntegrationStore::new(&config.db_path).context("opening integration store")?,
    );
    let campaigns =
        Arc::new(CampaignStore::new(&config.db_path).context("opening campaign store")?);

    let exchange = Arc::new(OAuthExchange::new(
        Arc::clone(&config),
        vault,
        Arc::clone(&integrations),
    ));

    let mut orchestrator = SyncOrchestrator::new(Arc::clone(&integrations), campaigns);
    orchestrator.register(Arc::new(MetaAdsAdapter::new(
        Arc::clone(&exchange),
        config.http_timeout,
    )));
    orchestrator.register(Arc::new(GoogleAdsAdapter::new(
        Arc::clone(&config),
        Arc::clone(&exchange),
    )));
    let orchestrator = Arc::new(orchestrator);

    let scheduler = Arc::new(SyncScheduler::new(
        Arc::clone(&orchestrator),
        Arc::clone(&integrations),
        &config,
    ));
    scheduler.start();

    let app = create_router(AppState {
        config: Arc::clone(&config),
        exchange,
        orchestrator,
        integrations,
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Listening");
    axum::serve(listener, app).await?;

    Ok(())
}
