use std::str::FromStr;
use std::sync::Arc;

use cron::Schedule;
use dotenvy::dotenv;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use clinicserver::api_router::configure_api_routes;
use clinicserver::billing::invoice::{FiscalProvider, LocalFiscalProvider, SriRestClient};
use clinicserver::config::AppConfig;
use clinicserver::gateway::memory::InMemoryGateway;
use clinicserver::loyalty::run_scheduler;
use clinicserver::shared::state::AppState;
use clinicserver::storage::LocalBlobStore;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::from_env();

    // The hosted persistence platform is an external collaborator; the
    // bundled gateway keeps everything in process for local operation.
    let gateway = Arc::new(InMemoryGateway::new());
    let blob_store = Arc::new(LocalBlobStore::new(
        config.storage.root.clone().into(),
        config.storage.public_base_url.clone(),
    ));
    let fiscal: Arc<dyn FiscalProvider> =
        match (&config.fiscal.sri_base_url, &config.fiscal.sri_api_token) {
            (Some(base_url), Some(token)) => {
                Arc::new(SriRestClient::new(base_url.clone(), token.clone()))
            }
            _ => Arc::new(LocalFiscalProvider::new(config.fiscal.ruc.clone())),
        };

    if config.payments.webhook_secret.is_none() {
        warn!("PAYMENTS_WEBHOOK_SECRET is not set; webhook signatures will not be verified");
    }

    let state = Arc::new(AppState::new(config.clone(), gateway, blob_store, fiscal));

    match Schedule::from_str(&config.loyalty.cron) {
        Ok(schedule) => {
            tokio::spawn(run_scheduler(state.loyalty.clone(), schedule));
        }
        Err(e) => warn!(cron = %config.loyalty.cron, "invalid loyalty cron, scheduler disabled: {e}"),
    }

    let app = configure_api_routes()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}
