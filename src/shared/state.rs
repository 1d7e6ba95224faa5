use std::sync::Arc;

use crate::billing::invoice::FiscalProvider;
use crate::billing::BillingService;
use crate::config::AppConfig;
use crate::family::FamilyResolver;
use crate::gateway::DataGateway;
use crate::loyalty::LoyaltyEngine;
use crate::storage::BlobStore;
use crate::subscription::SubscriptionService;

pub struct AppState {
    pub config: AppConfig,
    pub gateway: Arc<dyn DataGateway>,
    pub billing: BillingService,
    pub subscriptions: SubscriptionService,
    pub family: FamilyResolver,
    pub loyalty: Arc<LoyaltyEngine>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        gateway: Arc<dyn DataGateway>,
        blob_store: Arc<dyn BlobStore>,
        fiscal: Arc<dyn FiscalProvider>,
    ) -> Self {
        Self {
            billing: BillingService::new(gateway.clone(), blob_store, fiscal),
            subscriptions: SubscriptionService::new(gateway.clone()),
            family: FamilyResolver::new(gateway.clone()),
            loyalty: Arc::new(LoyaltyEngine::new(gateway.clone())),
            config,
            gateway,
        }
    }
}
