pub mod orders;
pub mod payment_webhooks;
pub mod payments;

use std::sync::Arc;

use crate::{
    db::DbPool,
    rate_limiter::{InMemoryRateLimiter, RateLimitConfig, RateLimiter},
    services::{
        catalog::CatalogService,
        gateway::GatewayClient,
        notifications::{MessageSink, NotificationService},
        orders::OrderService,
        promos::PromoService,
    },
};

/// Aggregate of the services used by HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub catalog: CatalogService,
    pub promos: PromoService,
    pub orders: OrderService,
    pub gateway: Arc<GatewayClient>,
    pub notifications: Arc<NotificationService>,
    pub rate_limiter: Arc<dyn RateLimiter>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        gateway: Arc<GatewayClient>,
        sink: Arc<dyn MessageSink>,
        rate_limit: RateLimitConfig,
    ) -> Self {
        let orders = OrderService::new(db.clone());
        let notifications = Arc::new(NotificationService::new(sink, orders.clone()));

        Self {
            catalog: CatalogService::new(db.clone()),
            promos: PromoService::new(db.clone()),
            orders,
            gateway,
            notifications,
            rate_limiter: Arc::new(InMemoryRateLimiter::new(rate_limit)),
        }
    }
}
