use std::sync::Arc;
use std::time::Instant;

use crate::auth::JwtValidator;
use crate::config::Settings;
use crate::connection_manager::ConnectionRegistry;
use crate::notification::NotificationPublisher;
use crate::polling::LongPollEngine;
use crate::sse::LiveChannelService;
use crate::storage::Stores;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jwt_validator: Arc<JwtValidator>,
    pub registry: Arc<ConnectionRegistry>,
    pub stores: Stores,
    pub poll_engine: Arc<LongPollEngine>,
    pub live_channel: Arc<LiveChannelService>,
    pub publisher: Arc<NotificationPublisher>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, stores: Stores) -> Self {
        let jwt_validator = Arc::new(JwtValidator::new(&settings.jwt));
        let registry = Arc::new(ConnectionRegistry::new());

        let poll_engine = Arc::new(LongPollEngine::new(
            stores.comments.clone(),
            settings.polling.clone(),
        ));
        let live_channel = Arc::new(LiveChannelService::new(
            registry.clone(),
            stores.notifications.clone(),
            settings.live_channel.clone(),
        ));
        let publisher = Arc::new(NotificationPublisher::new(
            registry.clone(),
            stores.notifications.clone(),
        ));

        Self {
            settings: Arc::new(settings),
            jwt_validator,
            registry,
            stores,
            poll_engine,
            live_channel,
            publisher,
            start_time: Instant::now(),
        }
    }
}
