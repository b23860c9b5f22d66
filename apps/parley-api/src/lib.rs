pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod routes;
pub mod store;

use std::sync::Arc;

use auth::AuthVerifier;
use config::Config;
use gateway::dispatcher::Dispatcher;
use store::Store;

/// Shared application state available to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub auth: Arc<dyn AuthVerifier>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, auth: Arc<dyn AuthVerifier>, config: Config) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            config.history_limit,
            config.max_message_len,
        ));
        Self {
            store,
            auth,
            dispatcher,
            config: Arc::new(config),
        }
    }
}
