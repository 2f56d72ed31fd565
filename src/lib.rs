pub mod auth;
pub mod config;
pub mod db;
pub mod gateway;
pub mod models;
pub mod pubsub;
pub mod routes;

use std::sync::Arc;

use config::Config;
use db::store::ChatStore;
use gateway::hub::Hub;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub hub: Arc<Hub>,
    pub config: Arc<Config>,
}
