pub mod bus;
pub mod config;
pub mod peers;
pub mod registry;
pub mod routes;
pub mod server;

use std::sync::Arc;

use bus::BusAdapter;
use config::Config;
use registry::SessionRegistry;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub bus: Arc<BusAdapter>,
}
