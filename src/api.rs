//! HTTP transport for the chat message bus

mod handlers;
mod types;

pub use handlers::create_router;

use crate::runtime::ProductionManager;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<ProductionManager>,
}

impl AppState {
    pub fn new(runtime: ProductionManager) -> Self {
        Self {
            runtime: Arc::new(runtime),
        }
    }
}
