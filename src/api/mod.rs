//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use std::sync::Arc;

use crate::config::LedgerSettings;
use crate::handlers::{AdminHandler, AllocationHandler, MovementHandler, SessionHandler};
use crate::ledger::LedgerStore;
use crate::query::QueryService;

pub use routes::create_router;

/// State shared by every route
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub settings: Arc<LedgerSettings>,
}

impl AppState {
    pub fn new(store: Arc<dyn LedgerStore>, settings: LedgerSettings) -> Self {
        Self {
            store,
            settings: Arc::new(settings),
        }
    }

    pub fn admin(&self) -> AdminHandler {
        AdminHandler::new(self.store.clone(), self.settings.clone())
    }

    pub fn sessions(&self) -> SessionHandler {
        SessionHandler::new(self.store.clone(), self.settings.clone())
    }

    pub fn movements(&self) -> MovementHandler {
        MovementHandler::new(self.store.clone(), self.settings.clone())
    }

    pub fn allocations(&self) -> AllocationHandler {
        AllocationHandler::new(self.store.clone(), self.settings.clone())
    }

    pub fn queries(&self) -> QueryService {
        QueryService::new(self.store.clone())
    }
}
