use std::sync::Arc;

use crate::services::orchestrator::RagOrchestrator;
use crate::services::store::SearchStore;

pub struct AppState {
    pub store: Arc<dyn SearchStore>,
    pub orchestrator: Arc<RagOrchestrator>,
}

impl AppState {
    pub fn new(store: Arc<dyn SearchStore>, orchestrator: Arc<RagOrchestrator>) -> Self {
        Self {
            store,
            orchestrator,
        }
    }
}
