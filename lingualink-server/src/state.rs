use std::sync::Arc;
use std::time::Instant;

use lingualink_service::AppContext;

/// Shared handler state: the service graph plus server-local bits.
#[derive(Clone)]
pub struct ServerState {
    pub context: Arc<AppContext>,
    pub started_at: Instant,
}

impl ServerState {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context, started_at: Instant::now() }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
