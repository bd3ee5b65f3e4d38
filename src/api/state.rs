use std::sync::Arc;

use crate::context::AppContext;
use crate::refresh::RefreshCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<AppContext>,
    pub refresh: RefreshCoordinator,
}

impl AppState {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            refresh: RefreshCoordinator::new(Arc::clone(&ctx)),
            ctx,
        }
    }
}
