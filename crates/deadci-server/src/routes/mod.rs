//! HTTP routes.

pub mod builds;
pub mod health;
pub mod webhooks;

use crate::AppState;
use axum::Router;

/// Build the main router. The webhook receiver is only mounted when GitHub is enabled.
pub fn router(state: AppState) -> Router {
    let mut router: Router<AppState> = Router::new().merge(health::router());
    if state.config.github.enabled {
        router = router.merge(webhooks::router());
    }
    router.merge(builds::router()).with_state(state)
}
