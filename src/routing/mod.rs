pub mod dispatch;

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::Router;

use crate::state::AppState;

use self::dispatch::{dispatch_request, normalize_base_path};

/// Build the HTTP router. Every request goes through [`dispatch_request`].
pub fn build_router(state: Arc<AppState>) -> Router {
    let base_path: Arc<str> = Arc::from(normalize_base_path(&state.config.server.base_path));
    Router::new().fallback(move |request: Request<Body>| {
        dispatch_request(Arc::clone(&state), Arc::clone(&base_path), request)
    })
}
