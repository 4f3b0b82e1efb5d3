use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "tool-relay is running",
        "config": {
            "upstream_base_url": config.upstream.base_url,
            "features": {
                "enable_tool_call_conversion": config.features.enable_tool_call_conversion,
                "log_level": config.features.log_level,
                "log_format": config.features.log_format.to_string(),
                "max_conversion_buffer_bytes": config.features.max_conversion_buffer_bytes,
            }
        }
    }))
}
