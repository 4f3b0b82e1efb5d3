use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::RelayError;
use crate::fc::ConversionPolicy;
use crate::observability::token_counter::{EstimatingCounter, TokenCounter};
use crate::protocol::RelayMode;
use crate::transport::HttpTransport;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    pub counter: Arc<dyn TokenCounter>,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, transport: HttpTransport, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            config,
            transport,
            counter,
        }
    }

    /// Build state with an HTTP transport from the config and the default
    /// estimating token counter.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the HTTP client cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Self, RelayError> {
        let transport = HttpTransport::new(&config.server, &config.upstream)?;
        Ok(Self::new(config, transport, Arc::new(EstimatingCounter)))
    }

    /// Conversion settings for one request relayed in `mode`.
    #[must_use]
    pub fn conversion_policy(&self, mode: RelayMode) -> ConversionPolicy {
        let features = &self.config.features;
        ConversionPolicy::new(features.enable_tool_call_conversion, mode)
            .with_max_buffer_bytes(features.max_conversion_buffer_bytes)
    }
}
