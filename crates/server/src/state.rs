use std::sync::Arc;

use anyhow::Context;
use hostgate_core::{AuthGate, Config};
use hostgate_tool_runtime::{build_dispatcher, Dispatcher, Services};

/// Shared, read-only request state. Managers inside the dispatcher carry
/// their own locks.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub auth: AuthGate,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, auth: AuthGate) -> Self {
        Self { dispatcher, auth }
    }

    /// Production wiring from config.
    pub fn from_config(config: &Config) -> anyhow::Result<Arc<Self>> {
        let services = Services::from_config(config).context("building services")?;
        let dispatcher = build_dispatcher(&services).context("building tool catalog")?;
        let auth = AuthGate::new(config.api_key.clone()).context("configuring credential")?;
        Ok(Arc::new(Self::new(dispatcher, auth)))
    }
}
