use crate::{runtime_config::RuntimeConfig, traits::PaymentGatewayError};

#[allow(async_fn_in_trait)]
pub trait RuntimeConfigStore {
    /// Fetches the shop settings, or the defaults if none were ever saved.
    async fn fetch_runtime_config(&self) -> Result<RuntimeConfig, PaymentGatewayError>;

    async fn save_runtime_config(&self, config: &RuntimeConfig) -> Result<(), PaymentGatewayError>;
}
