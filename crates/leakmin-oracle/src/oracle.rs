use std::time::Duration;

use async_trait::async_trait;

use crate::error::OracleError;

/// An external, possibly slow and non-deterministic inference service.
///
/// Calls are issued one at a time; implementations need not support
/// concurrent in-flight requests.
#[async_trait]
pub trait Oracle: Send + Sync {
    fn name(&self) -> &str;

    /// Ask the backend to infer the imports of `source`.
    ///
    /// Fails with [`OracleError::Timeout`] when `timeout` elapses first.
    async fn infer(&self, source: &str, timeout: Option<Duration>) -> Result<String, OracleError>;

    /// Drop any warm state the backend keeps between calls.
    async fn reload(&self) -> Result<(), OracleError> {
        Ok(())
    }
}
