use async_trait::async_trait;

use crate::errors::PilotResult;
use crate::llm::types::{ConnectionDiagnostics, DecisionRequest};

/// Remote decision model. Implementations own transport, auth and timeouts.
#[async_trait]
pub trait DecisionService: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the raw reply text. Transport failures and empty replies are errors.
    async fn complete(&self, request: DecisionRequest) -> PilotResult<String>;

    /// Lightweight round trip that measures latency.
    async fn test_connection(&self) -> PilotResult<ConnectionDiagnostics>;
}
