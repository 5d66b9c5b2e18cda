pub mod engine;
pub mod session;

use crate::error::Result;
use async_trait::async_trait;

pub use engine::{EngineInstance, EngineModel, InferenceEngine, ModelDescriptor, OpParams};
pub use session::ChatSession;

/// Unified interface for chat backends
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send a user prompt and return the assistant's reply
    async fn send_prompt(&self, prompt: &str) -> Result<String>;

    /// Get backend name for logging/debugging
    fn backend_name(&self) -> &str;
}
