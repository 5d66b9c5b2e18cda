use crate::chat::engine::{
    log_progress, ops, AssetInfo, EngineInstance, EngineModel, InferenceEngine, ModelDescriptor,
    OpParams,
};
use crate::chat::ChatBackend;
use crate::config::schema::InferenceConfig;
use crate::error::{ChatError, InstanceError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// A chat conversation running on one engine instance
pub struct ChatSession {
    model_name: String,
    inference_type: String,
    greeting: String,
    // Keeps the engine model alive for as long as the instance
    _model: Box<dyn EngineModel>,
    instance: Arc<Mutex<Box<dyn EngineInstance>>>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("model_name", &self.model_name)
            .field("inference_type", &self.inference_type)
            .field("greeting", &self.greeting)
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    /// Load a model file, create an instance and start a chat on it
    pub async fn open(
        engine: Arc<dyn InferenceEngine>,
        model_name: &str,
        model_path: &Path,
        config: &InferenceConfig,
    ) -> Result<Self> {
        tokio::fs::metadata(model_path).await.map_err(|e| {
            ChatError::Instance(InstanceError::new(
                "open-model-file",
                format!("{}: {e}", model_path.display()),
            ))
        })?;

        let desc = ModelDescriptor {
            inference_type: config.inference_type.clone(),
            assets: vec![AssetInfo {
                path: model_path.to_path_buf(),
                name: model_name.to_string(),
            }],
        };
        let profile = config.profile.clone();
        let ctx_size = config.ctx_size;

        let (model, instance) = run_blocking("create-instance", move || {
            let model = engine.create_model(&desc, &OpParams::new(), &log_progress)?;

            let mut params = OpParams::new();
            params.insert("ctx_size".to_string(), json!(ctx_size));
            let instance = model.create_instance(&profile, &params)?;

            Ok((model, instance))
        })
        .await?;

        let session = Self {
            model_name: model_name.to_string(),
            inference_type: config.inference_type.clone(),
            greeting: config.greeting.clone(),
            _model: model,
            instance: Arc::new(Mutex::new(instance)),
        };

        let mut params = OpParams::new();
        params.insert("setup".to_string(), json!(session.greeting));
        session.run_op(ops::BEGIN_CHAT, params).await?;

        tracing::info!("Chat session ready on {model_name}");
        Ok(session)
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// First assistant message shown after the chat starts
    #[must_use]
    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    /// Send a user prompt and wait for the model's reply
    pub async fn send_prompt(&self, prompt: &str) -> Result<String> {
        let mut params = OpParams::new();
        params.insert("prompt".to_string(), json!(prompt));
        self.run_op(ops::ADD_CHAT_PROMPT, params).await?;

        let result = self.run_op(ops::GET_CHAT_RESPONSE, OpParams::new()).await?;
        result
            .get("response")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ChatError::Instance(InstanceError::new(
                    ops::GET_CHAT_RESPONSE,
                    "engine returned no response text",
                ))
            })
    }

    async fn run_op(&self, op: &'static str, params: OpParams) -> Result<OpParams> {
        let instance = Arc::clone(&self.instance);
        tracing::debug!("Running {op}");

        run_blocking(op, move || {
            let mut instance = instance.lock().unwrap_or_else(PoisonError::into_inner);
            instance.run_op(op, &params, &log_progress)
        })
        .await
    }
}

#[async_trait]
impl ChatBackend for ChatSession {
    async fn send_prompt(&self, prompt: &str) -> Result<String> {
        Self::send_prompt(self, prompt).await
    }

    fn backend_name(&self) -> &str {
        &self.inference_type
    }
}

/// Run a blocking engine call on the blocking pool
async fn run_blocking<T, F>(stage: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::result::Result<T, InstanceError> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(f).await.map_err(|e| {
        ChatError::Instance(InstanceError::new(stage, format!("engine task panicked: {e}")))
    })?;

    result.map_err(|e| {
        tracing::error!("Inference engine error: {e}");
        ChatError::Instance(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::engine::fake::FakeEngine;
    use tempfile::TempDir;

    fn model_file(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("phi-2.gguf");
        std::fs::write(&path, "weights").unwrap();
        path
    }

    #[tokio::test]
    async fn test_open_runs_engine_calls_in_order() {
        let dir = TempDir::new().unwrap();
        let path = model_file(&dir);
        let engine = FakeEngine::default();

        let session = ChatSession::open(
            Arc::new(engine.clone()),
            "phi-2",
            &path,
            &InferenceConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(session.model_name(), "phi-2");
        assert_eq!(session.greeting(), "Hi, how can I help you?");
        assert_eq!(session.backend_name(), "llama.cpp");
        assert_eq!(
            engine.calls(),
            vec![
                "create-model llama.cpp phi-2".to_string(),
                "create-instance general 2048".to_string(),
                "run-op begin-chat".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_send_prompt() {
        let dir = TempDir::new().unwrap();
        let path = model_file(&dir);
        let engine = FakeEngine::default();
        let session = ChatSession::open(
            Arc::new(engine.clone()),
            "phi-2",
            &path,
            &InferenceConfig::default(),
        )
        .await
        .unwrap();

        let reply = session.send_prompt("hello").await.unwrap();
        assert_eq!(reply, "echo: hello");

        let calls = engine.calls();
        assert_eq!(calls[calls.len() - 2], "run-op add-chat-prompt");
        assert_eq!(calls[calls.len() - 1], "run-op get-chat-response");
    }

    #[tokio::test]
    async fn test_missing_model_file() {
        let dir = TempDir::new().unwrap();
        let engine = FakeEngine::default();

        let err = ChatSession::open(
            Arc::new(engine.clone()),
            "phi-2",
            &dir.path().join("missing.gguf"),
            &InferenceConfig::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ChatError::Instance(ref e) if e.stage == "open-model-file"));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_engine_failure_is_surfaced() {
        let dir = TempDir::new().unwrap();
        let path = model_file(&dir);

        for stage in ["create-model", "create-instance", "begin-chat"] {
            let err = ChatSession::open(
                Arc::new(FakeEngine::failing_on(stage)),
                "phi-2",
                &path,
                &InferenceConfig::default(),
            )
            .await
            .unwrap_err();

            match err {
                ChatError::Instance(e) => assert_eq!(e.stage, stage),
                other => panic!("Expected Instance error, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_prompt_failure_is_surfaced() {
        let dir = TempDir::new().unwrap();
        let path = model_file(&dir);
        let session = ChatSession::open(
            Arc::new(FakeEngine::failing_on("get-chat-response")),
            "phi-2",
            &path,
            &InferenceConfig::default(),
        )
        .await
        .unwrap();

        let err = session.send_prompt("hello").await.unwrap_err();
        assert!(err.to_string().contains("get-chat-response"));
    }
}
