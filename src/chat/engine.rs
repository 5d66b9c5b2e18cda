//! Boundary to the local inference engine.
//!
//! The engine itself lives outside this crate. Every call here is blocking and
//! is expected to run on a worker thread (see [`crate::chat::ChatSession`]).

use crate::error::InstanceError;
use std::path::PathBuf;

/// Parameters passed to and results returned from engine calls
pub type OpParams = serde_json::Map<String, serde_json::Value>;

/// Engine progress callback: `(tag, fraction)`
pub type ProgressFn<'a> = &'a (dyn Fn(&str, f32) + Send + Sync);

/// Op names understood by chat-capable instances
pub mod ops {
    pub const BEGIN_CHAT: &str = "begin-chat";
    pub const ADD_CHAT_PROMPT: &str = "add-chat-prompt";
    pub const GET_CHAT_RESPONSE: &str = "get-chat-response";
}

/// A file handed to the engine when creating a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    pub path: PathBuf,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub inference_type: String,
    pub assets: Vec<AssetInfo>,
}

pub trait InferenceEngine: Send + Sync {
    fn create_model(
        &self,
        desc: &ModelDescriptor,
        params: &OpParams,
        progress: ProgressFn<'_>,
    ) -> Result<Box<dyn EngineModel>, InstanceError>;
}

pub trait EngineModel: Send + Sync {
    fn create_instance(
        &self,
        profile: &str,
        params: &OpParams,
    ) -> Result<Box<dyn EngineInstance>, InstanceError>;
}

pub trait EngineInstance: Send {
    fn run_op(
        &mut self,
        op: &str,
        params: &OpParams,
        progress: ProgressFn<'_>,
    ) -> Result<OpParams, InstanceError>;
}

/// Default progress sink
pub fn log_progress(tag: &str, progress: f32) {
    tracing::debug!("[{tag}] progress: {progress}");
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Engine double recording every call it receives
    #[derive(Debug, Default, Clone)]
    pub struct FakeEngine {
        pub calls: Arc<Mutex<Vec<String>>>,
        pub fail_on: Option<&'static str>,
    }

    impl FakeEngine {
        pub fn failing_on(stage: &'static str) -> Self {
            Self {
                fail_on: Some(stage),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String, stage: &str) -> Result<(), InstanceError> {
            self.calls.lock().unwrap().push(call);
            if self.fail_on == Some(stage) {
                return Err(InstanceError::new(stage, "injected failure"));
            }
            Ok(())
        }
    }

    impl InferenceEngine for FakeEngine {
        fn create_model(
            &self,
            desc: &ModelDescriptor,
            _params: &OpParams,
            progress: ProgressFn<'_>,
        ) -> Result<Box<dyn EngineModel>, InstanceError> {
            progress("create-model", 1.0);
            let asset = desc.assets.first().map(|a| a.name.clone()).unwrap_or_default();
            self.record(
                format!("create-model {} {asset}", desc.inference_type),
                "create-model",
            )?;
            Ok(Box::new(self.clone()))
        }
    }

    impl EngineModel for FakeEngine {
        fn create_instance(
            &self,
            profile: &str,
            params: &OpParams,
        ) -> Result<Box<dyn EngineInstance>, InstanceError> {
            let ctx = params.get("ctx_size").cloned().unwrap_or(json!(null));
            self.record(format!("create-instance {profile} {ctx}"), "create-instance")?;
            Ok(Box::new(FakeInstance {
                engine: self.clone(),
                last_prompt: None,
            }))
        }
    }

    pub struct FakeInstance {
        engine: FakeEngine,
        last_prompt: Option<String>,
    }

    impl EngineInstance for FakeInstance {
        fn run_op(
            &mut self,
            op: &str,
            params: &OpParams,
            _progress: ProgressFn<'_>,
        ) -> Result<OpParams, InstanceError> {
            self.engine.record(format!("run-op {op}"), op)?;

            let mut result = OpParams::new();
            match op {
                ops::ADD_CHAT_PROMPT => {
                    self.last_prompt = params
                        .get("prompt")
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                }
                ops::GET_CHAT_RESPONSE => {
                    if let Some(prompt) = &self.last_prompt {
                        result.insert("response".to_string(), json!(format!("echo: {prompt}")));
                    }
                }
                _ => {}
            }
            Ok(result)
        }
    }
}
