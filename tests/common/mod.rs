#![allow(dead_code)]

use llama_chat::chat::engine::{EngineInstance, EngineModel, InferenceEngine, ModelDescriptor, OpParams, ProgressFn};
use llama_chat::error::InstanceError;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Duration;

/// Serve one HTTP 200 response carrying `body`.
/// With `stall`, only the first chunk is sent before the server hangs.
pub async fn serve(body: Vec<u8>, stall: bool) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("No local addr");

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }

        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }

        for chunk in body.chunks(4096) {
            if socket.write_all(chunk).await.is_err() {
                return;
            }
            socket.flush().await.ok();
            if stall {
                tokio::time::sleep(Duration::from_secs(30)).await;
                return;
            }
        }
        socket.shutdown().await.ok();
    });

    addr
}

/// Engine double that echoes prompts back
#[derive(Clone, Default)]
pub struct EchoEngine {
    pub fail_create: Arc<AtomicBool>,
}

impl EchoEngine {
    pub fn set_failing(&self, failing: bool) {
        self.fail_create.store(failing, Ordering::SeqCst);
    }
}

impl InferenceEngine for EchoEngine {
    fn create_model(
        &self,
        _desc: &ModelDescriptor,
        _params: &OpParams,
        _progress: ProgressFn<'_>,
    ) -> Result<Box<dyn EngineModel>, InstanceError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(InstanceError::new("create-model", "out of memory"));
        }
        Ok(Box::new(EchoModel))
    }
}

struct EchoModel;

impl EngineModel for EchoModel {
    fn create_instance(
        &self,
        _profile: &str,
        _params: &OpParams,
    ) -> Result<Box<dyn EngineInstance>, InstanceError> {
        Ok(Box::new(EchoInstance { prompt: None }))
    }
}

struct EchoInstance {
    prompt: Option<String>,
}

impl EngineInstance for EchoInstance {
    fn run_op(
        &mut self,
        op: &str,
        params: &OpParams,
        _progress: ProgressFn<'_>,
    ) -> Result<OpParams, InstanceError> {
        let mut result = OpParams::new();
        match op {
            "add-chat-prompt" => {
                self.prompt = params.get("prompt").and_then(|p| p.as_str()).map(str::to_string);
            }
            "get-chat-response" => {
                let reply = self.prompt.take().unwrap_or_default().to_uppercase();
                result.insert("response".to_string(), json!(reply));
            }
            _ => {}
        }
        Ok(result)
    }
}
