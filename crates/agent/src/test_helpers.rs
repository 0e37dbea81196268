//! Shared test helpers for turn runner tests.

use sqlsage_core::error::{ProviderError, StoreError, ToolError};
use sqlsage_core::message::{Message, MessageToolCall, ThreadId};
use sqlsage_core::provider::{
    Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use sqlsage_core::store::ConversationStore;
use sqlsage_core::tool::Tool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A mock provider that returns a sequence of scripted outcomes.
///
/// Each call to `complete` takes the next entry in the queue. Panics if
/// more calls are made than entries provided. Streaming goes through the
/// default `Provider::stream` wrapper, so each response arrives as one
/// done chunk.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    calls: AtomicUsize,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
        }
    }

    /// A provider that returns a single text response (no tool calls).
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![Ok(make_text_response(text))])
    }

    /// A provider that first returns tool calls, then a final answer.
    pub fn tool_then_answer(tool_calls: Vec<MessageToolCall>, answer: &str) -> Self {
        Self::new(vec![
            Ok(make_tool_call_response(tool_calls, "")),
            Ok(make_text_response(answer)),
        ])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let responses = self.responses.lock().unwrap();

        if call >= responses.len() {
            panic!(
                "SequentialMockProvider: no more responses (call #{}, have {})",
                call,
                responses.len()
            );
        }

        responses[call].clone()
    }
}

/// A mock provider with fully scripted stream chunks per call.
///
/// Each inner vec is the chunk sequence for one `stream()` call, in
/// order. An optional gap is slept between consecutive chunks so tests
/// can act mid-stream.
pub struct StreamScriptProvider {
    scripts: Mutex<Vec<Vec<Result<StreamChunk, ProviderError>>>>,
    calls: AtomicUsize,
    gap: Duration,
}

impl StreamScriptProvider {
    pub fn new(scripts: Vec<Vec<Result<StreamChunk, ProviderError>>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            calls: AtomicUsize::new(0),
            gap: Duration::ZERO,
        }
    }

    pub fn with_gap(mut self, gap: Duration) -> Self {
        self.gap = gap;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Provider for StreamScriptProvider {
    fn name(&self) -> &str {
        "stream_script"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        unimplemented!("StreamScriptProvider only streams")
    }

    async fn stream(
        &self,
        _request: ProviderRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError>
    {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if call >= scripts.len() {
                panic!(
                    "StreamScriptProvider: no more scripts (call #{}, have {})",
                    call,
                    scripts.len()
                );
            }
            std::mem::take(&mut scripts[call])
        };

        let gap = self.gap;
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        tokio::spawn(async move {
            let mut first = true;
            for item in script {
                if !first && !gap.is_zero() {
                    tokio::time::sleep(gap).await;
                }
                first = false;
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// Chunk carrying only text.
pub fn text_chunk(text: &str) -> Result<StreamChunk, ProviderError> {
    Ok(StreamChunk {
        content: Some(text.into()),
        tool_calls: Vec::new(),
        done: false,
        usage: None,
    })
}

/// Terminal chunk, optionally carrying completed tool calls.
pub fn done_chunk(tool_calls: Vec<MessageToolCall>) -> Result<StreamChunk, ProviderError> {
    Ok(StreamChunk {
        content: None,
        tool_calls,
        done: true,
        usage: None,
    })
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Create a response with tool calls and optional text content.
pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>, content: &str) -> ProviderResponse {
    let mut msg = Message::assistant(content);
    msg.tool_calls = tool_calls;
    ProviderResponse {
        message: msg,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Helper to create a tool call with JSON arguments.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}

/// A tool that returns a fixed string and counts invocations.
pub struct StaticTool {
    name: &'static str,
    output: String,
    delay: Duration,
    fail: bool,
    invocations: Arc<AtomicUsize>,
}

impl StaticTool {
    pub fn new(name: &'static str, output: &str) -> Self {
        Self {
            name,
            output: output.into(),
            delay: Duration::ZERO,
            fail: false,
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sleep before answering, to exercise timeouts and gating.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every invocation with an execution error.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Handle to the invocation counter, usable after the tool has been
    /// moved into a registry.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.invocations.clone()
    }
}

#[async_trait::async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "A scripted test tool"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" }
            }
        })
    }

    async fn invoke(&self, _input: serde_json::Value) -> Result<String, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(ToolError::ExecutionFailed {
                tool: self.name.into(),
                reason: "scripted failure".into(),
            });
        }
        Ok(self.output.clone())
    }
}

/// A store whose appends always fail.
pub struct FailingStore;

#[async_trait::async_trait]
impl ConversationStore for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    async fn append(&self, _thread_id: &ThreadId, _message: &Message) -> Result<(), StoreError> {
        Err(StoreError::WriteFailure("disk full".into()))
    }

    async fn history(&self, _thread_id: &ThreadId) -> Result<Vec<Message>, StoreError> {
        Ok(Vec::new())
    }
}
