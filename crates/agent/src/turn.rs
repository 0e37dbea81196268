//! The reasoning loop.
//!
//! A turn alternates between model inference and tool execution until the
//! model produces a final answer: load the thread's history, append the
//! user message, call the model with the tool descriptors, execute any
//! tools it requests, fold the results back in, repeat. Every step is
//! streamed to the client as a [`TurnEvent`] and persisted to the
//! conversation store before it is shown.
//!
//! Turns on distinct threads run concurrently; turns on the same thread
//! queue behind each other in arrival order.

use crate::gates::ThreadGates;
use crate::turn_event::TurnEvent;
use sqlsage_core::error::{ProviderError, StoreError, ToolError, TurnError};
use sqlsage_core::message::{Message, MessageToolCall, ThreadId};
use sqlsage_core::provider::{Provider, ProviderRequest};
use sqlsage_core::store::ConversationStore;
use sqlsage_core::tool::{ToolCall, ToolDescriptor, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Used when the configuration does not override the system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful and expert PostgreSQL assistant. \
    Your role is to help users analyze and optimize their database using the provided tools. \
    When you use a tool, briefly tell the user what you are doing. \
    After you get the result from a tool, summarize it in a clear, easy-to-understand way. \
    If a query fails, analyze the error, correct the query and try again. \
    Be polite and concise.";

/// Where a turn currently is.
///
/// Observable through [`Turn::phase`] while the turn runs. `Answered` and
/// `Failed` are terminal; a turn abandoned by a disconnecting client
/// closes the phase channel without reaching either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// Not started yet (queued behind another turn on the same thread).
    Idle,
    /// A model call is in flight.
    AwaitingModel,
    /// A requested tool is executing.
    ExecutingTool,
    /// The final answer was produced.
    Answered,
    /// The turn ended with a classified error.
    Failed,
}

/// Tunables for the reasoning loop.
#[derive(Debug, Clone)]
pub struct TurnOptions {
    /// Model identifier sent to the provider.
    pub model: String,

    /// Sampling temperature.
    pub temperature: f32,

    /// Maximum tokens per model response.
    pub max_tokens: Option<u32>,

    /// Tool round-trips allowed per turn before the turn fails.
    pub max_iterations: u32,

    /// Model call retries, spent only while nothing has reached the client.
    pub model_retries: u32,

    /// Bound on each model await (connecting, then each chunk gap).
    pub model_timeout: Duration,

    /// Bound on a single tool invocation.
    pub tool_timeout: Duration,

    /// Override for [`DEFAULT_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            temperature: 0.0,
            max_tokens: None,
            max_iterations: 10,
            model_retries: 2,
            model_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(30),
            system_prompt: None,
        }
    }
}

/// A started turn: its event stream plus an observable phase.
///
/// Dropping `events` tells the runner the client is gone; it stops at its
/// next emission point and appends nothing further.
pub struct Turn {
    pub events: mpsc::Receiver<TurnEvent>,
    pub phase: watch::Receiver<TurnPhase>,
}

/// Runs turns: one model/tool loop per client request.
///
/// Cheap to clone; clones share the per-thread turn gates.
#[derive(Clone)]
pub struct TurnRunner {
    provider: Arc<dyn Provider>,
    store: Arc<dyn ConversationStore>,
    tools: Arc<ToolRegistry>,
    options: TurnOptions,
    gates: ThreadGates,
}

/// Why the loop stopped early.
enum TurnAbort {
    /// The client dropped the event receiver.
    Disconnected,
    /// A fatal error; emitted as the terminal `error` frame.
    Fatal(TurnError),
}

impl From<TurnError> for TurnAbort {
    fn from(err: TurnError) -> Self {
        TurnAbort::Fatal(err)
    }
}

impl From<StoreError> for TurnAbort {
    fn from(err: StoreError) -> Self {
        TurnAbort::Fatal(err.into())
    }
}

/// How one streaming model attempt failed.
enum StreamFailure {
    Disconnected,
    /// Failed before any token reached the client; retryable.
    BeforeTokens(ProviderError),
    /// Failed after partial output; retrying would duplicate tokens.
    AfterTokens(ProviderError),
}

fn classify(forwarded: bool, err: ProviderError) -> StreamFailure {
    if forwarded {
        StreamFailure::AfterTokens(err)
    } else {
        StreamFailure::BeforeTokens(err)
    }
}

async fn emit(tx: &mpsc::Sender<TurnEvent>, event: TurnEvent) -> Result<(), TurnAbort> {
    tx.send(event).await.map_err(|_| TurnAbort::Disconnected)
}

impl TurnRunner {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn ConversationStore>,
        tools: Arc<ToolRegistry>,
        options: TurnOptions,
    ) -> Self {
        Self {
            provider,
            store,
            tools,
            options,
            gates: ThreadGates::new(),
        }
    }

    /// Start a turn on a background task.
    ///
    /// The stream opens with a `thread` frame and ends with exactly one
    /// `final` or `error` frame, unless the client disconnects first.
    pub fn start(&self, thread_id: ThreadId, query: String) -> Turn {
        let (tx, rx) = mpsc::channel(128);
        let (phase_tx, phase_rx) = watch::channel(TurnPhase::Idle);

        let runner = self.clone();
        tokio::spawn(async move {
            runner.run(thread_id, query, tx, phase_tx).await;
        });

        Turn {
            events: rx,
            phase: phase_rx,
        }
    }

    async fn run(
        self,
        thread_id: ThreadId,
        query: String,
        tx: mpsc::Sender<TurnEvent>,
        phase: watch::Sender<TurnPhase>,
    ) {
        // The caller learns the thread id immediately, even while this
        // turn queues behind an in-flight one.
        let event = TurnEvent::Thread {
            thread_id: thread_id.to_string(),
        };
        if tx.send(event).await.is_err() {
            return;
        }

        let _gate = self.gates.acquire(&thread_id).await;
        info!(thread_id = %thread_id, model = %self.options.model, "Turn started");

        match self.drive(&thread_id, &query, &tx, &phase).await {
            Ok(()) => {}
            Err(TurnAbort::Disconnected) => {
                debug!(thread_id = %thread_id, "Client disconnected, turn abandoned");
            }
            Err(TurnAbort::Fatal(err)) => {
                warn!(thread_id = %thread_id, kind = err.kind(), error = %err, "Turn failed");
                let _ = phase.send(TurnPhase::Failed);
                let _ = tx
                    .send(TurnEvent::Error {
                        kind: err.kind().into(),
                        message: err.to_string(),
                    })
                    .await;
            }
        }
    }

    async fn drive(
        &self,
        thread_id: &ThreadId,
        query: &str,
        tx: &mpsc::Sender<TurnEvent>,
        phase: &watch::Sender<TurnPhase>,
    ) -> Result<(), TurnAbort> {
        let history = self.store.history(thread_id).await?;

        // Persisted before the first model call; the loop never operates
        // on state it has not recorded.
        let user_msg = Message::user(query);
        self.store.append(thread_id, &user_msg).await?;

        let prompt = self
            .options
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(prompt));
        messages.extend(history);
        messages.push(user_msg);

        let descriptors = self.tools.descriptors();
        let mut rounds = 0u32;

        loop {
            let _ = phase.send(TurnPhase::AwaitingModel);
            let (content, tool_calls) = self.call_model(&messages, &descriptors, tx).await?;

            if tool_calls.is_empty() {
                if content.is_empty() {
                    return Err(TurnAbort::Fatal(TurnError::MalformedModelOutput(
                        "model produced neither text nor a tool call".into(),
                    )));
                }

                let answer = Message::assistant(content.clone());
                self.store.append(thread_id, &answer).await?;

                let _ = phase.send(TurnPhase::Answered);
                emit(tx, TurnEvent::Final { text: content }).await?;
                info!(thread_id = %thread_id, rounds, "Turn answered");
                return Ok(());
            }

            rounds += 1;
            if rounds > self.options.max_iterations {
                return Err(TurnAbort::Fatal(TurnError::IterationLimitExceeded {
                    limit: self.options.max_iterations,
                }));
            }

            // Decode every argument string before committing anything; a
            // tool call that cannot be decoded means the whole response
            // is malformed.
            let mut parsed = Vec::with_capacity(tool_calls.len());
            for tc in tool_calls {
                let input: serde_json::Value = serde_json::from_str(&tc.arguments)
                    .map_err(|e| {
                        TurnError::MalformedModelOutput(format!(
                            "tool call {} has unparseable arguments: {e}",
                            tc.name
                        ))
                    })?;
                parsed.push((tc, input));
            }

            let mut request_msg = Message::assistant(content);
            request_msg.tool_calls = parsed.iter().map(|(tc, _)| tc.clone()).collect();
            self.store.append(thread_id, &request_msg).await?;
            messages.push(request_msg);

            let _ = phase.send(TurnPhase::ExecutingTool);
            for (tc, input) in parsed {
                emit(
                    tx,
                    TurnEvent::ToolCall {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        input: input.clone(),
                    },
                )
                .await?;

                match self.invoke_tool(&tc, input).await {
                    Ok(output) => {
                        let msg = Message::tool_result(&tc.id, &output);
                        self.store.append(thread_id, &msg).await?;
                        messages.push(msg);
                        emit(
                            tx,
                            TurnEvent::ToolResult {
                                id: tc.id,
                                name: tc.name,
                                output: Some(output),
                                error: None,
                            },
                        )
                        .await?;
                    }
                    Err(err) => {
                        // Recoverable: the model sees the failure as the
                        // tool result and decides what to do next.
                        warn!(thread_id = %thread_id, tool = %tc.name, error = %err, "Tool invocation failed");
                        let msg = Message::tool_result(&tc.id, format!("Error: {err}"));
                        self.store.append(thread_id, &msg).await?;
                        messages.push(msg);
                        emit(
                            tx,
                            TurnEvent::ToolResult {
                                id: tc.id,
                                name: tc.name,
                                output: None,
                                error: Some(err.to_string()),
                            },
                        )
                        .await?;
                    }
                }
            }
        }
    }

    /// Invoke one tool call, bounded by the configured timeout.
    async fn invoke_tool(
        &self,
        tc: &MessageToolCall,
        input: serde_json::Value,
    ) -> Result<String, ToolError> {
        let call = ToolCall {
            id: tc.id.clone(),
            name: tc.name.clone(),
            input,
        };
        match timeout(self.options.tool_timeout, self.tools.invoke(&call)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool: tc.name.clone(),
                timeout_secs: self.options.tool_timeout.as_secs(),
            }),
        }
    }

    /// One model round-trip, retried while nothing has reached the client.
    async fn call_model(
        &self,
        messages: &[Message],
        descriptors: &[ToolDescriptor],
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<(String, Vec<MessageToolCall>), TurnAbort> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.stream_once(messages, descriptors, tx).await {
                Ok(output) => return Ok(output),
                Err(StreamFailure::Disconnected) => return Err(TurnAbort::Disconnected),
                Err(StreamFailure::BeforeTokens(err))
                    if attempt <= self.options.model_retries =>
                {
                    warn!(attempt, error = %err, "Model call failed, retrying");
                }
                Err(StreamFailure::BeforeTokens(err)) | Err(StreamFailure::AfterTokens(err)) => {
                    return Err(TurnAbort::Fatal(TurnError::Model(err)));
                }
            }
        }
    }

    /// Stream one model response, forwarding tokens as they arrive.
    async fn stream_once(
        &self,
        messages: &[Message],
        descriptors: &[ToolDescriptor],
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<(String, Vec<MessageToolCall>), StreamFailure> {
        let request = ProviderRequest {
            model: self.options.model.clone(),
            messages: messages.to_vec(),
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            tools: descriptors.to_vec(),
            stream: true,
        };

        let wait = self.options.model_timeout;
        let mut rx = match timeout(wait, self.provider.stream(request)).await {
            Ok(Ok(rx)) => rx,
            Ok(Err(err)) => return Err(StreamFailure::BeforeTokens(err)),
            Err(_) => {
                return Err(StreamFailure::BeforeTokens(ProviderError::Timeout(format!(
                    "no response within {}s",
                    wait.as_secs()
                ))));
            }
        };

        let mut content = String::new();
        let mut tool_calls: Vec<MessageToolCall> = Vec::new();
        let mut forwarded = false;

        loop {
            let chunk = match timeout(wait, rx.recv()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(err))) => return Err(classify(forwarded, err)),
                Ok(None) => break,
                Err(_) => {
                    return Err(classify(
                        forwarded,
                        ProviderError::Timeout(format!(
                            "stream stalled for {}s",
                            wait.as_secs()
                        )),
                    ));
                }
            };

            if let Some(text) = chunk.content.as_deref()
                && !text.is_empty()
            {
                content.push_str(text);
                forwarded = true;
                let event = TurnEvent::Token {
                    text: text.to_string(),
                };
                if tx.send(event).await.is_err() {
                    return Err(StreamFailure::Disconnected);
                }
            }

            for tc in chunk.tool_calls {
                // A repeated id is an arguments delta for a call already seen.
                match tool_calls.iter_mut().find(|t| t.id == tc.id) {
                    Some(existing) => existing.arguments.push_str(&tc.arguments),
                    None => tool_calls.push(tc),
                }
            }

            if let Some(usage) = &chunk.usage {
                debug!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Model usage"
                );
            }

            if chunk.done {
                break;
            }
        }

        Ok((content, tool_calls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use sqlsage_core::message::Role;
    use sqlsage_core::provider::StreamChunk;
    use sqlsage_store::MemoryStore;

    fn runner_with(
        provider: Arc<dyn Provider>,
        store: Arc<dyn ConversationStore>,
        tools: ToolRegistry,
        options: TurnOptions,
    ) -> TurnRunner {
        TurnRunner::new(provider, store, Arc::new(tools), options)
    }

    fn quick_options() -> TurnOptions {
        TurnOptions {
            model: "mock-model".into(),
            model_timeout: Duration::from_secs(5),
            tool_timeout: Duration::from_secs(5),
            ..TurnOptions::default()
        }
    }

    async fn collect(turn: &mut Turn) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Some(event) = turn.events.recv().await {
            events.push(event);
        }
        events
    }

    fn frame_types(events: &[TurnEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_type()).collect()
    }

    #[tokio::test]
    async fn final_answer_without_tools() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner_with(
            Arc::new(SequentialMockProvider::single_text("no tables found")),
            store.clone(),
            ToolRegistry::new(),
            quick_options(),
        );

        let thread = ThreadId::from("t1");
        let mut turn = runner.start(thread.clone(), "List tables".into());
        let events = collect(&mut turn).await;

        assert_eq!(frame_types(&events), vec!["thread", "token", "final"]);
        match events.last().unwrap() {
            TurnEvent::Final { text } => assert_eq!(text, "no tables found"),
            other => panic!("Expected final frame, got {other:?}"),
        }
        assert_eq!(*turn.phase.borrow(), TurnPhase::Answered);

        // Exactly two messages appended: user, then assistant.
        let history = store.history(&thread).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "List tables");
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "no tables found");
    }

    #[tokio::test]
    async fn thread_frame_carries_the_supplied_id() {
        let runner = runner_with(
            Arc::new(SequentialMockProvider::single_text("hi")),
            Arc::new(MemoryStore::new()),
            ToolRegistry::new(),
            quick_options(),
        );

        let mut turn = runner.start(ThreadId::from("customer-42"), "hello".into());
        let events = collect(&mut turn).await;
        match &events[0] {
            TurnEvent::Thread { thread_id } => assert_eq!(thread_id, "customer-42"),
            other => panic!("Expected thread frame first, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_round_trip_event_and_history_order() {
        let store = Arc::new(MemoryStore::new());
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(StaticTool::new(
            "sql_db_list_tables",
            "employees, departments",
        )));

        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("sql_db_list_tables", serde_json::json!({}))],
            "There are two tables: employees and departments.",
        ));
        let runner = runner_with(provider, store.clone(), tools, quick_options());

        let thread = ThreadId::from("t2");
        let mut turn = runner.start(thread.clone(), "What tables exist?".into());
        let events = collect(&mut turn).await;

        assert_eq!(
            frame_types(&events),
            vec!["thread", "tool_call", "tool_result", "token", "final"]
        );
        match &events[2] {
            TurnEvent::ToolResult { output, error, .. } => {
                assert_eq!(output.as_deref(), Some("employees, departments"));
                assert!(error.is_none());
            }
            other => panic!("Expected tool_result, got {other:?}"),
        }

        // Four messages in exact order: user, request, result, answer.
        let history = store.history(&thread).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].role, Role::User);
        assert!(history[1].is_tool_call_request());
        assert_eq!(history[2].role, Role::Tool);
        assert_eq!(
            history[2].tool_call_id.as_deref(),
            Some("call_sql_db_list_tables")
        );
        assert_eq!(history[3].role, Role::Assistant);
    }

    #[tokio::test]
    async fn tool_error_is_folded_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(StaticTool::new("sql_db_query", "").failing()));

        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call(
                "sql_db_query",
                serde_json::json!({"query": "select 1"}),
            )],
            "That query failed.",
        ));
        let runner = runner_with(provider, store.clone(), tools, quick_options());

        let thread = ThreadId::from("t3");
        let mut turn = runner.start(thread.clone(), "run it".into());
        let events = collect(&mut turn).await;

        let result = events
            .iter()
            .find(|e| matches!(e, TurnEvent::ToolResult { .. }))
            .unwrap();
        match result {
            TurnEvent::ToolResult { output, error, .. } => {
                assert!(output.is_none());
                assert!(error.as_deref().unwrap().contains("scripted failure"));
            }
            _ => unreachable!(),
        }

        // The turn still converges on a final answer.
        assert!(matches!(events.last().unwrap(), TurnEvent::Final { .. }));

        // The model sees the failure as the tool-result content.
        let history = store.history(&thread).await.unwrap();
        assert!(history[2].content.starts_with("Error:"));
    }

    #[tokio::test]
    async fn unknown_tool_is_recoverable() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("no_such_tool", serde_json::json!({}))],
            "I do not have that tool.",
        ));
        let runner = runner_with(
            provider,
            Arc::new(MemoryStore::new()),
            ToolRegistry::new(),
            quick_options(),
        );

        let mut turn = runner.start(ThreadId::from("t4"), "use the magic tool".into());
        let events = collect(&mut turn).await;

        let result = events
            .iter()
            .find(|e| matches!(e, TurnEvent::ToolResult { .. }))
            .unwrap();
        match result {
            TurnEvent::ToolResult { error, .. } => {
                assert!(error.as_deref().unwrap().contains("Unknown tool"));
            }
            _ => unreachable!(),
        }
        assert!(matches!(events.last().unwrap(), TurnEvent::Final { .. }));
    }

    #[tokio::test]
    async fn invalid_input_fails_before_the_tool_runs() {
        let tool = StaticTool::new("sql_db_query", "ok");
        let invocations = tool.counter();
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(tool));

        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("sql_db_query", serde_json::json!({"query": 42}))],
            "Bad input, sorry.",
        ));
        let runner = runner_with(
            provider,
            Arc::new(MemoryStore::new()),
            tools,
            quick_options(),
        );

        let mut turn = runner.start(ThreadId::from("t5"), "go".into());
        let events = collect(&mut turn).await;

        let result = events
            .iter()
            .find(|e| matches!(e, TurnEvent::ToolResult { .. }))
            .unwrap();
        match result {
            TurnEvent::ToolResult { error, .. } => {
                assert!(error.as_deref().unwrap().contains("Invalid input"));
            }
            _ => unreachable!(),
        }
        assert!(matches!(events.last().unwrap(), TurnEvent::Final { .. }));

        // Schema rejection happens locally; the tool never ran.
        assert_eq!(invocations.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn iteration_ceiling_is_exact() {
        let store = Arc::new(MemoryStore::new());
        let tool = StaticTool::new("sql_db_query", "1 row");
        let invocations = tool.counter();
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(tool));

        // The model never converges: every response requests another call.
        let responses = (0..3)
            .map(|_| {
                Ok(make_tool_call_response(
                    vec![make_tool_call(
                        "sql_db_query",
                        serde_json::json!({"query": "select 1"}),
                    )],
                    "",
                ))
            })
            .collect();
        let provider = Arc::new(SequentialMockProvider::new(responses));

        let options = TurnOptions {
            max_iterations: 2,
            ..quick_options()
        };
        let runner = runner_with(provider.clone(), store.clone(), tools, options);

        let thread = ThreadId::from("t6");
        let mut turn = runner.start(thread.clone(), "loop forever".into());
        let events = collect(&mut turn).await;

        match events.last().unwrap() {
            TurnEvent::Error { kind, message } => {
                assert_eq!(kind, "iteration_limit_exceeded");
                assert!(message.contains('2'));
            }
            other => panic!("Expected error frame, got {other:?}"),
        }
        assert_eq!(*turn.phase.borrow(), TurnPhase::Failed);

        // Exactly the ceiling of tool round-trips ran, never more.
        assert_eq!(invocations.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(provider.call_count(), 3);

        // History keeps the completed rounds: user + 2 * (request, result).
        let history = store.history(&thread).await.unwrap();
        assert_eq!(history.len(), 5);
    }

    #[tokio::test]
    async fn empty_model_output_is_malformed() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner_with(
            Arc::new(SequentialMockProvider::single_text("")),
            store.clone(),
            ToolRegistry::new(),
            quick_options(),
        );

        let thread = ThreadId::from("t7");
        let mut turn = runner.start(thread.clone(), "hello".into());
        let events = collect(&mut turn).await;

        match events.last().unwrap() {
            TurnEvent::Error { kind, .. } => assert_eq!(kind, "malformed_model_output"),
            other => panic!("Expected error frame, got {other:?}"),
        }

        // Nothing from the failing step was appended.
        let history = store.history(&thread).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn unparseable_tool_arguments_are_malformed() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(SequentialMockProvider::new(vec![Ok(
            make_tool_call_response(
                vec![MessageToolCall {
                    id: "call_1".into(),
                    name: "sql_db_query".into(),
                    arguments: "{not json".into(),
                }],
                "",
            ),
        )]));
        let runner = runner_with(provider, store.clone(), ToolRegistry::new(), quick_options());

        let thread = ThreadId::from("t8");
        let mut turn = runner.start(thread.clone(), "go".into());
        let events = collect(&mut turn).await;

        match events.last().unwrap() {
            TurnEvent::Error { kind, message } => {
                assert_eq!(kind, "malformed_model_output");
                assert!(message.contains("sql_db_query"));
            }
            other => panic!("Expected error frame, got {other:?}"),
        }

        // The malformed request message was not appended.
        let history = store.history(&thread).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn model_errors_exhaust_the_retry_budget() {
        let store = Arc::new(MemoryStore::new());
        let failure = || {
            Err(ProviderError::Network(
                "connection reset by peer".to_string(),
            ))
        };
        let provider = Arc::new(SequentialMockProvider::new(vec![
            failure(),
            failure(),
            failure(),
        ]));

        let options = TurnOptions {
            model_retries: 2,
            ..quick_options()
        };
        let runner = runner_with(provider.clone(), store.clone(), ToolRegistry::new(), options);

        let thread = ThreadId::from("t9");
        let mut turn = runner.start(thread.clone(), "hello".into());
        let events = collect(&mut turn).await;

        match events.last().unwrap() {
            TurnEvent::Error { kind, message } => {
                assert_eq!(kind, "model_error");
                assert!(message.contains("connection reset"));
            }
            other => panic!("Expected error frame, got {other:?}"),
        }

        // One initial attempt plus two retries.
        assert_eq!(provider.call_count(), 3);
        assert_eq!(store.history(&thread).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retry_succeeds_before_any_token() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            Err(ProviderError::Network("transient".into())),
            Ok(make_text_response("second attempt worked")),
        ]));
        let runner = runner_with(
            provider.clone(),
            Arc::new(MemoryStore::new()),
            ToolRegistry::new(),
            quick_options(),
        );

        let mut turn = runner.start(ThreadId::from("t10"), "hello".into());
        let events = collect(&mut turn).await;

        assert!(matches!(
            events.last().unwrap(),
            TurnEvent::Final { text } if text == "second attempt worked"
        ));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn no_retry_after_tokens_reached_the_client() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(StreamScriptProvider::new(vec![vec![
            text_chunk("Partial"),
            Err(ProviderError::StreamInterrupted("connection lost".into())),
        ]]));
        let runner = runner_with(provider.clone(), store.clone(), ToolRegistry::new(), quick_options());

        let thread = ThreadId::from("t11");
        let mut turn = runner.start(thread.clone(), "hello".into());
        let events = collect(&mut turn).await;

        assert_eq!(frame_types(&events), vec!["thread", "token", "error"]);
        match events.last().unwrap() {
            TurnEvent::Error { kind, .. } => assert_eq!(kind, "model_error"),
            other => panic!("Expected error frame, got {other:?}"),
        }

        // No second attempt, and no assistant message from partial output.
        assert_eq!(provider.call_count(), 1);
        assert_eq!(store.history(&thread).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tokens_are_forwarded_incrementally() {
        let provider = Arc::new(StreamScriptProvider::new(vec![vec![
            text_chunk("The "),
            text_chunk("answer"),
            done_chunk(vec![]),
        ]]));
        let runner = runner_with(
            provider,
            Arc::new(MemoryStore::new()),
            ToolRegistry::new(),
            quick_options(),
        );

        let mut turn = runner.start(ThreadId::from("t12"), "hello".into());
        let events = collect(&mut turn).await;

        assert_eq!(frame_types(&events), vec!["thread", "token", "token", "final"]);
        assert!(matches!(
            events.last().unwrap(),
            TurnEvent::Final { text } if text == "The answer"
        ));
    }

    #[tokio::test]
    async fn tool_call_argument_deltas_merge_by_id() {
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(StaticTool::new("sql_db_query", "1 row")));

        let delta = |args: &str| {
            Ok(StreamChunk {
                content: None,
                tool_calls: vec![MessageToolCall {
                    id: "c1".into(),
                    name: "sql_db_query".into(),
                    arguments: args.into(),
                }],
                done: false,
                usage: None,
            })
        };
        let provider = Arc::new(StreamScriptProvider::new(vec![
            vec![delta(r#"{"query":"#), delta(r#""select 1"}"#), done_chunk(vec![])],
            vec![text_chunk("One row."), done_chunk(vec![])],
        ]));
        let runner = runner_with(
            provider,
            Arc::new(MemoryStore::new()),
            tools,
            quick_options(),
        );

        let mut turn = runner.start(ThreadId::from("t13"), "count".into());
        let events = collect(&mut turn).await;

        let call = events
            .iter()
            .find(|e| matches!(e, TurnEvent::ToolCall { .. }))
            .unwrap();
        match call {
            TurnEvent::ToolCall { input, .. } => {
                assert_eq!(input["query"], "select 1");
            }
            _ => unreachable!(),
        }
        assert!(matches!(events.last().unwrap(), TurnEvent::Final { .. }));
    }

    #[tokio::test]
    async fn tool_timeout_is_a_recoverable_tool_error() {
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(
            StaticTool::new("sql_db_query", "late").with_delay(Duration::from_millis(500)),
        ));

        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call(
                "sql_db_query",
                serde_json::json!({"query": "select pg_sleep(60)"}),
            )],
            "That took too long.",
        ));
        let options = TurnOptions {
            tool_timeout: Duration::from_millis(50),
            ..quick_options()
        };
        let runner = runner_with(provider, Arc::new(MemoryStore::new()), tools, options);

        let mut turn = runner.start(ThreadId::from("t14"), "slow".into());
        let events = collect(&mut turn).await;

        let result = events
            .iter()
            .find(|e| matches!(e, TurnEvent::ToolResult { .. }))
            .unwrap();
        match result {
            TurnEvent::ToolResult { error, .. } => {
                assert!(error.as_deref().unwrap().contains("timed out"));
            }
            _ => unreachable!(),
        }
        assert!(matches!(events.last().unwrap(), TurnEvent::Final { .. }));
    }

    #[tokio::test]
    async fn write_failure_aborts_the_turn() {
        let runner = runner_with(
            Arc::new(SequentialMockProvider::single_text("unreachable")),
            Arc::new(FailingStore),
            ToolRegistry::new(),
            quick_options(),
        );

        let mut turn = runner.start(ThreadId::from("t15"), "hello".into());
        let events = collect(&mut turn).await;

        assert_eq!(frame_types(&events), vec!["thread", "error"]);
        match events.last().unwrap() {
            TurnEvent::Error { kind, message } => {
                assert_eq!(kind, "write_failure");
                assert!(message.contains("disk full"));
            }
            other => panic!("Expected error frame, got {other:?}"),
        }
        assert_eq!(*turn.phase.borrow(), TurnPhase::Failed);
    }

    #[tokio::test]
    async fn disconnect_stops_the_turn_without_further_appends() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(
            StreamScriptProvider::new(vec![vec![
                text_chunk("a"),
                text_chunk("b"),
                done_chunk(vec![]),
            ]])
            .with_gap(Duration::from_millis(200)),
        );
        let runner = runner_with(provider, store.clone(), ToolRegistry::new(), quick_options());

        let thread = ThreadId::from("t16");
        let mut turn = runner.start(thread.clone(), "hello".into());

        // Read the opening frames, then walk away mid-stream.
        let first = turn.events.recv().await.unwrap();
        assert!(matches!(first, TurnEvent::Thread { .. }));
        let second = turn.events.recv().await.unwrap();
        assert!(matches!(second, TurnEvent::Token { .. }));
        drop(turn);

        tokio::time::sleep(Duration::from_millis(400)).await;

        // The user message was persisted before the model call; nothing
        // after the disconnect was.
        let history = store.history(&thread).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn same_thread_turns_run_in_arrival_order() {
        let store = Arc::new(MemoryStore::new());
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(
            StaticTool::new("sql_db_query", "42").with_delay(Duration::from_millis(200)),
        ));

        let provider = Arc::new(SequentialMockProvider::new(vec![
            Ok(make_tool_call_response(
                vec![make_tool_call(
                    "sql_db_query",
                    serde_json::json!({"query": "select count(*) from t"}),
                )],
                "",
            )),
            Ok(make_text_response("first done")),
            Ok(make_text_response("second done")),
        ]));
        let runner = runner_with(provider, store.clone(), tools, quick_options());

        let thread = ThreadId::from("busy");
        let mut first = runner.start(thread.clone(), "first".into());
        let mut second = runner.start(thread.clone(), "second".into());

        let (first_events, second_events) =
            tokio::join!(collect(&mut first), collect(&mut second));
        assert!(matches!(first_events.last().unwrap(), TurnEvent::Final { .. }));
        assert!(matches!(second_events.last().unwrap(), TurnEvent::Final { .. }));

        // The second turn queued: its user message lands after every
        // message of the first, despite the first being much slower.
        let history = store.history(&thread).await.unwrap();
        assert_eq!(history.len(), 6);
        assert_eq!(history[0].content, "first");
        assert_eq!(history[4].content, "second");
        assert_eq!(history[5].content, "second done");
    }

    #[tokio::test]
    async fn concurrent_threads_do_not_wait_for_each_other() {
        let store = Arc::new(MemoryStore::new());
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(
            StaticTool::new("sql_db_query", "42").with_delay(Duration::from_millis(300)),
        ));

        let provider = Arc::new(StreamScriptProvider::new(vec![
            vec![done_chunk(vec![make_tool_call(
                "sql_db_query",
                serde_json::json!({"query": "select 1"}),
            )])],
            vec![text_chunk("fast answer"), done_chunk(vec![])],
            vec![text_chunk("slow answer"), done_chunk(vec![])],
        ]));
        let runner = runner_with(provider, store.clone(), tools, quick_options());

        let mut slow = runner.start(ThreadId::from("slow-thread"), "slow".into());

        // Give the slow turn time to enter its tool call.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut fast = runner.start(ThreadId::from("fast-thread"), "fast".into());

        // The fast thread finishes while the slow one is still inside
        // its tool invocation.
        let fast_events = collect(&mut fast).await;
        assert!(matches!(
            fast_events.last().unwrap(),
            TurnEvent::Final { text } if text == "fast answer"
        ));
        assert!(store.history(&ThreadId::from("slow-thread")).await.unwrap().len() < 4);

        let slow_events = collect(&mut slow).await;
        assert!(matches!(
            slow_events.last().unwrap(),
            TurnEvent::Final { text } if text == "slow answer"
        ));
    }

    #[tokio::test]
    async fn system_prompt_override_is_sent_to_the_model() {
        // A provider that echoes the system prompt back as its answer.
        struct EchoSystem;
        #[async_trait::async_trait]
        impl Provider for EchoSystem {
            fn name(&self) -> &str {
                "echo_system"
            }
            async fn complete(
                &self,
                request: ProviderRequest,
            ) -> Result<sqlsage_core::provider::ProviderResponse, ProviderError> {
                Ok(sqlsage_core::provider::ProviderResponse {
                    message: Message::assistant(request.messages[0].content.clone()),
                    usage: None,
                    model: "echo".into(),
                })
            }
        }

        let options = TurnOptions {
            system_prompt: Some("You only speak SQL.".into()),
            ..quick_options()
        };
        let runner = runner_with(
            Arc::new(EchoSystem),
            Arc::new(MemoryStore::new()),
            ToolRegistry::new(),
            options,
        );

        let mut turn = runner.start(ThreadId::from("t17"), "hello".into());
        let events = collect(&mut turn).await;
        assert!(matches!(
            events.last().unwrap(),
            TurnEvent::Final { text } if text == "You only speak SQL."
        ));
    }

    #[tokio::test]
    async fn prior_history_is_replayed_to_the_model() {
        // A provider that answers with the number of messages it was sent.
        struct CountMessages;
        #[async_trait::async_trait]
        impl Provider for CountMessages {
            fn name(&self) -> &str {
                "count"
            }
            async fn complete(
                &self,
                request: ProviderRequest,
            ) -> Result<sqlsage_core::provider::ProviderResponse, ProviderError> {
                Ok(sqlsage_core::provider::ProviderResponse {
                    message: Message::assistant(request.messages.len().to_string()),
                    usage: None,
                    model: "count".into(),
                })
            }
        }

        let store = Arc::new(MemoryStore::new());
        let thread = ThreadId::from("t18");
        store
            .append(&thread, &Message::user("earlier question"))
            .await
            .unwrap();
        store
            .append(&thread, &Message::assistant("earlier answer"))
            .await
            .unwrap();

        let runner = runner_with(
            Arc::new(CountMessages),
            store.clone(),
            ToolRegistry::new(),
            quick_options(),
        );
        let mut turn = runner.start(thread.clone(), "follow-up".into());
        let events = collect(&mut turn).await;

        // system + 2 history + new user = 4.
        assert!(matches!(
            events.last().unwrap(),
            TurnEvent::Final { text } if text == "4"
        ));
    }
}
