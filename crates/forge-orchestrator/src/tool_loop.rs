// Tool-use loop for a single specialist
//
// Each turn sends the whole conversation so far. Client tool invocations
// (delegation) are answered locally and the loop asks again; server tool
// invocations (web search) are only counted.

use forge_abstraction::{CompletionRequest, CompletionResponse, StopReason, ToolInvocation, ToolResult, Turn, decode};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::EngineContext;
use crate::error::{OrchestrationError, Result};
use crate::events::RunReporter;
use crate::specialist::SpecialistTask;
use crate::subagent::{DELEGATION_TOOL_NAME, DelegationRequest, SubCallHandler};

/// Prefix of a specialist's first user turn.
pub const SPECIALIST_USER_PREFIX: &str = "Here is the text to analyze:\n\n";

/// Loop states.
#[derive(Debug)]
enum LoopState {
    AwaitingModel,
    ProcessingToolCalls {
        /// Raw assistant content, echoed back verbatim.
        content: Vec<Value>,
        invocations: Vec<ToolInvocation>,
        /// Narrative text of the same response, used if nothing gets answered.
        text: String,
    },
    Done(String),
}

/// Drives one specialist's conversation to completion.
pub struct ToolLoop<'a> {
    ctx: &'a EngineContext,
    task: &'a SpecialistTask,
    reporter: &'a RunReporter,
    extended_thinking: bool,
    /// Delegations started so far; never exceeds `max_sub_calls`.
    sub_calls: u32,
}

impl<'a> ToolLoop<'a> {
    pub fn new(ctx: &'a EngineContext, task: &'a SpecialistTask, reporter: &'a RunReporter, extended_thinking: bool) -> Self {
        Self { ctx, task, reporter, extended_thinking, sub_calls: 0 }
    }

    /// Runs the loop and returns the final narrative text.
    ///
    /// # Errors
    /// Transport errors abort the loop. Running out of turns is
    /// [`OrchestrationError::MaxTurns`].
    pub async fn run(mut self, document: &str) -> Result<String> {
        let config = self.ctx.config.clone();
        let tools = self.task.tools(&config);
        let mut messages = vec![Turn::user(format!("{SPECIALIST_USER_PREFIX}{document}"))];
        let mut turns = 0u32;
        let mut state = LoopState::AwaitingModel;

        loop {
            state = match state {
                LoopState::AwaitingModel => {
                    let max_turns = config.effective_max_turns();
                    if turns >= max_turns {
                        warn!(specialist = %self.task.id, max_turns, "Tool-use loop reached max turns");
                        return Err(OrchestrationError::MaxTurns { specialist: self.task.id.clone(), max_turns });
                    }

                    let mut request = CompletionRequest::new(&config.model, config.max_tokens)
                        .with_system(self.task.instructions.clone())
                        .with_messages(messages.clone())
                        .with_tools(tools.clone());
                    if turns == 0 && self.extended_thinking {
                        request.max_tokens = config.thinking_max_tokens;
                        request = request.with_thinking(config.thinking_budget_tokens);
                    }
                    turns += 1;

                    let response = self.ctx.transport.complete(&request).await?;
                    self.after_response(response, turns, &mut messages)
                }
                LoopState::ProcessingToolCalls { content, invocations, text } => {
                    let results = self.answer_tool_calls(&invocations).await;
                    if results.is_empty() {
                        LoopState::Done(text)
                    } else {
                        messages.push(Turn::assistant_blocks(content));
                        messages.push(Turn::tool_results(&results));
                        LoopState::AwaitingModel
                    }
                }
                LoopState::Done(text) => {
                    debug!(specialist = %self.task.id, turns, sub_calls = self.sub_calls, "Tool-use loop finished");
                    return Ok(text);
                }
            };
        }
    }

    fn after_response(&self, response: CompletionResponse, turn: u32, messages: &mut Vec<Turn>) -> LoopState {
        let decoded = decode(&response);
        if decoded.search_invocations > 0 {
            self.ctx.usage.record_searches(decoded.search_invocations as u64);
        }
        debug!(
            specialist = %self.task.id,
            turn,
            stop_reason = ?response.stop_reason,
            tool_calls = decoded.tool_invocations.len(),
            searches = decoded.search_invocations,
            "Specialist turn completed"
        );

        if decoded.tool_invocations.is_empty() && response.stop_reason == Some(StopReason::PauseTurn) {
            messages.push(Turn::assistant_blocks(response.content));
            return LoopState::AwaitingModel;
        }

        if decoded.tool_invocations.is_empty() || response.stop_reason == Some(StopReason::EndTurn) {
            return LoopState::Done(decoded.text);
        }

        LoopState::ProcessingToolCalls {
            content: response.content,
            invocations: decoded.tool_invocations,
            text: decoded.text,
        }
    }

    /// Answers this turn's client tool invocations, sequentially.
    ///
    /// Unknown tools only get an error result when something else in the same
    /// turn was answered; otherwise the turn produces no results at all.
    async fn answer_tool_calls(&mut self, invocations: &[ToolInvocation]) -> Vec<ToolResult> {
        let max_sub_calls = self.ctx.config.max_sub_calls;
        let mut results = Vec::new();
        let mut unknown = Vec::new();

        for invocation in invocations {
            if invocation.name != DELEGATION_TOOL_NAME || !self.task.uses_delegation {
                warn!(specialist = %self.task.id, tool = %invocation.name, "Model invoked an undeclared tool");
                unknown.push(invocation);
                continue;
            }

            if self.sub_calls >= max_sub_calls {
                info!(specialist = %self.task.id, max_sub_calls, "Delegation refused, cap reached");
                results.push(ToolResult::error(&invocation.id, limit_reached_message(max_sub_calls)));
                continue;
            }

            results.push(self.delegate(invocation).await);
        }

        if !results.is_empty() {
            results.extend(
                unknown
                    .into_iter()
                    .map(|invocation| ToolResult::error(&invocation.id, format!("Unknown tool '{}'.", invocation.name))),
            );
        }

        results
    }

    async fn delegate(&mut self, invocation: &ToolInvocation) -> ToolResult {
        self.sub_calls += 1;
        let count = self.sub_calls;
        let labels = self.task.capability_labels();
        let objective = invocation.input.get("objective").and_then(Value::as_str).unwrap_or_default();
        self.reporter.delegation_started(&self.task.id, count, objective, labels.clone());
        let _finished = DelegationFinished { reporter: self.reporter, specialist: &self.task.id, count, labels };

        let outcome = match DelegationRequest::from_input(&invocation.input) {
            Ok(request) => SubCallHandler::new(self.ctx).run(&self.task.label, &request).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(text) => ToolResult::success(&invocation.id, text),
            Err(e) => {
                warn!(specialist = %self.task.id, delegation = count, error = %e, "Delegated sub-call failed");
                ToolResult::error(&invocation.id, failure_message(&e.to_string()))
            }
        }
    }
}

/// Emits the `delegation_finished` event when dropped, which also covers a
/// specialist cancelled mid-delegation by its timeout.
struct DelegationFinished<'a> {
    reporter: &'a RunReporter,
    specialist: &'a str,
    count: u32,
    labels: Vec<String>,
}

impl Drop for DelegationFinished<'_> {
    fn drop(&mut self) {
        self.reporter.delegation_finished(self.specialist, self.count, std::mem::take(&mut self.labels));
    }
}

fn failure_message(error: &str) -> String {
    format!("Sub-agent failed: {error}. Please complete your analysis with the information already gathered.")
}

fn limit_reached_message(max_sub_calls: u32) -> String {
    format!(
        "Sub-agent limit reached (max {max_sub_calls}). Please complete your analysis with the information already gathered."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::events::{EventDetail, RunEvent};
    use async_trait::async_trait;
    use forge_abstraction::{CompletionTransport, ModelError, TurnContent, UsageAccumulator};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Answers specialist turns from a queue; sub-calls always get the same text.
    struct Scripted {
        turns: Mutex<VecDeque<std::result::Result<CompletionResponse, ModelError>>>,
        sub_call: std::result::Result<CompletionResponse, ModelError>,
        sub_call_delay: Duration,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl Scripted {
        fn new(turns: Vec<CompletionResponse>) -> Self {
            Self {
                turns: Mutex::new(turns.into_iter().map(Ok).collect()),
                sub_call: Ok(CompletionResponse::text("research report")),
                sub_call_delay: Duration::ZERO,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn specialist_requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().iter().filter(|r| !is_sub_call(r)).cloned().collect()
        }

        fn sub_call_count(&self) -> usize {
            self.requests.lock().unwrap().iter().filter(|r| is_sub_call(r)).count()
        }
    }

    fn is_sub_call(request: &CompletionRequest) -> bool {
        request.system.as_deref().is_some_and(|s| s.starts_with("You are a focused research sub-agent"))
    }

    #[async_trait]
    impl CompletionTransport for Scripted {
        async fn complete(&self, request: &CompletionRequest) -> std::result::Result<CompletionResponse, ModelError> {
            self.requests.lock().unwrap().push(request.clone());
            if is_sub_call(request) {
                tokio::time::sleep(self.sub_call_delay).await;
                return self.sub_call.clone();
            }
            self.turns.lock().unwrap().pop_front().unwrap_or_else(|| Ok(CompletionResponse::text("[]")))
        }
    }

    fn tool_use_response(calls: &[(&str, &str)]) -> CompletionResponse {
        let content = calls
            .iter()
            .map(|(id, name)| {
                json!({"type": "tool_use", "id": id, "name": name,
                       "input": {"objective": format!("verify claim {id}"), "return_format": "summary"}})
            })
            .collect();
        CompletionResponse { content, stop_reason: Some(StopReason::ToolUse), usage: Default::default() }
    }

    fn delegation_response(inputs: &[(&str, Value)]) -> CompletionResponse {
        let content = inputs
            .iter()
            .map(|(id, input)| json!({"type": "tool_use", "id": id, "name": DELEGATION_TOOL_NAME, "input": input}))
            .collect();
        CompletionResponse { content, stop_reason: Some(StopReason::ToolUse), usage: Default::default() }
    }

    fn delegation_events(rx: &mut mpsc::UnboundedReceiver<RunEvent>) -> (Vec<u32>, Vec<u32>) {
        let mut started = Vec::new();
        let mut finished = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event.detail {
                EventDetail::DelegationStarted { count, .. } => started.push(count),
                EventDetail::DelegationFinished { count, .. } => finished.push(count),
                _ => {}
            }
        }
        (started, finished)
    }

    fn delegating_task() -> SpecialistTask {
        SpecialistTask {
            id: "evidence".into(),
            label: "Evidence & Claims".into(),
            uses_search: true,
            uses_delegation: true,
            instructions: "review".into(),
        }
    }

    fn context(transport: Arc<Scripted>) -> EngineContext {
        EngineContext::new(transport, EngineConfig::default(), Arc::new(UsageAccumulator::new()))
    }

    fn tool_result_blocks(turn: &Turn) -> Vec<Value> {
        match &turn.content {
            TurnContent::Blocks(blocks) => blocks.clone(),
            TurnContent::Text(_) => Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_two_delegations_then_final_turn() {
        let transport = Arc::new(Scripted::new(vec![
            tool_use_response(&[("t1", DELEGATION_TOOL_NAME), ("t2", DELEGATION_TOOL_NAME)]),
            CompletionResponse::text("[{\"title\": \"done\"}]"),
        ]));
        let ctx = context(Arc::clone(&transport));
        let task = delegating_task();
        let reporter = RunReporter::silent();

        let text = ToolLoop::new(&ctx, &task, &reporter, false).run("doc").await.unwrap();

        assert_eq!(text, "[{\"title\": \"done\"}]");
        let requests = transport.specialist_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(transport.sub_call_count(), 2);
        assert_eq!(ctx.usage.snapshot().sub_calls, 2);

        let second = &requests[1];
        assert_eq!(second.messages.len(), 3);
        let results = tool_result_blocks(&second.messages[2]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["tool_use_id"], "t1");
        assert_eq!(results[0]["content"], "research report");
        assert!(results[0].get("is_error").is_none());
    }

    #[tokio::test]
    async fn test_cap_refuses_without_sub_call() {
        let calls: Vec<_> = (1..=4).map(|i| format!("t{i}")).collect();
        let pairs: Vec<_> = calls.iter().map(|id| (id.as_str(), DELEGATION_TOOL_NAME)).collect();
        let transport = Arc::new(Scripted::new(vec![tool_use_response(&pairs), CompletionResponse::text("[]")]));
        let ctx = context(Arc::clone(&transport));
        let task = delegating_task();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = RunReporter::new(tx);

        ToolLoop::new(&ctx, &task, &reporter, false).run("doc").await.unwrap();

        assert_eq!(transport.sub_call_count(), 3);
        let requests = transport.specialist_requests();
        let results = tool_result_blocks(&requests[1].messages[2]);
        assert_eq!(results[3]["is_error"], true);
        assert_eq!(
            results[3]["content"],
            "Sub-agent limit reached (max 3). Please complete your analysis with the information already gathered."
        );

        let counts: Vec<u32> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|RunEvent { detail, .. }| match detail {
                EventDetail::DelegationStarted { count, .. } => Some(count),
                _ => None,
            })
            .collect();
        assert_eq!(counts, [1, 2, 3]);
    }

    #[tokio::test]
    async fn test_sub_call_failure_becomes_error_result() {
        let mut scripted = Scripted::new(vec![
            tool_use_response(&[("t1", DELEGATION_TOOL_NAME)]),
            CompletionResponse::text("[]"),
        ]);
        scripted.sub_call = Err(ModelError::Network("connection reset".into()));
        let transport = Arc::new(scripted);
        let ctx = context(Arc::clone(&transport));
        let task = delegating_task();
        let reporter = RunReporter::silent();

        let text = ToolLoop::new(&ctx, &task, &reporter, false).run("doc").await.unwrap();

        assert_eq!(text, "[]");
        let results = tool_result_blocks(&transport.specialist_requests()[1].messages[2]);
        assert_eq!(results[0]["is_error"], true);
        assert_eq!(
            results[0]["content"],
            "Sub-agent failed: Network error: connection reset. Please complete your analysis with the information already gathered."
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_alone_ends_loop() {
        let mut response = tool_use_response(&[("t1", "calculator")]);
        response.content.insert(0, json!({"type": "text", "text": "partial"}));
        let transport = Arc::new(Scripted::new(vec![response]));
        let ctx = context(Arc::clone(&transport));
        let task = delegating_task();
        let reporter = RunReporter::silent();

        let text = ToolLoop::new(&ctx, &task, &reporter, false).run("doc").await.unwrap();

        assert_eq!(text, "partial");
        assert_eq!(transport.specialist_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_end_turn_with_tool_use_is_done() {
        let mut response = tool_use_response(&[("t1", DELEGATION_TOOL_NAME)]);
        response.stop_reason = Some(StopReason::EndTurn);
        let transport = Arc::new(Scripted::new(vec![response]));
        let ctx = context(Arc::clone(&transport));
        let task = delegating_task();
        let reporter = RunReporter::silent();

        ToolLoop::new(&ctx, &task, &reporter, false).run("doc").await.unwrap();

        assert_eq!(transport.sub_call_count(), 0);
    }

    #[tokio::test]
    async fn test_searches_counted_and_thinking_first_turn_only() {
        let mut first = tool_use_response(&[("t1", DELEGATION_TOOL_NAME)]);
        first.content.insert(0, json!({"type": "server_tool_use", "id": "s1", "name": "web_search", "input": {"query": "gdp"}}));
        first.content.insert(1, json!({"type": "web_search_tool_result", "tool_use_id": "s1", "content": []}));
        let transport = Arc::new(Scripted::new(vec![first, CompletionResponse::text("[]")]));
        let ctx = context(Arc::clone(&transport));
        let task = delegating_task();
        let reporter = RunReporter::silent();

        ToolLoop::new(&ctx, &task, &reporter, true).run("doc").await.unwrap();

        let requests = transport.specialist_requests();
        assert!(requests[0].thinking.is_some());
        assert_eq!(requests[0].max_tokens, 32_000);
        assert!(requests[1].thinking.is_none());
        assert_eq!(requests[1].max_tokens, 16_000);
        assert_eq!(ctx.usage.snapshot().search_invocations, 1);
        assert!(requests[0].declares_web_search());
    }

    #[tokio::test]
    async fn test_pause_turn_is_continued() {
        let paused = CompletionResponse {
            content: vec![json!({"type": "server_tool_use", "id": "s1", "name": "web_search", "input": {}})],
            stop_reason: Some(StopReason::PauseTurn),
            usage: Default::default(),
        };
        let transport = Arc::new(Scripted::new(vec![paused, CompletionResponse::text("[]")]));
        let ctx = context(Arc::clone(&transport));
        let task = delegating_task();
        let reporter = RunReporter::silent();

        let text = ToolLoop::new(&ctx, &task, &reporter, false).run("doc").await.unwrap();

        assert_eq!(text, "[]");
        let requests = transport.specialist_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 2);
    }

    #[tokio::test]
    async fn test_max_turns_bound() {
        let endless: Vec<_> =
            (0..20).map(|i| tool_use_response(&[(format!("t{i}").as_str(), DELEGATION_TOOL_NAME)])).collect();
        let transport = Arc::new(Scripted::new(endless));
        let config = EngineConfig { max_turns: 4, ..EngineConfig::default() };
        let ctx = EngineContext::new(transport.clone(), config, Arc::new(UsageAccumulator::new()));
        let task = delegating_task();
        let reporter = RunReporter::silent();

        let err = ToolLoop::new(&ctx, &task, &reporter, false).run("doc").await.unwrap_err();

        assert!(matches!(err, OrchestrationError::MaxTurns { max_turns: 4, .. }));
        assert_eq!(transport.specialist_requests().len(), 4);
        assert_eq!(transport.sub_call_count(), 3);
    }

    #[tokio::test]
    async fn test_first_turn_carries_document() {
        let transport = Arc::new(Scripted::new(vec![CompletionResponse::text("[]")]));
        let ctx = context(Arc::clone(&transport));
        let task = SpecialistTask { uses_search: false, uses_delegation: false, ..delegating_task() };
        let reporter = RunReporter::silent();

        ToolLoop::new(&ctx, &task, &reporter, false).run("The document.").await.unwrap();

        let request = &transport.specialist_requests()[0];
        assert_eq!(request.messages[0], Turn::user("Here is the text to analyze:\n\nThe document."));
        assert!(request.tools.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_call_timeout_becomes_error_result_and_counts() {
        let transport = Arc::new(Scripted {
            sub_call_delay: Duration::from_secs(120),
            ..Scripted::new(vec![
                delegation_response(&[
                    ("t1", json!({"objective": "trace the 40% figure", "return_format": "summary"})),
                    ("t2", json!({"objective": "find the original study", "return_format": "summary"})),
                ]),
                CompletionResponse::text("[]"),
            ])
        });
        let config = EngineConfig { max_sub_calls: 1, ..EngineConfig::default() };
        let ctx = EngineContext::new(transport.clone(), config, Arc::new(UsageAccumulator::new()));
        let task = delegating_task();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = RunReporter::new(tx);

        let text = ToolLoop::new(&ctx, &task, &reporter, false).run("doc").await.unwrap();

        assert_eq!(text, "[]");
        assert_eq!(transport.sub_call_count(), 1);
        let results = tool_result_blocks(&transport.specialist_requests()[1].messages[2]);
        assert_eq!(results[0]["is_error"], true);
        assert_eq!(
            results[0]["content"],
            "Sub-agent failed: Sub-agent timed out after 60s. Please complete your analysis with the information already gathered."
        );
        assert_eq!(results[1]["is_error"], true);
        assert!(results[1]["content"].as_str().unwrap().starts_with("Sub-agent limit reached (max 1)."));
        assert_eq!(delegation_events(&mut rx), (vec![1], vec![1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_delegation_input_becomes_error_result_and_counts() {
        let transport = Arc::new(Scripted::new(vec![
            delegation_response(&[
                ("t1", json!({"objective": "check the survey"})),
                ("t2", json!({"objective": "check the survey", "return_format": "summary"})),
            ]),
            CompletionResponse::text("[]"),
        ]));
        let config = EngineConfig { max_sub_calls: 1, ..EngineConfig::default() };
        let ctx = EngineContext::new(transport.clone(), config, Arc::new(UsageAccumulator::new()));
        let task = delegating_task();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = RunReporter::new(tx);

        ToolLoop::new(&ctx, &task, &reporter, false).run("doc").await.unwrap();

        assert_eq!(transport.sub_call_count(), 0);
        let results = tool_result_blocks(&transport.specialist_requests()[1].messages[2]);
        assert_eq!(results[0]["is_error"], true);
        let failure = results[0]["content"].as_str().unwrap();
        assert!(failure.starts_with("Sub-agent failed:"), "{failure}");
        assert!(failure.contains("return_format"), "{failure}");
        assert!(results[1]["content"].as_str().unwrap().starts_with("Sub-agent limit reached (max 1)."));
        assert_eq!(delegation_events(&mut rx), (vec![1], vec![1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_delegation_still_reports_finished() {
        let transport = Arc::new(Scripted {
            sub_call_delay: Duration::from_secs(50),
            ..Scripted::new(vec![tool_use_response(&[("t1", DELEGATION_TOOL_NAME)])])
        });
        let ctx = context(Arc::clone(&transport));
        let task = delegating_task();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = RunReporter::new(tx);

        let outcome =
            tokio::time::timeout(Duration::from_secs(10), ToolLoop::new(&ctx, &task, &reporter, false).run("doc")).await;

        assert!(outcome.is_err());
        assert_eq!(delegation_events(&mut rx), (vec![1], vec![1]));
    }

    #[tokio::test]
    async fn test_zero_max_turns_still_makes_one_call() {
        let transport = Arc::new(Scripted::new(vec![CompletionResponse::text("[{\"title\": \"one\"}]")]));
        let config = EngineConfig { max_turns: 0, ..EngineConfig::default() };
        let ctx = EngineContext::new(transport.clone(), config, Arc::new(UsageAccumulator::new()));
        let task = delegating_task();
        let reporter = RunReporter::silent();

        let text = ToolLoop::new(&ctx, &task, &reporter, false).run("doc").await.unwrap();

        assert_eq!(text, "[{\"title\": \"one\"}]");
        assert_eq!(transport.specialist_requests().len(), 1);
    }
}
