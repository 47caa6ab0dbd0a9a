// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Continuous execution engine: the multi-turn LLM/tool loop that drives
//! one task from a prompt to a terminal `completionReason`.
//!
//! Per iteration: assemble turn input (history + a memory-sourced error-
//! solution hint), select a provider-sized tool subset, make one LLM call,
//! detect a completion signal or schedule the requested tool calls through
//! [`taskloom_scheduler::Scheduler`], record outcomes into
//! [`taskloom_memory::MemoryStore`], and append the turn to the session.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use taskloom_mcp::DynamicToolSelector;
use taskloom_mcp_client::ToolDefinition;
use taskloom_memory::MemoryStore;
use taskloom_model::{CompletionRequest, Message, ModelProvider, ResponseEvent, Role, ToolSchema};
use taskloom_retry::{with_retry, RetryOptions};
use taskloom_scheduler::{ApprovalMode, Scheduler, ToolCallRequest, ToolCallStatus};

use crate::session::Session;

/// Reserved tool name the model calls to signal it is done.
pub const PLAN_COMPLETE_TOOL: &str = "plan_complete";
/// Text sentinel honored alongside `plan_complete`.
pub const TASK_COMPLETE_SENTINEL: &str = "task_complete";

const DEFAULT_MAX_ITERATIONS: u32 = 30;
/// Fraction of `max_tokens` at which the Engine requests compaction at the
/// *start* of the next iteration's turn-assembly step.
const COMPACTION_THRESHOLD: f32 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    Completed,
    IterationCap,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub max_iterations: u32,
    pub require_human_approval: bool,
    pub session_id: Option<String>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self { max_iterations: DEFAULT_MAX_ITERATIONS, require_human_approval: false, session_id: None }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub final_result: String,
    pub iterations: u32,
    pub completion_reason: CompletionReason,
}

/// Progress events emitted over the course of one `execute_until_complete`
/// run, mirroring this codebase's `AgentEvent` channel convention.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    IterationStarted { iteration: u32 },
    /// Batched per-turn, not per-token — streaming display is a non-goal.
    TextDelta(String),
    ToolCallsScheduled { count: usize },
    ToolCallCompleted { call_id: String, tool_name: String, is_error: bool },
    ContextCompacted { tokens_before: usize, tokens_after: usize },
    TokenUsage { input: u32, output: u32 },
    IterationComplete { iteration: u32 },
    Completion { reason: CompletionReason },
}

/// One non-streaming-shaped result collected from a provider's streamed
/// response: the accumulated text plus any tool calls it requested.
struct LlmTurnResult {
    text: String,
    tool_calls: Vec<ToolCallRequest>,
}

async fn collect_completion(model: &dyn ModelProvider, req: CompletionRequest) -> anyhow::Result<LlmTurnResult> {
    let mut stream = model.complete(req).await?;
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    while let Some(event) = stream.next().await {
        match event? {
            ResponseEvent::TextDelta(chunk) => text.push_str(&chunk),
            ResponseEvent::ToolCall { id, name, arguments } => {
                let args: Value = serde_json::from_str(&arguments).unwrap_or(Value::Null);
                tool_calls.push(ToolCallRequest { call_id: id, tool_name: name, args });
            }
            ResponseEvent::ThinkingDelta(_) | ResponseEvent::Usage { .. } | ResponseEvent::Done => {}
            ResponseEvent::Error(msg) => warn!(error = %msg, "recoverable provider stream error"),
        }
    }

    Ok(LlmTurnResult { text, tool_calls })
}

/// Wraps the single `provider.generate()`-shaped call with the transport-
/// level retry supervisor (timeouts, connection resets); distinct from the
/// engine's own one-shot tool-limit shrink retry, which decides *what* to
/// send, not *whether to resend*.
async fn collect_completion_with_retry(
    model: &dyn ModelProvider,
    req: CompletionRequest,
    cancel: &CancellationToken,
) -> anyhow::Result<LlmTurnResult> {
    let opts = RetryOptions::default();
    with_retry(&opts, cancel, |_: &anyhow::Error| true, || {
        let req = req.clone();
        async move { collect_completion(model, req).await }
    })
    .await
    .map(|outcome| outcome.value)
    .map_err(|e| anyhow::anyhow!(e.to_string()))
}

fn is_completion_signal(result: &LlmTurnResult) -> bool {
    result.tool_calls.iter().any(|c| c.tool_name == PLAN_COMPLETE_TOOL) || result.text.contains(TASK_COMPLETE_SENTINEL)
}

/// Drives one `executeUntilComplete` run. Holds no session state between
/// calls — callers construct one per task, or reuse the same instance
/// across tasks since it is stateless aside from its dependencies.
pub struct ExecutionEngine {
    model: Arc<dyn ModelProvider>,
    memory: Arc<dyn MemoryStore>,
    scheduler: Arc<Scheduler>,
    selector: DynamicToolSelector,
    approval_mode: ApprovalMode,
}

impl ExecutionEngine {
    pub fn new(model: Arc<dyn ModelProvider>, memory: Arc<dyn MemoryStore>, scheduler: Arc<Scheduler>, approval_mode: ApprovalMode) -> Self {
        Self { model, memory, scheduler, selector: DynamicToolSelector::default(), approval_mode }
    }

    /// Run the loop to completion, cancellation, or the iteration cap.
    ///
    /// `session` is mutated in place with every assistant/tool message
    /// appended, matching this codebase's existing `Agent` turn-loop
    /// convention of owning history on the caller's session value.
    pub async fn execute_until_complete(
        &self,
        session: &mut Session,
        prompt: &str,
        catalog: &[ToolDefinition],
        opts: ExecutionOptions,
        cancel: CancellationToken,
        events: tokio::sync::mpsc::UnboundedSender<EngineEvent>,
    ) -> ExecutionOutcome {
        let _ = opts.session_id;
        if session.messages.is_empty() {
            session.push(Message::system("You are an autonomous coding agent."));
        }
        session.push(Message::user(prompt));

        if opts.max_iterations == 0 {
            let _ = events.send(EngineEvent::Completion { reason: CompletionReason::IterationCap });
            return ExecutionOutcome { final_result: String::new(), iterations: 0, completion_reason: CompletionReason::IterationCap };
        }

        let mut last_text = String::new();
        let mut iteration = 0u32;

        loop {
            if cancel.is_cancelled() {
                let _ = events.send(EngineEvent::Completion { reason: CompletionReason::Cancelled });
                return ExecutionOutcome { final_result: last_text, iterations: iteration, completion_reason: CompletionReason::Cancelled };
            }
            if iteration >= opts.max_iterations {
                let _ = events.send(EngineEvent::Completion { reason: CompletionReason::IterationCap });
                return ExecutionOutcome { final_result: last_text, iterations: iteration, completion_reason: CompletionReason::IterationCap };
            }

            iteration += 1;
            let _ = events.send(EngineEvent::IterationStarted { iteration });

            // Step: compression trigger, checked at the start of turn assembly.
            if session.is_near_limit(COMPACTION_THRESHOLD) {
                let before = session.token_count;
                let sys = session.messages.first().filter(|m| m.role == Role::System).cloned();
                crate::compact::compact_session(&mut session.messages, sys);
                session.recalculate_tokens();
                let _ = events.send(EngineEvent::ContextCompacted { tokens_before: before, tokens_after: session.token_count });
            }

            // Step 1: consult Memory for a high-confidence error-solution hint.
            let turn_text = session.messages.last().and_then(|m| m.as_text()).unwrap_or(prompt).to_string();
            if let Some(solution) = self.memory.find_error_solution(&turn_text, &[]).await {
                if solution.confidence > taskloom_memory::HIGH_CONFIDENCE {
                    session.push(Message::system(format!(
                        "Hint from past experience (confidence {:.2}): {}",
                        solution.confidence, solution.solution
                    )));
                }
            }

            // Step 2: dynamic tool selection.
            let mut selected = self.selector.select(catalog, &turn_text, self.model.name());
            let mut tools: Vec<ToolSchema> =
                selected.iter().map(|t| ToolSchema { name: t.name.clone(), description: t.description.clone(), parameters: t.parameters.clone() }).collect();

            // Step 3: one non-streaming-shaped LLM call, wrapped in the
            // transport-level retry supervisor (timeouts, connection
            // resets), plus the one-shot tool-limit shrink retry on top
            // (distinct concerns: the supervisor decides *whether to
            // resend* the same request, this decides *what* to send next).
            let req = CompletionRequest { messages: session.messages.clone(), tools, stream: true, system_dynamic_suffix: None };
            let mut result = match collect_completion_with_retry(self.model.as_ref(), req, &cancel).await {
                Ok(r) => r,
                Err(e) if taskloom_mcp::is_tool_limit_error(&e.to_string()) => {
                    selected = self.selector.select_shrunk(catalog, &turn_text, self.model.name());
                    tools = selected
                        .iter()
                        .map(|t| ToolSchema { name: t.name.clone(), description: t.description.clone(), parameters: t.parameters.clone() })
                        .collect();
                    let retry_req =
                        CompletionRequest { messages: session.messages.clone(), tools, stream: true, system_dynamic_suffix: None };
                    match collect_completion_with_retry(self.model.as_ref(), retry_req, &cancel).await {
                        Ok(r) => r,
                        Err(e2) => {
                            warn!(error = %e2, "LLM call failed after tool-limit shrink retry; treating iteration as failed");
                            let _ = events.send(EngineEvent::IterationComplete { iteration });
                            continue;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "LLM call failed; treating iteration as failed");
                    let _ = events.send(EngineEvent::IterationComplete { iteration });
                    continue;
                }
            };

            last_text = result.text.clone();
            if !result.text.is_empty() {
                let _ = events.send(EngineEvent::TextDelta(result.text.clone()));
            }

            // Step 4: completion signal.
            if result.tool_calls.is_empty() && is_completion_signal(&result) {
                session.push(Message::assistant(result.text.clone()));
                let _ = events.send(EngineEvent::IterationComplete { iteration });
                let _ = events.send(EngineEvent::Completion { reason: CompletionReason::Completed });
                return ExecutionOutcome { final_result: last_text, iterations: iteration, completion_reason: CompletionReason::Completed };
            }

            if result.tool_calls.is_empty() {
                // No tool calls and no completion signal: append the
                // assistant text and loop again (the model may be thinking
                // out loud before its next tool call).
                session.push(Message::assistant(result.text.clone()));
                let _ = events.send(EngineEvent::IterationComplete { iteration });
                continue;
            }

            // Step 5: schedule the requested tool calls.
            let requests = std::mem::take(&mut result.tool_calls);
            let _ = events.send(EngineEvent::ToolCallsScheduled { count: requests.len() });

            if !result.text.is_empty() {
                session.push(Message::assistant(result.text.clone()));
            }
            for request in &requests {
                session.push(Message {
                    role: Role::Assistant,
                    content: taskloom_model::MessageContent::ToolCall {
                        tool_call_id: request.call_id.clone(),
                        function: taskloom_model::FunctionCall { name: request.tool_name.clone(), arguments: request.args.to_string() },
                    },
                });
            }

            let child_cancel = cancel.child_token();
            let snapshots = match self.scheduler.schedule(requests, child_cancel).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "scheduler rejected tool call batch");
                    let _ = events.send(EngineEvent::IterationComplete { iteration });
                    continue;
                }
            };

            // Step 6 + 7: record outcomes into Memory and append tool messages.
            for snap in &snapshots {
                let is_error = matches!(snap.status, ToolCallStatus::Error | ToolCallStatus::Cancelled);
                let display = snap.response.as_ref().map(|r| r.display.clone()).unwrap_or_default();

                let _ = events.send(EngineEvent::ToolCallCompleted {
                    call_id: snap.request.call_id.clone(),
                    tool_name: snap.request.tool_name.clone(),
                    is_error,
                });

                let meta = serde_json::json!({
                    "tool": snap.request.tool_name,
                    "args": snap.request.args,
                    "result": display,
                });
                if is_error {
                    let _ = self.memory.store_error_pattern(&display, &turn_text, meta).await;
                } else {
                    let _ = self.memory.store_success_pattern(&turn_text, &[snap.request.tool_name.clone()], meta).await;
                }

                session.push(Message::tool_result(snap.request.call_id.clone(), display));
            }

            let _ = events.send(EngineEvent::IterationComplete { iteration });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_completion_signal_detects_plan_complete_tool() {
        let r = LlmTurnResult {
            text: String::new(),
            tool_calls: vec![ToolCallRequest { call_id: "1".into(), tool_name: PLAN_COMPLETE_TOOL.into(), args: Value::Null }],
        };
        assert!(is_completion_signal(&r));
    }

    #[test]
    fn is_completion_signal_detects_text_sentinel() {
        let r = LlmTurnResult { text: "All done. task_complete".into(), tool_calls: vec![] };
        assert!(is_completion_signal(&r));
    }

    #[test]
    fn is_completion_signal_false_when_neither_present() {
        let r = LlmTurnResult { text: "still working".into(), tool_calls: vec![] };
        assert!(!is_completion_signal(&r));
    }
}
