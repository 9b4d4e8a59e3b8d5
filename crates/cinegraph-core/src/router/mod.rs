//! Tool router: the bounded decision loop of one turn.
//!
//! ```text
//! AwaitingDecision --tool call--> ToolInvoked --output--> AwaitingDecision
//! AwaitingDecision --text-------> FinalAnswer
//! AwaitingDecision --budget spent--> FinalAnswer (tools disabled, trace fallback)
//! ```
//!
//! In [`RoutingMode::Guarded`] the first decision of a turn is checked against the keyword
//! classifier ([`intent::classify`]): a domain question the model tried to answer directly (or
//! sent to a tool of another domain) is redirected to the highest-priority matching tool.

pub mod intent;

pub use intent::{classify, Intent};

use crate::answer::strip_reasoning;
use crate::conversation::{Message, ToolCall};
use crate::llm::{ChatModel, ChatRequest, LlmError};
use crate::prompts::{routing_system_instruction, EXHAUSTION_NOTE};
use crate::tools::{ToolDescriptor, ToolKind, ToolOutput, ToolRegistry, ToolStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_TOOL_CALLS: usize = 6;

const INPUT_KEYS: [&str; 3] = ["input", "query", "question"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Routing left entirely to the model.
    Soft,
    /// Model routing plus a keyword check of the first decision.
    #[default]
    Guarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingPolicy {
    pub mode: RoutingMode,
    /// Tie-break order when several tools could answer.
    pub priority: Vec<ToolKind>,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            mode: RoutingMode::Guarded,
            priority: ToolKind::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceStep {
    pub tool: String,
    pub input: String,
    pub output: String,
    pub status: ToolStatus,
    /// Call was forced by the guard rather than chosen by the model.
    pub guarded: bool,
}

/// Ordered (tool, input, output) steps of one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecisionTrace {
    pub steps: Vec<TraceStep>,
}

impl DecisionTrace {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn tools_used(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.tool.clone()).collect()
    }

    pub fn last_output(&self) -> Option<&str> {
        self.steps.last().map(|s| s.output.as_str())
    }
}

/// Messages produced by one turn (ai/tool only, in causal order) and how they came about.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub messages: Vec<Message>,
    pub trace: DecisionTrace,
    /// Loop bound reached; the last answer was forced.
    pub exhausted: bool,
}

enum LoopState {
    AwaitingDecision,
    ToolInvoked { call: ToolCall, guarded: bool },
    FinalAnswer(Message),
}

pub struct AgentLoop {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    policy: RoutingPolicy,
    max_tool_calls: usize,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl AgentLoop {
    pub fn new(model: Arc<dyn ChatModel>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            model,
            tools,
            policy: RoutingPolicy::default(),
            max_tool_calls: DEFAULT_MAX_TOOL_CALLS,
            temperature: Some(0.0),
            max_tokens: None,
        }
    }

    pub fn with_policy(mut self, policy: RoutingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_tool_calls(mut self, max: usize) -> Self {
        self.max_tool_calls = max;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Tool descriptors in routing priority order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.descriptors(&self.policy.priority)
    }

    /// Routing-policy system message for new conversations.
    pub fn system_instruction(&self) -> String {
        routing_system_instruction(&self.descriptors())
    }

    fn request(&self, messages: Vec<Message>, tools: Vec<ToolDescriptor>) -> ChatRequest {
        let request = ChatRequest::new(messages)
            .with_tools(tools)
            .with_max_tokens(self.max_tokens);
        match self.temperature {
            Some(t) => request.with_temperature(t),
            None => request,
        }
    }

    /// Runs one turn. `history` must already end with the human `question`.
    ///
    /// Only a model failure during a decision is an error; tool failures are tool messages.
    pub async fn run(&self, history: &[Message], question: &str) -> Result<TurnOutcome, LlmError> {
        let descriptors = self.descriptors();
        let intent = classify(question);
        let mut context: Vec<Message> = history.to_vec();
        let start = context.len();
        let mut trace = DecisionTrace::default();
        let mut invocations = 0usize;
        let mut first_decision = true;
        let mut exhausted = false;

        debug!(
            target: "cinegraph::router",
            domains = ?intent.domains,
            self_referential = intent.self_referential,
            off_domain = intent.is_off_domain(),
            "Classified question"
        );

        let mut state = LoopState::AwaitingDecision;
        loop {
            state = match state {
                LoopState::AwaitingDecision if invocations >= self.max_tool_calls => {
                    exhausted = true;
                    warn!(
                        target: "cinegraph::router",
                        invocations,
                        "Tool-call budget exhausted; forcing final answer"
                    );
                    LoopState::FinalAnswer(self.forced_answer(&context, &trace).await)
                }
                LoopState::AwaitingDecision => {
                    let reply = self
                        .model
                        .complete(self.request(context.clone(), descriptors.clone()))
                        .await?;
                    let guarded = first_decision && self.policy.mode == RoutingMode::Guarded;
                    first_decision = false;

                    let redirect = if guarded {
                        self.redirect(&intent, reply.tool_calls.first(), question)
                    } else {
                        None
                    };

                    if let Some(call) = redirect {
                        info!(
                            target: "cinegraph::router",
                            tool = %call.name,
                            "Guard redirected first decision"
                        );
                        context.push(Message::ai_tool_call("", call.clone()));
                        LoopState::ToolInvoked {
                            call,
                            guarded: true,
                        }
                    } else {
                        let mut calls = reply.tool_calls.into_iter();
                        match calls.next() {
                            Some(call) => {
                                let ignored = calls.count();
                                if ignored > 0 {
                                    debug!(
                                        target: "cinegraph::router",
                                        ignored,
                                        "Model requested several tools; honouring the first"
                                    );
                                }
                                context.push(Message::ai_tool_call(reply.content, call.clone()));
                                LoopState::ToolInvoked {
                                    call,
                                    guarded: false,
                                }
                            }
                            // Reasoning-only replies count as empty.
                            None if strip_reasoning(&reply.content).is_empty() => {
                                LoopState::FinalAnswer(Message::ai(fallback_answer(&trace)))
                            }
                            None => LoopState::FinalAnswer(Message::ai(reply.content)),
                        }
                    }
                }
                LoopState::ToolInvoked { call, guarded } => {
                    invocations += 1;
                    let input = tool_input(&call.arguments, question);
                    let output = match self.tools.get(&call.name) {
                        Some(registered) => registered.tool.invoke(&input).await,
                        None => ToolOutput::error(format!(
                            "Unknown tool {}. Available tools: {}",
                            call.name,
                            self.tools.names().join(", ")
                        )),
                    };
                    info!(
                        target: "cinegraph::router",
                        tool = %call.name,
                        status = ?output.status,
                        invocation = invocations,
                        "Tool invoked"
                    );
                    trace.steps.push(TraceStep {
                        tool: call.name.clone(),
                        input,
                        output: output.text.clone(),
                        status: output.status,
                        guarded,
                    });
                    context.push(Message::tool(&call, output.text));
                    LoopState::AwaitingDecision
                }
                LoopState::FinalAnswer(message) => {
                    context.push(message);
                    break;
                }
            };
        }

        Ok(TurnOutcome {
            messages: context.split_off(start),
            trace,
            exhausted,
        })
    }

    /// Guarded check of the first decision. `Some` is the call that replaces it.
    fn redirect(&self, intent: &Intent, chosen: Option<&ToolCall>, question: &str) -> Option<ToolCall> {
        if intent.domains.is_empty() {
            return None;
        }
        if let Some(call) = chosen {
            let chosen_kind = self.tools.get(&call.name).map(|t| t.tool.kind());
            if chosen_kind.map_or(false, |k| intent.matches(k)) {
                return None;
            }
        }
        let target = intent
            .ranked(&self.policy.priority)
            .into_iter()
            .find_map(|k| self.tools.first_of_kind(k))?;
        Some(ToolCall {
            id: format!("guard-{}", uuid::Uuid::new_v4()),
            name: target.descriptor.name.clone(),
            arguments: serde_json::json!({ "input": question }).to_string(),
        })
    }

    /// Final answer once the budget is spent: one tool-less model call, else the trace.
    async fn forced_answer(&self, context: &[Message], trace: &DecisionTrace) -> Message {
        let mut messages = context.to_vec();
        messages.push(Message::system(EXHAUSTION_NOTE));
        match self.model.complete(self.request(messages, Vec::new())).await {
            Ok(reply) if !strip_reasoning(&reply.content).is_empty() => Message::ai(reply.content),
            Ok(_) => Message::ai(fallback_answer(trace)),
            Err(e) => {
                warn!(target: "cinegraph::router", error = %e, "Forced final answer failed; using trace");
                Message::ai(fallback_answer(trace))
            }
        }
    }
}

/// Best-effort answer from the most recent tool output.
fn fallback_answer(trace: &DecisionTrace) -> String {
    match trace.last_output() {
        Some(output) => output.to_string(),
        None => crate::answer::NO_OUTPUT.to_string(),
    }
}

/// Tool input from raw call arguments: a JSON object's `input`/`query`/`question`, a JSON
/// string, or the raw text; the question itself when nothing usable is present.
fn tool_input(arguments: &str, question: &str) -> String {
    let raw = arguments.trim();
    if raw.is_empty() {
        return question.to_string();
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => INPUT_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(|v| v.as_str()))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(question)
            .to_string(),
        Ok(serde_json::Value::String(s)) if !s.trim().is_empty() => s,
        Ok(_) => question.to_string(),
        Err(_) => raw.to_string(),
    }
}
