#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sentra-invoker** – Translates an `AgentDef` and a consolidated input
//! mapping into an `AgentOutput`, isolating the LLM adapter from the
//! Orchestrator.
//!
//! The invoker never throws: every failure mode — transport error, deadline
//! breach, malformed output, schema violation — is folded into
//! `AgentOutput::error(..)` and returned to the caller as a value.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use sentra_llm_gateway::{LlmGateway, LlmRequest, AGENT_MAX_TOKENS, AGENT_TEMPERATURE};
use sentra_types::{AgentDef, AgentOutput, MAX_OUTPUT_SCHEMA_KEYS};
use tracing::{debug, instrument, warn};

/// Errors internal to prompt construction; never escapes `invoke` as a
/// propagated error — always folded into `AgentOutput::error`.
#[derive(Debug, thiserror::Error)]
enum InvokeError {
    #[error("deadline exceeded")]
    Timeout,
    #[error("LLM transport failure: {0}")]
    Transport(String),
    #[error("output has {0} keys, exceeding the limit of {1}")]
    TooManyKeys(usize, usize),
    #[error("output key \"{0}\" is not declared in the agent's output schema")]
    UnknownKey(String),
}

/// Key under which the job's original input is merged into every agent's
/// consolidated input.
pub const RAW_INPUT_KEY: &str = "raw_input";

/// Invoke a single agent: build its prompt, call the LLM gateway, extract
/// and schema-validate the JSON output, and return an `AgentOutput`.
///
/// `input` must already contain the job's `raw_input` plus a
/// `"{depId}_output"` entry for every upstream dependency; the Orchestrator
/// is responsible for assembling this map.
///
/// Honors `deadline`: if the gateway call has not completed by then, returns
/// `AgentOutput::error("timeout")` without retrying.
#[instrument(skip(gateway, input), fields(agent_id = %agent_def.agent_id))]
pub async fn invoke(
    gateway: &LlmGateway,
    agent_def: &AgentDef,
    input: &serde_json::Map<String, serde_json::Value>,
    deadline: Duration,
) -> AgentOutput {
    let prompt = build_prompt(agent_def, input);

    let request = match LlmRequest::new(prompt) {
        Ok(req) => req
            .with_max_tokens(AGENT_MAX_TOKENS)
            .with_metadata(agent_def.agent_id.clone(), String::new()),
        Err(e) => return AgentOutput::error(format!("failed to build request: {e}")),
    };
    let request = match request.with_temperature(AGENT_TEMPERATURE) {
        Ok(req) => req,
        Err(e) => return AgentOutput::error(format!("failed to set temperature: {e}")),
    };

    let start = Instant::now();
    let response = match tokio::time::timeout(deadline, gateway.complete(request)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!(agent_id = %agent_def.agent_id, error = %e, "LLM transport failure");
            return AgentOutput::error(InvokeError::Transport(e.to_string()).to_string());
        }
        Err(_) => {
            warn!(agent_id = %agent_def.agent_id, elapsed_ms = start.elapsed().as_millis() as u64, "deadline exceeded");
            return AgentOutput::error(InvokeError::Timeout.to_string());
        }
    };

    match extract_and_validate(response.content(), agent_def) {
        Ok(output) => output,
        Err(e) => {
            warn!(agent_id = %agent_def.agent_id, error = %e, "output validation failed");
            AgentOutput::error(e.to_string())
        }
    }
}

/// Object-safe form of the invoker contract, so the Orchestrator can depend
/// on a trait rather than a concrete gateway type.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Invoke a single agent. Never throws.
    async fn invoke(
        &self,
        agent_def: &AgentDef,
        input: &serde_json::Map<String, serde_json::Value>,
        deadline: Duration,
    ) -> AgentOutput;
}

/// `Invoker` backed by a concrete `LlmGateway`.
pub struct GatewayInvoker {
    gateway: LlmGateway,
}

impl GatewayInvoker {
    /// Wrap a gateway as an `Invoker`.
    pub fn new(gateway: LlmGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Invoker for GatewayInvoker {
    async fn invoke(
        &self,
        agent_def: &AgentDef,
        input: &serde_json::Map<String, serde_json::Value>,
        deadline: Duration,
    ) -> AgentOutput {
        invoke(&self.gateway, agent_def, input, deadline).await
    }
}

/// Build the prompt sent to the LLM: system prompt, serialized input, and a
/// trailing instruction demanding strict JSON.
fn build_prompt(agent_def: &AgentDef, input: &serde_json::Map<String, serde_json::Value>) -> String {
    let serialized = serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string());
    format!(
        "{}\n\nInput data: {}\n\nRespond with a single JSON object and nothing else.",
        agent_def.system_prompt, serialized
    )
}

/// Extract a JSON object from the raw LLM response and validate it against
/// the agent's declared schema.
fn extract_and_validate(content: &str, agent_def: &AgentDef) -> Result<AgentOutput, InvokeError> {
    // Direct parse first.
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(content.trim()) {
        if let Some(object) = value.as_object() {
            return finish(object.clone(), agent_def);
        }
    }

    // Fall back to a fenced code block.
    if let Some(fenced) = extract_fenced_block(content) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&fenced) {
            if let Some(object) = value.as_object() {
                return finish(object.clone(), agent_def);
            }
        }
    }

    // Degraded fallback: raw text, fixed low confidence.
    debug!("falling back to raw-text degraded output");
    let mut degraded = serde_json::Map::new();
    degraded.insert("raw_response".to_string(), serde_json::Value::String(content.to_string()));
    Ok(AgentOutput::success(degraded, "Response could not be parsed as JSON", 0.5))
}

fn extract_fenced_block(content: &str) -> Option<String> {
    let marker = if content.contains("```json") { "```json" } else if content.contains("```") { "```" } else { return None };
    let after = content.split(marker).nth(1)?;
    let body = after.split("```").next()?;
    Some(body.trim().to_string())
}

/// Apply the ≤5-key / declared-field schema check to a successfully parsed
/// JSON object.
fn finish(mut output: serde_json::Map<String, serde_json::Value>, agent_def: &AgentDef) -> Result<AgentOutput, InvokeError> {
    // `reasoning`/`confidence` are distinct `AgentOutput` fields, not part
    // of the declared output schema; pull them out before the schema
    // bound is checked so they don't leak into the stored output (and
    // from there into a downstream agent's `{dep}_output` input).
    let reasoning = output
        .remove("reasoning")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "Agent processed the input".to_string());
    let confidence = output.remove("confidence").and_then(|v| v.as_f64()).unwrap_or(0.8) as f32;

    if output.len() > MAX_OUTPUT_SCHEMA_KEYS {
        return Err(InvokeError::TooManyKeys(output.len(), MAX_OUTPUT_SCHEMA_KEYS));
    }
    if !agent_def.output_schema.is_empty() {
        for key in output.keys() {
            if !agent_def.output_schema.contains_key(key) {
                return Err(InvokeError::UnknownKey(key.clone()));
            }
        }
    }

    Ok(AgentOutput::success(output, reasoning, confidence))
}
