#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sentra-types** – Shared primitive data structures for the Sentra
//! agent orchestration core.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that every other crate can depend on it without causing cycles.
//! It intentionally makes no assumptions about I/O, LLM transport, or
//! persistence — those concerns live in `sentra-llm-gateway`,
//! `sentra-registry`, and `sentra-bus` respectively.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

//─────────────────────────────
//  Security constants
//─────────────────────────────

/// Maximum number of fields an `AgentDef.output_schema` may declare.
pub const MAX_OUTPUT_SCHEMA_KEYS: usize = 5;

/// Maximum allowed length for an agent's system prompt, to bound memory use.
pub const MAX_SYSTEM_PROMPT_LEN: usize = 32_768;

/// Maximum allowed length for an agent id or name.
pub const MAX_ID_LEN: usize = 256;

/// Built-in tenant used as a fallback for shared, cross-tenant agents.
pub const SYSTEM_TENANT: &str = "system";

//─────────────────────────────
//  Agent class / job kind
//─────────────────────────────

/// The three kinds of playbook a domain defines, and the class every node
/// referenced by that playbook must share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentClass {
    /// Ingests a free-form textual report.
    Ingestion,
    /// Answers a natural-language question.
    Query,
    /// Administrative / management operations.
    Management,
}

impl fmt::Display for AgentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentClass::Ingestion => "ingestion",
            AgentClass::Query => "query",
            AgentClass::Management => "management",
        };
        f.write_str(s)
    }
}

//─────────────────────────────
//  AgentDef
//─────────────────────────────

/// Declared field type for an entry in an `AgentDef.output_schema`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaFieldType {
    /// A JSON string.
    String,
    /// A JSON number.
    Number,
    /// A JSON boolean.
    Boolean,
    /// A JSON array.
    Array,
    /// A nested JSON object.
    Object,
}

/// Definition of a single agent: a named unit with a system prompt, an
/// allowed tool list, an ordered dependency list, and a bounded output
/// schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDef {
    /// Unique id within the owning tenant (or `system`).
    pub agent_id: String,
    /// Human-readable display name, used in logs and status events.
    pub agent_name: String,
    /// Which playbook class this agent may be referenced from.
    pub agent_class: AgentClass,
    /// The system prompt sent to the LLM ahead of the consolidated input.
    pub system_prompt: String,
    /// Tool names this agent is permitted to reference (opaque to the core).
    pub tools: HashSet<String>,
    /// Ordered list of upstream agent ids this agent consumes output from.
    pub dependencies: Vec<String>,
    /// Declared output fields, at most `MAX_OUTPUT_SCHEMA_KEYS` entries.
    pub output_schema: HashMap<String, SchemaFieldType>,
    /// Whether the agent is eligible for scheduling.
    pub enabled: bool,
    /// Monotonically increasing definition version, starting at 1.
    pub version: u32,
    /// Whether this definition is shipped under the `system` tenant.
    pub is_builtin: bool,
}

impl AgentDef {
    /// Validate the structural invariants of an `AgentDef` in isolation
    /// (schema size and required fields). Cross-agent invariants such as
    /// dependency existence and acyclicity are the responsibility of
    /// `sentra-dag`.
    ///
    /// # Security
    /// Bounds the output schema and prompt length to avoid unbounded
    /// memory growth from a malformed or adversarial definition.
    pub fn validate(&self) -> Result<(), TypesError> {
        if self.agent_id.trim().is_empty() {
            return Err(TypesError::EmptyField("agent_id"));
        }
        if self.agent_id.len() > MAX_ID_LEN {
            return Err(TypesError::TooLong("agent_id", self.agent_id.len(), MAX_ID_LEN));
        }
        if self.system_prompt.len() > MAX_SYSTEM_PROMPT_LEN {
            return Err(TypesError::TooLong(
                "system_prompt",
                self.system_prompt.len(),
                MAX_SYSTEM_PROMPT_LEN,
            ));
        }
        if self.output_schema.len() > MAX_OUTPUT_SCHEMA_KEYS {
            return Err(TypesError::SchemaTooWide(
                self.output_schema.len(),
                MAX_OUTPUT_SCHEMA_KEYS,
            ));
        }
        if self.version == 0 {
            return Err(TypesError::InvalidVersion);
        }
        Ok(())
    }
}

//─────────────────────────────
//  Playbook / DomainDef
//─────────────────────────────

/// A directed edge between two playbook nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Upstream agent id.
    pub from: String,
    /// Downstream agent id.
    pub to: String,
}

impl Edge {
    /// Construct a new edge.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self { from: from.into(), to: to.into() }
    }
}

// `Edge` fields are plain `String`s above for serde simplicity; the
// `Hash`/`Eq` derive uses field-wise comparison, which is sufficient since
// edges are compared structurally, not interned.

/// A directed acyclic graph of agents for one of the three job kinds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Playbook {
    /// The set of agent ids participating in this playbook.
    pub nodes: HashSet<String>,
    /// Directed edges between nodes; `from` must run before `to`.
    pub edges: Vec<Edge>,
}

/// A domain: a triple of playbooks sharing a domain id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainDef {
    /// Unique domain identifier.
    pub domain_id: String,
    /// Ingestion playbook.
    pub ingestion: Playbook,
    /// Query playbook.
    pub query: Playbook,
    /// Management playbook.
    pub management: Playbook,
}

impl DomainDef {
    /// Select the playbook matching a given job kind.
    pub fn playbook_for(&self, kind: AgentClass) -> &Playbook {
        match kind {
            AgentClass::Ingestion => &self.ingestion,
            AgentClass::Query => &self.query,
            AgentClass::Management => &self.management,
        }
    }
}

//─────────────────────────────
//  Job
//─────────────────────────────

/// One invocation of the Orchestrator: a playbook, initial input, and
/// identity metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub job_id: String,
    /// Which of the three playbooks this job exercises.
    pub kind: AgentClass,
    /// Owning tenant.
    pub tenant_id: String,
    /// Requesting user, if known.
    pub user_id: Option<String>,
    /// Domain this job is scoped to.
    pub domain_id: String,
    /// Initial input mapping, merged into every agent's consolidated input
    /// under the `raw_input` key plus upstream outputs.
    pub input: serde_json::Map<String, serde_json::Value>,
    /// Optional correlation id for a query result.
    pub query_id: Option<String>,
    /// Optional correlation id for an ingested incident.
    pub incident_id: Option<String>,
}

//─────────────────────────────
//  AgentOutput
//─────────────────────────────

/// Outcome of a single agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentResultStatus {
    /// The agent produced a schema-conformant output.
    Success,
    /// The agent failed (transport, timeout, schema violation, or lookup).
    Error,
}

/// Structured result of invoking one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Whether the invocation succeeded.
    pub status: AgentResultStatus,
    /// Output mapping (`None` when `status == Error`), at most 5 keys.
    pub output: Option<serde_json::Map<String, serde_json::Value>>,
    /// Free-text reasoning returned by the agent, `""` on error.
    pub reasoning: String,
    /// Opaque confidence score as reported by the LLM; not normalized here.
    pub confidence: f32,
    /// Present only when `status == Error`.
    pub error_message: Option<String>,
}

impl AgentOutput {
    /// Build a successful output.
    pub fn success(
        output: serde_json::Map<String, serde_json::Value>,
        reasoning: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            status: AgentResultStatus::Success,
            output: Some(output),
            reasoning: reasoning.into(),
            confidence,
            error_message: None,
        }
    }

    /// Build an error output.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: AgentResultStatus::Error,
            output: None,
            reasoning: String::new(),
            confidence: 0.0,
            error_message: Some(message.into()),
        }
    }

    /// Whether this output represents a failure.
    pub fn is_error(&self) -> bool {
        matches!(self.status, AgentResultStatus::Error)
    }
}

//─────────────────────────────
//  ExecutionLogEntry
//─────────────────────────────

/// Status of a single execution-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    /// The agent was invoked and returned a conformant output.
    Success,
    /// The agent's output was reused from the per-job cache.
    Cached,
    /// The agent failed; downstream nodes are skip-cascaded.
    Error,
    /// The agent was never invoked because an upstream node failed.
    Skipped,
}

/// One entry in a job's append-only execution log.
///
/// Field names are `snake_case` and must match the wire shape exactly —
/// this type round-trips cross-implementation test fixtures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// Agent id this entry describes.
    pub agent_id: String,
    /// Agent display name at the time of execution.
    pub agent_name: String,
    /// Outcome of this node's visit.
    pub status: LogStatus,
    /// Wall-clock time the entry was recorded, RFC3339 UTC.
    pub timestamp: DateTime<Utc>,
    /// Free-text reasoning; `""` for error/skipped.
    pub reasoning: String,
    /// Output mapping; `None` for error/skipped.
    pub output: Option<serde_json::Map<String, serde_json::Value>>,
    /// Wall-clock execution time in milliseconds; `0` for cached/skipped.
    pub execution_time_ms: u64,
    /// Present only when `status == Error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

//─────────────────────────────
//  StatusEvent
//─────────────────────────────

/// Closed enumeration of recognized status tags. The Orchestrator core
/// emits only `LoadingAgents`, `AgentsLoaded`, `Invoking`, `Complete`, and
/// `Error`; the remaining tags are reserved for the enclosing handler so
/// that callers share one typed vocabulary end to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTag {
    /// Emitted before topological sort.
    LoadingAgents,
    /// Emitted after sort, with the planned node list as metadata.
    AgentsLoaded,
    /// Emitted before each non-cached agent call.
    Invoking,
    /// Emitted after a successful agent call.
    Complete,
    /// Emitted after a failing agent call.
    Error,
    /// Handler-level: downstream verification of a produced artifact.
    Verifying,
    /// Handler-level: synthesis of a final answer/report.
    Synthesizing,
    /// Handler-level: persistence of the final artifact.
    Saving,
    /// Handler-level: the job completed successfully.
    Completed,
    /// Handler-level: the job failed.
    Failed,
}

/// Fire-and-forget status notification, delivered best-effort to
/// subscribed clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Job this event concerns.
    pub job_id: String,
    /// Requesting user, if known.
    pub user_id: Option<String>,
    /// Owning tenant.
    pub tenant_id: String,
    /// Name of the agent this event concerns, when applicable.
    pub agent_name: Option<String>,
    /// Status tag.
    pub status: StatusTag,
    /// Human-readable message.
    pub message: String,
    /// Arbitrary structured metadata (e.g. planned node list, timing).
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    /// Wall-clock time the event was raised, RFC3339 UTC.
    pub timestamp: DateTime<Utc>,
}

//─────────────────────────────
//  ExecutionResult
//─────────────────────────────

/// Final status of a job, as returned by `Execute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalStatus {
    /// No node in the log carries `status == Error`, and the job was not
    /// cancelled mid-run.
    Completed,
    /// At least one node carries `status == Error`, or the job was
    /// cancelled before completion.
    Failed,
}

/// Counts of cached vs. freshly executed agents for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of log entries with `status == Cached`.
    pub cached_agents: usize,
    /// Number of log entries with `status == Success` or `Error`.
    pub executed_agents: usize,
    /// Total number of nodes declared by the playbook.
    pub total_agents: usize,
}

/// Result of one `Execute` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the job completed or failed.
    pub final_status: FinalStatus,
    /// The full, ordered execution log.
    pub execution_log: Vec<ExecutionLogEntry>,
    /// Cache statistics snapshotted before the per-job cache is cleared.
    pub cache_stats: CacheStats,
}

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Errors produced while constructing or validating shared types.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// A required string field was empty or whitespace-only.
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),
    /// A field exceeded its maximum allowed length.
    #[error("{0} too long: {1} > {2}")]
    TooLong(&'static str, usize, usize),
    /// `output_schema` declared more than `MAX_OUTPUT_SCHEMA_KEYS` fields.
    #[error("output schema too wide: {0} > {1}")]
    SchemaTooWide(usize, usize),
    /// `version` was zero; versions start at 1.
    #[error("version must be >= 1")]
    InvalidVersion,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str, class: AgentClass, deps: &[&str]) -> AgentDef {
        AgentDef {
            agent_id: id.to_string(),
            agent_name: id.to_string(),
            agent_class: class,
            system_prompt: "do the thing".to_string(),
            tools: HashSet::new(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            output_schema: HashMap::new(),
            enabled: true,
            version: 1,
            is_builtin: false,
        }
    }

    #[test]
    fn agent_def_rejects_empty_id() {
        let mut a = agent("a", AgentClass::Ingestion, &[]);
        a.agent_id = "   ".to_string();
        assert!(matches!(a.validate(), Err(TypesError::EmptyField("agent_id"))));
    }

    #[test]
    fn agent_def_rejects_oversized_schema() {
        let mut a = agent("a", AgentClass::Ingestion, &[]);
        for i in 0..6 {
            a.output_schema.insert(format!("f{i}"), SchemaFieldType::String);
        }
        assert!(matches!(a.validate(), Err(TypesError::SchemaTooWide(6, 5))));
    }

    #[test]
    fn agent_def_rejects_version_zero() {
        let mut a = agent("a", AgentClass::Ingestion, &[]);
        a.version = 0;
        assert!(matches!(a.validate(), Err(TypesError::InvalidVersion)));
    }

    #[test]
    fn log_entry_serializes_snake_case() {
        let entry = ExecutionLogEntry {
            agent_id: "a".into(),
            agent_name: "Agent A".into(),
            status: LogStatus::Success,
            timestamp: Utc::now(),
            reasoning: "ok".into(),
            output: None,
            execution_time_ms: 12,
            error_message: None,
        };
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["agent_id"], "a");
        assert_eq!(v["execution_time_ms"], 12);
        assert!(v.get("error_message").is_none());
    }

    #[test]
    fn domain_def_selects_matching_playbook() {
        let domain = DomainDef {
            domain_id: "d".into(),
            ingestion: Playbook::default(),
            query: Playbook::default(),
            management: Playbook::default(),
        };
        let _ = domain.playbook_for(AgentClass::Query);
    }
}
