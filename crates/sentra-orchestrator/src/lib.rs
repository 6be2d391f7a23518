#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sentra-orchestrator** – The per-job DAG executor: memoization,
//! topological scheduling, fail-fast error propagation with skip-cascade,
//! deterministic execution logging, and live status broadcasting.
//!
//! This is the heart of the workspace. Every other crate here exists to
//! give `Orchestrator::execute` something well-typed to call:
//! `sentra-dag` hands it a topological order, `sentra-registry` hands it
//! agent definitions, `sentra-invoker` turns a definition plus a merged
//! input into an `AgentOutput`, and `sentra-bus` carries the status
//! events it raises along the way out to subscribed clients.
//!
//! The cache and the execution log are both owned locally by a single
//! `execute` call — allocated on entry, folded into the returned
//! `ExecutionResult`, and dropped on exit. Nothing here is a
//! process-global; an `Orchestrator` value itself holds only shared,
//! read-only collaborators and may be reused across any number of
//! concurrent jobs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sentra_bus::{publish_best_effort, StatusPublisher};
use sentra_dag::{topological_order, DagError};
use sentra_invoker::Invoker;
use sentra_registry::Registry;
use sentra_types::{
    AgentClass, AgentOutput, CacheStats, ExecutionLogEntry, ExecutionResult, FinalStatus,
    LogStatus, Playbook, StatusEvent, StatusTag,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Supplies timestamps to the Orchestrator. Injectable so tests can drive
/// deterministic, reproducible log/event timestamps; production code uses
/// [`SystemClock`].
pub trait Clock: Send + Sync {
    /// The current time, used to stamp log entries and status events.
    fn now(&self) -> DateTime<Utc>;
}

/// `Clock` backed by the wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Why the remaining nodes in a job are being skip-cascaded, distinguishing
/// the two reasoning texts §7 requires: a failed agent names itself, while
/// cancellation carries the fixed literal `"Cancelled"`.
enum Cascade {
    /// The named agent failed; this and all subsequent nodes are skipped.
    Failure(String),
    /// The caller's cancellation signal fired before this node's turn.
    Cancelled,
}

/// One `Execute` invocation's parameters: identity metadata, the
/// resolved playbook to run, the job's initial input, a per-agent
/// deadline, and a cooperative cancellation signal.
pub struct ExecuteRequest {
    /// Unique job identifier, carried through every log entry and event.
    pub job_id: String,
    /// Which of the domain's three playbooks this job exercises.
    pub kind: AgentClass,
    /// Owning tenant, used for agent lookups.
    pub tenant_id: String,
    /// Requesting user, if known; carried on every status event.
    pub user_id: Option<String>,
    /// Domain this job is scoped to (carried for status metadata only;
    /// the Orchestrator does not re-resolve it).
    pub domain_id: String,
    /// The playbook to execute — already resolved and, by construction,
    /// expected to have passed `sentra_dag::validate_playbook` on write.
    pub playbook: Playbook,
    /// Initial input mapping, merged into every agent's consolidated
    /// input under the `raw_input` key.
    pub input: serde_json::Map<String, serde_json::Value>,
    /// Deadline handed to each individual agent invocation.
    pub deadline: Duration,
    /// Cooperative cancellation signal, checked at each agent boundary.
    pub cancel: CancellationToken,
}

impl ExecuteRequest {
    /// Construct a request with an already-cancelled-never token and the
    /// given deadline, for callers that do not need cancellation.
    pub fn new(
        job_id: impl Into<String>,
        kind: AgentClass,
        tenant_id: impl Into<String>,
        domain_id: impl Into<String>,
        playbook: Playbook,
        input: serde_json::Map<String, serde_json::Value>,
        deadline: Duration,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            tenant_id: tenant_id.into(),
            user_id: None,
            domain_id: domain_id.into(),
            playbook,
            input,
            deadline,
            cancel: CancellationToken::new(),
        }
    }
}

/// The per-job DAG executor. Holds only shared, read-only collaborators;
/// safe to construct once and reuse across any number of concurrent
/// jobs, each via its own `execute` call.
pub struct Orchestrator {
    registry: Arc<dyn Registry>,
    invoker: Arc<dyn Invoker>,
    publisher: Arc<dyn StatusPublisher>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    /// Wire an Orchestrator from its four collaborators.
    pub fn new(
        registry: Arc<dyn Registry>,
        invoker: Arc<dyn Invoker>,
        publisher: Arc<dyn StatusPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { registry, invoker, publisher, clock }
    }

    /// Execute one job: schedule the playbook's agents in topological
    /// order, memoizing outputs, fail-fast-cascading on the first error,
    /// and streaming status events throughout. Never panics or returns
    /// an `Err` — every failure mode this function can encounter is
    /// folded into the returned `ExecutionResult`.
    #[instrument(skip(self, req), fields(job_id = %req.job_id, tenant_id = %req.tenant_id, domain_id = %req.domain_id))]
    pub async fn execute(&self, req: ExecuteRequest) -> ExecutionResult {
        let ExecuteRequest {
            job_id,
            kind: _kind,
            tenant_id,
            user_id,
            domain_id: _domain_id,
            playbook,
            input,
            deadline,
            cancel,
        } = req;

        // Defense-in-depth: the validator should have rejected an empty
        // or cyclic playbook on write. A malformed playbook arriving here
        // anyway fails the job immediately with an empty log.
        if playbook.nodes.is_empty() {
            warn!(job_id = %job_id, "playbook has no nodes; failing job with empty log");
            return ExecutionResult {
                final_status: FinalStatus::Failed,
                execution_log: Vec::new(),
                cache_stats: CacheStats { cached_agents: 0, executed_agents: 0, total_agents: 0 },
            };
        }

        let order = match topological_order(&playbook.nodes, &playbook.edges) {
            Ok(order) => order,
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "malformed playbook reached Execute; failing job");
                return ExecutionResult {
                    final_status: FinalStatus::Failed,
                    execution_log: Vec::new(),
                    cache_stats: CacheStats {
                        cached_agents: 0,
                        executed_agents: 0,
                        total_agents: playbook.nodes.len(),
                    },
                };
            }
        };

        self.publish(
            &job_id,
            &tenant_id,
            &user_id,
            StatusTag::LoadingAgents,
            "loading agents".to_string(),
            None,
        )
        .await;

        let mut metadata = serde_json::Map::new();
        metadata.insert("agents".to_string(), serde_json::Value::from(order.clone()));
        self.publish(
            &job_id,
            &tenant_id,
            &user_id,
            StatusTag::AgentsLoaded,
            format!("{} agents planned", order.len()),
            Some(metadata),
        )
        .await;

        let mut cache: HashMap<String, AgentOutput> = HashMap::with_capacity(order.len());
        let mut log: Vec<ExecutionLogEntry> = Vec::with_capacity(order.len());
        let mut cascade: Option<Cascade> = None;

        for agent_id in order.iter() {
            if let Some(reason) = &cascade {
                log.push(self.skip_entry(agent_id, reason));
                continue;
            }

            if cancel.is_cancelled() {
                cascade = Some(Cascade::Cancelled);
                log.push(self.skip_entry(agent_id, cascade.as_ref().unwrap()));
                continue;
            }

            if let Some(cached) = cache.get(agent_id) {
                // Unreachable under a pure topological walk over a
                // single-parent DAG — every node has exactly one
                // predecessor path, so Kahn's algorithm visits it once.
                // Retained so the `cached` status is exercised if a
                // future scheduler re-enters a node (see sentra-dag's
                // level-parallel note).
                debug!(job_id = %job_id, agent_id = %agent_id, "cache hit");
                log.push(self.cached_entry(agent_id, agent_id, cached));
                continue;
            }

            let agent_def = match self.registry.get_agent(&tenant_id, agent_id).await {
                Ok(def) => def,
                Err(err) => {
                    let message = format!("agent lookup failed: {err}");
                    warn!(job_id = %job_id, agent_id = %agent_id, error = %err, "registry lookup miss");
                    self.publish(
                        &job_id,
                        &tenant_id,
                        &user_id,
                        StatusTag::Error,
                        message.clone(),
                        Some(agent_event_metadata(agent_id)),
                    )
                    .await;
                    let output = AgentOutput::error(message.clone());
                    log.push(self.error_entry(agent_id, agent_id, &message));
                    cache.insert(agent_id.clone(), output);
                    cascade = Some(Cascade::Failure(agent_id.clone()));
                    continue;
                }
            };

            self.publish(
                &job_id,
                &tenant_id,
                &user_id,
                StatusTag::Invoking,
                format!("invoking {}", agent_def.agent_name),
                Some(agent_event_metadata(&agent_def.agent_name)),
            )
            .await;

            let mut merged_input = input.clone();
            let mut dependency_failure = None;
            for dep in &agent_def.dependencies {
                match cache.get(dep) {
                    Some(dep_output) => {
                        merged_input.insert(
                            format!("{dep}_output"),
                            dep_output
                                .output
                                .clone()
                                .map(serde_json::Value::Object)
                                .unwrap_or(serde_json::Value::Null),
                        );
                    }
                    None => {
                        dependency_failure = Some(dep.clone());
                        break;
                    }
                }
            }

            if let Some(missing_dep) = dependency_failure {
                let message = format!("internal: dependency {missing_dep} not satisfied");
                warn!(job_id = %job_id, agent_id = %agent_id, %missing_dep, "unsatisfied dependency at resolve time");
                self.publish(
                    &job_id,
                    &tenant_id,
                    &user_id,
                    StatusTag::Error,
                    message.clone(),
                    Some(agent_event_metadata(&agent_def.agent_name)),
                )
                .await;
                let output = AgentOutput::error(message.clone());
                log.push(self.error_entry(agent_id, &agent_def.agent_name, &message));
                cache.insert(agent_id.clone(), output);
                cascade = Some(Cascade::Failure(agent_id.clone()));
                continue;
            }

            let start = Instant::now();
            let output = self.invoker.invoke(&agent_def, &merged_input, deadline).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            if output.is_error() {
                let message = output.error_message.clone().unwrap_or_default();
                info!(job_id = %job_id, agent_id = %agent_id, error = %message, "agent errored");
                self.publish(
                    &job_id,
                    &tenant_id,
                    &user_id,
                    StatusTag::Error,
                    message.clone(),
                    Some(agent_event_metadata(&agent_def.agent_name)),
                )
                .await;
                log.push(self.error_entry(agent_id, &agent_def.agent_name, &message));
                cache.insert(agent_id.clone(), output);
                cascade = Some(Cascade::Failure(agent_id.clone()));
            } else {
                info!(job_id = %job_id, agent_id = %agent_id, elapsed_ms, "agent completed");
                let mut metadata = agent_event_metadata(&agent_def.agent_name);
                metadata.insert("execution_time_ms".to_string(), serde_json::Value::from(elapsed_ms));
                self.publish(
                    &job_id,
                    &tenant_id,
                    &user_id,
                    StatusTag::Complete,
                    format!("{} completed", agent_def.agent_name),
                    Some(metadata),
                )
                .await;
                log.push(ExecutionLogEntry {
                    agent_id: agent_id.clone(),
                    agent_name: agent_def.agent_name.clone(),
                    status: LogStatus::Success,
                    timestamp: self.clock.now(),
                    reasoning: output.reasoning.clone(),
                    output: output.output.clone(),
                    execution_time_ms: elapsed_ms,
                    error_message: None,
                });
                cache.insert(agent_id.clone(), output);
            }
        }

        let final_status = if log.iter().any(|e| matches!(e.status, LogStatus::Error))
            || matches!(cascade, Some(Cascade::Cancelled))
        {
            FinalStatus::Failed
        } else {
            FinalStatus::Completed
        };

        let cached_agents = log.iter().filter(|e| matches!(e.status, LogStatus::Cached)).count();
        let executed_agents = log
            .iter()
            .filter(|e| matches!(e.status, LogStatus::Success | LogStatus::Error))
            .count();
        let cache_stats = CacheStats { cached_agents, executed_agents, total_agents: playbook.nodes.len() };

        // `cache` and `log` are locals; they are dropped here, at return,
        // satisfying the ownership contract that the Orchestrator itself
        // never retains per-job state.
        ExecutionResult { final_status, execution_log: log, cache_stats }
    }

    fn skip_entry(&self, agent_id: &str, cascade: &Cascade) -> ExecutionLogEntry {
        let reasoning = match cascade {
            Cascade::Failure(failed_id) => format!("Skipped due to failure of {failed_id}"),
            Cascade::Cancelled => "Cancelled".to_string(),
        };
        ExecutionLogEntry {
            agent_id: agent_id.to_string(),
            agent_name: agent_id.to_string(),
            status: LogStatus::Skipped,
            timestamp: self.clock.now(),
            reasoning,
            output: None,
            execution_time_ms: 0,
            error_message: None,
        }
    }

    fn error_entry(&self, agent_id: &str, agent_name: &str, message: &str) -> ExecutionLogEntry {
        ExecutionLogEntry {
            agent_id: agent_id.to_string(),
            agent_name: agent_name.to_string(),
            status: LogStatus::Error,
            timestamp: self.clock.now(),
            reasoning: String::new(),
            output: None,
            execution_time_ms: 0,
            error_message: Some(message.to_string()),
        }
    }

    fn cached_entry(&self, agent_id: &str, agent_name: &str, cached: &AgentOutput) -> ExecutionLogEntry {
        ExecutionLogEntry {
            agent_id: agent_id.to_string(),
            agent_name: agent_name.to_string(),
            status: LogStatus::Cached,
            timestamp: self.clock.now(),
            reasoning: cached.reasoning.clone(),
            output: cached.output.clone(),
            execution_time_ms: 0,
            error_message: None,
        }
    }

    async fn publish(
        &self,
        job_id: &str,
        tenant_id: &str,
        user_id: &Option<String>,
        status: StatusTag,
        message: String,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) {
        let agent_name = metadata
            .as_ref()
            .and_then(|m| m.get("agent_name"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let event = StatusEvent {
            job_id: job_id.to_string(),
            user_id: user_id.clone(),
            tenant_id: tenant_id.to_string(),
            agent_name,
            status,
            message,
            metadata,
            timestamp: self.clock.now(),
        };
        publish_best_effort(self.publisher.as_ref(), event).await;
    }
}

fn agent_event_metadata(agent_name: &str) -> serde_json::Map<String, serde_json::Value> {
    let mut m = serde_json::Map::new();
    m.insert("agent_name".to_string(), serde_json::Value::String(agent_name.to_string()));
    m
}

/// Re-exported so downstream crates building a wiring layer can name the
/// validator's error type without an extra dependency declaration.
pub use DagError as PlaybookError;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sentra_bus::InMemoryStatusPublisher;
    use sentra_invoker::Invoker;
    use sentra_registry::InMemoryRegistry;
    use sentra_types::{AgentDef, Edge, SchemaFieldType};
    use std::collections::{HashMap as StdHashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedInvoker {
        responses: StdHashMap<String, AgentOutput>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedInvoker {
        fn new(responses: StdHashMap<String, AgentOutput>) -> Self {
            Self { responses, calls: Mutex::new(Vec::new()) }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Invoker for ScriptedInvoker {
        async fn invoke(
            &self,
            agent_def: &AgentDef,
            _input: &serde_json::Map<String, serde_json::Value>,
            _deadline: Duration,
        ) -> AgentOutput {
            self.calls.lock().unwrap().push(agent_def.agent_id.clone());
            self.responses
                .get(&agent_def.agent_id)
                .cloned()
                .unwrap_or_else(|| AgentOutput::error("no scripted response"))
        }
    }

    struct CountingInvoker {
        counts: StdHashMap<String, AtomicUsize>,
    }

    impl CountingInvoker {
        fn new(ids: &[&str]) -> Self {
            Self { counts: ids.iter().map(|id| (id.to_string(), AtomicUsize::new(0))).collect() }
        }

        fn count(&self, id: &str) -> usize {
            self.counts.get(id).map(|c| c.load(Ordering::SeqCst)).unwrap_or(0)
        }
    }

    #[async_trait]
    impl Invoker for CountingInvoker {
        async fn invoke(
            &self,
            agent_def: &AgentDef,
            input: &serde_json::Map<String, serde_json::Value>,
            _deadline: Duration,
        ) -> AgentOutput {
            if let Some(c) = self.counts.get(&agent_def.agent_id) {
                c.fetch_add(1, Ordering::SeqCst);
            }
            let mut output = serde_json::Map::new();
            output.insert("seen_keys".to_string(), serde_json::Value::from(input.keys().cloned().collect::<Vec<_>>()));
            AgentOutput::success(output, "ok", 0.9)
        }
    }

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn agent(id: &str, class: AgentClass, deps: &[&str]) -> AgentDef {
        AgentDef {
            agent_id: id.to_string(),
            agent_name: format!("Agent {id}"),
            agent_class: class,
            system_prompt: "p".to_string(),
            tools: HashSet::new(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            output_schema: StdHashMap::new(),
            enabled: true,
            version: 1,
            is_builtin: false,
        }
    }

    fn playbook(nodes: &[&str], edges: &[(&str, &str)]) -> Playbook {
        Playbook {
            nodes: nodes.iter().map(|s| s.to_string()).collect(),
            edges: edges.iter().map(|(a, b)| Edge::new(*a, *b)).collect(),
        }
    }

    fn registry_with(agents: &[(&str, &[&str])]) -> Arc<InMemoryRegistry> {
        let registry = InMemoryRegistry::new();
        for (id, deps) in agents {
            registry.put_agent("t", agent(id, AgentClass::Ingestion, deps));
        }
        Arc::new(registry)
    }

    // Scenario 1: linear success.
    #[tokio::test]
    async fn linear_success_produces_ordered_log() {
        let registry = registry_with(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let invoker = Arc::new(CountingInvoker::new(&["a", "b", "c"]));
        let orchestrator = Orchestrator::new(
            registry,
            invoker.clone(),
            Arc::new(InMemoryStatusPublisher::default()),
            Arc::new(SystemClock),
        );
        let req = ExecuteRequest::new(
            "job-1",
            AgentClass::Ingestion,
            "t",
            "d",
            playbook(&["a", "b", "c"], &[("a", "b"), ("b", "c")]),
            serde_json::Map::new(),
            Duration::from_secs(5),
        );
        let result = orchestrator.execute(req).await;

        assert!(matches!(result.final_status, FinalStatus::Completed));
        assert_eq!(result.execution_log.len(), 3);
        let ids: Vec<&str> = result.execution_log.iter().map(|e| e.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(result.execution_log.iter().all(|e| matches!(e.status, LogStatus::Success)));
        assert_eq!(result.cache_stats, CacheStats { cached_agents: 0, executed_agents: 3, total_agents: 3 });
    }

    // Scenario 2: diamond memoization (P1, P5).
    #[tokio::test]
    async fn diamond_invokes_shared_ancestor_exactly_once() {
        let registry = registry_with(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);
        let invoker = Arc::new(CountingInvoker::new(&["a", "b", "c", "d"]));
        let orchestrator = Orchestrator::new(
            registry,
            invoker.clone(),
            Arc::new(InMemoryStatusPublisher::default()),
            Arc::new(SystemClock),
        );
        let req = ExecuteRequest::new(
            "job-2",
            AgentClass::Ingestion,
            "t",
            "d",
            playbook(&["a", "b", "c", "d"], &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]),
            serde_json::Map::new(),
            Duration::from_secs(5),
        );
        let result = orchestrator.execute(req).await;

        assert!(matches!(result.final_status, FinalStatus::Completed));
        assert_eq!(result.execution_log.len(), 4);
        assert_eq!(invoker.count("a"), 1);
        assert_eq!(invoker.count("b"), 1);
        assert_eq!(invoker.count("c"), 1);
        assert_eq!(invoker.count("d"), 1);

        let d_entry = result.execution_log.iter().find(|e| e.agent_id == "d").unwrap();
        let seen_keys = d_entry.output.as_ref().unwrap().get("seen_keys").unwrap().as_array().unwrap();
        let seen: Vec<&str> = seen_keys.iter().map(|v| v.as_str().unwrap()).collect();
        assert!(seen.contains(&"b_output"));
        assert!(seen.contains(&"c_output"));

        let pos = |id: &str| result.execution_log.iter().position(|e| e.agent_id == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    // Scenario 3: mid-graph failure (P2, P3, P4).
    #[tokio::test]
    async fn mid_graph_failure_cascades_skip() {
        let registry = registry_with(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let mut responses = StdHashMap::new();
        let mut a_output = serde_json::Map::new();
        a_output.insert("x".to_string(), serde_json::Value::from(1));
        responses.insert("a".to_string(), AgentOutput::success(a_output, "ok", 0.9));
        responses.insert("b".to_string(), AgentOutput::error("LLM timeout"));
        let invoker = Arc::new(ScriptedInvoker::new(responses));
        let orchestrator = Orchestrator::new(
            registry,
            invoker.clone(),
            Arc::new(InMemoryStatusPublisher::default()),
            Arc::new(SystemClock),
        );
        let req = ExecuteRequest::new(
            "job-3",
            AgentClass::Ingestion,
            "t",
            "d",
            playbook(&["a", "b", "c"], &[("a", "b"), ("b", "c")]),
            serde_json::Map::new(),
            Duration::from_secs(5),
        );
        let result = orchestrator.execute(req).await;

        assert!(matches!(result.final_status, FinalStatus::Failed));
        assert_eq!(result.execution_log.len(), 3);
        assert!(matches!(result.execution_log[0].status, LogStatus::Success));
        assert!(matches!(result.execution_log[1].status, LogStatus::Error));
        assert_eq!(result.execution_log[1].error_message.as_deref(), Some("LLM timeout"));
        assert!(result.execution_log[1].output.is_none());
        assert!(matches!(result.execution_log[2].status, LogStatus::Skipped));
        assert!(result.execution_log[2].reasoning.contains('b'));
        assert_eq!(invoker.call_count(), 2);
    }

    // P6: determinism with a fixed clock.
    #[tokio::test]
    async fn two_runs_with_fixed_clock_are_byte_identical() {
        let ts = Utc::now();
        let run_once = || async {
            let registry = registry_with(&[("a", &[]), ("b", &["a"])]);
            let invoker = Arc::new(CountingInvoker::new(&["a", "b"]));
            let orchestrator = Orchestrator::new(
                registry,
                invoker,
                Arc::new(InMemoryStatusPublisher::default()),
                Arc::new(FixedClock(ts)),
            );
            let req = ExecuteRequest::new(
                "job-det",
                AgentClass::Ingestion,
                "t",
                "d",
                playbook(&["a", "b"], &[("a", "b")]),
                serde_json::Map::new(),
                Duration::from_secs(5),
            );
            serde_json::to_string(&orchestrator.execute(req).await).unwrap()
        };
        assert_eq!(run_once().await, run_once().await);
    }

    // P7: cache does not outlive the call — nothing to assert on the
    // `Orchestrator` value itself since the cache is a function-local,
    // but cache_stats is snapshotted before it is dropped.
    #[tokio::test]
    async fn cache_stats_reflect_executed_nodes_only() {
        let registry = registry_with(&[("a", &[]), ("b", &["a"])]);
        let invoker = Arc::new(CountingInvoker::new(&["a", "b"]));
        let orchestrator = Orchestrator::new(
            registry,
            invoker,
            Arc::new(InMemoryStatusPublisher::default()),
            Arc::new(SystemClock),
        );
        let req = ExecuteRequest::new(
            "job-4",
            AgentClass::Ingestion,
            "t",
            "d",
            playbook(&["a", "b"], &[("a", "b")]),
            serde_json::Map::new(),
            Duration::from_secs(5),
        );
        let result = orchestrator.execute(req).await;
        assert_eq!(result.cache_stats.cached_agents, 0);
        assert_eq!(result.cache_stats.executed_agents, 2);
        assert_eq!(result.cache_stats.total_agents, 2);
    }

    #[tokio::test]
    async fn missing_agent_registers_as_error_and_cascades() {
        let registry = registry_with(&[("a", &[])]);
        // "b" is never registered.
        let invoker = Arc::new(CountingInvoker::new(&["a", "b"]));
        let orchestrator = Orchestrator::new(
            registry,
            invoker,
            Arc::new(InMemoryStatusPublisher::default()),
            Arc::new(SystemClock),
        );
        let req = ExecuteRequest::new(
            "job-5",
            AgentClass::Ingestion,
            "t",
            "d",
            playbook(&["a", "b"], &[("a", "b")]),
            serde_json::Map::new(),
            Duration::from_secs(5),
        );
        let result = orchestrator.execute(req).await;
        assert!(matches!(result.final_status, FinalStatus::Failed));
        assert!(matches!(result.execution_log[1].status, LogStatus::Error));
    }

    #[tokio::test]
    async fn cancellation_before_start_skips_every_node() {
        let registry = registry_with(&[("a", &[]), ("b", &["a"])]);
        let invoker = Arc::new(CountingInvoker::new(&["a", "b"]));
        let orchestrator = Orchestrator::new(
            registry,
            invoker.clone(),
            Arc::new(InMemoryStatusPublisher::default()),
            Arc::new(SystemClock),
        );
        let mut req = ExecuteRequest::new(
            "job-6",
            AgentClass::Ingestion,
            "t",
            "d",
            playbook(&["a", "b"], &[("a", "b")]),
            serde_json::Map::new(),
            Duration::from_secs(5),
        );
        req.cancel.cancel();
        let result = orchestrator.execute(req).await;
        assert!(matches!(result.final_status, FinalStatus::Failed));
        assert!(result.execution_log.iter().all(|e| matches!(e.status, LogStatus::Skipped)));
        assert!(result.execution_log.iter().all(|e| e.reasoning.contains("Cancelled")));
        assert_eq!(invoker.count("a"), 0);
        assert_eq!(invoker.count("b"), 0);
    }

    #[tokio::test]
    async fn empty_playbook_fails_with_empty_log() {
        let registry = Arc::new(InMemoryRegistry::new());
        let invoker = Arc::new(CountingInvoker::new(&[]));
        let orchestrator = Orchestrator::new(
            registry,
            invoker,
            Arc::new(InMemoryStatusPublisher::default()),
            Arc::new(SystemClock),
        );
        let req = ExecuteRequest::new(
            "job-7",
            AgentClass::Ingestion,
            "t",
            "d",
            Playbook::default(),
            serde_json::Map::new(),
            Duration::from_secs(5),
        );
        let result = orchestrator.execute(req).await;
        assert!(matches!(result.final_status, FinalStatus::Failed));
        assert!(result.execution_log.is_empty());
        assert_eq!(result.cache_stats.total_agents, 0);
    }
}
