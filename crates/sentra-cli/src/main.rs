#![forbid(unsafe_code)]

//! **sentra-cli** – Command-line demo harness for the Sentra orchestration
//! core.
//!
//! This binary is the wiring layer the rest of the workspace is built to
//! be driven by: it seeds a toy domain (one agent class's worth of
//! agents and a playbook) into an `InMemoryRegistry`, builds an
//! `Orchestrator` over a real or mock LLM gateway, and runs one job to
//! completion, printing the execution log and final status as JSON —
//! the same shape a production HTTP handler would persist and return.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sentra_bus::InMemoryStatusPublisher;
use sentra_dag::validate_playbook;
use sentra_invoker::GatewayInvoker;
use sentra_llm_gateway::{Config as GatewayConfig, LlmGateway, MockProvider};
use sentra_orchestrator::{ExecuteRequest, Orchestrator, SystemClock};
use sentra_registry::{InMemoryRegistry, Registry};
use sentra_types::{AgentClass, AgentDef, Edge, Playbook, SchemaFieldType, SYSTEM_TENANT};
use tokio_util::sync::CancellationToken;

//─────────────────────────────
//  CLI structure
//─────────────────────────────

#[derive(Parser)]
#[command(name = "sentra")]
#[command(about = "Sentra orchestration core - demo CLI")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Per-agent deadline in seconds
    #[arg(long, default_value_t = 30)]
    agent_deadline_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the built-in three-agent ingestion playbook demo against a
    /// free-form report string.
    Ingest {
        /// The free-form textual report to ingest.
        #[arg(long)]
        report: String,
    },
    /// Run the built-in query playbook demo against a natural-language
    /// question.
    Query {
        /// The natural-language question to answer.
        #[arg(long)]
        question: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer()).init();

    let gateway = build_gateway().await.context("failed to build LLM gateway")?;
    let invoker = Arc::new(GatewayInvoker::new(gateway));
    let publisher = Arc::new(InMemoryStatusPublisher::default());
    let registry = Arc::new(InMemoryRegistry::new());

    let deadline = Duration::from_secs(cli.agent_deadline_secs);

    match cli.command {
        Commands::Ingest { report } => {
            seed_demo_domain(&registry)?;
            let mut input = serde_json::Map::new();
            input.insert("raw_input".to_string(), serde_json::Value::String(report));
            run_job(registry, invoker, publisher, "demo", AgentClass::Ingestion, input, deadline).await?;
        }
        Commands::Query { question } => {
            seed_demo_domain(&registry)?;
            let mut input = serde_json::Map::new();
            input.insert("raw_input".to_string(), serde_json::Value::String(question));
            run_job(registry, invoker, publisher, "demo", AgentClass::Query, input, deadline).await?;
        }
    }

    Ok(())
}

/// Build the gateway from the environment if a provider key is present,
/// otherwise fall back to a deterministic mock so the demo runs offline.
async fn build_gateway() -> Result<LlmGateway> {
    if std::env::var("ANTHROPIC_API_KEY").is_ok() || std::env::var("OPENAI_API_KEY").is_ok() {
        let config = GatewayConfig::from_env()?;
        LlmGateway::new(config).await
    } else {
        tracing::warn!("no LLM provider credentials found; using deterministic mock provider");
        let fixed = r#"{"summary": "demo output", "reasoning": "mocked", "confidence": 0.9}"#;
        Ok(LlmGateway::with_provider(Box::new(MockProvider::fixed(fixed)), GatewayConfig::for_tests()))
    }
}

/// Seed a toy three-agent domain: `extract -> classify -> summarize` for
/// ingestion, and a one-agent `answer` playbook for query, shared under
/// the `system` tenant's built-in agents.
fn seed_demo_domain(registry: &InMemoryRegistry) -> Result<()> {
    let extract = agent("extract", "Extractor", AgentClass::Ingestion, &[], &[("summary", SchemaFieldType::String)]);
    let classify =
        agent("classify", "Classifier", AgentClass::Ingestion, &["extract"], &[("summary", SchemaFieldType::String)]);
    let summarize = agent(
        "summarize",
        "Summarizer",
        AgentClass::Ingestion,
        &["extract", "classify"],
        &[("summary", SchemaFieldType::String)],
    );
    let answer = agent("answer", "Answerer", AgentClass::Query, &[], &[("summary", SchemaFieldType::String)]);

    let mut ingestion = Playbook::default();
    ingestion.nodes.extend(["extract".to_string(), "classify".to_string(), "summarize".to_string()]);
    ingestion.edges.push(Edge::new("extract", "classify"));
    ingestion.edges.push(Edge::new("classify", "summarize"));

    let mut query = Playbook::default();
    query.nodes.insert("answer".to_string());

    let all_agents: std::collections::HashMap<String, AgentDef> =
        [&extract, &classify, &summarize, &answer].iter().map(|a| (a.agent_id.clone(), (*a).clone())).collect();
    validate_playbook(&ingestion, AgentClass::Ingestion, &all_agents).context("demo ingestion playbook invalid")?;
    validate_playbook(&query, AgentClass::Query, &all_agents).context("demo query playbook invalid")?;

    registry.put_agent(SYSTEM_TENANT, extract);
    registry.put_agent(SYSTEM_TENANT, classify);
    registry.put_agent(SYSTEM_TENANT, summarize);
    registry.put_agent(SYSTEM_TENANT, answer);
    registry.put_domain(
        SYSTEM_TENANT,
        sentra_types::DomainDef {
            domain_id: "demo".to_string(),
            ingestion,
            query,
            management: Playbook::default(),
        },
    );

    Ok(())
}

fn agent(
    id: &str,
    name: &str,
    class: AgentClass,
    deps: &[&str],
    schema: &[(&str, SchemaFieldType)],
) -> AgentDef {
    AgentDef {
        agent_id: id.to_string(),
        agent_name: name.to_string(),
        agent_class: class,
        system_prompt: format!("You are the {name} agent. Respond with strict JSON."),
        tools: Default::default(),
        dependencies: deps.iter().map(|s| s.to_string()).collect(),
        output_schema: schema.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        enabled: true,
        version: 1,
        is_builtin: true,
    }
}

async fn run_job(
    registry: Arc<InMemoryRegistry>,
    invoker: Arc<GatewayInvoker>,
    publisher: Arc<InMemoryStatusPublisher>,
    domain_id: &str,
    kind: AgentClass,
    input: serde_json::Map<String, serde_json::Value>,
    deadline: Duration,
) -> Result<()> {
    let playbook = registry
        .get_playbook(SYSTEM_TENANT, domain_id, kind)
        .await
        .context("failed to resolve demo playbook")?;

    let orchestrator = Orchestrator::new(registry, invoker, publisher, Arc::new(SystemClock));
    let req = ExecuteRequest {
        job_id: uuid::Uuid::new_v4().to_string(),
        kind,
        tenant_id: SYSTEM_TENANT.to_string(),
        user_id: None,
        domain_id: domain_id.to_string(),
        playbook,
        input,
        deadline,
        cancel: CancellationToken::new(),
    };

    let result = orchestrator.execute(req).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
