#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sentra-registry** – Read-only lookups for agent and domain
//! definitions.
//!
//! The Orchestrator treats the registry as a read-only, concurrency-safe
//! collaborator: it never mutates what it loads, and every lookup must
//! fall through to the built-in `system` tenant when the primary tenant
//! lacks the requested id. That fallback is a rule of this contract, not
//! of the Orchestrator — callers must not re-implement it.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use sentra_types::{AgentClass, AgentDef, DomainDef, Playbook, SYSTEM_TENANT};

/// Errors returned by registry lookups.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No agent with the given id exists under the tenant or the
    /// `system` fallback tenant.
    #[error("agent not found: {tenant_id}/{agent_id}")]
    AgentNotFound {
        /// Tenant originally queried (before fallback).
        tenant_id: String,
        /// Requested agent id.
        agent_id: String,
    },
    /// No domain with the given id exists under the tenant or the
    /// `system` fallback tenant.
    #[error("domain not found: {tenant_id}/{domain_id}")]
    DomainNotFound {
        /// Tenant originally queried (before fallback).
        tenant_id: String,
        /// Requested domain id.
        domain_id: String,
    },
}

/// Read-only registry contract consumed by the Orchestrator and by any
/// write-path handler that validates a proposed agent/playbook change.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Look up a single agent definition, falling through to the
    /// `system` tenant if the primary tenant lacks it.
    async fn get_agent(&self, tenant_id: &str, agent_id: &str) -> Result<AgentDef, RegistryError>;

    /// Look up a domain definition, falling through to the `system`
    /// tenant if the primary tenant lacks it.
    async fn get_domain(&self, tenant_id: &str, domain_id: &str) -> Result<DomainDef, RegistryError>;

    /// Look up the playbook of the given kind for a domain.
    async fn get_playbook(
        &self,
        tenant_id: &str,
        domain_id: &str,
        kind: AgentClass,
    ) -> Result<Playbook, RegistryError> {
        let domain = self.get_domain(tenant_id, domain_id).await?;
        Ok(domain.playbook_for(kind).clone())
    }

    /// Resolve a batch of agent ids, omitting any id that cannot be
    /// found under the tenant or the `system` fallback.
    async fn list_agents(&self, tenant_id: &str, agent_ids: &[String]) -> HashMap<String, AgentDef> {
        let mut out = HashMap::with_capacity(agent_ids.len());
        for id in agent_ids {
            if let Ok(def) = self.get_agent(tenant_id, id).await {
                out.insert(id.clone(), def);
            }
        }
        out
    }
}

/// In-process reference `Registry` backed by concurrent maps, keyed by
/// `(tenant_id, id)`. Suitable for tests, demos, and the CLI wiring
/// binary; a production deployment would back this trait with a real
/// datastore instead.
#[derive(Default)]
pub struct InMemoryRegistry {
    agents: DashMap<(String, String), AgentDef>,
    domains: DashMap<(String, String), DomainDef>,
}

impl InMemoryRegistry {
    /// Construct an empty registry. The `system` tenant is populated by
    /// whatever agents/domains are later inserted under it; there is no
    /// implicit seed content.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an agent definition under `tenant_id`.
    pub fn put_agent(&self, tenant_id: impl Into<String>, agent: AgentDef) {
        self.agents.insert((tenant_id.into(), agent.agent_id.clone()), agent);
    }

    /// Insert or replace a domain definition under `tenant_id`.
    pub fn put_domain(&self, tenant_id: impl Into<String>, domain: DomainDef) {
        self.domains.insert((tenant_id.into(), domain.domain_id.clone()), domain);
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn get_agent(&self, tenant_id: &str, agent_id: &str) -> Result<AgentDef, RegistryError> {
        if let Some(def) = self.agents.get(&(tenant_id.to_string(), agent_id.to_string())) {
            return Ok(def.clone());
        }
        if tenant_id != SYSTEM_TENANT {
            if let Some(def) = self.agents.get(&(SYSTEM_TENANT.to_string(), agent_id.to_string())) {
                return Ok(def.clone());
            }
        }
        Err(RegistryError::AgentNotFound {
            tenant_id: tenant_id.to_string(),
            agent_id: agent_id.to_string(),
        })
    }

    async fn get_domain(&self, tenant_id: &str, domain_id: &str) -> Result<DomainDef, RegistryError> {
        if let Some(def) = self.domains.get(&(tenant_id.to_string(), domain_id.to_string())) {
            return Ok(def.clone());
        }
        if tenant_id != SYSTEM_TENANT {
            if let Some(def) = self.domains.get(&(SYSTEM_TENANT.to_string(), domain_id.to_string())) {
                return Ok(def.clone());
            }
        }
        Err(RegistryError::DomainNotFound {
            tenant_id: tenant_id.to_string(),
            domain_id: domain_id.to_string(),
        })
    }
}
