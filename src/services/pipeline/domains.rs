//! Domain profiles
//!
//! Lookup table from `Domain` to the manager's prompt, tool menu and round
//! budget. The router names managers by string; `resolve` turns that string
//! into a profile or an `UnknownDomainError`.

use std::collections::HashMap;
use std::sync::Arc;

use dockside_core::UnifiedToolRegistry;
use dockside_llm::ToolDefinition;
use dockside_tools::{Domain, ToolCatalog, UnknownDomainError};

use super::prompts::manager_system_prompt;

#[derive(Clone)]
pub struct DomainProfile {
    pub domain: Domain,
    pub system_prompt: String,
    /// Definitions sent to the model
    pub tools: Vec<ToolDefinition>,
    /// Executable subset backing `tools`
    pub registry: UnifiedToolRegistry,
    pub follow_up_rounds: usize,
}

pub struct DomainTable {
    profiles: HashMap<Domain, DomainProfile>,
    catalog: Arc<ToolCatalog>,
}

impl DomainTable {
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        let profiles = Domain::all()
            .into_iter()
            .map(|domain| {
                (
                    domain,
                    DomainProfile {
                        domain,
                        system_prompt: manager_system_prompt(domain),
                        tools: catalog.definitions_for(domain),
                        registry: catalog.registry_for(domain),
                        follow_up_rounds: domain.max_rounds(),
                    },
                )
            })
            .collect();
        Self { profiles, catalog }
    }

    pub fn profile(&self, domain: Domain) -> Option<&DomainProfile> {
        self.profiles.get(&domain)
    }

    /// Profile for a manager name chosen by the router.
    pub fn resolve(&self, name: &str) -> Result<&DomainProfile, UnknownDomainError> {
        let domain: Domain = name.parse()?;
        self.profile(domain)
            .ok_or_else(|| UnknownDomainError(name.to_string()))
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }
}
