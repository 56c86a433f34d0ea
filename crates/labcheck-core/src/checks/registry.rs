//! Ordered registry of checks per phase.

use std::collections::HashSet;
use std::sync::Arc;

use super::{
    Check, CleanupCheck, ConnectivityCheck, DependencyCheck, IdempotencyCheck, LifecycleCheck,
    NegativeGradingCheck, Phase,
};
use crate::domain::{OrchestrationError, Result};

/// Two ordered check lists. Order matters only for reporting.
#[derive(Default, Clone)]
pub struct CheckRegistry {
    simulation: Vec<Arc<dyn Check>>,
    validation: Vec<Arc<dyn Check>>,
    names: HashSet<String>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in checks in their standard order.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.simulation = vec![
            Arc::new(ConnectivityCheck),
            Arc::new(DependencyCheck),
            Arc::new(LifecycleCheck),
        ];
        registry.validation = vec![
            Arc::new(CleanupCheck),
            Arc::new(IdempotencyCheck),
            Arc::new(NegativeGradingCheck),
        ];
        registry.names = registry
            .simulation
            .iter()
            .chain(&registry.validation)
            .map(|c| c.name().to_string())
            .collect();
        registry
    }

    /// Append `check` to `phase`. Names must be unique across both phases.
    pub fn register(&mut self, phase: Phase, check: Arc<dyn Check>) -> Result<()> {
        if !self.names.insert(check.name().to_string()) {
            return Err(OrchestrationError::InvalidConfig(format!(
                "duplicate check name `{}`",
                check.name()
            )));
        }
        match phase {
            Phase::Simulation => self.simulation.push(check),
            Phase::Validation => self.validation.push(check),
        }
        Ok(())
    }

    pub fn checks(&self, phase: Phase) -> &[Arc<dyn Check>] {
        match phase {
            Phase::Simulation => &self.simulation,
            Phase::Validation => &self.validation,
        }
    }

    /// Every registered name, Phase 1 first, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.simulation
            .iter()
            .chain(&self.validation)
            .map(|c| c.name())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.simulation.len() + self.validation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
