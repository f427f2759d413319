//! Escalation order and the deterministic attempt plan derived from it.

use serde::Serialize;

use crate::core::types::Strictness;

/// Ordered pair of models: the one tried first and an optional alternative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscalationOrder {
    primary: String,
    fallback: Option<String>,
}

impl EscalationOrder {
    pub fn new(primary: impl Into<String>, fallback: Option<String>) -> Self {
        Self {
            primary: primary.into(),
            fallback: fallback.filter(|model| !model.trim().is_empty()),
        }
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    /// Swap primary and fallback. A single-model order is left unchanged.
    pub fn rotate(&mut self) {
        if let Some(fallback) = self.fallback.take() {
            let previous = std::mem::replace(&mut self.primary, fallback);
            self.fallback = Some(previous);
        }
    }
}

/// One planned model invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub model: String,
    pub strictness: Strictness,
}

/// Lenient primary, strict primary, then strict fallback when configured.
pub fn attempt_plan(order: &EscalationOrder) -> Vec<Attempt> {
    let mut plan = vec![
        Attempt {
            model: order.primary.clone(),
            strictness: Strictness::Lenient,
        },
        Attempt {
            model: order.primary.clone(),
            strictness: Strictness::Strict,
        },
    ];
    if let Some(fallback) = &order.fallback {
        plan.push(Attempt {
            model: fallback.clone(),
            strictness: Strictness::Strict,
        });
    }
    plan
}
