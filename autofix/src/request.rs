//! Model Request Controller.
//!
//! Walks the attempt plan for the current escalation order, spending one unit
//! of the call budget per model invocation, until a response sanitizes into
//! an edit payload or the plan (or the budget) runs out.

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::ModelCallBudget;
use crate::core::error::RequestError;
use crate::core::escalation::{Attempt, EscalationOrder, attempt_plan};
use crate::core::sanitize::parse_payload;
use crate::core::types::{EditPayload, Strictness};
use crate::io::config::ModelConfig;
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::io::run_log::{AttemptRecord, CycleLog};
use crate::io::transport::{ModelCall, ModelTransport};

/// A payload and the attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Obtained {
    pub payload: EditPayload,
    pub attempt: Attempt,
}

/// Result of one request, with the budget after it.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub budget: ModelCallBudget,
    pub attempts: Vec<AttemptRecord>,
    pub result: Result<Obtained, RequestError>,
}

pub struct RequestController<'a, T: ModelTransport> {
    transport: &'a T,
    prompts: &'a PromptBuilder,
    lenient_effort: String,
    strict_effort: String,
}

impl<'a, T: ModelTransport> RequestController<'a, T> {
    pub fn new(transport: &'a T, prompts: &'a PromptBuilder, model: &ModelConfig) -> Self {
        Self {
            transport,
            prompts,
            lenient_effort: model.lenient_effort.clone(),
            strict_effort: model.strict_effort.clone(),
        }
    }

    /// Issue one change or fix request.
    ///
    /// Transport and sanitize failures fall through to the next attempt. The
    /// outer `Err` is reserved for prompt rendering and run-log I/O.
    #[instrument(skip_all, fields(kind = inputs.kind.as_str(), primary = order.primary()))]
    pub fn request(
        &self,
        inputs: &PromptInputs<'_>,
        order: &EscalationOrder,
        mut budget: ModelCallBudget,
        log: Option<&CycleLog>,
    ) -> Result<RequestOutcome> {
        let plan = attempt_plan(order);
        let mut records = Vec::with_capacity(plan.len());
        let mut last_reason = String::from("no attempt was made");

        for (i, attempt) in plan.into_iter().enumerate() {
            let number = i + 1;
            budget = match budget.consume() {
                Ok(next) => next,
                Err(err) => {
                    warn!(used = budget.used(), max = budget.max(), "model call budget exhausted");
                    return Ok(RequestOutcome {
                        budget,
                        attempts: records,
                        result: Err(err),
                    });
                }
            };

            let prompt = self.prompts.render(inputs, attempt.strictness)?;
            if let Some(log) = log {
                log.write_prompt(number, &prompt)?;
            }
            let call = ModelCall {
                system_prompt: prompt.system,
                user_prompt: prompt.user,
                model_id: attempt.model.clone(),
                effort_hint: self.effort_for(attempt.strictness).to_string(),
            };
            debug!(number, model = %attempt.model, strictness = ?attempt.strictness, "calling model");

            let result = match self.transport.call_model(&call) {
                Ok(raw) => {
                    if let Some(log) = log {
                        log.write_response(number, &raw)?;
                    }
                    parse_payload(&raw).map_err(|err| err.to_string())
                }
                Err(err) => Err(format!("transport failed: {err:#}")),
            };

            match result {
                Ok(payload) => {
                    info!(number, model = %attempt.model, shape = payload.shape(), "payload obtained");
                    records.push(AttemptRecord {
                        number,
                        model: attempt.model.clone(),
                        strictness: attempt.strictness,
                        result: format!("ok ({})", payload.shape()),
                    });
                    return Ok(RequestOutcome {
                        budget,
                        attempts: records,
                        result: Ok(Obtained { payload, attempt }),
                    });
                }
                Err(reason) => {
                    warn!(number, model = %attempt.model, reason = %reason, "attempt failed");
                    records.push(AttemptRecord {
                        number,
                        model: attempt.model,
                        strictness: attempt.strictness,
                        result: reason.clone(),
                    });
                    last_reason = reason;
                }
            }
        }

        Ok(RequestOutcome {
            budget,
            result: Err(RequestError::AttemptsExhausted {
                attempts: records.len(),
                last_reason,
            }),
            attempts: records,
        })
    }

    fn effort_for(&self, strictness: Strictness) -> &str {
        match strictness {
            Strictness::Lenient => &self.lenient_effort,
            Strictness::Strict => &self.strict_effort,
        }
    }
}
