//! Model call budget, threaded through the request controller by value.

use serde::Serialize;

use crate::core::error::RequestError;

/// Monotonic count of model invocations bounded by `max`.
///
/// The budget is a plain value: callers pass it in and receive the updated
/// value back, so independent runs (and tests) never share a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelCallBudget {
    used: u32,
    max: u32,
}

impl ModelCallBudget {
    pub fn new(max: u32) -> Self {
        Self { used: 0, max }
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.used)
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.max
    }

    /// Reserve one call. Fails without changing the count once exhausted.
    pub fn consume(self) -> Result<Self, RequestError> {
        if self.is_exhausted() {
            return Err(RequestError::BudgetExhausted {
                used: self.used,
                max: self.max,
            });
        }
        Ok(Self {
            used: self.used + 1,
            max: self.max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_counts_up_to_max() {
        let budget = ModelCallBudget::new(2);
        let budget = budget.consume().expect("first");
        let budget = budget.consume().expect("second");
        assert_eq!(budget.used(), 2);
        assert!(budget.is_exhausted());

        let err = budget.consume().unwrap_err();
        assert_eq!(err, RequestError::BudgetExhausted { used: 2, max: 2 });
    }

    #[test]
    fn zero_budget_is_exhausted_immediately() {
        let budget = ModelCallBudget::new(0);
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining(), 0);
        assert!(budget.consume().is_err());
    }
}
