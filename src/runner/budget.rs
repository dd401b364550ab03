//! Per-job token budget.

use crate::error::FailureReason;
use std::sync::atomic::{AtomicU64, Ordering};

/// Token ceiling for one job, shared by that job's pipelines only.
///
/// Calls reserve an estimate up front and settle against the reported cost
/// afterwards, so concurrent pipelines never overshoot on estimates.
#[derive(Debug)]
pub struct TokenBudget {
    limit: u64,
    remaining: AtomicU64,
    spent: AtomicU64,
}

/// Tokens held for an in-flight call.
#[derive(Debug)]
#[must_use = "a reservation must be settled or released"]
pub struct Reservation {
    tokens: u64,
}

impl TokenBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            remaining: AtomicU64::new(limit),
            spent: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    pub fn unlimited() -> Self {
        Self::new(u64::MAX)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    #[cfg(test)]
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Tokens actually consumed so far.
    pub fn spent(&self) -> u64 {
        self.spent.load(Ordering::Acquire)
    }

    /// Hold `tokens` for a call, or report that the budget cannot cover it.
    pub fn try_reserve(&self, tokens: u64) -> Result<Reservation, FailureReason> {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| {
                left.checked_sub(tokens)
            })
            .map(|_| Reservation { tokens })
            .map_err(|left| FailureReason::BudgetExceeded {
                needed: tokens,
                remaining: left,
            })
    }

    /// Replace the reservation with the cost the backend reported.
    ///
    /// A cost above the reservation is charged up to what is left.
    pub fn settle(&self, reservation: Reservation, actual: u64) {
        let held = reservation.tokens;
        // fetch_update with an always-Some closure cannot fail.
        let _ = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| {
                Some(left.saturating_add(held).saturating_sub(actual))
            });
        self.spent.fetch_add(actual, Ordering::AcqRel);
    }

    /// Return an unused reservation.
    pub fn release(&self, reservation: Reservation) {
        let held = reservation.tokens;
        let _ = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| {
                Some(left.saturating_add(held))
            });
    }
}
