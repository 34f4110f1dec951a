//! Round budget, wall-clock deadline and the cancel/timeout gate.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::error::CarnetError;

/// Round counter and wall-clock budget of one request.
#[derive(Debug, Clone)]
pub struct SessionBudget {
    max_rounds: usize,
    rounds_completed: usize,
    started_at: Instant,
    timeout: Duration,
}

impl SessionBudget {
    /// Start the clock now. `max_rounds` is at least one.
    pub fn new(max_rounds: usize, timeout: Duration) -> Self {
        Self {
            max_rounds: max_rounds.max(1),
            rounds_completed: 0,
            started_at: Instant::now(),
            timeout,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.max_rounds, Duration::from_millis(config.timeout_ms))
    }

    /// Count one finished tool round and return the new total.
    pub fn complete_round(&mut self) -> usize {
        self.rounds_completed += 1;
        self.rounds_completed
    }

    pub fn rounds_completed(&self) -> usize {
        self.rounds_completed
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// No tool round is left.
    pub fn exhausted(&self) -> bool {
        self.rounds_completed >= self.max_rounds
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn guard(&self) -> TimeoutGuard {
        TimeoutGuard {
            deadline: self.started_at + self.timeout,
            timeout: self.timeout,
        }
    }
}

/// A single deadline for the whole request.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutGuard {
    deadline: Instant,
    timeout: Duration,
}

impl TimeoutGuard {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// No-op under budget, otherwise a timeout error.
    pub fn check_or_fail(&self) -> Result<(), CarnetError> {
        if self.is_expired() {
            Err(self.timeout_error())
        } else {
            Ok(())
        }
    }

    pub fn timeout_error(&self) -> CarnetError {
        CarnetError::Timeout(self.timeout.as_millis() as u64)
    }
}

/// Every suspension point of a session goes through this gate, so that
/// cancellation and the deadline interrupt whatever is in flight.
#[derive(Debug, Clone)]
pub(crate) struct SessionGate {
    cancel: CancellationToken,
    guard: TimeoutGuard,
}

impl SessionGate {
    pub(crate) fn new(cancel: CancellationToken, guard: TimeoutGuard) -> Self {
        Self { cancel, guard }
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) async fn canceled(&self) {
        self.cancel.cancelled().await
    }

    pub(crate) fn check(&self) -> Result<(), CarnetError> {
        if self.cancel.is_cancelled() {
            return Err(CarnetError::Canceled);
        }
        self.guard.check_or_fail()
    }

    /// Await `fut` unless the session is canceled or the deadline passes
    /// first. The losing future is dropped.
    pub(crate) async fn run<F: Future>(&self, fut: F) -> Result<F::Output, CarnetError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CarnetError::Canceled),
            _ = tokio::time::sleep_until(self.guard.deadline) => Err(self.guard.timeout_error()),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_rounds_is_at_least_one() {
        let mut budget = SessionBudget::new(0, Duration::from_secs(1));
        assert_eq!(budget.max_rounds(), 1);
        assert!(!budget.exhausted());
        assert_eq!(budget.complete_round(), 1);
        assert!(budget.exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn guard_expires_after_timeout() {
        let budget = SessionBudget::new(20, Duration::from_millis(500));
        let guard = budget.guard();
        assert!(guard.check_or_fail().is_ok());

        tokio::time::advance(Duration::from_millis(499)).await;
        assert!(guard.check_or_fail().is_ok());
        assert_eq!(guard.remaining(), Duration::from_millis(1));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(matches!(guard.check_or_fail(), Err(CarnetError::Timeout(500))));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_interrupts_slow_futures_at_the_deadline() {
        let guard = SessionBudget::new(1, Duration::from_secs(1)).guard();
        let gate = SessionGate::new(CancellationToken::new(), guard);
        let slow = tokio::time::sleep(Duration::from_secs(5));
        assert!(matches!(gate.run(slow).await, Err(CarnetError::Timeout(1000))));
    }

    #[tokio::test]
    async fn gate_prefers_cancellation() {
        let cancel = CancellationToken::new();
        let guard = SessionBudget::new(1, Duration::from_secs(60)).guard();
        let gate = SessionGate::new(cancel.clone(), guard);
        cancel.cancel();
        assert!(matches!(gate.check(), Err(CarnetError::Canceled)));
        assert!(matches!(gate.run(async { 1 }).await, Err(CarnetError::Canceled)));
    }

    #[tokio::test]
    async fn gate_passes_output_through() {
        let guard = SessionBudget::new(1, Duration::from_secs(60)).guard();
        let gate = SessionGate::new(CancellationToken::new(), guard);
        assert_eq!(gate.run(async { 7 }).await.unwrap(), 7);
    }
}
