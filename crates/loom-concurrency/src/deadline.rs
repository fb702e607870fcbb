//! Turn deadlines and per-phase soft budgets (§5). The top-level turn
//! carries a deadline; on expiry any in-flight LLM/tool/embedding call
//! is cancelled. Per-phase soft budgets degrade that phase rather than
//! failing the turn. Uses `tokio_util::sync::CancellationToken`, the
//! same type the teacher's `cancel_map` drives in
//! `runtime::turn::run_turn`.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Tracks the deadline for one turn and exposes a token that fires when
/// the deadline is reached. Dropping the guard (or calling
/// [`TurnDeadline::cancel_early`]) stops the background timer.
pub struct TurnDeadline {
    token: CancellationToken,
    deadline: DateTime<Utc>,
    _timer: tokio::task::JoinHandle<()>,
}

impl TurnDeadline {
    /// Starts a timer that cancels `token` when `deadline` elapses. If
    /// `deadline` is already past, the token is cancelled immediately.
    pub fn start(deadline: DateTime<Utc>) -> Self {
        let token = CancellationToken::new();
        let remaining = remaining(deadline);
        let timer_token = token.clone();
        let timer = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(remaining) => timer_token.cancel(),
                _ = timer_token.cancelled() => {}
            }
        });
        Self { token, deadline, _timer: timer }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    /// Cancels the turn before its deadline (e.g. an explicit stop
    /// request); also stops the background timer.
    pub fn cancel_early(&self) {
        self.token.cancel();
    }
}

/// Wall-clock time left before `deadline`, floored at zero.
pub fn remaining(deadline: DateTime<Utc>) -> Duration {
    let delta = deadline - Utc::now();
    delta.to_std().unwrap_or(Duration::ZERO)
}

/// Runs `fut` against a soft per-phase budget (§4.1: "exceeding a soft
/// budget degrades that phase"). Returns `None` on timeout rather than
/// an error — the caller treats `None` as the phase's neutral/empty
/// output.
pub async fn run_with_soft_budget<F, T>(budget: Duration, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(budget, fut).await.ok()
}

/// Runs `fut`, racing it against both `token` (turn deadline or
/// explicit cancellation) and `budget` (this phase's soft budget).
/// Returns `None` if either fires first.
pub async fn run_cancellable<F, T>(token: &CancellationToken, budget: Duration, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        result = tokio::time::timeout(budget, fut) => result.ok(),
        _ = token.cancelled() => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_fires_token_after_elapsed() {
        let deadline = Utc::now() + chrono::Duration::milliseconds(20);
        let guard = TurnDeadline::start(deadline);
        assert!(!guard.is_expired());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(guard.is_expired());
    }

    #[tokio::test]
    async fn cancel_early_fires_token_immediately() {
        let deadline = Utc::now() + chrono::Duration::seconds(30);
        let guard = TurnDeadline::start(deadline);
        assert!(!guard.is_expired());
        guard.cancel_early();
        assert!(guard.is_expired());
    }

    #[tokio::test]
    async fn soft_budget_exceeded_returns_none() {
        let result = run_with_soft_budget(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            42
        })
        .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn soft_budget_met_returns_some() {
        let result = run_with_soft_budget(Duration::from_millis(100), async { 42 }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn cancellable_stops_on_token_cancel() {
        let token = CancellationToken::new();
        let t2 = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            t2.cancel();
        });
        let result = run_cancellable(&token, Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            1
        })
        .await;
        assert!(result.is_none());
    }

    #[test]
    fn remaining_is_zero_for_past_deadline() {
        let past = Utc::now() - chrono::Duration::seconds(5);
        assert_eq!(remaining(past), Duration::ZERO);
    }
}
