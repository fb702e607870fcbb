//! Phases 7 and 10 — tool execution (§4.1 detail): BEFORE/DURING step
//! bindings run ahead of generation, AFTER bindings run once the response
//! is accepted. Each binding is retried up to a fixed attempt count, then
//! marked failed and the pipeline proceeds — tool failure degrades,
//! it never aborts the turn. Retry-then-mark-failed shape is grounded
//! on `loom-enforcement`'s `enforce_turn` remediation loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use loom_domain::message::ToolCall;
use loom_domain::rule::{BindingTiming, ToolBinding};
use loom_domain::trace::TraceEvent;
use loom_domain::Result;
use uuid::Uuid;

/// Implemented by whatever concretely executes a tool (HTTP call, local
/// function, external process). The pipeline only knows this trait —
/// it has no built-in tool catalog.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, tool_id: Uuid, arguments: serde_json::Value) -> Result<serde_json::Value>;
}

#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub tool_id: Uuid,
    pub succeeded: bool,
    pub result: Option<serde_json::Value>,
    pub attempts: u32,
}

pub struct ToolExecutor {
    handler: Arc<dyn ToolHandler>,
    max_attempts: u32,
}

impl ToolExecutor {
    pub fn new(handler: Arc<dyn ToolHandler>, max_attempts: u32) -> Self {
        Self { handler, max_attempts: max_attempts.max(1) }
    }

    /// Runs every binding in `bindings` whose `when` matches `timing` and
    /// whose `required_variables` are all present in `known_vars`,
    /// honoring `depends_on` (a binding only runs once every tool it
    /// depends on has completed — successfully or not; a dependency that
    /// never ran, because its own required variables were missing, is
    /// treated as already "completed" so dependents aren't stuck).
    pub async fn run_bindings(&self, turn_id: Uuid, bindings: &[ToolBinding], timing: BindingTiming, known_vars: &HashMap<String, serde_json::Value>) -> Vec<ToolOutcome> {
        let applicable: Vec<&ToolBinding> = bindings.iter().filter(|b| b.when == timing).collect();
        let mut completed: std::collections::HashSet<Uuid> = std::collections::HashSet::new();
        let mut outcomes = Vec::new();

        let mut pending: Vec<&ToolBinding> = applicable;
        while !pending.is_empty() {
            let mut made_progress = false;
            let mut next_round = Vec::new();

            for binding in pending {
                if !binding.depends_on.iter().all(|d| completed.contains(d)) {
                    next_round.push(binding);
                    continue;
                }
                made_progress = true;

                if !binding.required_variables.iter().all(|v| known_vars.contains_key(v)) {
                    completed.insert(binding.tool_id);
                    continue;
                }

                let args = serde_json::json!(binding.required_variables.iter().filter_map(|v| known_vars.get(v).map(|val| (v.clone(), val.clone()))).collect::<HashMap<_, _>>());
                let outcome = self.run_with_retry(turn_id, binding.tool_id, args).await;
                completed.insert(binding.tool_id);
                outcomes.push(outcome);
            }

            if !made_progress {
                // Remaining bindings depend on a tool that never ran
                // (cyclic or unsatisfiable dependency) — mark them failed
                // without attempting and stop.
                for binding in next_round {
                    outcomes.push(ToolOutcome { tool_id: binding.tool_id, succeeded: false, result: None, attempts: 0 });
                }
                break;
            }
            pending = next_round;
        }

        outcomes
    }

    async fn run_with_retry(&self, turn_id: Uuid, tool_id: Uuid, args: serde_json::Value) -> ToolOutcome {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.handler.invoke(tool_id, args.clone()).await {
                Ok(result) => {
                    return ToolOutcome { tool_id, succeeded: true, result: Some(result), attempts };
                }
                Err(e) => {
                    tracing::warn!(turn_id = %turn_id, tool_id = %tool_id, attempt = attempts, error = %e, "tool invocation failed");
                    if attempts >= self.max_attempts {
                        return ToolOutcome { tool_id, succeeded: false, result: None, attempts };
                    }
                }
            }
        }
    }
}

pub fn to_tool_calls(outcomes: &[ToolOutcome]) -> Vec<ToolCall> {
    outcomes
        .iter()
        .filter(|o| o.succeeded)
        .map(|o| ToolCall { call_id: Uuid::new_v4().to_string(), tool_name: o.tool_id.to_string(), arguments: o.result.clone().unwrap_or(serde_json::Value::Null) })
        .collect()
}

pub fn emit_idempotency_trace_if_tool_failed(_turn_id: Uuid, outcomes: &[ToolOutcome]) {
    for outcome in outcomes.iter().filter(|o| !o.succeeded) {
        TraceEvent::IdempotencyStateChanged { layer: "tool".into(), key: outcome.tool_id.to_string(), from: "processing".into(), to: "failed".into() }.emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FlakyHandler {
        succeed_after: u32,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl ToolHandler for FlakyHandler {
        async fn invoke(&self, _tool_id: Uuid, _arguments: serde_json::Value) -> Result<serde_json::Value> {
            let mut calls = self.calls.lock();
            *calls += 1;
            if *calls >= self.succeed_after {
                Ok(serde_json::json!({"ok": true}))
            } else {
                Err(loom_domain::Error::Connection("transient".into()))
            }
        }
    }

    fn binding(tool_id: Uuid, when: BindingTiming, required_variables: Vec<String>, depends_on: Vec<Uuid>) -> ToolBinding {
        ToolBinding { tool_id, when, required_variables, depends_on }
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let handler = Arc::new(FlakyHandler { succeed_after: 2, calls: Mutex::new(0) });
        let executor = ToolExecutor::new(handler, 3);
        let tool_id = Uuid::new_v4();
        let outcomes = executor.run_bindings(Uuid::new_v4(), &[binding(tool_id, BindingTiming::BeforeStep, vec![], vec![])], BindingTiming::BeforeStep, &HashMap::new()).await;
        assert!(outcomes[0].succeeded);
        assert_eq!(outcomes[0].attempts, 2);
    }

    #[tokio::test]
    async fn marks_failed_after_exhausting_retries() {
        let handler = Arc::new(FlakyHandler { succeed_after: 100, calls: Mutex::new(0) });
        let executor = ToolExecutor::new(handler, 2);
        let tool_id = Uuid::new_v4();
        let outcomes = executor.run_bindings(Uuid::new_v4(), &[binding(tool_id, BindingTiming::BeforeStep, vec![], vec![])], BindingTiming::BeforeStep, &HashMap::new()).await;
        assert!(!outcomes[0].succeeded);
        assert_eq!(outcomes[0].attempts, 2);
    }

    #[tokio::test]
    async fn skips_binding_missing_required_variables() {
        let handler = Arc::new(FlakyHandler { succeed_after: 1, calls: Mutex::new(0) });
        let executor = ToolExecutor::new(handler, 3);
        let tool_id = Uuid::new_v4();
        let outcomes = executor.run_bindings(Uuid::new_v4(), &[binding(tool_id, BindingTiming::DuringStep, vec!["order_id".into()], vec![])], BindingTiming::DuringStep, &HashMap::new()).await;
        assert!(!outcomes[0].succeeded);
        assert_eq!(outcomes[0].attempts, 0);
    }

    #[tokio::test]
    async fn dependent_binding_runs_after_its_dependency() {
        let handler = Arc::new(FlakyHandler { succeed_after: 1, calls: Mutex::new(0) });
        let executor = ToolExecutor::new(handler, 1);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let outcomes = executor
            .run_bindings(Uuid::new_v4(), &[binding(second, BindingTiming::AfterStep, vec![], vec![first]), binding(first, BindingTiming::AfterStep, vec![], vec![])], BindingTiming::AfterStep, &HashMap::new())
            .await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.succeeded));
    }
}
