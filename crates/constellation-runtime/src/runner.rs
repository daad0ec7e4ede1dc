//! The Runner Core (C5): graph traversal, parallel fan-out, Eval loop
//! control and HITL pause, grounded on `_execute_graph`/`_execute_node`/
//! `_execute_with_retry`/`_handle_eval_decision`/`_pause_for_confirmation`
//! in the original `ConstellationRunner`, restructured around an explicit
//! `Signal` so a pause can halt traversal without going through Rust's
//! error-propagation path.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use constellation_events::{truncate_final_output, EventSink, NoopEventSink, RunEvent};
use constellation_observability::{emit_event, ObservabilityEvent};
use constellation_stars::adapter::{normalize, resolve_star};
use constellation_stars::context::NodeOutputValue;
use constellation_stars::{ConstellationContext, DirectiveRegistry, Star, StarRegistry, StarType};
use constellation_store::RunStore;
use constellation_types::{
    generate_run_id, preview, Constellation, NodeOutput, NodeStatus, Run, RunStatus, StarNode,
    StarOutput, ORIGINAL_QUERY_KEY,
};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::binding::resolve_bindings;
use crate::config::RunnerConfig;
use crate::error::{AggregatedErrors, RunnerError};
use crate::registry::ConstellationRegistry;

/// Distinguishes a graceful HITL pause from an actual failure along the
/// traversal's `Result` plumbing (spec §4.7: "not a failure, and MUST NOT
/// be logged or reported as one").
pub(crate) enum Signal {
    Paused,
    Failed(RunnerError),
}

impl From<RunnerError> for Signal {
    fn from(err: RunnerError) -> Self {
        Signal::Failed(err)
    }
}

pub(crate) type NodeOutcome = Result<(), Signal>;

/// Mutable bookkeeping threaded through one traversal pass. Kept separate
/// from `Run`/`ConstellationContext` since it tracks a detail of the
/// execution itself (when to checkpoint), not Run state.
#[derive(Default)]
struct ExecutionState {
    checkpoint_counter: u32,
}

/// Executes Constellations: resolves Stars and Directives through its
/// registries, persists through a `RunStore`, and emits through an
/// `EventSink` (spec §4.6-§4.8).
#[derive(Clone)]
pub struct Runner {
    stars: StarRegistry,
    directives: DirectiveRegistry,
    constellations: ConstellationRegistry,
    store: Arc<dyn RunStore>,
    config: RunnerConfig,
}

impl Runner {
    pub fn new(
        stars: StarRegistry,
        directives: DirectiveRegistry,
        constellations: ConstellationRegistry,
        store: Arc<dyn RunStore>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            stars,
            directives,
            constellations,
            store,
            config,
        }
    }

    pub fn stars(&self) -> &StarRegistry {
        &self.stars
    }

    pub fn directives(&self) -> &DirectiveRegistry {
        &self.directives
    }

    pub fn constellations(&self) -> &ConstellationRegistry {
        &self.constellations
    }

    pub(crate) fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Executes a Constellation end to end, or until it pauses or fails
    /// (spec §4.1/§4.6).
    pub async fn run(
        &self,
        constellation_id: &str,
        variables: std::collections::HashMap<String, Value>,
        original_query: String,
        stream: Option<Arc<dyn EventSink>>,
        run_id: Option<String>,
    ) -> Result<Run, RunnerError> {
        let mut constellation = self
            .constellations
            .get(constellation_id)
            .await
            .ok_or_else(|| RunnerError::ConstellationNotFound(constellation_id.to_string()))?;

        // Spec §4.1: populate the Start node with the query/purpose for the
        // duration of this Run so Stars that inspect it directly can see
        // them. `ConstellationRegistry::get` hands back an owned clone, so
        // this mutation never leaks across runs (registry.rs).
        constellation.start.original_query = Some(original_query.clone());
        constellation.start.constellation_purpose = Some(constellation.description.clone());

        let stream: Arc<dyn EventSink> = stream.unwrap_or_else(|| Arc::new(NoopEventSink));

        let mut variables_with_query = variables.clone();
        variables_with_query.insert(
            ORIGINAL_QUERY_KEY.to_string(),
            Value::String(original_query.clone()),
        );

        let mut run = Run::new(
            run_id.unwrap_or_else(generate_run_id),
            constellation_id.to_string(),
            constellation.name.clone(),
            variables_with_query,
        );

        self.store.upsert_run(&run).await?;

        emit_event(
            tracing::Level::INFO,
            ObservabilityEvent {
                event: "run_started",
                component: "runner",
                run_id: Some(&run.id),
                node_id: None,
                star_id: None,
                status: Some("running"),
                error_code: None,
                detail: None,
            },
        );

        stream
            .emit(RunEvent::RunStarted {
                run_id: run.id.clone(),
                constellation_id: constellation_id.to_string(),
                constellation_name: constellation.name.clone(),
                total_nodes: constellation.nodes.len(),
                node_names: constellation.node_names(),
            })
            .await;

        let mut context = ConstellationContext::new(
            run.id.clone(),
            constellation_id.to_string(),
            original_query,
            constellation.description.clone(),
            variables,
            stream.clone(),
        );

        let mut state = ExecutionState::default();
        let outcome = self
            .execute_graph(&constellation, &mut context, &mut run, &mut state)
            .await;

        self.finish_run(&mut run, &mut context, outcome).await?;
        Ok(run)
    }

    /// Shared tail of `run`/`resume`: converts the traversal's terminal
    /// `Signal` into the Run's final status, emits the matching event, and
    /// persists (spec §4.6.1 step 9 / §4.8).
    async fn finish_run(
        &self,
        run: &mut Run,
        context: &mut ConstellationContext,
        outcome: NodeOutcome,
    ) -> Result<(), RunnerError> {
        match outcome {
            Ok(()) => {
                run.status = RunStatus::Completed;
                run.completed_at = Some(Utc::now());
                run.final_output = run.final_output_candidate();

                emit_event(
                    tracing::Level::INFO,
                    ObservabilityEvent {
                        event: "run_completed",
                        component: "runner",
                        run_id: Some(&run.id),
                        node_id: None,
                        star_id: None,
                        status: Some("completed"),
                        error_code: None,
                        detail: None,
                    },
                );

                context
                    .stream
                    .emit(RunEvent::RunCompleted {
                        run_id: run.id.clone(),
                        final_output: truncate_final_output(run.final_output.as_deref(), 500),
                        duration_ms: run.duration_ms(),
                    })
                    .await;
            }
            Err(Signal::Paused) => {
                tracing::info!(run_id = %run.id, node_id = ?run.awaiting_node_id, "run paused for confirmation");
            }
            Err(Signal::Failed(err)) => {
                run.status = RunStatus::Failed;
                run.error = Some(err.to_string());
                run.completed_at = Some(Utc::now());

                emit_event(
                    tracing::Level::ERROR,
                    ObservabilityEvent {
                        event: "run_failed",
                        component: "runner",
                        run_id: Some(&run.id),
                        node_id: context.current_node_id.as_deref(),
                        star_id: None,
                        status: Some("failed"),
                        error_code: None,
                        detail: Some(&err.to_string()),
                    },
                );

                context
                    .stream
                    .emit(RunEvent::RunFailed {
                        run_id: run.id.clone(),
                        error: err.to_string(),
                        failed_node_id: context.current_node_id.clone(),
                    })
                    .await;
            }
        }

        self.store.upsert_run(run).await?;
        Ok(())
    }

    /// Walks the full topological order, skipping Start/End (spec §4.6.1).
    async fn execute_graph(
        &self,
        constellation: &Constellation,
        context: &mut ConstellationContext,
        run: &mut Run,
        state: &mut ExecutionState,
    ) -> NodeOutcome {
        let order = constellation
            .topological_order()
            .map_err(|e| Signal::Failed(RunnerError::StarExecution(e.to_string())))?;

        let mut node_index = 0usize;
        for id in &order {
            if id == &constellation.start.id || id == &constellation.end.id {
                continue;
            }
            let Some(star_node) = constellation.nodes.iter().find(|n| &n.id == id) else {
                continue;
            };
            node_index += 1;
            self.execute_node(star_node, constellation, context, run, node_index, state)
                .await?;
        }
        Ok(())
    }

    /// Re-enters traversal at `start_node_id` inclusive, continuing in
    /// topological order (spec §4.6.3: "loop targets may be visited
    /// multiple times").
    async fn execute_from_node(
        &self,
        start_node_id: &str,
        constellation: &Constellation,
        context: &mut ConstellationContext,
        run: &mut Run,
        state: &mut ExecutionState,
    ) -> NodeOutcome {
        let order = constellation
            .topological_order()
            .map_err(|e| Signal::Failed(RunnerError::StarExecution(e.to_string())))?;

        let Some(start_idx) = order.iter().position(|id| id == start_node_id) else {
            return Ok(());
        };

        let mut node_index = order[..start_idx]
            .iter()
            .filter(|id| constellation.nodes.iter().any(|n| &n.id == *id))
            .count();

        for id in &order[start_idx..] {
            let Some(star_node) = constellation.nodes.iter().find(|n| &n.id == id) else {
                continue;
            };
            node_index += 1;
            self.execute_node(star_node, constellation, context, run, node_index, state)
                .await?;
        }
        Ok(())
    }

    /// Continues from the topological successor of an already-completed
    /// node — the Resume Controller's entrypoint after a HITL pause, which
    /// does NOT re-execute the paused node itself (spec §4.8 step 6).
    pub(crate) async fn execute_from_successor(
        &self,
        completed_node_id: &str,
        constellation: &Constellation,
        context: &mut ConstellationContext,
        run: &mut Run,
    ) -> NodeOutcome {
        let order = constellation
            .topological_order()
            .map_err(|e| Signal::Failed(RunnerError::StarExecution(e.to_string())))?;

        let base_idx = order
            .iter()
            .position(|id| id == completed_node_id)
            .unwrap_or(0);

        let mut node_index = order[..=base_idx]
            .iter()
            .filter(|id| constellation.nodes.iter().any(|n| &n.id == *id))
            .count();

        let mut state = ExecutionState::default();
        for id in &order[base_idx + 1..] {
            let Some(star_node) = constellation.nodes.iter().find(|n| &n.id == id) else {
                continue;
            };
            node_index += 1;
            self.execute_node(star_node, constellation, context, run, node_index, &mut state)
                .await?;
        }
        Ok(())
    }

    /// Executes one StarNode end to end: resolve, run, normalize, route,
    /// checkpoint (spec §4.6.1).
    async fn execute_node(
        &self,
        node: &StarNode,
        constellation: &Constellation,
        context: &mut ConstellationContext,
        run: &mut Run,
        node_index: usize,
        state: &mut ExecutionState,
    ) -> NodeOutcome {
        // Star resolution happens before any NodeOutput/event exists for
        // this node, so a missing Star fails the Run directly rather than
        // producing a NodeFailed event (mirrors the original: this check
        // raises before `current_node_id` is even set).
        let star = resolve_star(&self.stars, &node.star_id)
            .await
            .map_err(RunnerError::from)?;

        let upstream = constellation.get_upstream_nodes(&node.id);
        if upstream.len() > 1 {
            wait_for_upstream(&upstream, run)?;
        }

        let display_name = node
            .display_name
            .clone()
            .unwrap_or_else(|| star.name().to_string());
        context.current_node_id = Some(node.id.clone());
        context.current_node_name = Some(display_name.clone());

        let mut node_output = NodeOutput::started(node.id.clone(), node.star_id.clone());
        run.record_node_output(node_output.clone());

        context
            .stream
            .emit(RunEvent::NodeStarted {
                run_id: run.id.clone(),
                node_id: node.id.clone(),
                node_name: display_name.clone(),
                star_id: node.star_id.clone(),
                star_type: star.star_type().as_str().to_string(),
                node_index,
                total_nodes: constellation.nodes.len(),
            })
            .await;

        let star_result = self.execute_star(star.as_ref(), context).await;

        let result: NodeOutcome = match star_result {
            Ok(star_output) => {
                let normalized = normalize(&star_output, self.config.tool_result_truncate_at);
                node_output.complete(normalized.text, normalized.tool_calls);
                run.record_node_output(node_output.clone());
                context.record_node_output(node.id.clone(), NodeOutputValue::Star(star_output.clone()));

                context
                    .stream
                    .emit(RunEvent::NodeCompleted {
                        run_id: run.id.clone(),
                        node_id: node.id.clone(),
                        node_name: display_name.clone(),
                        output_preview: preview(
                            node_output.output.as_deref().unwrap_or_default(),
                            self.config.output_preview_chars,
                        ),
                        duration_ms: node_output.duration_ms(),
                    })
                    .await;

                self.after_node_success(
                    node,
                    star.star_type(),
                    &star_output,
                    &display_name,
                    constellation,
                    context,
                    run,
                    state,
                )
                .await
            }
            Err(err) => {
                node_output.fail(err.to_string());
                run.record_node_output(node_output.clone());

                emit_event(
                    tracing::Level::ERROR,
                    ObservabilityEvent {
                        event: "node_failed",
                        component: "runner",
                        run_id: Some(&run.id),
                        node_id: Some(&node.id),
                        star_id: Some(&node.star_id),
                        status: Some("failed"),
                        error_code: None,
                        detail: Some(&err.to_string()),
                    },
                );

                context
                    .stream
                    .emit(RunEvent::NodeFailed {
                        run_id: run.id.clone(),
                        node_id: node.id.clone(),
                        node_name: display_name.clone(),
                        error: err.to_string(),
                        duration_ms: node_output.duration_ms(),
                    })
                    .await;

                Err(Signal::Failed(err))
            }
        };

        context.current_node_id = None;
        context.current_node_name = None;

        state.checkpoint_counter += 1;
        let node_failed = node_output.status == NodeStatus::Failed;
        if state.checkpoint_counter % 3 == 0 || node_failed {
            self.store.upsert_run(run).await.map_err(RunnerError::from)?;
        }

        result
    }

    /// Resolves bindings against the Directive (if any), then invokes the
    /// Star (spec §4.4/§4.5).
    async fn execute_star(
        &self,
        star: &dyn Star,
        context: &mut ConstellationContext,
    ) -> Result<StarOutput, RunnerError> {
        if let Some(directive) = constellation_stars::adapter::directive_for_star(&self.directives, star).await {
            let bindings = resolve_bindings(&directive, context, &self.config.semantic_bindings)?;
            context.variables.extend(bindings);
        }

        constellation_stars::adapter::invoke_star(star, context)
            .await
            .map_err(RunnerError::from)
    }

    /// Eval routing and HITL pause, both conditional on a successful Star
    /// execution (spec §4.6.1 step 8).
    #[allow(clippy::too_many_arguments)]
    async fn after_node_success(
        &self,
        node: &StarNode,
        star_type: StarType,
        star_output: &StarOutput,
        display_name: &str,
        constellation: &Constellation,
        context: &mut ConstellationContext,
        run: &mut Run,
        state: &mut ExecutionState,
    ) -> NodeOutcome {
        if star_type == StarType::Eval {
            if let StarOutput::EvalDecision { decision, .. } = star_output {
                if decision == "loop" {
                    self.handle_loop_decision(node, constellation, context, run, state)
                        .await?;
                }
            }
        }

        if node.requires_confirmation {
            self.pause_for_confirmation(node, display_name, run, context)
                .await?;
        }

        Ok(())
    }

    /// Enforces `max_loop_iterations`, finds the loop target, clears its
    /// downstream outputs, and re-enters traversal there (spec §4.6.3).
    async fn handle_loop_decision(
        &self,
        node: &StarNode,
        constellation: &Constellation,
        context: &mut ConstellationContext,
        run: &mut Run,
        state: &mut ExecutionState,
    ) -> NodeOutcome {
        let count = {
            let mut guard = context.loop_count.lock().await;
            *guard += 1;
            *guard
        };

        if count >= constellation.max_loop_iterations {
            self.force_continue(node, constellation, context, run);
            return Ok(());
        }

        let target_id = match constellation.loop_edge_from(&node.id) {
            Some(edge) => Some(edge.target.clone()),
            None => self.find_planning_node(constellation).await.map(|n| n.id),
        };

        match target_id {
            Some(target) => {
                clear_downstream_outputs(&target, constellation, context);
                self.execute_from_node(&target, constellation, context, run, state)
                    .await
            }
            None => {
                emit_event(
                    tracing::Level::WARN,
                    ObservabilityEvent {
                        event: "loop_target_unresolved",
                        component: "runner",
                        run_id: Some(&run.id),
                        node_id: Some(&node.id),
                        star_id: None,
                        status: Some("continuing"),
                        error_code: None,
                        detail: None,
                    },
                );
                Ok(())
            }
        }
    }

    /// Rewrites a loop decision to `continue` once the iteration cap is
    /// hit, updating both the live context entry and the persisted
    /// `NodeOutput.output` so they stay consistent (spec §P4/§8 S4).
    fn force_continue(
        &self,
        node: &StarNode,
        constellation: &Constellation,
        context: &mut ConstellationContext,
        run: &mut Run,
    ) {
        let reasoning = match context.node_outputs().get(&node.id) {
            Some(NodeOutputValue::Star(StarOutput::EvalDecision { reasoning, .. })) => {
                reasoning.clone()
            }
            _ => return,
        };

        let forced_reasoning = format!(
            "{reasoning} (forced continue: max {} loops reached)",
            constellation.max_loop_iterations
        );
        let forced_output = StarOutput::EvalDecision {
            decision: "continue".to_string(),
            reasoning: forced_reasoning,
        };
        let normalized = normalize(&forced_output, self.config.tool_result_truncate_at);

        context.record_node_output(node.id.clone(), NodeOutputValue::Star(forced_output));
        if let Some(existing) = run.node_outputs.get_mut(&node.id) {
            existing.output = Some(normalized.text);
        }
    }

    async fn find_planning_node(&self, constellation: &Constellation) -> Option<StarNode> {
        for node in &constellation.nodes {
            if let Some(star) = self.stars.get(&node.star_id).await {
                if star.star_type() == StarType::Planning {
                    return Some(node.clone());
                }
            }
        }
        None
    }

    async fn pause_for_confirmation(
        &self,
        node: &StarNode,
        display_name: &str,
        run: &mut Run,
        context: &mut ConstellationContext,
    ) -> NodeOutcome {
        run.status = RunStatus::AwaitingConfirmation;
        run.awaiting_node_id = Some(node.id.clone());
        run.awaiting_prompt = Some(
            node.confirmation_prompt
                .clone()
                .unwrap_or_else(|| "Review the output. Proceed?".to_string()),
        );

        context
            .stream
            .emit(RunEvent::RunPaused {
                run_id: run.id.clone(),
                node_id: node.id.clone(),
                node_name: display_name.to_string(),
                prompt: run.awaiting_prompt.clone().unwrap_or_default(),
            })
            .await;

        self.store
            .upsert_run(run)
            .await
            .map_err(|e| Signal::Failed(RunnerError::from(e)))?;

        Err(Signal::Paused)
    }

    /// Parallel sibling execution with per-branch retry (spec §4.6.2). A
    /// distinct entrypoint from the sequential traversal, invoked
    /// explicitly on a known set of sibling nodes — the default traversal
    /// never auto-parallelizes.
    ///
    /// A HITL pause on one sibling is not a failure of the wave (spec
    /// §4.7: a node scheduled in the same topological wave as a pausing
    /// node "that ha[s] already started run[s] to completion"). When any
    /// branch pauses, this returns `Ok(())` with `run.status` already set
    /// to `awaiting_confirmation` by that branch — mirroring how
    /// `Runner::run` returns `Ok(Run)` rather than an error on a pause —
    /// so the caller observes the pause the same way the sequential path
    /// does instead of an aggregated error.
    pub async fn execute_parallel_wave(
        &self,
        nodes: &[StarNode],
        constellation: &Constellation,
        context: &mut ConstellationContext,
        run: &mut Run,
        node_index_base: usize,
    ) -> Result<(), RunnerError> {
        let shared = AsyncMutex::new((context, run));
        let state = AsyncMutex::new(ExecutionState::default());
        let max_attempts = constellation.max_retry_attempts;
        let delay_base = constellation.retry_delay_base;

        let futures = nodes.iter().enumerate().map(|(i, node)| {
            self.execute_node_with_retry(
                node,
                constellation,
                &shared,
                &state,
                node_index_base + i + 1,
                max_attempts,
                delay_base,
            )
        });

        let results = futures::future::join_all(futures).await;

        if results.iter().any(|r| matches!(r, Err(Signal::Paused))) {
            return Ok(());
        }

        let errors: Vec<RunnerError> = results
            .into_iter()
            .filter_map(|r| match r {
                Err(Signal::Failed(err)) => Some(err),
                _ => None,
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            let count = errors.len();
            Err(RunnerError::Parallel(count, AggregatedErrors(errors)))
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_node_with_retry(
        &self,
        node: &StarNode,
        constellation: &Constellation,
        shared: &AsyncMutex<(&mut ConstellationContext, &mut Run)>,
        state: &AsyncMutex<ExecutionState>,
        node_index: usize,
        max_attempts: u32,
        delay_base: f64,
    ) -> NodeOutcome {
        let mut last_error: Option<RunnerError> = None;

        for attempt in 0..=max_attempts {
            let outcome = {
                let mut guard = shared.lock().await;
                let mut state_guard = state.lock().await;
                let ctx: &mut ConstellationContext = &mut *guard.0;
                let rn: &mut Run = &mut *guard.1;
                self.execute_node(node, constellation, ctx, rn, node_index, &mut state_guard)
                    .await
            };

            match outcome {
                Ok(()) => return Ok(()),
                Err(Signal::Paused) => return Err(Signal::Paused),
                Err(Signal::Failed(err)) => {
                    last_error = Some(err);
                    if attempt < max_attempts {
                        let delay = delay_base * 2f64.powi(attempt as i32);
                        tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
                    }
                }
            }
        }

        Err(Signal::Failed(last_error.unwrap_or_else(|| {
            RunnerError::RetryExhausted(node.id.clone(), max_attempts, "unknown error".into())
        })))
    }

    /// Resumes a paused Run, or cancels one — grouped here since both need
    /// the same registries/store (implemented in `resume.rs`).
    pub async fn resume(
        &self,
        run_id: &str,
        additional_context: Option<String>,
        stream: Option<Arc<dyn EventSink>>,
    ) -> Result<Run, RunnerError> {
        crate::resume::resume(self, run_id, additional_context, stream).await
    }

    pub async fn cancel(&self, run_id: &str) -> Result<Run, RunnerError> {
        crate::resume::cancel(self, run_id).await
    }
}

fn wait_for_upstream(upstream: &[StarNode], run: &Run) -> NodeOutcome {
    for node in upstream {
        if let Some(output) = run.node_outputs.get(&node.id) {
            if output.status == NodeStatus::Failed {
                return Err(Signal::Failed(RunnerError::UpstreamFailed {
                    node_id: node.id.clone(),
                    error: output.error.clone().unwrap_or_default(),
                }));
            }
        }
    }
    Ok(())
}

/// Explicit worklist, not recursion, over `GetDownstreamNodes` (spec §9
/// design note: favors an explicit stack for graphs with deep fan-out).
fn clear_downstream_outputs(
    node_id: &str,
    constellation: &Constellation,
    context: &mut ConstellationContext,
) {
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(node_id.to_string());
    let mut worklist: Vec<String> = vec![node_id.to_string()];

    while let Some(current) = worklist.pop() {
        for downstream in constellation.get_downstream_nodes(&current) {
            if visited.insert(downstream.id.clone()) {
                context.clear_node_output(&downstream.id);
                worklist.push(downstream.id);
            }
        }
    }
}
