//! The Resume Controller (C6): continues a Run paused by a HITL node, or
//! cancels one outright (spec §4.8, grounded on `resume_run`/`cancel_run`).

use std::sync::Arc;

use chrono::Utc;
use constellation_events::{truncate_final_output, EventSink, NoopEventSink, RunEvent};
use constellation_observability::{emit_event, ObservabilityEvent};
use constellation_stars::context::NodeOutputValue;
use constellation_stars::ConstellationContext;
use constellation_types::{RunStatus, ORIGINAL_QUERY_KEY};

use crate::error::RunnerError;
use crate::runner::Runner;

pub(crate) async fn resume(
    runner: &Runner,
    run_id: &str,
    additional_context: Option<String>,
    stream: Option<Arc<dyn EventSink>>,
) -> Result<constellation_types::Run, RunnerError> {
    tracing::info!(run_id, "resuming run");

    let mut run = runner
        .store()
        .get_run(run_id)
        .await?
        .ok_or_else(|| RunnerError::RunNotFound(run_id.to_string()))?;

    if run.status != RunStatus::AwaitingConfirmation {
        return Err(RunnerError::PreconditionFailed {
            run_id: run.id.clone(),
            status: format!("{:?}", run.status).to_lowercase(),
        });
    }

    let awaiting_node_id = run.awaiting_node_id.clone();
    run.status = RunStatus::Running;
    run.awaiting_node_id = None;
    run.awaiting_prompt = None;

    if let Some(additional) = &additional_context {
        run.additional_context = Some(additional.clone());
        if let Some(node_id) = &awaiting_node_id {
            if let Some(node_output) = run.node_outputs.get_mut(node_id) {
                node_output.output = Some(match &node_output.output {
                    Some(existing) if !existing.is_empty() => {
                        format!("{existing}\n\n--- Expert Response ---\n{additional}")
                    }
                    _ => format!("--- Expert Response ---\n{additional}"),
                });
            }
        }
    }

    runner.store().upsert_run(&run).await?;

    let constellation = runner
        .constellations()
        .get(&run.constellation_id)
        .await
        .ok_or_else(|| RunnerError::ConstellationNotFound(run.constellation_id.clone()))?;

    let original_query = run
        .variables
        .get(ORIGINAL_QUERY_KEY)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let stream: Arc<dyn EventSink> = stream.unwrap_or_else(|| Arc::new(NoopEventSink));

    let mut context = ConstellationContext::new(
        run.id.clone(),
        run.constellation_id.clone(),
        original_query,
        constellation.description.clone(),
        run.variables.clone(),
        stream.clone(),
    );

    // Restore prior node outputs as opaque text (spec §4.8 step 5): a
    // resumed Run only ever sees the persisted string, not the original
    // `StarOutput` shape.
    for node_id in &run.node_output_order {
        if let Some(node_output) = run.node_outputs.get(node_id) {
            if let Some(text) = &node_output.output {
                context.record_node_output(node_id.clone(), NodeOutputValue::Text(text.clone()));
            }
        }
    }

    stream
        .emit(RunEvent::RunResumed {
            run_id: run.id.clone(),
            resumed_from_node: awaiting_node_id.clone().unwrap_or_default(),
            additional_context: additional_context.clone(),
        })
        .await;

    let outcome = if let Some(node_id) = &awaiting_node_id {
        runner
            .execute_from_successor(node_id, &constellation, &mut context, &mut run)
            .await
    } else {
        Ok(())
    };

    finish_resume(runner, &mut run, &mut context, outcome).await?;
    Ok(run)
}

/// Mirrors `Runner::finish_run`'s event/status bookkeeping. The original
/// `resume_run` only caught the HITL-pause sentinel and let any other
/// failure propagate uncaught; a Run can fail mid-resume the same way it
/// can fail mid-run, so this handles that case the same way `run()` does
/// rather than leaving it unhandled.
async fn finish_resume(
    runner: &Runner,
    run: &mut constellation_types::Run,
    context: &mut ConstellationContext,
    outcome: crate::runner::NodeOutcome,
) -> Result<(), RunnerError> {
    match outcome {
        Ok(()) => {
            run.status = RunStatus::Completed;
            run.completed_at = Some(Utc::now());
            run.final_output = run.final_output_candidate();

            context
                .stream
                .emit(RunEvent::RunCompleted {
                    run_id: run.id.clone(),
                    final_output: truncate_final_output(run.final_output.as_deref(), 500),
                    duration_ms: run.duration_ms(),
                })
                .await;
        }
        Err(crate::runner::Signal::Paused) => {
            emit_event(
                tracing::Level::INFO,
                ObservabilityEvent {
                    event: "run_paused_again",
                    component: "resume",
                    run_id: Some(&run.id),
                    node_id: run.awaiting_node_id.as_deref(),
                    star_id: None,
                    status: Some("awaiting_confirmation"),
                    error_code: None,
                    detail: None,
                },
            );
        }
        Err(crate::runner::Signal::Failed(err)) => {
            emit_event(
                tracing::Level::ERROR,
                ObservabilityEvent {
                    event: "run_failed",
                    component: "resume",
                    run_id: Some(&run.id),
                    node_id: None,
                    star_id: None,
                    status: Some("failed"),
                    error_code: None,
                    detail: Some(&err.to_string()),
                },
            );
            run.status = RunStatus::Failed;
            run.error = Some(err.to_string());
            run.completed_at = Some(Utc::now());
        }
    }

    runner.store().upsert_run(run).await?;
    Ok(())
}

pub(crate) async fn cancel(
    runner: &Runner,
    run_id: &str,
) -> Result<constellation_types::Run, RunnerError> {
    tracing::info!(run_id, "cancelling run");

    let mut run = runner
        .store()
        .get_run(run_id)
        .await?
        .ok_or_else(|| RunnerError::RunNotFound(run_id.to_string()))?;

    if run.status.is_terminal() {
        return Ok(run);
    }

    run.status = RunStatus::Cancelled;
    run.completed_at = Some(Utc::now());
    run.awaiting_node_id = None;
    run.awaiting_prompt = None;

    runner.store().upsert_run(&run).await?;
    Ok(run)
}
