//! Integration tests against the seed scenarios: linear success, a missing
//! required variable, an upstream failure blocking downstream nodes, a
//! bounded Eval loop, a HITL pause/resume round trip, retry exhaustion, and
//! a successful parallel fan-out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;

use constellation_runtime::{ConstellationRegistry, Runner, RunnerConfig, RunnerError};
use constellation_stars::{
    ConstellationContext, Directive, DirectiveRegistry, Star, StarExecutionError, StarRegistry,
    StarType, TemplateVariable,
};
use constellation_store::InMemoryRunStore;
use constellation_types::{
    Constellation, Edge, EndNode, Run, RunStatus, StarNode, StarOutput, StartNode,
};

fn star_node(id: &str, star_id: &str) -> StarNode {
    StarNode {
        id: id.into(),
        star_id: star_id.into(),
        display_name: None,
        requires_confirmation: false,
        confirmation_prompt: None,
    }
}

fn confirming_node(id: &str, star_id: &str, prompt: &str) -> StarNode {
    StarNode {
        id: id.into(),
        star_id: star_id.into(),
        display_name: None,
        requires_confirmation: true,
        confirmation_prompt: Some(prompt.into()),
    }
}

fn edge(id: &str, source: &str, target: &str) -> Edge {
    Edge {
        id: id.into(),
        source: source.into(),
        target: target.into(),
        condition: None,
    }
}

fn loop_edge(id: &str, source: &str, target: &str) -> Edge {
    Edge {
        id: id.into(),
        source: source.into(),
        target: target.into(),
        condition: Some("loop".into()),
    }
}

fn constellation(id: &str, nodes: Vec<StarNode>, edges: Vec<Edge>) -> Constellation {
    Constellation {
        id: id.into(),
        name: format!("{id}-constellation"),
        description: String::new(),
        start: StartNode {
            id: "start".into(),
            original_query: None,
            constellation_purpose: None,
        },
        end: EndNode { id: "end".into() },
        nodes,
        edges,
        max_loop_iterations: 3,
        max_retry_attempts: 2,
        retry_delay_base: 0.01,
    }
}

struct WorkerStar {
    id: String,
    directive_id: String,
    output: String,
}

#[async_trait]
impl Star for WorkerStar {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.id
    }
    fn star_type(&self) -> StarType {
        StarType::Worker
    }
    fn directive_id(&self) -> &str {
        &self.directive_id
    }
    async fn execute(
        &self,
        _context: &mut ConstellationContext,
    ) -> Result<StarOutput, StarExecutionError> {
        Ok(StarOutput::WorkerOutput {
            result: self.output.clone(),
            tool_calls: None,
        })
    }
}

struct AlwaysFailStar {
    id: String,
    calls: Arc<StdMutex<u32>>,
}

impl AlwaysFailStar {
    fn new(id: &str) -> Self {
        Self {
            id: id.into(),
            calls: Arc::new(StdMutex::new(0)),
        }
    }
}

#[async_trait]
impl Star for AlwaysFailStar {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.id
    }
    fn star_type(&self) -> StarType {
        StarType::Worker
    }
    fn directive_id(&self) -> &str {
        "none"
    }
    async fn execute(
        &self,
        _context: &mut ConstellationContext,
    ) -> Result<StarOutput, StarExecutionError> {
        *self.calls.lock().unwrap() += 1;
        Err(StarExecutionError::Failed(format!("{} always fails", self.id)))
    }
}

struct EvalLoopStar {
    id: String,
    calls: Arc<StdMutex<u32>>,
}

#[async_trait]
impl Star for EvalLoopStar {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.id
    }
    fn star_type(&self) -> StarType {
        StarType::Eval
    }
    fn directive_id(&self) -> &str {
        "none"
    }
    async fn execute(
        &self,
        _context: &mut ConstellationContext,
    ) -> Result<StarOutput, StarExecutionError> {
        *self.calls.lock().unwrap() += 1;
        Ok(StarOutput::EvalDecision {
            decision: "loop".into(),
            reasoning: "needs more work".into(),
        })
    }
}

fn build_runner(
    stars: StarRegistry,
    directives: DirectiveRegistry,
    constellations: ConstellationRegistry,
) -> Runner {
    Runner::new(
        stars,
        directives,
        constellations,
        Arc::new(InMemoryRunStore::new()),
        RunnerConfig::default(),
    )
}

#[tokio::test]
async fn s1_linear_constellation_runs_to_completion() {
    let stars = StarRegistry::new();
    stars
        .register(Arc::new(WorkerStar {
            id: "star_a".into(),
            directive_id: "none".into(),
            output: "a-done".into(),
        }))
        .await;
    stars
        .register(Arc::new(WorkerStar {
            id: "star_b".into(),
            directive_id: "none".into(),
            output: "b-done".into(),
        }))
        .await;

    let graph = constellation(
        "c1",
        vec![star_node("a", "star_a"), star_node("b", "star_b")],
        vec![
            edge("e1", "start", "a"),
            edge("e2", "a", "b"),
            edge("e3", "b", "end"),
        ],
    );

    let constellations = ConstellationRegistry::new();
    constellations.register(graph).await;
    let runner = build_runner(stars, DirectiveRegistry::new(), constellations);

    let run = runner
        .run("c1", HashMap::new(), "do the thing".into(), None, None)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.final_output.as_deref(), Some("b-done"));
    assert_eq!(run.node_outputs["a"].output.as_deref(), Some("a-done"));
    assert_eq!(run.node_outputs["b"].output.as_deref(), Some("b-done"));
}

#[tokio::test]
async fn s2_missing_required_variable_fails_the_run() {
    let stars = StarRegistry::new();
    stars
        .register(Arc::new(WorkerStar {
            id: "star_needs_company".into(),
            directive_id: "needs_company".into(),
            output: "irrelevant".into(),
        }))
        .await;

    let directives = DirectiveRegistry::new();
    directives
        .register(Directive {
            id: "needs_company".into(),
            name: "Needs Company".into(),
            description: String::new(),
            content: String::new(),
            template_variables: vec![TemplateVariable {
                name: "company_name".into(),
                description: None,
                required: true,
                default: None,
            }],
            probe_ids: vec![],
        })
        .await;

    let graph = constellation(
        "c2",
        vec![star_node("a", "star_needs_company")],
        vec![edge("e1", "start", "a"), edge("e2", "a", "end")],
    );

    let constellations = ConstellationRegistry::new();
    constellations.register(graph).await;
    let runner = build_runner(stars, directives, constellations);

    let run = runner
        .run("c2", HashMap::new(), "do the thing".into(), None, None)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.unwrap().contains("company_name"));
    assert_eq!(run.node_outputs["a"].status, constellation_types::NodeStatus::Failed);
}

#[tokio::test]
async fn s3_upstream_failure_blocks_downstream_execution() {
    let stars = StarRegistry::new();
    stars
        .register(Arc::new(AlwaysFailStar::new("star_a")))
        .await;
    stars
        .register(Arc::new(WorkerStar {
            id: "star_b".into(),
            directive_id: "none".into(),
            output: "b-done".into(),
        }))
        .await;

    let graph = constellation(
        "c3",
        vec![star_node("a", "star_a"), star_node("b", "star_b")],
        vec![
            edge("e1", "start", "a"),
            edge("e2", "a", "b"),
            edge("e3", "b", "end"),
        ],
    );

    let constellations = ConstellationRegistry::new();
    constellations.register(graph).await;
    let runner = build_runner(stars, DirectiveRegistry::new(), constellations);

    let run = runner
        .run("c3", HashMap::new(), "do the thing".into(), None, None)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.node_outputs.contains_key("a"));
    assert!(
        !run.node_outputs.contains_key("b"),
        "downstream node must not run once its only upstream fails"
    );
}

#[tokio::test]
async fn s4_eval_loop_is_bounded_and_records_forced_continue_text() {
    let stars = StarRegistry::new();
    stars
        .register(Arc::new(WorkerStar {
            id: "star_plan".into(),
            directive_id: "none".into(),
            output: "plan-output".into(),
        }))
        .await;
    let calls = Arc::new(StdMutex::new(0));
    stars
        .register(Arc::new(EvalLoopStar {
            id: "star_eval".into(),
            calls: calls.clone(),
        }))
        .await;

    let mut graph = constellation(
        "c4",
        vec![star_node("plan", "star_plan"), star_node("eval", "star_eval")],
        vec![
            edge("e1", "start", "plan"),
            edge("e2", "plan", "eval"),
            edge("e3", "eval", "end"),
            loop_edge("e4", "eval", "plan"),
        ],
    );
    graph.max_loop_iterations = 2;

    let constellations = ConstellationRegistry::new();
    constellations.register(graph).await;
    let runner = build_runner(stars, DirectiveRegistry::new(), constellations);

    let run = runner
        .run("c4", HashMap::new(), "do the thing".into(), None, None)
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(*calls.lock().unwrap(), 2, "eval should run exactly max_loop_iterations times");
    let eval_output = run.node_outputs["eval"].output.clone().unwrap();
    assert_eq!(
        eval_output,
        "Decision: continue. needs more work (forced continue: max 2 loops reached)"
    );
}

#[tokio::test]
async fn s5_hitl_pause_then_resume_with_additional_context() {
    let stars = StarRegistry::new();
    stars
        .register(Arc::new(WorkerStar {
            id: "star_confirm".into(),
            directive_id: "none".into(),
            output: "confirm-output".into(),
        }))
        .await;
    stars
        .register(Arc::new(WorkerStar {
            id: "star_after".into(),
            directive_id: "none".into(),
            output: "after-done".into(),
        }))
        .await;

    let graph = constellation(
        "c5",
        vec![
            confirming_node("confirm", "star_confirm", "Proceed?"),
            star_node("after", "star_after"),
        ],
        vec![
            edge("e1", "start", "confirm"),
            edge("e2", "confirm", "after"),
            edge("e3", "after", "end"),
        ],
    );

    let constellations = ConstellationRegistry::new();
    constellations.register(graph).await;
    let runner = build_runner(stars, DirectiveRegistry::new(), constellations);

    let paused = runner
        .run("c5", HashMap::new(), "do the thing".into(), None, None)
        .await
        .unwrap();

    assert_eq!(paused.status, RunStatus::AwaitingConfirmation);
    assert_eq!(paused.awaiting_node_id.as_deref(), Some("confirm"));

    let resumed = runner
        .resume(&paused.id, Some("approved".into()), None)
        .await
        .unwrap();

    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.node_outputs["after"].output.as_deref(), Some("after-done"));
    let confirm_output = resumed.node_outputs["confirm"].output.clone().unwrap();
    assert!(confirm_output.contains("--- Expert Response ---\napproved"));
}

#[tokio::test]
async fn s6_retry_is_exhausted_and_surfaced_as_a_parallel_error() {
    let stars = StarRegistry::new();
    let flaky = Arc::new(AlwaysFailStar::new("flaky"));
    stars.register(flaky.clone()).await;

    let graph = constellation("c6", vec![], vec![]);
    let constellations = ConstellationRegistry::new();
    constellations.register(graph.clone()).await;
    let runner = build_runner(stars, DirectiveRegistry::new(), constellations);

    let mut run = Run::new("run_s6", graph.id.clone(), graph.name.clone(), HashMap::new());
    let mut context = ConstellationContext::without_stream(
        run.id.clone(),
        graph.id.clone(),
        "",
        "",
        HashMap::new(),
    );

    let node = star_node("flaky_node", "flaky");
    let result = runner
        .execute_parallel_wave(&[node], &graph, &mut context, &mut run, 0)
        .await;

    match result {
        Err(RunnerError::Parallel(count, errors)) => {
            assert_eq!(count, 1);
            assert!(errors.0.len() == 1);
        }
        other => panic!("expected a Parallel retry-exhaustion error, got {other:?}"),
    }

    assert_eq!(
        *flaky.calls.lock().unwrap(),
        graph.max_retry_attempts + 1,
        "a failing Star must be invoked exactly max_retry_attempts + 1 times (spec S6/P6)"
    );
}

#[tokio::test]
async fn s7_parallel_fan_out_runs_independent_siblings_to_completion() {
    let stars = StarRegistry::new();
    stars
        .register(Arc::new(WorkerStar {
            id: "star_left".into(),
            directive_id: "none".into(),
            output: "left-done".into(),
        }))
        .await;
    stars
        .register(Arc::new(WorkerStar {
            id: "star_right".into(),
            directive_id: "none".into(),
            output: "right-done".into(),
        }))
        .await;

    let graph = constellation("c7", vec![], vec![]);
    let constellations = ConstellationRegistry::new();
    constellations.register(graph.clone()).await;
    let runner = build_runner(stars, DirectiveRegistry::new(), constellations);

    let mut run = Run::new("run_s7", graph.id.clone(), graph.name.clone(), HashMap::new());
    let mut context = ConstellationContext::without_stream(
        run.id.clone(),
        graph.id.clone(),
        "",
        "",
        HashMap::new(),
    );

    let nodes = vec![
        star_node("left", "star_left"),
        star_node("right", "star_right"),
    ];
    runner
        .execute_parallel_wave(&nodes, &graph, &mut context, &mut run, 0)
        .await
        .unwrap();

    assert_eq!(run.node_outputs["left"].output.as_deref(), Some("left-done"));
    assert_eq!(run.node_outputs["right"].output.as_deref(), Some("right-done"));
    assert_eq!(
        run.node_outputs["left"].status,
        constellation_types::NodeStatus::Completed
    );
    assert_eq!(
        run.node_outputs["right"].status,
        constellation_types::NodeStatus::Completed
    );
}
