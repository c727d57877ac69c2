//! Integration tests for planning and plan execution
//!
//! The whole pipeline runs against one scripted model, so the replies below
//! are listed in call order: planner, then each agent turn, then summarizer.

mod common;

use std::sync::Arc;

use common::{answer, code_call, ScriptInterpreter, ScriptedModel};
use dataplan::config::EngineConfig;
use dataplan::llm::{ChatError, ChatMessage};
use dataplan::plan::{DependencyPolicy, PlanError, PlanOutcome};
use dataplan::{Engine, EngineError};
use serde_json::json;

fn config() -> EngineConfig {
    EngineConfig {
        usage_log: None,
        ..EngineConfig::default()
    }
}

fn engine(
    config: &EngineConfig,
    replies: Vec<ChatMessage>,
) -> (Engine, Arc<ScriptedModel>, Arc<ScriptInterpreter>) {
    let model = ScriptedModel::new(replies);
    let interpreter = ScriptInterpreter::new();
    let engine = Engine::with_components(config, model.clone(), interpreter.clone());
    (engine, model, interpreter)
}

fn plan_reply(plan: serde_json::Value) -> ChatMessage {
    answer(&plan.to_string())
}

fn steps(count: u32) -> serde_json::Value {
    json!({
        "requires_clarification": false,
        "clarification_question": null,
        "plan": (1..=count).map(|i| json!({
            "step_id": i,
            "goal": format!("step {}", i),
            "da_prompt": "build",
            "ds_prompt": null,
            "depends_on": []
        })).collect::<Vec<_>>()
    })
}

#[tokio::test]
async fn test_two_step_plan_end_to_end() {
    let plan = json!({
        "requires_clarification": false,
        "clarification_question": null,
        "plan": [
            {"step_id": 1, "goal": "returns by state", "da_prompt": "Build returns by state",
             "ds_prompt": "Describe the table", "depends_on": []},
            {"step_id": 2, "goal": "rank states", "da_prompt": null,
             "ds_prompt": "Which state leads?", "depends_on": [1]}
        ]
    });
    let (engine, model, interpreter) = engine(
        &config(),
        vec![
            plan_reply(plan),
            code_call("set result_meta {\"unit\": \"returns\"}\ntable result_df 3"),
            answer("Three states are covered."),
            code_call("figure Ranking\nprint MN"),
            answer("MN leads."),
            answer("  - MN leads among three states.  "),
        ],
    );

    let outcome = engine
        .ask("Which state gained the most returns?", Some("Use 2019"), "# SCHEMA\nn1")
        .await
        .unwrap();
    let report = match outcome {
        PlanOutcome::Completed(report) => report,
        other => panic!("expected a completed plan, got {:?}", other),
    };

    assert_eq!(report.summary, "- MN leads among three states.");
    assert_eq!(report.artifacts.step_ids().collect::<Vec<_>>(), vec![1, 2]);
    assert!(report.artifacts.get(1).unwrap().has_table());
    assert_eq!(report.artifacts.get(1).unwrap().metadata["unit"], "returns");
    assert!(!report.artifacts.get(2).unwrap().has_table());
    assert_eq!(report.findings.len(), 2);
    assert_eq!(report.findings[&1], "Three states are covered.");
    assert_eq!(report.findings[&2], "MN leads.");
    assert_eq!(report.figures.len(), 1);
    assert!(report.steps[0].ran_code_agent && report.steps[0].ran_analysis_agent);
    assert_eq!(report.steps[1].bound, vec!["df_1".to_string()]);

    let observed = interpreter.observed_namespaces();
    assert_eq!(observed.last().unwrap(), &vec!["df_1".to_string()]);
    assert_eq!(model.remaining(), 0);

    let requests = model.requests();
    assert_eq!(
        requests[0].messages[1].content,
        "USER QUESTION:\nWhich state gained the most returns?\n\nFOCUS:\nUse 2019\n\n\n\nMETADATA: \n # SCHEMA\nn1 \n"
    );
    // step 2 sees the dependency table and its metadata
    let ds_user = &requests[3].messages[1].content;
    assert!(ds_user.contains("- df_1: DataFrame with shape (3, 1) and columns ['value']"));
    assert!(ds_user.contains("Metadata: {\"unit\":\"returns\"}"));

    let summary_request = requests.last().unwrap();
    assert_eq!(summary_request.max_tokens, Some(2000));
    assert!(summary_request.messages[1].content.contains(
        "Data Scientist Report(ds_report_dict):\n{\n  \"ds_step_1\": \"Three states are covered.\",\n  \"ds_step_2\": \"MN leads.\"\n}\n\n"
    ));
}

#[tokio::test]
async fn test_clarification_runs_no_steps() {
    let (engine, model, interpreter) = engine(
        &config(),
        vec![plan_reply(json!({
            "requires_clarification": true,
            "clarification_question": "Which tax year?",
            "plan": []
        }))],
    );
    let outcome = engine.ask("Show the trend", None, "").await.unwrap();

    match outcome {
        PlanOutcome::Clarification { question } => assert_eq!(question, "Which tax year?"),
        other => panic!("expected clarification, got {:?}", other),
    }
    assert_eq!(model.requests().len(), 1);
    assert!(interpreter.observed_namespaces().is_empty());
}

#[tokio::test]
async fn test_zero_step_plan_is_rejected_before_execution() {
    let (engine, model, interpreter) = engine(&config(), vec![plan_reply(steps(0))]);
    let err = engine.ask("q", None, "").await.unwrap_err();

    assert!(matches!(err, EngineError::Plan(PlanError::Empty)));
    assert_eq!(model.requests().len(), 1);
    assert!(interpreter.observed_namespaces().is_empty());
}

#[tokio::test]
async fn test_step_cap_is_exclusive() {
    let cfg = EngineConfig {
        max_plan_steps: 3,
        ..config()
    };

    let (engine, model, _) = engine(&cfg, vec![plan_reply(steps(3))]);
    let err = engine.ask("q", None, "").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Plan(PlanError::TooManySteps { count: 3, max: 3 })
    ));
    assert_eq!(model.requests().len(), 1);

    let (engine, _, _) = crate::engine(
        &cfg,
        vec![
            plan_reply(steps(2)),
            code_call("table result_df 1"),
            code_call("table result_df 2"),
            answer("summary"),
        ],
    );
    assert!(matches!(
        engine.ask("q", None, "").await.unwrap(),
        PlanOutcome::Completed(_)
    ));
}

#[tokio::test]
async fn test_invalid_planner_output_is_fatal() {
    let (engine, _, interpreter) = engine(
        &config(),
        vec![answer("```json\n{\"requires_clarification\": false}\n```")],
    );
    let err = engine.ask("q", None, "").await.unwrap_err();
    match err {
        EngineError::Plan(PlanError::InvalidJson { raw, .. }) => assert!(raw.starts_with("```json")),
        other => panic!("expected InvalidJson, got {:?}", other),
    }
    assert!(interpreter.observed_namespaces().is_empty());
}

#[tokio::test]
async fn test_forward_dependency_is_rejected() {
    let plan = json!({
        "requires_clarification": false,
        "plan": [
            {"step_id": 1, "goal": "a", "ds_prompt": "x", "depends_on": [2]},
            {"step_id": 2, "goal": "b", "da_prompt": "y"}
        ]
    });
    let (engine, model, _) = engine(&config(), vec![plan_reply(plan)]);
    let err = engine.ask("q", None, "").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Plan(PlanError::ForwardDependency { step: 1, dependency: 2 })
    ));
    assert_eq!(model.requests().len(), 1);
}

#[tokio::test]
async fn test_missing_dependency_runs_without_it() {
    let plan = json!({
        "requires_clarification": false,
        "plan": [
            {"step_id": 1, "goal": "analyse", "ds_prompt": "Look around", "depends_on": [9]}
        ]
    });
    let (engine, _, interpreter) = engine(
        &config(),
        vec![
            plan_reply(plan),
            code_call("print nothing here"),
            answer("No data was available."),
            answer("summary"),
        ],
    );
    let report = match engine.ask("q", None, "").await.unwrap() {
        PlanOutcome::Completed(report) => report,
        other => panic!("expected a completed plan, got {:?}", other),
    };

    assert_eq!(interpreter.observed_namespaces(), vec![Vec::<String>::new()]);
    assert_eq!(report.steps[0].missing_dependencies, vec![9]);
    assert!(report.steps[0].error.is_none());
    assert_eq!(report.findings[&1], "No data was available.");
}

#[tokio::test]
async fn test_malformed_dependency_under_strict_policy_fails_the_step() {
    let cfg = EngineConfig {
        dependency_policy: DependencyPolicy::Strict,
        ..config()
    };
    let plan = json!({
        "requires_clarification": false,
        "plan": [
            {"step_id": 1, "goal": "build", "da_prompt": "build", "depends_on": []},
            {"step_id": 2, "goal": "analyse", "ds_prompt": "analyse", "depends_on": [1]},
            {"step_id": 3, "goal": "independent", "ds_prompt": "count", "depends_on": []}
        ]
    });
    let (engine, model, _) = engine(
        &cfg,
        vec![
            plan_reply(plan),
            // code agent gives up without a table
            answer("I cannot find the file."),
            // step 2 is skipped; step 3 answers directly
            answer("Counted."),
            answer("summary"),
        ],
    );
    let report = match engine.ask("q", None, "").await.unwrap() {
        PlanOutcome::Completed(report) => report,
        other => panic!("expected a completed plan, got {:?}", other),
    };

    assert_eq!(report.artifacts.len(), 3);
    assert!(report.steps[1].failed());
    assert!(!report.steps[1].ran_analysis_agent);
    assert_eq!(report.steps[1].malformed_dependencies.len(), 1);
    assert!(!report.artifacts.get(2).unwrap().has_table());
    assert_eq!(report.findings.keys().copied().collect::<Vec<_>>(), vec![3]);
    assert_eq!(model.remaining(), 0);
}

#[tokio::test]
async fn test_malformed_dependency_under_best_effort_runs_without_it() {
    let plan = json!({
        "requires_clarification": false,
        "plan": [
            {"step_id": 1, "goal": "build", "da_prompt": "build", "depends_on": []},
            {"step_id": 2, "goal": "analyse", "ds_prompt": "analyse", "depends_on": [1]}
        ]
    });
    let (engine, model, interpreter) = engine(
        &config(),
        vec![
            plan_reply(plan),
            // code agent gives up without a table
            answer("I cannot find the file."),
            code_call("print nothing bound"),
            answer("Nothing to analyse."),
            answer("summary"),
        ],
    );
    let report = match engine.ask("q", None, "").await.unwrap() {
        PlanOutcome::Completed(report) => report,
        other => panic!("expected a completed plan, got {:?}", other),
    };

    assert_eq!(interpreter.observed_namespaces(), vec![Vec::<String>::new()]);
    let step = &report.steps[1];
    assert!(step.ran_analysis_agent);
    assert!(step.bound.is_empty());
    assert_eq!(step.malformed_dependencies.len(), 1);
    assert_eq!(step.malformed_dependencies[0].0, 1);
    assert!(step.error.is_none());
    assert_eq!(report.findings[&2], "Nothing to analyse.");
    assert_eq!(model.remaining(), 0);
}

#[tokio::test]
async fn test_agent_model_error_fails_only_its_step() {
    let plan = json!({
        "requires_clarification": false,
        "plan": [
            {"step_id": 1, "goal": "build", "da_prompt": "build", "depends_on": []},
            {"step_id": 2, "goal": "count", "ds_prompt": "count", "depends_on": []}
        ]
    });
    let model = ScriptedModel::from_results(vec![
        Ok(plan_reply(plan)),
        Err(ChatError::Status {
            code: 500,
            body: "upstream overloaded".to_string(),
        }),
        Ok(answer("Counted.")),
        Ok(answer("Step 2 counted; step 1 failed.")),
    ]);
    let engine = Engine::with_components(&config(), model.clone(), ScriptInterpreter::new());

    let report = match engine.ask("q", None, "").await.unwrap() {
        PlanOutcome::Completed(report) => report,
        other => panic!("expected a completed plan, got {:?}", other),
    };

    assert_eq!(report.steps.len(), 2);
    assert!(report.steps[0].ran_code_agent);
    assert!(report.steps[0].failed());
    assert!(report.steps[0].error.as_deref().unwrap().contains("HTTP 500"));
    assert!(!report.artifacts.get(1).unwrap().has_table());
    assert!(!report.steps[1].failed());
    assert_eq!(report.findings[&2], "Counted.");
    assert_eq!(report.summary, "Step 2 counted; step 1 failed.");
    assert_eq!(model.remaining(), 0);
}

#[tokio::test]
async fn test_summarizer_model_error_is_fatal() {
    let model = ScriptedModel::from_results(vec![
        Ok(plan_reply(steps(1))),
        Ok(answer("built")),
        Err(ChatError::Status {
            code: 503,
            body: String::new(),
        }),
    ]);
    let engine = Engine::with_components(&config(), model, ScriptInterpreter::new());

    let err = engine.ask("q", None, "").await.unwrap_err();
    assert!(matches!(err, EngineError::Model(ChatError::Status { code: 503, .. })));
}

#[tokio::test]
async fn test_usage_log_records_every_model_call() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("logs").join("token_usage.csv");
    let cfg = EngineConfig {
        usage_log: Some(log_path.clone()),
        ..config()
    };
    let plan = json!({
        "requires_clarification": false,
        "plan": [{"step_id": 1, "goal": "g", "da_prompt": "build", "ds_prompt": "explain"}]
    });
    let (engine, _, _) = engine(
        &cfg,
        vec![
            plan_reply(plan),
            code_call("table result_df 1"),
            answer("One row."),
            answer("summary"),
        ],
    );
    engine.ask("q", None, "").await.unwrap();

    let text = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "timestamp,agent_name,model,total_tokens");
    let agents: Vec<&str> = lines[1..]
        .iter()
        .map(|l| l.split(',').nth(1).unwrap())
        .collect();
    assert_eq!(
        agents,
        vec!["Orchestrator agent", "DA agent", "DS agent", "Summarize agent"]
    );
    assert!(lines[1..].iter().all(|l| l.ends_with(",10")));
}
