//! Integration tests for the execution sandbox
//!
//! The sandbox is driven through the line-language interpreter from
//! `common`. The Python tests need a `python3` on PATH; the ones that also
//! need pandas or matplotlib are ignored.

mod common;

use std::sync::Arc;

use common::ScriptInterpreter;
use dataplan::sandbox::{
    PythonInterpreter, RenderMode, Sandbox, Value, RESULT_TABLE,
};
use dataplan::Namespace;

fn sandbox() -> Sandbox {
    Sandbox::new(ScriptInterpreter::new())
}

#[tokio::test]
async fn test_empty_code_is_a_successful_noop() {
    let mut ns = Namespace::new();
    let outcome = sandbox().execute(&mut ns, "   \n\t").await;

    assert!(outcome.success);
    assert!(outcome.error.is_none());
    assert!(outcome.stdout.is_empty());
    assert_eq!(ns.get("pd"), Some(&Value::module("pandas")));
    assert_eq!(ns.get("plt"), Some(&Value::module("matplotlib.pyplot")));
}

#[tokio::test]
async fn test_aliases_are_only_seeded_when_absent() {
    let mut ns = Namespace::new();
    ns.insert("pd", Value::json(serde_json::json!("user value")));
    sandbox().execute(&mut ns, "print ok").await;
    assert_eq!(ns.get("pd"), Some(&Value::json(serde_json::json!("user value"))));
}

#[tokio::test]
async fn test_fault_keeps_only_pre_fault_output() {
    let mut ns = Namespace::new();
    let code = "print before\nwarn careful\nraise KeyError 'n1'\nprint after";
    let outcome = sandbox().execute(&mut ns, code).await;

    assert!(!outcome.success);
    let error = outcome.error.as_ref().unwrap();
    assert_eq!(error.kind, "KeyError");
    assert_eq!(error.message, "'n1'");
    assert!(error.trace.contains("Traceback"));
    assert_eq!(outcome.stdout, "before\n");
    assert_eq!(outcome.stderr, "careful\n");
    assert!(outcome.figures.is_empty());
}

#[tokio::test]
async fn test_bindings_before_a_fault_survive() {
    let mut ns = Namespace::new();
    let outcome = sandbox()
        .execute(&mut ns, "table partial 2\nraise ValueError bad")
        .await;
    assert!(!outcome.success);
    assert!(ns.contains("partial"));
}

#[tokio::test]
async fn test_render_mode_is_suspended_during_and_restored_after() {
    let sandbox = sandbox();
    let mut ns = Namespace::new();

    let outcome = sandbox.execute(&mut ns, "mode").await;
    assert_eq!(outcome.stdout, "Suspended\n");
    assert_eq!(ns.render_mode(), RenderMode::Immediate);

    sandbox.execute(&mut ns, "raise RuntimeError boom").await;
    assert_eq!(ns.render_mode(), RenderMode::Immediate);

    let outcome = sandbox.execute(&mut ns, "print partial\npanic evaluator bug").await;
    assert_eq!(ns.render_mode(), RenderMode::Immediate);
    assert!(!outcome.success);
    assert_eq!(outcome.error.unwrap().kind, "Panic");
}

#[tokio::test]
async fn test_show_does_not_flush_figures_inside_the_sandbox() {
    let mut ns = Namespace::new();
    let outcome = sandbox()
        .execute(&mut ns, "figure Returns by state\nshow")
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.figures.len(), 1);
    assert_eq!(outcome.figures[0].label, "Returns by state");
    assert!(ns.displayed().is_empty());
}

#[tokio::test]
async fn test_open_figures_from_earlier_calls_are_collected() {
    let sandbox = sandbox();
    let mut ns = Namespace::new();
    let first = sandbox.execute(&mut ns, "figure first").await;
    let second = sandbox.execute(&mut ns, "figure second").await;

    assert_eq!(first.figures.len(), 1);
    let labels: Vec<&str> = second.figures.iter().map(|f| f.label.as_str()).collect();
    assert_eq!(labels, vec!["first", "second"]);
    assert_eq!(second.figures[0].id, first.figures[0].id);
}

#[tokio::test]
async fn test_identical_code_is_deterministic() {
    let sandbox = sandbox();
    let code = "print 1\nwarn 2\nraise ZeroDivisionError division by zero";

    let mut a = Namespace::new();
    let mut b = Namespace::new();
    let first = sandbox.execute(&mut a, code).await;
    let second = sandbox.execute(&mut b, code).await;

    assert_eq!(first.stdout, second.stdout);
    assert_eq!(first.stderr, second.stderr);
    assert_eq!(first.success, second.success);
    assert_eq!(first.error.map(|e| e.kind), second.error.map(|e| e.kind));
}

#[tokio::test]
async fn test_missing_interpreter_is_a_structured_failure() {
    let sandbox = Sandbox::new(Arc::new(PythonInterpreter::new("/nonexistent/python3")));
    let mut ns = Namespace::new();
    let outcome = sandbox.execute(&mut ns, "print('hi')").await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.unwrap().kind, "InterpreterUnavailable");
    assert_eq!(ns.render_mode(), RenderMode::Immediate);
}

#[tokio::test]
#[ignore = "Requires python3 with pandas, numpy, matplotlib and seaborn"]
async fn test_python_sandbox_end_to_end() {
    let sandbox = Sandbox::new(Arc::new(PythonInterpreter::default()));
    let mut ns = Namespace::new();

    let outcome = sandbox
        .execute(
            &mut ns,
            "result_df = pd.DataFrame({'state': ['MN', 'WI'], 'n1': [120, 80]})\n\
             result_meta = {'unit': 'returns'}\n\
             plt.plot([1, 2, 3])\nplt.title('Trend')\nplt.show()\n\
             print(result_df.shape)",
        )
        .await;
    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.stdout.trim(), "(2, 2)");
    assert_eq!(outcome.figures.len(), 1);
    assert_eq!(outcome.figures[0].label, "Trend");

    let artifact = ns.artifact().unwrap();
    assert_eq!(artifact.metadata["unit"], "returns");
    assert!(ns.contains(RESULT_TABLE));

    let outcome = sandbox
        .execute(&mut ns, "print(result_df['n1'].sum())\nresult_df['missing']")
        .await;
    assert!(!outcome.success);
    assert_eq!(outcome.stdout.trim(), "200");
    assert_eq!(outcome.error.unwrap().kind, "KeyError");
}

#[tokio::test]
async fn test_python_state_persists_across_calls() {
    let sandbox = Sandbox::new(Arc::new(PythonInterpreter::default()));
    let mut ns = Namespace::new();

    let defined = sandbox
        .execute(&mut ns, "import json as j\ndef double(x):\n    return x * 2\npair = (1, 2)")
        .await;
    assert!(defined.success, "{:?}", defined.error);

    let called = sandbox.execute(&mut ns, "print(double(4))").await;
    assert!(called.success, "{:?}", called.error);
    assert_eq!(called.stdout.trim(), "8");

    let imported = sandbox.execute(&mut ns, "print(j.dumps(1))").await;
    assert!(imported.success, "{:?}", imported.error);
    assert_eq!(imported.stdout.trim(), "1");

    let kept = sandbox.execute(&mut ns, "print(type(pair).__name__)").await;
    assert!(kept.success, "{:?}", kept.error);
    assert_eq!(kept.stdout.trim(), "tuple");
}

#[tokio::test]
async fn test_python_namespaces_do_not_share_state() {
    let sandbox = Sandbox::new(Arc::new(PythonInterpreter::default()));
    let mut a = Namespace::new();
    let mut b = Namespace::new();

    assert!(sandbox.execute(&mut a, "secret = 41").await.success);
    let outcome = sandbox.execute(&mut b, "print(secret)").await;
    assert!(!outcome.success);
    assert_eq!(outcome.error.unwrap().kind, "NameError");
}

#[tokio::test]
#[ignore = "Requires python3 with matplotlib"]
async fn test_python_closed_figures_are_not_reported() {
    let sandbox = Sandbox::new(Arc::new(PythonInterpreter::default()));
    let mut ns = Namespace::new();

    let first = sandbox
        .execute(&mut ns, "fig = plt.figure()\nplt.plot([1, 2])\nplt.title('Draft')")
        .await;
    assert!(first.success, "{:?}", first.error);
    assert_eq!(first.figures.len(), 1);

    let second = sandbox
        .execute(&mut ns, "plt.close(fig)\nplt.figure()\nplt.plot([3, 1])\nplt.title('Final')")
        .await;
    assert!(second.success, "{:?}", second.error);
    let labels: Vec<&str> = second.figures.iter().map(|f| f.label.as_str()).collect();
    assert_eq!(labels, vec!["Final"]);
    assert_eq!(ns.open_figures().len(), 1);

    let third = sandbox.execute(&mut ns, "print(len(plt.get_fignums()))").await;
    assert_eq!(third.figures[0].id, second.figures[0].id);
}
