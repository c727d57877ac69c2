//! Plan Executor - runs plan steps in order and collects their results
//!
//! Each step gets a fresh namespace holding only the tables of the steps it
//! declares as dependencies, bound as `df_<step_id>`. Its code agent and
//! analysis agent run as requested and the step's artifact lands in the
//! [`ArtifactStore`] under its own id.
//!
//! A step whose agent fails (model unreachable, bad status) is recorded as a
//! failed step and the plan moves on. Only the summarizer can end a run
//! after execution has started.

use std::collections::BTreeMap;
use std::str::FromStr;

use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::summarizer::Summarizer;
use super::{Plan, Step, StepId};
use crate::agent::{AnalysisAgent, CodeAgent, TableMetadata};
use crate::error::EngineError;
use crate::metrics::{PLANS, PLAN_STEPS};
use crate::sandbox::{Artifact, Figure, Namespace};

/// What to do with a step whose dependencies cannot all be resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DependencyPolicy {
    /// Run the step without the unresolved tables
    #[default]
    BestEffort,
    /// Skip the step's agents and record it as failed
    Strict,
}

impl FromStr for DependencyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best-effort" | "best_effort" | "besteffort" => Ok(DependencyPolicy::BestEffort),
            "strict" => Ok(DependencyPolicy::Strict),
            other => Err(format!(
                "unknown dependency policy '{}' (expected best-effort or strict)",
                other
            )),
        }
    }
}

/// Configuration for the plan executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Plans with this many steps or more are rejected
    pub max_plan_steps: usize,
    pub dependency_policy: DependencyPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_plan_steps: 100,
            dependency_policy: DependencyPolicy::BestEffort,
        }
    }
}

/// Result of looking a dependency up in the store
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyLookup {
    Found(Artifact),
    /// No slot for the step
    Missing,
    /// Slot present but unusable
    Malformed(String),
}

/// Step id → artifact, written once per executed step
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    slots: BTreeMap<StepId, Artifact>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, step_id: StepId, artifact: Artifact) {
        self.slots.insert(step_id, artifact);
    }

    pub fn get(&self, step_id: StepId) -> Option<&Artifact> {
        self.slots.get(&step_id)
    }

    pub fn lookup(&self, step_id: StepId) -> DependencyLookup {
        match self.slots.get(&step_id) {
            None => DependencyLookup::Missing,
            Some(artifact) => match &artifact.table {
                None => DependencyLookup::Malformed(format!("step {} produced no table", step_id)),
                Some(table) if table.is_empty() => {
                    DependencyLookup::Malformed(format!("step {} produced an empty table", step_id))
                }
                Some(_) => DependencyLookup::Found(artifact.clone()),
            },
        }
    }

    pub fn contains(&self, step_id: StepId) -> bool {
        self.slots.contains_key(&step_id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn step_ids(&self) -> impl Iterator<Item = StepId> + '_ {
        self.slots.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StepId, &Artifact)> {
        self.slots.iter().map(|(id, a)| (*id, a))
    }
}

/// What happened in one step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    pub step_id: StepId,
    pub goal: String,
    pub ran_code_agent: bool,
    pub ran_analysis_agent: bool,
    /// Namespace names bound from earlier steps
    pub bound: Vec<String>,
    pub missing_dependencies: Vec<StepId>,
    pub malformed_dependencies: Vec<(StepId, String)>,
    pub error: Option<String>,
}

impl StepReport {
    fn new(step: &Step) -> Self {
        Self {
            step_id: step.step_id,
            goal: step.goal.clone(),
            ..Self::default()
        }
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Everything a completed plan produced
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub summary: String,
    pub artifacts: ArtifactStore,
    /// Analysis agent answers by step id
    pub findings: BTreeMap<StepId, String>,
    pub figures: Vec<Figure>,
    pub steps: Vec<StepReport>,
}

#[derive(Debug, Clone)]
pub enum PlanOutcome {
    /// The planner needs more information; no step ran
    Clarification { question: String },
    Completed(ExecutionReport),
}

struct StepResult {
    artifact: Artifact,
    finding: Option<String>,
    figures: Vec<Figure>,
    report: StepReport,
}

/// Plan executor driving the agents step by step
pub struct PlanExecutor {
    code_agent: CodeAgent,
    analysis_agent: AnalysisAgent,
    summarizer: Summarizer,
    config: ExecutorConfig,
}

impl PlanExecutor {
    pub fn new(
        code_agent: CodeAgent,
        analysis_agent: AnalysisAgent,
        summarizer: Summarizer,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            code_agent,
            analysis_agent,
            summarizer,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute `plan`, then summarize the findings for `question`
    ///
    /// `metadata` is the dataset description handed to the code agent.
    pub async fn execute(
        &self,
        plan: &Plan,
        question: &str,
        metadata: &str,
    ) -> Result<PlanOutcome, EngineError> {
        let trace_id = Uuid::now_v7().to_string();
        let span = info_span!(
            "plan_execution",
            trace_id = %trace_id,
            steps = plan.steps.len(),
            otel.name = "plan_execution"
        );

        async move {
            if plan.requires_clarification {
                info!(trace_id = %trace_id, "Planner asked for clarification");
                PLANS.with_label_values(&["clarification"]).inc();
                return Ok(PlanOutcome::Clarification {
                    question: plan.clarification_question.clone().unwrap_or_default(),
                });
            }

            if let Err(e) = plan.validate(self.config.max_plan_steps) {
                warn!(trace_id = %trace_id, error = %e, "Plan rejected");
                PLANS.with_label_values(&["rejected"]).inc();
                return Err(e.into());
            }

            let mut artifacts = ArtifactStore::new();
            let mut findings = BTreeMap::new();
            let mut figures = Vec::new();
            let mut steps = Vec::with_capacity(plan.steps.len());

            for step in &plan.steps {
                let step_span = info_span!(
                    "plan_step",
                    trace_id = %trace_id,
                    step_id = step.step_id,
                    goal = %step.goal,
                    otel.name = "plan_step"
                );
                let result = self
                    .run_step(step, &artifacts, metadata)
                    .instrument(step_span)
                    .await;

                PLAN_STEPS
                    .with_label_values(&[if result.report.failed() { "failed" } else { "ok" }])
                    .inc();

                artifacts.insert(step.step_id, result.artifact);
                if let Some(finding) = result.finding {
                    findings.insert(step.step_id, finding);
                }
                figures.extend(result.figures);
                steps.push(result.report);
            }

            let summary = self.summarizer.summarize(&findings, question, None).await?;
            info!(trace_id = %trace_id, steps = steps.len(), findings = findings.len(), "Plan completed");
            PLANS.with_label_values(&["completed"]).inc();

            Ok(PlanOutcome::Completed(ExecutionReport {
                summary,
                artifacts,
                findings,
                figures,
                steps,
            }))
        }
        .instrument(span)
        .await
    }

    async fn run_step(
        &self,
        step: &Step,
        artifacts: &ArtifactStore,
        metadata: &str,
    ) -> StepResult {
        let mut report = StepReport::new(step);
        let mut namespace = Namespace::new();
        let mut table_metadata = TableMetadata::new();

        for dep in &step.depends_on {
            match artifacts.lookup(*dep) {
                DependencyLookup::Found(artifact) => {
                    let name = format!("df_{}", dep);
                    if let Some(table) = artifact.table {
                        namespace.insert(name.clone(), table);
                    }
                    table_metadata.insert(name.clone(), artifact.metadata);
                    report.bound.push(name);
                }
                DependencyLookup::Missing => {
                    debug!(dependency = dep, "Dependency has no artifact");
                    report.missing_dependencies.push(*dep);
                }
                DependencyLookup::Malformed(reason) => {
                    debug!(dependency = dep, reason = %reason, "Dependency artifact unusable");
                    report.malformed_dependencies.push((*dep, reason));
                }
            }
        }

        let unresolved =
            !report.missing_dependencies.is_empty() || !report.malformed_dependencies.is_empty();
        if unresolved && self.config.dependency_policy == DependencyPolicy::Strict {
            let mut gaps: Vec<StepId> = report.missing_dependencies.clone();
            gaps.extend(report.malformed_dependencies.iter().map(|(id, _)| *id));
            warn!(step_id = step.step_id, ?gaps, "Skipping step with unresolved dependencies");
            report.error = Some(format!("unresolved dependencies: {:?}", gaps));
            return StepResult {
                artifact: Artifact::default(),
                finding: None,
                figures: Vec::new(),
                report,
            };
        }

        let code_output = match &step.code_subtask {
            Some(subtask) => {
                report.ran_code_agent = true;
                match self.code_agent.run(subtask, metadata).await {
                    Ok(output) => {
                        report.error = output.error.clone();
                        Some(output)
                    }
                    Err(e) => {
                        warn!(step_id = step.step_id, error = %e, "Code agent failed");
                        report.error = Some(format!("code agent: {}", e));
                        None
                    }
                }
            }
            None => None,
        };

        let analysis_output = match &step.analysis_subtask {
            Some(subtask) => {
                report.ran_analysis_agent = true;
                match self
                    .analysis_agent
                    .run(subtask, &mut namespace, &table_metadata, None)
                    .await
                {
                    Ok(output) => {
                        if output.budget_exhausted && report.error.is_none() {
                            report.error = Some(output.answer.clone());
                        }
                        Some(output)
                    }
                    Err(e) => {
                        warn!(step_id = step.step_id, error = %e, "Analysis agent failed");
                        if report.error.is_none() {
                            report.error = Some(format!("analysis agent: {}", e));
                        }
                        None
                    }
                }
            }
            None => None,
        };

        let (finding, figures, analysis_artifact) = match analysis_output {
            Some(output) => (Some(output.answer), output.figures, output.artifact),
            None => (None, Vec::new(), None),
        };

        let artifact = analysis_artifact
            .filter(Artifact::has_table)
            .or_else(|| code_output.map(|o| o.artifact()).filter(Artifact::has_table))
            .unwrap_or_default();

        info!(
            step_id = step.step_id,
            has_table = artifact.has_table(),
            bound = report.bound.len(),
            "Step finished"
        );

        StepResult {
            artifact,
            finding,
            figures,
            report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::Table;
    use serde_json::json;

    #[test]
    fn test_lookup_three_states() {
        let mut store = ArtifactStore::new();
        store.insert(1, Artifact::default());
        store.insert(
            2,
            Artifact::new(Table::new(vec!["a".to_string()], vec![vec![json!(1)]]), Default::default()),
        );
        store.insert(3, Artifact::new(Table::new(vec!["a".to_string()], vec![]), Default::default()));

        assert!(matches!(store.lookup(1), DependencyLookup::Malformed(_)));
        assert!(matches!(store.lookup(2), DependencyLookup::Found(_)));
        assert!(matches!(store.lookup(3), DependencyLookup::Malformed(_)));
        assert_eq!(store.lookup(9), DependencyLookup::Missing);
    }

    #[test]
    fn test_dependency_policy_from_str() {
        assert_eq!("best-effort".parse::<DependencyPolicy>(), Ok(DependencyPolicy::BestEffort));
        assert_eq!(" Strict ".parse::<DependencyPolicy>(), Ok(DependencyPolicy::Strict));
        assert!("lenient".parse::<DependencyPolicy>().is_err());
    }
}
