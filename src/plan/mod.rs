//! Plans: the planner's dependency-ordered list of analysis steps
//!
//! ```text
//! question ─▶ Planner ─▶ Plan ─▶ PlanExecutor ─▶ steps in order
//!                                     │              │
//!                                     │     CodeAgent / AnalysisAgent
//!                                     ▼              │
//!                               ArtifactStore ◀──────┘
//!                                     │
//!                                     ▼
//!                                 Summarizer ─▶ report
//! ```

pub mod executor;
pub mod planner;
pub mod summarizer;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

pub use executor::{
    ArtifactStore, DependencyLookup, DependencyPolicy, ExecutionReport, ExecutorConfig,
    PlanExecutor, PlanOutcome, StepReport,
};
pub use planner::{Planner, PLANNER_AGENT_NAME};
pub use summarizer::{render_report, Summarizer, SUMMARIZER_AGENT_NAME};

pub type StepId = u32;

/// One unit of plan execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_id: StepId,
    pub goal: String,
    /// Task for the code agent
    #[serde(rename = "da_prompt", default)]
    pub code_subtask: Option<String>,
    /// Task for the analysis agent
    #[serde(rename = "ds_prompt", default)]
    pub analysis_subtask: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<StepId>,
}

/// The planner's answer: either steps to run or a question for the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub requires_clarification: bool,
    #[serde(default)]
    pub clarification_question: Option<String>,
    #[serde(rename = "plan", default)]
    pub steps: Vec<Step>,
}

impl Plan {
    /// Parse the plan document exactly as received
    pub fn from_json(raw: &str) -> Result<Self, PlanError> {
        serde_json::from_str(raw).map_err(|source| PlanError::InvalidJson {
            raw: raw.to_string(),
            source,
        })
    }

    /// Check the plan is runnable with a step cap of `max_steps`
    ///
    /// Ids must be unique and every dependency must point at an earlier
    /// step. Ids that appear nowhere in the plan are left to the executor's
    /// dependency policy.
    pub fn validate(&self, max_steps: usize) -> Result<(), PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        if self.steps.len() >= max_steps {
            return Err(PlanError::TooManySteps {
                count: self.steps.len(),
                max: max_steps,
            });
        }

        let all_ids: HashSet<StepId> = self.steps.iter().map(|s| s.step_id).collect();
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_id) {
                return Err(PlanError::DuplicateStep(step.step_id));
            }
            for dep in &step.depends_on {
                if *dep == step.step_id || (all_ids.contains(dep) && !seen.contains(dep)) {
                    return Err(PlanError::ForwardDependency {
                        step: step.step_id,
                        dependency: *dep,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Error type for malformed plans
#[derive(Debug)]
pub enum PlanError {
    /// The planner's reply was not a plan document
    InvalidJson {
        raw: String,
        source: serde_json::Error,
    },
    Empty,
    TooManySteps { count: usize, max: usize },
    DuplicateStep(StepId),
    /// A step depends on itself or on a step later in the plan
    ForwardDependency { step: StepId, dependency: StepId },
}

impl std::fmt::Display for PlanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanError::InvalidJson { raw, source } => {
                write!(f, "Planner returned invalid JSON ({}): {}", source, raw)
            }
            PlanError::Empty => write!(f, "Plan is empty; cannot proceed"),
            PlanError::TooManySteps { count, max } => {
                write!(f, "Plan has {} steps, exceeding max_steps={}", count, max)
            }
            PlanError::DuplicateStep(id) => write!(f, "Plan repeats step_id {}", id),
            PlanError::ForwardDependency { step, dependency } => write!(
                f,
                "Step {} depends on step {} which does not run before it",
                step, dependency
            ),
        }
    }
}

impl std::error::Error for PlanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlanError::InvalidJson { source, .. } => Some(source),
            _ => None,
        }
    }
}
