//! Pipeline stage machine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Completed stage recorded in a checkpoint, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    NotStarted,
    QueriesGenerated,
    ResponsesCollected,
    RubricsGenerated,
    EvaluationComplete,
    ReportGenerated,
}

impl Stage {
    pub fn all() -> [Stage; 6] {
        [
            Stage::NotStarted,
            Stage::QueriesGenerated,
            Stage::ResponsesCollected,
            Stage::RubricsGenerated,
            Stage::EvaluationComplete,
            Stage::ReportGenerated,
        ]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::NotStarted => "not_started",
            Stage::QueriesGenerated => "queries_generated",
            Stage::ResponsesCollected => "responses_collected",
            Stage::RubricsGenerated => "rubrics_generated",
            Stage::EvaluationComplete => "evaluation_complete",
            Stage::ReportGenerated => "report_generated",
        };
        write!(f, "{}", name)
    }
}

/// Stage that follows `stage`, or `None` after the last one
pub fn next_stage(stage: Stage) -> Option<Stage> {
    match stage {
        Stage::NotStarted => Some(Stage::QueriesGenerated),
        Stage::QueriesGenerated => Some(Stage::ResponsesCollected),
        Stage::ResponsesCollected => Some(Stage::RubricsGenerated),
        Stage::RubricsGenerated => Some(Stage::EvaluationComplete),
        Stage::EvaluationComplete => Some(Stage::ReportGenerated),
        Stage::ReportGenerated => None,
    }
}

/// Which stages a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePlan {
    pub include_report: bool,
}

impl StagePlan {
    pub fn final_stage(&self) -> Stage {
        if self.include_report {
            Stage::ReportGenerated
        } else {
            Stage::EvaluationComplete
        }
    }

    /// Next stage to run after `stage`, or `None` when the run is done
    pub fn next(&self, stage: Stage) -> Option<Stage> {
        if stage >= self.final_stage() {
            return None;
        }
        next_stage(stage)
    }

    /// Stages still to run, in order
    pub fn remaining(&self, from: Stage) -> Vec<Stage> {
        std::iter::successors(self.next(from), |s| self.next(*s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_stage_walks_every_stage_once() {
        let mut seen = vec![Stage::NotStarted];
        let mut current = Stage::NotStarted;
        while let Some(next) = next_stage(current) {
            assert!(next > current);
            seen.push(next);
            current = next;
        }
        assert_eq!(seen, Stage::all().to_vec());
    }

    #[test]
    fn test_plan_without_report_stops_at_evaluation() {
        let plan = StagePlan { include_report: false };
        assert_eq!(plan.next(Stage::RubricsGenerated), Some(Stage::EvaluationComplete));
        assert_eq!(plan.next(Stage::EvaluationComplete), None);
        assert_eq!(plan.next(Stage::ReportGenerated), None);
    }

    #[test]
    fn test_remaining_from_midpoint() {
        let plan = StagePlan { include_report: true };
        assert_eq!(
            plan.remaining(Stage::ResponsesCollected),
            vec![
                Stage::RubricsGenerated,
                Stage::EvaluationComplete,
                Stage::ReportGenerated
            ]
        );
        assert!(plan.remaining(Stage::ReportGenerated).is_empty());
    }

    #[test]
    fn test_stage_serialization() {
        assert_eq!(
            serde_json::to_string(&Stage::ResponsesCollected).unwrap(),
            "\"responses_collected\""
        );
    }
}
