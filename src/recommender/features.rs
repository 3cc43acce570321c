//! Context feature extraction for (task, employee) pairs
//!
//! Produces the 8-dimensional vector the bandit scores and learns on. Every
//! component is min-max normalized to [0, 1] and clamped. The same extractor
//! runs at selection time; learning reads the stored copy from the
//! assignment row and never recomputes it.

use crate::config::EngineConfig;
use crate::types::{ContextVector, Employee, Task};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Months of experience or tenure treated as fully saturated
const HISTORY_SATURATION_MONTHS: f64 = 60.0;

/// Extracts context vectors with configured normalization ranges
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    workload_cap: f64,
    urgency_horizon_hours: f64,
}

impl FeatureExtractor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            workload_cap: f64::from(config.workload_cap),
            urgency_horizon_hours: config.urgency_horizon_hours,
        }
    }

    /// Build the context vector for one (task, employee) pair
    ///
    /// `similarity` is the mean pairwise skill cosine computed by the
    /// similarity stage for this employee, so selection and scoring see the
    /// identical value.
    pub fn extract(
        &self,
        task: &Task,
        employee: &Employee,
        similarity: f64,
        now: DateTime<Utc>,
    ) -> ContextVector {
        let productivity = clamp01(employee.productivity_score);

        let load = f64::from(employee.workload).min(self.workload_cap);
        let availability = 1.0 - load / self.workload_cap;

        let priority = clamp01((f64::from(task.priority) - 1.0) / 4.0);
        let difficulty = clamp01((f64::from(task.difficulty) - 1.0) / 9.0);

        let skill_match = clamp01(similarity);
        let urgency = self.urgency(task.due_date, now);
        let (experience, tenure) = matching_history(task, employee);

        ContextVector([
            productivity,
            availability,
            priority,
            difficulty,
            skill_match,
            urgency,
            experience,
            tenure,
        ])
    }

    /// Urgency ramps from 0 at the horizon to 1 at (or past) the due date;
    /// tasks without a due date carry no urgency signal
    fn urgency(&self, due_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        let Some(due) = due_date else {
            return 0.0;
        };

        let hours_until_due = (due - now).num_seconds() as f64 / 3600.0;
        clamp01((self.urgency_horizon_hours - hours_until_due) / self.urgency_horizon_hours)
    }
}

/// Mean normalized experience and tenure over the employee skills matching
/// the task's required skills (by case-insensitive name); (0, 0) when there
/// is no overlap
fn matching_history(task: &Task, employee: &Employee) -> (f64, f64) {
    let required: HashSet<String> = task
        .required_skills
        .iter()
        .map(|s| s.to_lowercase())
        .collect();

    let mut experience_sum = 0.0;
    let mut tenure_sum = 0.0;
    let mut matched = 0usize;

    for skill in &employee.skills {
        if required.contains(&skill.name.to_lowercase()) {
            experience_sum += normalized_months(skill.experience_months);
            tenure_sum += normalized_months(skill.tenure_months);
            matched += 1;
        }
    }

    if matched == 0 {
        return (0.0, 0.0);
    }

    (experience_sum / matched as f64, tenure_sum / matched as f64)
}

fn normalized_months(months: Option<u32>) -> f64 {
    clamp01(f64::from(months.unwrap_or(0)) / HISTORY_SATURATION_MONTHS)
}

fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}
