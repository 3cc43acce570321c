//! Reward derivation from task completion facts
//!
//! No user rating is involved: the reward is computed purely from
//! timestamps, difficulty, due date, and the rework counter, then clipped
//! to the configured bounds. The same inputs always produce the same
//! reward.

use crate::types::{Assignment, Task};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

const COMPLETION_REWARD: f64 = 1.0;
const ONTIME_REWARD: f64 = 0.5;
const GOOD_BEHAVIOUR_REWARD: f64 = 0.2;
const OVERDUE_PENALTY_PER_DAY: f64 = 0.4;
const OVERDUE_PENALTY_CAP_DAYS: i64 = 7;
const REWORK_PENALTY: f64 = 0.5;
const FAILURE_PENALTY: f64 = 1.2;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Full component breakdown of one reward computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardBreakdown {
    pub r_completion: f64,
    pub r_ontime: f64,
    pub r_good_behaviour: f64,
    pub p_overdue: f64,
    pub p_rework: f64,
    pub p_failure: f64,

    /// Whole days past the due date, before the penalty cap
    pub overdue_days: i64,

    /// Component sum before clipping
    pub raw_reward: f64,

    /// Clipped scalar handed to the bandit
    pub reward_value: f64,
}

/// Derives bounded scalar rewards from completion facts
#[derive(Debug, Clone)]
pub struct RewardCalculator {
    min_reward: f64,
    max_reward: f64,
}

impl RewardCalculator {
    pub fn new(min_reward: f64, max_reward: f64) -> Self {
        Self {
            min_reward,
            max_reward,
        }
    }

    /// Days a task of the given difficulty is expected to take
    pub fn expected_days(difficulty: u8) -> f64 {
        f64::from(difficulty.max(1))
    }

    /// Compute the reward for a task completed at `completion_time`
    ///
    /// `force_closed` marks tasks closed without being completed; the
    /// normal completion flow never sets it.
    pub fn evaluate(
        &self,
        task: &Task,
        assignment: &Assignment,
        completion_time: DateTime<Utc>,
        force_closed: bool,
    ) -> RewardBreakdown {
        let completion_days =
            (completion_time - assignment.assigned_at).num_seconds() as f64 / SECONDS_PER_DAY;

        let overdue_days = match task.due_date {
            Some(due) if completion_time > due => {
                (completion_time - due).num_seconds() / SECONDS_PER_DAY as i64
            }
            _ => 0,
        };

        let on_time = match task.due_date {
            Some(due) => completion_time <= due,
            None => true,
        };

        let r_completion = COMPLETION_REWARD;
        let r_ontime = if on_time { ONTIME_REWARD } else { 0.0 };
        let r_good_behaviour = if completion_days <= Self::expected_days(task.difficulty) {
            GOOD_BEHAVIOUR_REWARD
        } else {
            0.0
        };

        let p_overdue =
            -OVERDUE_PENALTY_PER_DAY * overdue_days.min(OVERDUE_PENALTY_CAP_DAYS) as f64;
        let p_rework = -REWORK_PENALTY * f64::from(assignment.rework_count);
        let p_failure = if force_closed { -FAILURE_PENALTY } else { 0.0 };

        let raw_reward =
            r_completion + r_ontime + r_good_behaviour + p_overdue + p_rework + p_failure;
        let reward_value = raw_reward.clamp(self.min_reward, self.max_reward);

        debug!(
            task_id = %task.id,
            raw_reward,
            reward_value,
            overdue_days,
            "computed completion reward"
        );

        RewardBreakdown {
            r_completion,
            r_ontime,
            r_good_behaviour,
            p_overdue,
            p_rework,
            p_failure,
            overdue_days,
            raw_reward,
            reward_value,
        }
    }
}
