//! Assignment engine: selection pipeline orchestration and feedback ingestion
//!
//! `assign_task` runs the two-stage recommender (similarity filter, then
//! LinUCB) and commits the winning assignment; `complete_task` derives the
//! reward, persists the feedback row, and folds the observation into the
//! chosen arm — all behind one transaction boundary per operation. Both
//! paths retry transient storage conflicts with exponential backoff before
//! surfacing an internal error.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::embeddings::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::recommender::{
    similarity::mean_pairwise_similarity, ArmChoice, ArmState, FeatureExtractor, LinUcbBandit,
    SkillSimilarityFilter,
};
use crate::rewards::RewardCalculator;
use crate::storage::Storage;
use crate::types::{
    Assignment, Employee, EmployeeId, Feedback, FeedbackId, Recommendation, Task, TaskId,
    TaskStatus,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Backoff schedule for transient storage conflicts, in milliseconds
const RETRY_BACKOFF_MS: [u64; 3] = [10, 40, 160];

/// How an assignment target is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignMode {
    /// Run the full selection pipeline
    Auto,

    /// Administrator picked the employee directly
    Manual(EmployeeId),
}

/// The assignment and learning engine
///
/// Owns the selection pipeline and the feedback ingestor; storage, the
/// embedding provider, and the clock are injected collaborators.
pub struct AssignmentEngine {
    storage: Arc<dyn Storage>,
    provider: Arc<dyn EmbeddingProvider>,
    clock: Arc<dyn Clock>,
    filter: SkillSimilarityFilter,
    extractor: FeatureExtractor,
    bandit: LinUcbBandit,
    rewards: RewardCalculator,
    config: EngineConfig,
}

impl AssignmentEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        provider: Arc<dyn EmbeddingProvider>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            filter: SkillSimilarityFilter::new(config.similarity_top_k),
            extractor: FeatureExtractor::new(&config),
            bandit: LinUcbBandit::new(config.alpha, config.lambda),
            rewards: RewardCalculator::new(config.min_reward, config.max_reward),
            storage,
            provider,
            clock,
            config,
        })
    }

    /// Assign a task to an employee
    ///
    /// Manual mode validates the target and records the assignment with the
    /// same context extraction the automatic path uses. Automatic mode runs
    /// similarity filtering and bandit selection over all active employees.
    pub async fn assign_task(&self, task_id: TaskId, mode: AssignMode) -> Result<Assignment> {
        let mut task = self.storage.get_task(task_id).await?;

        if self.storage.open_assignment(task_id).await?.is_some() {
            return Err(EngineError::AlreadyAssigned(task_id));
        }

        self.ensure_task_embeddings(&mut task, true).await;

        let assignment = match mode {
            AssignMode::Manual(employee_id) => self.assign_manual(&task, employee_id).await?,
            AssignMode::Auto => self.assign_auto(&task).await?,
        };

        info!(
            task_id = %task_id,
            employee_id = %assignment.employee_id,
            mode = ?mode,
            "task assigned"
        );

        Ok(assignment)
    }

    async fn assign_manual(&self, task: &Task, employee_id: EmployeeId) -> Result<Assignment> {
        let employee = self.storage.get_employee(employee_id).await?;
        if !employee.active {
            return Err(EngineError::InvalidManualTarget(employee_id));
        }

        let similarity =
            mean_pairwise_similarity(&task.skill_embeddings, &employee.skill_embeddings);
        let context = self
            .extractor
            .extract(task, &employee, similarity, self.clock.now());

        let assignment = Assignment::new(
            task.id,
            employee.id,
            task.creator_id,
            context,
            self.clock.now(),
        );

        self.with_retry(|| self.storage.record_assignment(&assignment))
            .await?;

        Ok(assignment)
    }

    async fn assign_auto(&self, task: &Task) -> Result<Assignment> {
        let pool = self.storage.active_employees().await?;
        if pool.is_empty() {
            return Err(EngineError::NoCandidates);
        }

        let candidates = self.ranked_candidates(task, pool, true).await;
        let now = self.clock.now();

        let choices: Vec<ArmChoice> = candidates
            .iter()
            .map(|(employee, similarity)| ArmChoice {
                context: self.extractor.extract(task, employee, *similarity, now),
                employee: employee.clone(),
            })
            .collect();

        let arms = self.load_arms(&choices).await?;
        let winner_index = self
            .bandit
            .select(&choices, &arms)
            .ok_or(EngineError::NoCandidates)?;
        let winner = &choices[winner_index];

        debug!(
            task_id = %task.id,
            winner = %winner.employee.id,
            candidates = choices.len(),
            "bandit selected assignee"
        );

        let assignment = Assignment::new(
            task.id,
            winner.employee.id,
            task.creator_id,
            winner.context,
            now,
        );

        self.with_retry(|| self.storage.record_assignment(&assignment))
            .await?;

        Ok(assignment)
    }

    /// Complete a task: compute the reward, persist feedback, update the arm
    pub async fn complete_task(&self, task_id: TaskId) -> Result<Feedback> {
        let task = self.storage.get_task(task_id).await?;

        let Some(assignment) = self.storage.open_assignment(task_id).await? else {
            return if task.status == TaskStatus::Done
                || self.storage.get_feedback(task_id).await?.is_some()
            {
                Err(EngineError::AlreadyCompleted(task_id))
            } else {
                Err(EngineError::NotAssigned(task_id))
            };
        };

        if task.status == TaskStatus::Done {
            return Err(EngineError::InvariantViolated(format!(
                "task {} is done but still has an open assignment",
                task_id
            )));
        }

        let completed_at = self.clock.now();
        let breakdown = self
            .rewards
            .evaluate(&task, &assignment, completed_at, false);

        // The stored context is authoritative for learning; never recompute
        // it here. The arm itself is read and updated inside the completion
        // transaction so concurrent completions for the same arm serialize.
        let feedback = Feedback {
            id: FeedbackId::new(),
            task_id,
            employee_id: assignment.employee_id,
            r_completion: breakdown.r_completion,
            r_ontime: breakdown.r_ontime,
            r_good_behaviour: breakdown.r_good_behaviour,
            p_overdue: breakdown.p_overdue,
            p_rework: breakdown.p_rework,
            p_failure: breakdown.p_failure,
            raw_reward: breakdown.raw_reward,
            reward_value: breakdown.reward_value,
            overdue_days: breakdown.overdue_days,
            context: assignment.context,
            created_at: completed_at,
        };

        self.with_retry(|| {
            self.storage
                .record_completion(&feedback, completed_at, self.config.lambda)
        })
        .await?;

        info!(
            task_id = %task_id,
            employee_id = %assignment.employee_id,
            reward = breakdown.reward_value,
            "task completed and reward ingested"
        );

        Ok(feedback)
    }

    /// Preview the ranked candidates for a task without mutating anything
    pub async fn recommend(&self, task_id: TaskId, k: Option<usize>) -> Result<Vec<Recommendation>> {
        let mut task = self.storage.get_task(task_id).await?;

        let pool = self.storage.active_employees().await?;
        if pool.is_empty() {
            return Err(EngineError::NoCandidates);
        }

        // Previews never mutate, so a freshly generated cache is not
        // persisted here
        self.ensure_task_embeddings(&mut task, false).await;

        let candidates = self.ranked_candidates(&task, pool, false).await;
        let now = self.clock.now();

        let choices: Vec<ArmChoice> = candidates
            .iter()
            .map(|(employee, similarity)| ArmChoice {
                context: self.extractor.extract(&task, employee, *similarity, now),
                employee: employee.clone(),
            })
            .collect();

        let arms = self.load_arms(&choices).await?;

        let mut scored: Vec<(Recommendation, &Employee)> = choices
            .iter()
            .map(|choice| {
                let score = match arms.get(&choice.employee.id) {
                    Some(arm) => self.bandit.ucb_score(arm, &choice.context),
                    None => {
                        let cold = ArmState::cold(choice.employee.id, self.config.lambda);
                        self.bandit.ucb_score(&cold, &choice.context)
                    }
                };
                (
                    Recommendation {
                        employee_id: choice.employee.id,
                        score,
                        context: choice.context,
                    },
                    &choice.employee,
                )
            })
            .collect();

        scored.sort_by(|(a, ea), (b, eb)| {
            crate::recommender::rank_by_score(a.score, *ea, b.score, *eb)
        });

        let k = k.unwrap_or(self.config.similarity_top_k);
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(recommendation, _)| recommendation)
            .collect())
    }

    /// Record a rework round on the task's open assignment, returning the
    /// new counter value
    pub async fn mark_rework(&self, task_id: TaskId) -> Result<u32> {
        // Surface UnknownTask ahead of NotAssigned
        self.storage.get_task(task_id).await?;
        let count = self.storage.increment_rework(task_id).await?;

        info!(task_id = %task_id, rework_count = count, "rework recorded");
        Ok(count)
    }

    /// Backfill an employee's embedding cache from their skill names,
    /// returning the number of vectors generated
    pub async fn regenerate_employee_embeddings(&self, employee_id: EmployeeId) -> Result<usize> {
        let employee = self.storage.get_employee(employee_id).await?;
        if employee.skills.is_empty() {
            return Ok(0);
        }

        let embeddings = self.provider.embed_batch(&employee.skill_names()).await?;
        let count = embeddings.len();
        self.storage
            .cache_employee_embeddings(employee_id, &embeddings)
            .await?;

        Ok(count)
    }

    /// Fill a task's missing skill-embedding cache from its required skill
    /// names, best-effort. Provider failure leaves the task without
    /// embeddings and skill similarity degrades to zero.
    async fn ensure_task_embeddings(&self, task: &mut Task, persist_cache: bool) {
        if !task.skill_embeddings.is_empty() || task.required_skills.is_empty() {
            return;
        }

        let names: Vec<&str> = task.required_skills.iter().map(String::as_str).collect();
        match self.provider.embed_batch(&names).await {
            Ok(embeddings) => {
                task.skill_embeddings = embeddings;
                if persist_cache {
                    // Cache write failure must not block assignment
                    if let Err(e) = self
                        .storage
                        .cache_task_embeddings(task.id, &task.skill_embeddings)
                        .await
                    {
                        warn!(
                            task_id = %task.id,
                            "failed to persist regenerated task embeddings: {}",
                            e
                        );
                    }
                }
            }
            Err(e) => {
                warn!(
                    task_id = %task.id,
                    "task embedding generation failed, proceeding without: {}",
                    e
                );
            }
        }
    }

    /// Run the similarity filter, optionally persisting regenerated caches
    async fn ranked_candidates(
        &self,
        task: &Task,
        pool: Vec<Employee>,
        persist_caches: bool,
    ) -> Vec<(Employee, f64)> {
        let ranked = self.filter.top_k(task, pool, self.provider.as_ref()).await;

        let mut candidates = Vec::with_capacity(ranked.len());
        for candidate in ranked {
            if persist_caches && candidate.cache_regenerated {
                // Cache write failure must not block assignment
                if let Err(e) = self
                    .storage
                    .cache_employee_embeddings(
                        candidate.employee.id,
                        &candidate.employee.skill_embeddings,
                    )
                    .await
                {
                    warn!(
                        employee_id = %candidate.employee.id,
                        "failed to persist regenerated embeddings: {}",
                        e
                    );
                }
            }
            candidates.push((candidate.employee, candidate.similarity));
        }

        candidates
    }

    async fn load_arms(&self, choices: &[ArmChoice]) -> Result<HashMap<EmployeeId, ArmState>> {
        let mut arms = HashMap::with_capacity(choices.len());
        for choice in choices {
            if let Some(arm) = self.storage.load_arm(choice.employee.id).await? {
                arms.insert(choice.employee.id, arm);
            }
        }
        Ok(arms)
    }

    /// Retry transient storage conflicts with exponential backoff; other
    /// errors pass through untouched
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && attempt < self.config.max_storage_retries => {
                    let backoff_ms = RETRY_BACKOFF_MS
                        [attempt.min(RETRY_BACKOFF_MS.len() as u32 - 1) as usize];
                    warn!(
                        attempt = attempt + 1,
                        backoff_ms, "storage conflict, retrying: {}", e
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
                Err(e) if is_transient(&e) => {
                    return Err(EngineError::Internal(format!(
                        "storage conflict persisted after {} retries: {}",
                        attempt, e
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Busy/locked database errors are retryable; everything else is not
fn is_transient(err: &EngineError) -> bool {
    match err {
        EngineError::Database(sqlx::Error::Database(db)) => {
            let message = db.message();
            message.contains("database is locked") || message.contains("database table is locked")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(!is_transient(&EngineError::NoCandidates));
        assert!(!is_transient(&EngineError::Internal("x".to_string())));
        assert!(!is_transient(&EngineError::AlreadyAssigned(TaskId::new())));
    }
}
