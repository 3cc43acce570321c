//! Skill similarity filter: top-K candidates by mean pairwise cosine
//!
//! Compares every task-skill embedding against every employee-skill
//! embedding and averages the non-negative cosines, so candidates covering
//! many required skills are rewarded over single best matches. The filter
//! never blocks assignment: provider outages degrade a candidate to zero
//! similarity, and an unusable task-side embedding list disables filtering
//! entirely.

use crate::embeddings::{cosine_similarity, EmbeddingProvider};
use crate::recommender::tie_break;
use crate::types::{Employee, Task};
use tracing::{debug, warn};

/// A pool member annotated with its similarity to the task
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub employee: Employee,

    /// Mean pairwise cosine in [0, 1]; 0 when either side has no embeddings
    pub similarity: f64,

    /// Whether the employee's embedding cache was regenerated during this
    /// pass and should be written back
    pub cache_regenerated: bool,
}

/// Narrows a candidate pool to the K most skill-similar employees
pub struct SkillSimilarityFilter {
    top_k: usize,
}

impl SkillSimilarityFilter {
    pub fn new(top_k: usize) -> Self {
        Self { top_k }
    }

    /// Rank `pool` against `task` and keep the best `top_k`
    ///
    /// Returns the whole pool unranked (similarity 0) when the task has no
    /// skill embeddings or no candidate has any, since no meaningful
    /// comparison is possible.
    pub async fn top_k(
        &self,
        task: &Task,
        pool: Vec<Employee>,
        provider: &dyn EmbeddingProvider,
    ) -> Vec<RankedCandidate> {
        if pool.is_empty() {
            return Vec::new();
        }

        let filterable = !task.skill_embeddings.is_empty()
            && pool.iter().any(|e| {
                !e.skill_embeddings.is_empty() || !e.skills.is_empty()
            });

        if !filterable {
            debug!(
                task_id = %task.id,
                "no embeddings to compare, returning pool unfiltered"
            );
            return pool
                .into_iter()
                .map(|employee| RankedCandidate {
                    employee,
                    similarity: 0.0,
                    cache_regenerated: false,
                })
                .collect();
        }

        let mut ranked = Vec::with_capacity(pool.len());
        for mut employee in pool {
            let mut cache_regenerated = false;

            // Best-effort cache fill for candidates missing embeddings; a
            // provider failure leaves the candidate eligible at zero
            // similarity.
            if employee.skill_embeddings.is_empty() && !employee.skills.is_empty() {
                match provider.embed_batch(&employee.skill_names()).await {
                    Ok(embeddings) => {
                        employee.skill_embeddings = embeddings;
                        cache_regenerated = true;
                    }
                    Err(e) => {
                        warn!(
                            employee_id = %employee.id,
                            "embedding generation failed, keeping candidate at zero similarity: {}",
                            e
                        );
                    }
                }
            }

            let similarity =
                mean_pairwise_similarity(&task.skill_embeddings, &employee.skill_embeddings);

            ranked.push(RankedCandidate {
                employee,
                similarity,
                cache_regenerated,
            });
        }

        ranked.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| tie_break(&a.employee, &b.employee))
        });
        ranked.truncate(self.top_k);

        debug!(
            task_id = %task.id,
            kept = ranked.len(),
            "similarity filter kept top candidates"
        );

        ranked
    }
}

/// Mean over all (task-skill, employee-skill) pairs of the non-negative
/// cosine similarity; 0 when either list is empty
pub fn mean_pairwise_similarity(
    task_embeddings: &[Vec<f32>],
    employee_embeddings: &[Vec<f32>],
) -> f64 {
    if task_embeddings.is_empty() || employee_embeddings.is_empty() {
        return 0.0;
    }

    let mut sum = 0.0f64;
    for task_embedding in task_embeddings {
        for employee_embedding in employee_embeddings {
            sum += f64::from(cosine_similarity(task_embedding, employee_embedding)).max(0.0);
        }
    }

    sum / (task_embeddings.len() * employee_embeddings.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, Result};
    use crate::types::{EmployeeId, Skill};
    use async_trait::async_trait;
    use chrono::Utc;

    struct FixedProvider {
        vector: Vec<f32>,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        async fn embed_batch(&self, skills: &[&str]) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                return Err(EngineError::Embedding("provider down".to_string()));
            }
            Ok(skills.iter().map(|_| self.vector.clone()).collect())
        }

        fn dimensions(&self) -> usize {
            self.vector.len()
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn task_with_embedding(embedding: Vec<f32>) -> Task {
        let mut task = Task::new(
            "t",
            3,
            2,
            vec!["rust".to_string()],
            EmployeeId::new(),
            Utc::now(),
        );
        task.skill_embeddings = vec![embedding];
        task
    }

    fn employee_with_embedding(name: &str, embedding: Vec<f32>) -> Employee {
        let mut employee = Employee::new(name, vec![Skill::named("rust")], Utc::now());
        employee.skill_embeddings = vec![embedding];
        employee
    }

    #[test]
    fn test_mean_pairwise_similarity() {
        let task = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let employee = vec![vec![1.0, 0.0]];

        // Pairs: (1, 0) -> mean 0.5
        let sim = mean_pairwise_similarity(&task, &employee);
        assert!((sim - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_negative_cosines_floored() {
        let task = vec![vec![1.0, 0.0]];
        let employee = vec![vec![-1.0, 0.0]];
        assert_eq!(mean_pairwise_similarity(&task, &employee), 0.0);
    }

    #[test]
    fn test_empty_sides_score_zero() {
        assert_eq!(mean_pairwise_similarity(&[], &[vec![1.0]]), 0.0);
        assert_eq!(mean_pairwise_similarity(&[vec![1.0]], &[]), 0.0);
    }

    #[tokio::test]
    async fn test_ranking_and_truncation() {
        let provider = FixedProvider {
            vector: vec![1.0, 0.0, 0.0],
            fail: false,
        };
        let task = task_with_embedding(vec![1.0, 0.0, 0.0]);

        let close = employee_with_embedding("close", vec![1.0, 0.0, 0.0]);
        let mid = employee_with_embedding("mid", vec![0.6, 0.8, 0.0]);
        let far = employee_with_embedding("far", vec![0.0, 0.0, 1.0]);

        let filter = SkillSimilarityFilter::new(2);
        let ranked = filter
            .top_k(&task, vec![far.clone(), mid.clone(), close.clone()], &provider)
            .await;

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].employee.id, close.id);
        assert_eq!(ranked[1].employee.id, mid.id);
        assert!(ranked[0].similarity > ranked[1].similarity);
    }

    #[tokio::test]
    async fn test_no_task_embeddings_returns_pool_unchanged() {
        let provider = FixedProvider {
            vector: vec![1.0, 0.0, 0.0],
            fail: false,
        };
        let task = Task::new(
            "t",
            3,
            2,
            Vec::new(),
            EmployeeId::new(),
            Utc::now(),
        );

        let pool = vec![
            employee_with_embedding("a", vec![1.0, 0.0, 0.0]),
            employee_with_embedding("b", vec![0.0, 1.0, 0.0]),
        ];
        let original_order: Vec<_> = pool.iter().map(|e| e.id).collect();

        let filter = SkillSimilarityFilter::new(1);
        let ranked = filter.top_k(&task, pool, &provider).await;

        // No filtering: full pool, original order, zero similarity
        assert_eq!(ranked.len(), 2);
        let returned: Vec<_> = ranked.iter().map(|r| r.employee.id).collect();
        assert_eq!(returned, original_order);
        assert!(ranked.iter().all(|r| r.similarity == 0.0));
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_candidate_eligible() {
        let provider = FixedProvider {
            vector: vec![1.0, 0.0, 0.0],
            fail: true,
        };
        let task = task_with_embedding(vec![1.0, 0.0, 0.0]);

        let cached = employee_with_embedding("cached", vec![1.0, 0.0, 0.0]);
        let uncached = Employee::new("uncached", vec![Skill::named("rust")], Utc::now());
        let uncached_id = uncached.id;

        let filter = SkillSimilarityFilter::new(3);
        let ranked = filter.top_k(&task, vec![uncached, cached.clone()], &provider).await;

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].employee.id, cached.id);
        assert_eq!(ranked[1].employee.id, uncached_id);
        assert_eq!(ranked[1].similarity, 0.0);
        assert!(!ranked[1].cache_regenerated);
    }

    #[tokio::test]
    async fn test_cache_regeneration_marked() {
        let provider = FixedProvider {
            vector: vec![1.0, 0.0, 0.0],
            fail: false,
        };
        let task = task_with_embedding(vec![1.0, 0.0, 0.0]);
        let uncached = Employee::new("uncached", vec![Skill::named("rust")], Utc::now());

        let filter = SkillSimilarityFilter::new(3);
        let ranked = filter.top_k(&task, vec![uncached], &provider).await;

        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].cache_regenerated);
        assert!((ranked[0].similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_stable_ordering_across_calls() {
        let provider = FixedProvider {
            vector: vec![1.0, 0.0, 0.0],
            fail: false,
        };
        let task = task_with_embedding(vec![1.0, 0.0, 0.0]);

        let mut a = employee_with_embedding("a", vec![1.0, 0.0, 0.0]);
        let mut b = employee_with_embedding("b", vec![1.0, 0.0, 0.0]);
        a.productivity_score = 0.5;
        b.productivity_score = 0.5;

        let filter = SkillSimilarityFilter::new(2);
        let first = filter
            .top_k(&task, vec![a.clone(), b.clone()], &provider)
            .await;
        let second = filter.top_k(&task, vec![b, a], &provider).await;

        let first_ids: Vec<_> = first.iter().map(|r| r.employee.id).collect();
        let second_ids: Vec<_> = second.iter().map(|r| r.employee.id).collect();
        assert_eq!(first_ids, second_ids);
    }
}
