//! Shared fixtures for integration tests: a deterministic embedding
//! provider, a manually driven clock, and an engine wired to a throwaway
//! SQLite database.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use lachesis::clock::{Clock, ManualClock};
use lachesis::embeddings::{normalize, EmbeddingProvider};
use lachesis::error::{EngineError, Result};
use lachesis::storage::sqlite::SqliteStorage;
use lachesis::storage::Storage;
use lachesis::{AssignmentEngine, Employee, EngineConfig, Skill, Task, TaskId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Deterministic provider: every skill name hashes to a fixed unit vector,
/// so identical names always embed identically. Can be switched into a
/// failing state to simulate a provider outage.
pub struct FixtureProvider {
    dimensions: usize,
    failing: AtomicBool,
}

impl FixtureProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The unit vector this provider deterministically assigns to a skill
    pub fn vector_for(&self, skill: &str) -> Vec<f32> {
        let mut seed: u32 = 2166136261;
        for byte in skill.to_lowercase().bytes() {
            seed ^= u32::from(byte);
            seed = seed.wrapping_mul(16777619);
        }

        let mut vector: Vec<f32> = (0..self.dimensions)
            .map(|i| {
                seed = seed.wrapping_mul(1664525).wrapping_add(1013904223 + i as u32);
                (seed as f32 / u32::MAX as f32) - 0.5
            })
            .collect();
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for FixtureProvider {
    async fn embed_batch(&self, skills: &[&str]) -> Result<Vec<Vec<f32>>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::Embedding(
                "simulated provider outage".to_string(),
            ));
        }
        Ok(skills.iter().map(|s| self.vector_for(s)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "fixture"
    }
}

/// Everything an integration test needs, with the database kept alive by
/// the held `TempDir`
pub struct Harness {
    pub engine: AssignmentEngine,
    pub storage: Arc<SqliteStorage>,
    pub provider: Arc<FixtureProvider>,
    pub clock: Arc<ManualClock>,
    _dir: TempDir,
}

/// Fixed epoch so due dates and completion times are reproducible
pub fn test_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
}

pub async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", dir.path().join("lachesis-test.db").display());

    let storage = Arc::new(SqliteStorage::new(&url).await.unwrap());
    storage.run_migrations().await.unwrap();

    let provider = Arc::new(FixtureProvider::new(3));
    let clock = Arc::new(ManualClock::new(test_epoch()));
    let config = EngineConfig::default();

    let engine = AssignmentEngine::new(
        storage.clone(),
        provider.clone(),
        clock.clone(),
        config,
    )
    .unwrap();

    Harness {
        engine,
        storage,
        provider,
        clock,
        _dir: dir,
    }
}

impl Harness {
    /// Create an active employee with the provider's embeddings pre-cached
    pub async fn employee(
        &self,
        name: &str,
        skills: &[&str],
        productivity: f64,
        workload: u32,
    ) -> Employee {
        let mut employee = Employee::new(
            name,
            skills.iter().map(|s| Skill::named(*s)).collect(),
            self.clock.now(),
        );
        employee.skill_embeddings = skills.iter().map(|s| self.provider.vector_for(s)).collect();
        employee.productivity_score = productivity;
        employee.workload = workload;

        self.storage.create_employee(&employee).await.unwrap();
        employee
    }

    /// Create an employee without cached embeddings
    pub async fn uncached_employee(&self, name: &str, skills: &[&str]) -> Employee {
        let employee = Employee::new(
            name,
            skills.iter().map(|s| Skill::named(*s)).collect(),
            self.clock.now(),
        );
        self.storage.create_employee(&employee).await.unwrap();
        employee
    }

    /// Create a task without cached embeddings
    pub async fn uncached_task(&self, priority: u8, difficulty: u8, skills: &[&str]) -> TaskId {
        let creator = lachesis::EmployeeId::new();
        let task = Task::new(
            "uncached fixture task",
            priority,
            difficulty,
            skills.iter().map(|s| s.to_string()).collect(),
            creator,
            self.clock.now(),
        );
        self.storage.create_task(&task).await.unwrap();
        task.id
    }

    /// Create a task with the provider's embeddings pre-cached and a due
    /// date the given hours after the current clock
    pub async fn task(
        &self,
        priority: u8,
        difficulty: u8,
        skills: &[&str],
        due_in_hours: Option<i64>,
    ) -> TaskId {
        let creator = lachesis::EmployeeId::new();
        let mut task = Task::new(
            "fixture task",
            priority,
            difficulty,
            skills.iter().map(|s| s.to_string()).collect(),
            creator,
            self.clock.now(),
        );
        task.skill_embeddings = skills.iter().map(|s| self.provider.vector_for(s)).collect();
        task.due_date = due_in_hours.map(|h| self.clock.now() + chrono::Duration::hours(h));

        self.storage.create_task(&task).await.unwrap();
        task.id
    }
}
