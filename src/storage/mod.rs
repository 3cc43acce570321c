//! Storage layer for the assignment engine
//!
//! Provides the abstract store for tasks, employees, assignments, feedback
//! rows, and per-arm bandit state. Implementations own the transaction
//! boundaries: `record_assignment` and `record_completion` must each commit
//! all of their effects or none of them.

pub mod sqlite;

use crate::error::Result;
use crate::recommender::ArmState;
use crate::types::{Assignment, Employee, EmployeeId, Feedback, Task, TaskId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Storage backend trait defining all required operations
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store a new task
    async fn create_task(&self, task: &Task) -> Result<()>;

    /// Retrieve a task by ID
    async fn get_task(&self, id: TaskId) -> Result<Task>;

    /// Store a new employee
    async fn create_employee(&self, employee: &Employee) -> Result<()>;

    /// Retrieve an employee by ID
    async fn get_employee(&self, id: EmployeeId) -> Result<Employee>;

    /// All employees currently in the candidate pool
    async fn active_employees(&self) -> Result<Vec<Employee>>;

    /// Write a regenerated skill-embedding cache for an employee
    async fn cache_employee_embeddings(
        &self,
        id: EmployeeId,
        embeddings: &[Vec<f32>],
    ) -> Result<()>;

    /// Write a regenerated skill-embedding cache for a task
    async fn cache_task_embeddings(&self, id: TaskId, embeddings: &[Vec<f32>]) -> Result<()>;

    /// The task's open assignment, if one exists
    async fn open_assignment(&self, task_id: TaskId) -> Result<Option<Assignment>>;

    /// Commit a new assignment: insert the row, point the task at the
    /// assignee, and increment the assignee's workload, atomically.
    /// Fails with `AlreadyAssigned` when the task has an open assignment.
    async fn record_assignment(&self, assignment: &Assignment) -> Result<()>;

    /// Increment the rework counter on the task's open assignment,
    /// returning the new count
    async fn increment_rework(&self, task_id: TaskId) -> Result<u32>;

    /// The task's feedback row, if completion was already recorded
    async fn get_feedback(&self, task_id: TaskId) -> Result<Option<Feedback>>;

    /// Load persisted bandit state for an arm; `None` for unseen arms
    async fn load_arm(&self, arm_id: EmployeeId) -> Result<Option<ArmState>>;

    /// Commit a completion: insert the feedback row, close the assignment,
    /// mark the task done, decrement the employee's workload, and fold the
    /// feedback's (context, reward) observation into the arm's ridge state,
    /// atomically. The arm read-modify-write happens inside the same
    /// transaction, so concurrent completions for the same arm serialize
    /// instead of losing updates. `lambda` initializes the ridge matrix for
    /// an arm with no prior state. Fails with `AlreadyCompleted` when a
    /// feedback row already exists for the task.
    async fn record_completion(
        &self,
        feedback: &Feedback,
        completed_at: DateTime<Utc>,
        lambda: f64,
    ) -> Result<()>;

    /// Count of an employee's open assignments (workload audit)
    async fn open_assignment_count(&self, employee_id: EmployeeId) -> Result<u32>;
}
