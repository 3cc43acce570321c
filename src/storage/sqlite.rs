//! SQLite storage backend implementation
//!
//! Persists the engine's entities with sqlx. The assign and complete paths
//! are single write transactions, so SQLite's writer lock serializes
//! concurrent operations on the same task row and bandit arm; invariant
//! enforcement (one open assignment per task, one feedback row per task)
//! is delegated to unique indexes and surfaced as typed errors.

use crate::error::{EngineError, Result};
use crate::recommender::ArmState;
use crate::storage::Storage;
use crate::types::{
    Assignment, AssignmentId, ContextVector, Employee, EmployeeId, Feedback, FeedbackId, Skill,
    Task, TaskId, TaskStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow};
use sqlx::{ConnectOptions, Row};
use std::str::FromStr;
use tracing::{debug, info};

/// SQLite storage backend
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage backend
    ///
    /// # Arguments
    /// * `database_url` - Path to SQLite database file (e.g., "sqlite:///path/to/db.sqlite")
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("Connecting to SQLite database: {}", database_url);

        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(30));

        // Query logging is too verbose at this layer
        options = options.disable_statement_logging();

        let pool = SqlitePool::connect_with(options).await?;

        info!("SQLite connection established");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");

        sqlx::migrate!("./migrations/sqlite")
            .run(&self.pool)
            .await
            .map_err(|e| EngineError::Internal(format!("migration failed: {}", e)))?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Serialize a list of equal-length f32 vectors to one LE-byte blob
    fn pack_embeddings(embeddings: &[Vec<f32>]) -> (Vec<u8>, i64) {
        let dim = embeddings.first().map(|v| v.len()).unwrap_or(0);
        let blob = embeddings
            .iter()
            .flat_map(|v| v.iter().flat_map(|f| f.to_le_bytes()))
            .collect();
        (blob, dim as i64)
    }

    /// Deserialize an embedding blob back into per-skill vectors
    fn unpack_embeddings(blob: &[u8], dim: i64) -> Result<Vec<Vec<f32>>> {
        if dim <= 0 || blob.is_empty() {
            return Ok(Vec::new());
        }

        let stride = dim as usize * 4;
        if blob.len() % stride != 0 {
            return Err(EngineError::InvariantViolated(format!(
                "embedding blob of {} bytes does not divide into {}-dim vectors",
                blob.len(),
                dim
            )));
        }

        Ok(blob
            .chunks_exact(stride)
            .map(|vector_bytes| {
                vector_bytes
                    .chunks_exact(4)
                    .map(|chunk| {
                        let arr: [u8; 4] = chunk.try_into().unwrap();
                        f32::from_le_bytes(arr)
                    })
                    .collect()
            })
            .collect())
    }

    fn row_to_employee(row: &SqliteRow) -> Result<Employee> {
        let id_str: String = row.try_get("id")?;
        let skills_json: String = row.try_get("skills")?;
        let skills: Vec<Skill> = serde_json::from_str(&skills_json)?;

        let blob: Vec<u8> = row.try_get("skill_embeddings")?;
        let dim: i64 = row.try_get("embedding_dim")?;

        Ok(Employee {
            id: EmployeeId::from_string(&id_str)?,
            name: row.try_get("name")?,
            skills,
            skill_embeddings: Self::unpack_embeddings(&blob, dim)?,
            productivity_score: row.try_get("productivity_score")?,
            workload: row.try_get::<i64, _>("workload")? as u32,
            active: row.try_get::<i64, _>("active")? != 0,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_task(row: &SqliteRow) -> Result<Task> {
        let id_str: String = row.try_get("id")?;
        let required_json: String = row.try_get("required_skills")?;
        let required_skills: Vec<String> = serde_json::from_str(&required_json)?;

        let blob: Vec<u8> = row.try_get("skill_embeddings")?;
        let dim: i64 = row.try_get("embedding_dim")?;

        let status_str: String = row.try_get("status")?;
        let creator_str: String = row.try_get("creator_id")?;
        let assignee_str: Option<String> = row.try_get("assignee_id")?;
        let assignee_id = assignee_str
            .map(|s| EmployeeId::from_string(&s))
            .transpose()?;

        Ok(Task {
            id: TaskId::from_string(&id_str)?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            priority: row.try_get::<i64, _>("priority")? as u8,
            difficulty: row.try_get::<i64, _>("difficulty")? as u8,
            required_skills,
            skill_embeddings: Self::unpack_embeddings(&blob, dim)?,
            status: TaskStatus::parse(&status_str)?,
            creator_id: EmployeeId::from_string(&creator_str)?,
            assignee_id,
            due_date: row.try_get("due_date")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_assignment(row: &SqliteRow) -> Result<Assignment> {
        let id_str: String = row.try_get("id")?;
        let task_str: String = row.try_get("task_id")?;
        let employee_str: String = row.try_get("employee_id")?;
        let assigner_str: String = row.try_get("assigner_id")?;
        let context_blob: Vec<u8> = row.try_get("context_vector")?;

        Ok(Assignment {
            id: AssignmentId::from_string(&id_str)?,
            task_id: TaskId::from_string(&task_str)?,
            employee_id: EmployeeId::from_string(&employee_str)?,
            assigner_id: EmployeeId::from_string(&assigner_str)?,
            context: ContextVector::from_le_bytes(&context_blob)?,
            rework_count: row.try_get::<i64, _>("rework_count")? as u32,
            assigned_at: row.try_get("assigned_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn row_to_feedback(row: &SqliteRow) -> Result<Feedback> {
        let id_str: String = row.try_get("id")?;
        let task_str: String = row.try_get("task_id")?;
        let employee_str: String = row.try_get("employee_id")?;
        let context_blob: Vec<u8> = row.try_get("context_vector")?;

        Ok(Feedback {
            id: FeedbackId::from_string(&id_str)?,
            task_id: TaskId::from_string(&task_str)?,
            employee_id: EmployeeId::from_string(&employee_str)?,
            r_completion: row.try_get("r_completion")?,
            r_ontime: row.try_get("r_ontime")?,
            r_good_behaviour: row.try_get("r_good_behaviour")?,
            p_overdue: row.try_get("p_overdue")?,
            p_rework: row.try_get("p_rework")?,
            p_failure: row.try_get("p_failure")?,
            raw_reward: row.try_get("raw_reward")?,
            reward_value: row.try_get("reward_value")?,
            overdue_days: row.try_get("overdue_days")?,
            context: ContextVector::from_le_bytes(&context_blob)?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Check whether a sqlx error is a unique violation on the given index
    /// or column
    fn is_unique_violation(err: &sqlx::Error, needle: &str) -> bool {
        match err {
            sqlx::Error::Database(db) => {
                let message = db.message();
                message.contains("UNIQUE constraint failed") && message.contains(needle)
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_task(&self, task: &Task) -> Result<()> {
        debug!("Storing task: {}", task.id);

        let (blob, dim) = Self::pack_embeddings(&task.skill_embeddings);

        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, title, description, priority, difficulty,
                required_skills, skill_embeddings, embedding_dim,
                status, creator_id, assignee_id, due_date,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.title)
        .bind(&task.description)
        .bind(i64::from(task.priority))
        .bind(i64::from(task.difficulty))
        .bind(serde_json::to_string(&task.required_skills)?)
        .bind(blob)
        .bind(dim)
        .bind(task.status.as_str())
        .bind(task.creator_id.to_string())
        .bind(task.assignee_id.map(|id| id.to_string()))
        .bind(task.due_date)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Task> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(EngineError::UnknownTask(id))?;

        Self::row_to_task(&row)
    }

    async fn create_employee(&self, employee: &Employee) -> Result<()> {
        debug!("Storing employee: {}", employee.id);

        let (blob, dim) = Self::pack_embeddings(&employee.skill_embeddings);

        sqlx::query(
            r#"
            INSERT INTO employees (
                id, name, skills, skill_embeddings, embedding_dim,
                productivity_score, workload, active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(employee.id.to_string())
        .bind(&employee.name)
        .bind(serde_json::to_string(&employee.skills)?)
        .bind(blob)
        .bind(dim)
        .bind(employee.productivity_score)
        .bind(i64::from(employee.workload))
        .bind(employee.active as i64)
        .bind(employee.created_at)
        .bind(employee.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_employee(&self, id: EmployeeId) -> Result<Employee> {
        let row = sqlx::query("SELECT * FROM employees WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(EngineError::UnknownEmployee(id))?;

        Self::row_to_employee(&row)
    }

    async fn active_employees(&self) -> Result<Vec<Employee>> {
        let rows = sqlx::query("SELECT * FROM employees WHERE active = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_employee).collect()
    }

    async fn cache_employee_embeddings(
        &self,
        id: EmployeeId,
        embeddings: &[Vec<f32>],
    ) -> Result<()> {
        let (blob, dim) = Self::pack_embeddings(embeddings);

        let result = sqlx::query(
            r#"
            UPDATE employees
            SET skill_embeddings = ?, embedding_dim = ?, updated_at = ?
            WHERE id = ? AND embedding_dim = 0
            "#,
        )
        .bind(blob)
        .bind(dim)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!("Employee {} already has cached embeddings, skipping", id);
        }

        Ok(())
    }

    async fn cache_task_embeddings(&self, id: TaskId, embeddings: &[Vec<f32>]) -> Result<()> {
        let (blob, dim) = Self::pack_embeddings(embeddings);

        sqlx::query(
            r#"
            UPDATE tasks
            SET skill_embeddings = ?, embedding_dim = ?, updated_at = ?
            WHERE id = ? AND embedding_dim = 0
            "#,
        )
        .bind(blob)
        .bind(dim)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn open_assignment(&self, task_id: TaskId) -> Result<Option<Assignment>> {
        let row = sqlx::query(
            "SELECT * FROM assignments WHERE task_id = ? AND completed_at IS NULL",
        )
        .bind(task_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_assignment).transpose()
    }

    async fn record_assignment(&self, assignment: &Assignment) -> Result<()> {
        debug!(
            "Recording assignment {} (task {} -> employee {})",
            assignment.id, assignment.task_id, assignment.employee_id
        );

        let mut tx = self.pool.begin().await?;

        let insert = sqlx::query(
            r#"
            INSERT INTO assignments (
                id, task_id, employee_id, assigner_id,
                context_vector, rework_count, assigned_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(assignment.id.to_string())
        .bind(assignment.task_id.to_string())
        .bind(assignment.employee_id.to_string())
        .bind(assignment.assigner_id.to_string())
        .bind(assignment.context.to_le_bytes())
        .bind(i64::from(assignment.rework_count))
        .bind(assignment.assigned_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = insert {
            return if Self::is_unique_violation(&e, "assignments") {
                Err(EngineError::AlreadyAssigned(assignment.task_id))
            } else {
                Err(e.into())
            };
        }

        let task_update = sqlx::query(
            "UPDATE tasks SET assignee_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(assignment.employee_id.to_string())
        .bind(assignment.assigned_at)
        .bind(assignment.task_id.to_string())
        .execute(&mut *tx)
        .await?;

        if task_update.rows_affected() == 0 {
            return Err(EngineError::UnknownTask(assignment.task_id));
        }

        let employee_update = sqlx::query(
            "UPDATE employees SET workload = workload + 1, updated_at = ? WHERE id = ?",
        )
        .bind(assignment.assigned_at)
        .bind(assignment.employee_id.to_string())
        .execute(&mut *tx)
        .await?;

        if employee_update.rows_affected() == 0 {
            return Err(EngineError::UnknownEmployee(assignment.employee_id));
        }

        tx.commit().await?;

        debug!("Assignment recorded: {}", assignment.id);
        Ok(())
    }

    async fn increment_rework(&self, task_id: TaskId) -> Result<u32> {
        let result = sqlx::query(
            r#"
            UPDATE assignments
            SET rework_count = rework_count + 1
            WHERE task_id = ? AND completed_at IS NULL
            "#,
        )
        .bind(task_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotAssigned(task_id));
        }

        let count: i64 = sqlx::query_scalar(
            "SELECT rework_count FROM assignments WHERE task_id = ? AND completed_at IS NULL",
        )
        .bind(task_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u32)
    }

    async fn get_feedback(&self, task_id: TaskId) -> Result<Option<Feedback>> {
        let row = sqlx::query("SELECT * FROM feedback WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_feedback).transpose()
    }

    async fn load_arm(&self, arm_id: EmployeeId) -> Result<Option<ArmState>> {
        let row = sqlx::query("SELECT * FROM bandit_state WHERE arm_id = ?")
            .bind(arm_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let a_blob: Vec<u8> = row.try_get("a_blob")?;
        let b_blob: Vec<u8> = row.try_get("b_blob")?;
        let update_count: i64 = row.try_get("update_count")?;

        Ok(Some(ArmState::from_blobs(
            arm_id,
            &a_blob,
            &b_blob,
            update_count as u64,
        )?))
    }

    async fn record_completion(
        &self,
        feedback: &Feedback,
        completed_at: DateTime<Utc>,
        lambda: f64,
    ) -> Result<()> {
        debug!(
            "Recording completion for task {} (employee {})",
            feedback.task_id, feedback.employee_id
        );

        let mut tx = self.pool.begin().await?;

        let insert = sqlx::query(
            r#"
            INSERT INTO feedback (
                id, task_id, employee_id,
                r_completion, r_ontime, r_good_behaviour,
                p_overdue, p_rework, p_failure,
                raw_reward, reward_value, overdue_days,
                context_vector, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(feedback.id.to_string())
        .bind(feedback.task_id.to_string())
        .bind(feedback.employee_id.to_string())
        .bind(feedback.r_completion)
        .bind(feedback.r_ontime)
        .bind(feedback.r_good_behaviour)
        .bind(feedback.p_overdue)
        .bind(feedback.p_rework)
        .bind(feedback.p_failure)
        .bind(feedback.raw_reward)
        .bind(feedback.reward_value)
        .bind(feedback.overdue_days)
        .bind(feedback.context.to_le_bytes())
        .bind(feedback.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = insert {
            return if Self::is_unique_violation(&e, "feedback.task_id") {
                Err(EngineError::AlreadyCompleted(feedback.task_id))
            } else {
                Err(e.into())
            };
        }

        let assignment_update = sqlx::query(
            r#"
            UPDATE assignments
            SET completed_at = ?
            WHERE task_id = ? AND completed_at IS NULL
            "#,
        )
        .bind(completed_at)
        .bind(feedback.task_id.to_string())
        .execute(&mut *tx)
        .await?;

        if assignment_update.rows_affected() == 0 {
            return Err(EngineError::NotAssigned(feedback.task_id));
        }

        sqlx::query("UPDATE tasks SET status = 'done', updated_at = ? WHERE id = ?")
            .bind(completed_at)
            .bind(feedback.task_id.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE employees
            SET workload = MAX(workload - 1, 0), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(completed_at)
        .bind(feedback.employee_id.to_string())
        .execute(&mut *tx)
        .await?;

        // Read-modify-write of the arm stays inside this transaction so
        // concurrent completions for the same employee serialize on the
        // writer lock rather than overwriting each other's updates.
        let arm_row = sqlx::query(
            "SELECT a_blob, b_blob, update_count FROM bandit_state WHERE arm_id = ?",
        )
        .bind(feedback.employee_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let mut arm = match arm_row {
            Some(row) => {
                let a_blob: Vec<u8> = row.try_get("a_blob")?;
                let b_blob: Vec<u8> = row.try_get("b_blob")?;
                let update_count: i64 = row.try_get("update_count")?;
                ArmState::from_blobs(feedback.employee_id, &a_blob, &b_blob, update_count as u64)?
            }
            None => ArmState::cold(feedback.employee_id, lambda),
        };
        arm.observe(&feedback.context, feedback.reward_value);

        sqlx::query(
            r#"
            INSERT INTO bandit_state (arm_id, a_blob, b_blob, update_count, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(arm_id) DO UPDATE SET
                a_blob = excluded.a_blob,
                b_blob = excluded.b_blob,
                update_count = excluded.update_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(arm.arm_id.to_string())
        .bind(arm.a_blob())
        .bind(arm.b_blob())
        .bind(arm.update_count as i64)
        .bind(completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!("Completion recorded for task {}", feedback.task_id);
        Ok(())
    }

    async fn open_assignment_count(&self, employee_id: EmployeeId) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM assignments WHERE employee_id = ? AND completed_at IS NULL",
        )
        .bind(employee_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_storage() -> (SqliteStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let url = format!("sqlite://{}", db_path.display());

        let storage = SqliteStorage::new(&url).await.unwrap();
        storage.run_migrations().await.unwrap();
        (storage, temp_dir)
    }

    fn sample_employee(name: &str) -> Employee {
        let now = Utc::now();
        let mut employee = Employee::new(name, vec![Skill::named("rust")], now);
        employee.skill_embeddings = vec![vec![0.6, 0.8]];
        employee.productivity_score = 0.7;
        employee
    }

    fn sample_task(creator: EmployeeId) -> Task {
        let now = Utc::now();
        let mut task = Task::new("build parser", 3, 4, vec!["rust".to_string()], creator, now);
        task.skill_embeddings = vec![vec![1.0, 0.0]];
        task
    }

    #[tokio::test]
    async fn test_employee_round_trip() {
        let (storage, _dir) = test_storage().await;

        let employee = sample_employee("Ada");
        storage.create_employee(&employee).await.unwrap();

        let loaded = storage.get_employee(employee.id).await.unwrap();
        assert_eq!(loaded.name, "Ada");
        assert_eq!(loaded.skills, employee.skills);
        assert_eq!(loaded.skill_embeddings, employee.skill_embeddings);
        assert_eq!(loaded.workload, 0);
        assert!(loaded.active);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_typed_errors() {
        let (storage, _dir) = test_storage().await;

        let task_err = storage.get_task(TaskId::new()).await.unwrap_err();
        assert!(matches!(task_err, EngineError::UnknownTask(_)));

        let employee_err = storage.get_employee(EmployeeId::new()).await.unwrap_err();
        assert!(matches!(employee_err, EngineError::UnknownEmployee(_)));
    }

    #[tokio::test]
    async fn test_assignment_lifecycle() {
        let (storage, _dir) = test_storage().await;

        let employee = sample_employee("Ada");
        storage.create_employee(&employee).await.unwrap();
        let task = sample_task(employee.id);
        storage.create_task(&task).await.unwrap();

        let context = ContextVector([0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8]);
        let assignment =
            Assignment::new(task.id, employee.id, employee.id, context, Utc::now());
        storage.record_assignment(&assignment).await.unwrap();

        // Workload incremented, task points at the assignee
        let loaded_employee = storage.get_employee(employee.id).await.unwrap();
        assert_eq!(loaded_employee.workload, 1);
        let loaded_task = storage.get_task(task.id).await.unwrap();
        assert_eq!(loaded_task.assignee_id, Some(employee.id));

        // Context round-trips byte-for-byte
        let open = storage.open_assignment(task.id).await.unwrap().unwrap();
        assert_eq!(open.context.to_le_bytes(), context.to_le_bytes());

        // Second open assignment for the same task is rejected
        let duplicate =
            Assignment::new(task.id, employee.id, employee.id, context, Utc::now());
        let err = storage.record_assignment(&duplicate).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyAssigned(_)));

        // The rejection rolled back: workload unchanged
        let loaded_employee = storage.get_employee(employee.id).await.unwrap();
        assert_eq!(loaded_employee.workload, 1);
    }

    #[tokio::test]
    async fn test_completion_lifecycle() {
        let (storage, _dir) = test_storage().await;

        let employee = sample_employee("Ada");
        storage.create_employee(&employee).await.unwrap();
        let task = sample_task(employee.id);
        storage.create_task(&task).await.unwrap();

        let context = ContextVector([0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8]);
        let assignment =
            Assignment::new(task.id, employee.id, employee.id, context, Utc::now());
        storage.record_assignment(&assignment).await.unwrap();

        let completed_at = Utc::now();
        let feedback = Feedback {
            id: FeedbackId::new(),
            task_id: task.id,
            employee_id: employee.id,
            r_completion: 1.0,
            r_ontime: 0.5,
            r_good_behaviour: 0.2,
            p_overdue: 0.0,
            p_rework: 0.0,
            p_failure: 0.0,
            raw_reward: 1.7,
            reward_value: 1.7,
            overdue_days: 0,
            context,
            created_at: completed_at,
        };

        storage
            .record_completion(&feedback, completed_at, 1.0)
            .await
            .unwrap();

        // Task done, workload back to zero, assignment closed
        let loaded_task = storage.get_task(task.id).await.unwrap();
        assert_eq!(loaded_task.status, TaskStatus::Done);
        let loaded_employee = storage.get_employee(employee.id).await.unwrap();
        assert_eq!(loaded_employee.workload, 0);
        assert!(storage.open_assignment(task.id).await.unwrap().is_none());

        // Feedback row persisted with byte-equal context
        let stored = storage.get_feedback(task.id).await.unwrap().unwrap();
        assert_eq!(stored.reward_value, 1.7);
        assert_eq!(stored.context.to_le_bytes(), context.to_le_bytes());

        // Arm state built and persisted inside the transaction
        let mut expected_arm = ArmState::cold(employee.id, 1.0);
        expected_arm.observe(&context, 1.7);
        let loaded_arm = storage.load_arm(employee.id).await.unwrap().unwrap();
        assert_eq!(loaded_arm.update_count, 1);
        assert_eq!(loaded_arm.a, expected_arm.a);
        assert_eq!(loaded_arm.b, expected_arm.b);

        // Duplicate completion rejected, state untouched
        let duplicate = Feedback {
            id: FeedbackId::new(),
            ..feedback
        };
        let err = storage
            .record_completion(&duplicate, Utc::now(), 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyCompleted(_)));

        let loaded_arm = storage.load_arm(employee.id).await.unwrap().unwrap();
        assert_eq!(loaded_arm.update_count, 1);
    }

    #[tokio::test]
    async fn test_arm_accumulates_across_completions() {
        let (storage, _dir) = test_storage().await;

        let employee = sample_employee("Ada");
        storage.create_employee(&employee).await.unwrap();

        let contexts = [
            ContextVector([0.1, 0.9, 0.5, 0.2, 1.0, 0.0, 0.3, 0.3]),
            ContextVector([0.8, 0.4, 0.5, 0.2, 0.6, 1.0, 0.1, 0.7]),
        ];
        let rewards = [1.7, -0.4];

        for (context, reward) in contexts.iter().zip(rewards) {
            let task = sample_task(employee.id);
            storage.create_task(&task).await.unwrap();

            let assignment =
                Assignment::new(task.id, employee.id, employee.id, *context, Utc::now());
            storage.record_assignment(&assignment).await.unwrap();

            let feedback = Feedback {
                id: FeedbackId::new(),
                task_id: task.id,
                employee_id: employee.id,
                r_completion: 1.0,
                r_ontime: 0.0,
                r_good_behaviour: 0.0,
                p_overdue: 0.0,
                p_rework: 0.0,
                p_failure: 0.0,
                raw_reward: reward,
                reward_value: reward,
                overdue_days: 0,
                context: *context,
                created_at: Utc::now(),
            };
            storage
                .record_completion(&feedback, Utc::now(), 1.0)
                .await
                .unwrap();
        }

        // Both observations survive: A = λI + Σxxᵀ, b = Σr·x
        let mut expected = ArmState::cold(employee.id, 1.0);
        for (context, reward) in contexts.iter().zip(rewards) {
            expected.observe(context, reward);
        }

        let arm = storage.load_arm(employee.id).await.unwrap().unwrap();
        assert_eq!(arm.update_count, 2);
        assert_eq!(arm.a, expected.a);
        assert_eq!(arm.b, expected.b);
    }

    #[tokio::test]
    async fn test_rework_counter() {
        let (storage, _dir) = test_storage().await;

        let employee = sample_employee("Ada");
        storage.create_employee(&employee).await.unwrap();
        let task = sample_task(employee.id);
        storage.create_task(&task).await.unwrap();

        // No open assignment yet
        let err = storage.increment_rework(task.id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotAssigned(_)));

        let assignment = Assignment::new(
            task.id,
            employee.id,
            employee.id,
            ContextVector::zeros(),
            Utc::now(),
        );
        storage.record_assignment(&assignment).await.unwrap();

        assert_eq!(storage.increment_rework(task.id).await.unwrap(), 1);
        assert_eq!(storage.increment_rework(task.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_embedding_cache_is_write_once() {
        let (storage, _dir) = test_storage().await;

        let now = Utc::now();
        let employee = Employee::new("Ada", vec![Skill::named("rust")], now);
        storage.create_employee(&employee).await.unwrap();

        storage
            .cache_employee_embeddings(employee.id, &[vec![1.0, 0.0]])
            .await
            .unwrap();
        let loaded = storage.get_employee(employee.id).await.unwrap();
        assert_eq!(loaded.skill_embeddings, vec![vec![1.0, 0.0]]);

        // A second write does not overwrite the existing cache
        storage
            .cache_employee_embeddings(employee.id, &[vec![0.0, 1.0]])
            .await
            .unwrap();
        let loaded = storage.get_employee(employee.id).await.unwrap();
        assert_eq!(loaded.skill_embeddings, vec![vec![1.0, 0.0]]);
    }

    #[tokio::test]
    async fn test_active_employee_listing() {
        let (storage, _dir) = test_storage().await;

        let mut active = sample_employee("Ada");
        active.active = true;
        let mut inactive = sample_employee("Bob");
        inactive.active = false;

        storage.create_employee(&active).await.unwrap();
        storage.create_employee(&inactive).await.unwrap();

        let pool = storage.active_employees().await.unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].id, active.id);
    }
}
