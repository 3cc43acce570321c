//! Core data types for the Lachesis assignment engine
//!
//! This module defines the fundamental data structures used throughout the
//! engine: employees, tasks, assignments, feedback rows, and the context
//! vector consumed by the contextual bandit.

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dimension of the context vector fed to the bandit.
///
/// Distinct from the skill-embedding dimension (configurable, typically
/// 1536): the context vector is always eight hand-crafted features.
pub const CONTEXT_DIM: usize = 8;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse an identifier from a string
            pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Unique identifier for employees
    ///
    /// Wraps a UUID to provide type safety and prevent mixing employee IDs
    /// with other UUID-based identifiers. An employee ID doubles as the
    /// bandit arm identifier.
    EmployeeId
);

id_type!(
    /// Unique identifier for tasks
    TaskId
);

id_type!(
    /// Unique identifier for assignment records
    AssignmentId
);

id_type!(
    /// Unique identifier for feedback rows
    FeedbackId
);

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Review,
    Done,
}

impl TaskStatus {
    /// Stable string form used in persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
        }
    }

    /// Parse the persisted string form
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "review" => Ok(TaskStatus::Review),
            "done" => Ok(TaskStatus::Done),
            other => Err(EngineError::InvariantViolated(format!(
                "unknown task status: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named skill with optional per-skill history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    /// Skill name, e.g. "rust" or "database design"
    pub name: String,

    /// Months of hands-on experience with this skill
    #[serde(default)]
    pub experience_months: Option<u32>,

    /// Months since the skill was first used at this organization
    #[serde(default)]
    pub tenure_months: Option<u32>,
}

impl Skill {
    /// Convenience constructor for a bare skill name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            experience_months: None,
            tenure_months: None,
        }
    }
}

/// An employee eligible to receive task assignments
///
/// The cached `skill_embeddings` list is parallel to `skills`: one unit
/// vector per skill. The cache is authoritative for similarity scoring and
/// is only regenerated when the skill list changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    /// Unique identifier (also the bandit arm id)
    pub id: EmployeeId,

    /// Display name
    pub name: String,

    /// Ordered skill list
    pub skills: Vec<Skill>,

    /// Cached per-skill unit embeddings (not serialized to JSON, stored separately)
    #[serde(skip)]
    pub skill_embeddings: Vec<Vec<f32>>,

    /// Productivity score in [0, 1]
    pub productivity_score: f64,

    /// Count of currently open assignments
    pub workload: u32,

    /// Whether the employee is in the candidate pool
    pub active: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Employee {
    /// Create a new active employee with an empty embedding cache
    pub fn new(name: impl Into<String>, skills: Vec<Skill>, now: DateTime<Utc>) -> Self {
        Self {
            id: EmployeeId::new(),
            name: name.into(),
            skills,
            skill_embeddings: Vec::new(),
            productivity_score: 0.0,
            workload: 0,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Skill names in list order, for embedding generation
    pub fn skill_names(&self) -> Vec<&str> {
        self.skills.iter().map(|s| s.name.as_str()).collect()
    }
}

/// A unit of work to be assigned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,

    /// Short title (opaque to the engine)
    pub title: String,

    /// Longer description (opaque to the engine)
    pub description: String,

    /// Priority 1-5, higher is more urgent
    pub priority: u8,

    /// Difficulty 1-10
    pub difficulty: u8,

    /// Names of the skills this task requires
    pub required_skills: Vec<String>,

    /// Cached per-skill unit embeddings, parallel to `required_skills`
    #[serde(skip)]
    pub skill_embeddings: Vec<Vec<f32>>,

    /// Lifecycle status
    pub status: TaskStatus,

    /// Who created the task
    pub creator_id: EmployeeId,

    /// Current assignee, if any
    pub assignee_id: Option<EmployeeId>,

    /// Optional due date
    pub due_date: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new unassigned task in `todo` status
    pub fn new(
        title: impl Into<String>,
        priority: u8,
        difficulty: u8,
        required_skills: Vec<String>,
        creator_id: EmployeeId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            title: title.into(),
            description: String::new(),
            priority,
            difficulty,
            required_skills,
            skill_embeddings: Vec::new(),
            status: TaskStatus::Todo,
            creator_id,
            assignee_id: None,
            due_date: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The 8-dimensional feature vector characterizing a (task, employee) pair
/// at decision time
///
/// Once written with an assignment the vector is immutable; learning always
/// reads it back from storage rather than recomputing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextVector(pub [f64; CONTEXT_DIM]);

impl ContextVector {
    /// Zero vector
    pub fn zeros() -> Self {
        Self([0.0; CONTEXT_DIM])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Serialize to little-endian bytes for blob storage
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize from little-endian bytes
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CONTEXT_DIM * 8 {
            return Err(EngineError::InvariantViolated(format!(
                "context vector blob has {} bytes, expected {}",
                bytes.len(),
                CONTEXT_DIM * 8
            )));
        }

        let mut values = [0.0; CONTEXT_DIM];
        for (i, chunk) in bytes.chunks_exact(8).enumerate() {
            let arr: [u8; 8] = chunk.try_into().unwrap();
            values[i] = f64::from_le_bytes(arr);
        }
        Ok(Self(values))
    }
}

/// The binding of a task to an employee, with the context captured at
/// selection time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    /// Unique identifier
    pub id: AssignmentId,

    /// The assigned task
    pub task_id: TaskId,

    /// The employee the task was assigned to
    pub employee_id: EmployeeId,

    /// Who triggered the assignment
    pub assigner_id: EmployeeId,

    /// Context vector the bandit consumed to select this arm
    pub context: ContextVector,

    /// Times the task was sent back for rework while open
    pub rework_count: u32,

    /// When the assignment was made
    pub assigned_at: DateTime<Utc>,

    /// When the task was completed; the record is immutable once set
    pub completed_at: Option<DateTime<Utc>>,
}

impl Assignment {
    /// Create a new open assignment
    pub fn new(
        task_id: TaskId,
        employee_id: EmployeeId,
        assigner_id: EmployeeId,
        context: ContextVector,
        assigned_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AssignmentId::new(),
            task_id,
            employee_id,
            assigner_id,
            context,
            rework_count: 0,
            assigned_at,
            completed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.completed_at.is_none()
    }
}

/// Structured feedback derived from a completed task
///
/// Exactly one row exists per completed task; the context vector is a
/// byte-for-byte copy of the assignment's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    /// Unique identifier
    pub id: FeedbackId,

    /// The completed task (unique)
    pub task_id: TaskId,

    /// The employee who completed it
    pub employee_id: EmployeeId,

    /// +1.0 for completion
    pub r_completion: f64,

    /// +0.5 when completed on or before the due date
    pub r_ontime: f64,

    /// +0.2 when completed within the expected days for its difficulty
    pub r_good_behaviour: f64,

    /// -0.4 per overdue day, capped at 7 days
    pub p_overdue: f64,

    /// -0.5 per rework round
    pub p_rework: f64,

    /// -1.2 when the task was force-closed rather than completed
    pub p_failure: f64,

    /// Component sum before clipping
    pub raw_reward: f64,

    /// Reward clipped to the configured bounds
    pub reward_value: f64,

    /// Whole days past the due date at completion
    pub overdue_days: i64,

    /// Context vector copied from the assignment
    pub context: ContextVector,

    /// When the feedback was recorded
    pub created_at: DateTime<Utc>,
}

/// One entry of a non-mutating recommendation preview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    /// Recommended employee
    pub employee_id: EmployeeId,

    /// UCB score the bandit would act on
    pub score: f64,

    /// Context vector the score was computed from
    pub context: ContextVector,
}
