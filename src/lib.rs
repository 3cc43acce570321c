//! Lachesis - Adaptive Task Assignment Engine
//!
//! A Rust engine that assigns work items to people and learns from observed
//! outcomes which people are good matches for which tasks:
//! - Two-stage recommender: semantic skill similarity filter, then a
//!   disjoint LinUCB contextual bandit over 8-dimensional contexts
//! - Derived rewards: bounded scalars computed from completion facts alone,
//!   no user ratings required
//! - Transactional learning: the feedback row, assignment closure, and
//!   per-arm ridge update commit together or not at all
//!
//! # Architecture
//!
//! The system is organized into several layers:
//! - **Types**: Core data structures (Employee, Task, Assignment, Feedback)
//! - **Recommender**: Similarity filter, feature extraction, LinUCB bandit
//! - **Storage**: SQLite persistence behind an async trait
//! - **Engine**: The assign/complete/recommend orchestration surface
//!
//! Authentication, transport, UI, and catalog management are external
//! collaborators; the engine consumes a storage backend, an embedding
//! provider, and a clock.
//!
//! # Example
//!
//! ```ignore
//! use lachesis::{AssignMode, AssignmentEngine, EngineConfig};
//! use lachesis::clock::SystemClock;
//! use lachesis::embeddings::RemoteEmbeddingProvider;
//! use lachesis::storage::sqlite::SqliteStorage;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EngineConfig::from_env()?;
//!     let storage = Arc::new(SqliteStorage::new("sqlite://lachesis.db").await?);
//!     storage.run_migrations().await?;
//!
//!     let provider = Arc::new(RemoteEmbeddingProvider::new(config.embedding.clone())?);
//!     let engine = AssignmentEngine::new(storage, provider, Arc::new(SystemClock), config)?;
//!
//!     // Let the recommender pick an assignee
//!     let assignment = engine.assign_task(task_id, AssignMode::Auto).await?;
//!
//!     // Later, on completion, the bandit learns from the derived reward
//!     let feedback = engine.complete_task(task_id).await?;
//!     println!("reward: {}", feedback.reward_value);
//!
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod recommender;
pub mod rewards;
pub mod storage;
pub mod types;

pub use config::{EmbeddingConfig, EngineConfig};
pub use engine::{AssignMode, AssignmentEngine};
pub use error::{EngineError, Result};
pub use types::{
    Assignment, AssignmentId, ContextVector, Employee, EmployeeId, Feedback, FeedbackId,
    Recommendation, Skill, Task, TaskId, TaskStatus, CONTEXT_DIM,
};
