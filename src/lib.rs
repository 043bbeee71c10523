//! # taskboard
//!
//! Task tracking with ordered subtasks.
//!
//! This library provides:
//! - A pure completion engine that locks subtasks until their predecessors
//!   are done and derives a task's status from its subtasks
//! - Pluggable task stores (memory, SQLite, Supabase) with a change feed
//! - A board service and HTTP API on top of both
//!
//! ## Architecture
//!
//! ```text
//!   HTTP API ──► TaskBoard ──► completion engine (pure)
//!                    │
//!                    ▼
//!               TaskStore ──► ChangeFeed ──► SSE stream
//! ```
//!
//! ## Toggle Flow
//! 1. Fetch the task and its subtasks from the store
//! 2. Run the engine on that snapshot
//! 3. Persist the subtask status and the derived task status
//! 4. Re-fetch and return the stored state
//!
//! ## Modules
//! - `task`: Task and subtask types and the completion engine
//! - `board`: Use cases wiring the engine to a store
//! - `api`: HTTP routes and task stores

pub mod api;
pub mod board;
pub mod config;
pub mod task;

pub use board::{BoardError, TaskBoard};
pub use config::Config;
