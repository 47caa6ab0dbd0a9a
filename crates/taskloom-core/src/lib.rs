// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod compact;
mod decompose;
mod engine;
mod planner;
mod session;
mod session_store;

pub use compact::{
    compact_session, compact_session_with_strategy, emergency_compact, smart_truncate,
};
pub use decompose::{decompose, is_complex, priority};
pub use engine::{CompletionReason, EngineEvent, ExecutionEngine, ExecutionOptions, ExecutionOutcome};
pub use planner::{generate_execution_plan, group_for_parallel_execution, prioritize_tasks, ExecutionPlan, Task, TaskGroup};
pub use session::{Session, TurnRecord};
pub use session_store::{ChatMessage, ChatRole, PersistedSession, SessionMetadata, SessionStore};
