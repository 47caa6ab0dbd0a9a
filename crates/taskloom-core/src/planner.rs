// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Parallel execution planner: task prioritization and dependency grouping.
//!
//! Task matching against agent presets lives in `taskloom_runtime::recommend_agent`
//! (it shares the frontmatter-backed preset registry, so it travels with
//! preset discovery). This module covers the other half: prioritizing a task
//! list and grouping it into parallel-safe waves for the Engine to drive one
//! group at a time.

use std::collections::{HashMap, HashSet};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use tracing::warn;

use taskloom_runtime::{recommend_agent, AgentPreset};

/// One unit of work submitted to the Planner.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    pub id: u64,
    pub description: String,
    pub priority: u8,
    /// IDs of tasks that must complete before this one can run.
    pub dependencies: Vec<u64>,
}

/// One execution wave.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskGroup {
    pub tasks: Vec<Task>,
    /// `true` when the group's tasks have no dependency relationship between
    /// each other and can be dispatched to the Engine concurrently.
    pub can_run_in_parallel: bool,
}

/// Full plan returned by [`generate_execution_plan`].
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionPlan {
    pub groups: Vec<TaskGroup>,
    pub total_agents: usize,
    pub agent_utilization: HashMap<String, usize>,
}

/// Stable sort by `(-priority, +|dependencies|, original-index)`.
///
/// The third key falls out for free: Rust's `sort_by` is stable, so tasks
/// tied on the first two keys keep their relative input order.
#[must_use]
pub fn prioritize_tasks(tasks: &[Task]) -> Vec<Task> {
    let mut sorted: Vec<Task> = tasks.to_vec();
    sorted.sort_by_key(|t| (std::cmp::Reverse(t.priority), t.dependencies.len()));
    sorted
}

/// `true` iff the dependency graph over `tasks` contains a cycle.
///
/// Built as a `petgraph::DiGraph` purely for adjacency bookkeeping and
/// Tarjan-based cycle detection; the layering logic in
/// [`group_for_parallel_execution`] stays hand-written Kahn's-algorithm so
/// its grouping/`can_run_in_parallel` rules remain directly testable.
fn detect_cycle(tasks: &[Task]) -> bool {
    let known: HashSet<u64> = tasks.iter().map(|t| t.id).collect();
    let mut graph: DiGraph<u64, ()> = DiGraph::new();
    let mut nodes: HashMap<u64, petgraph::graph::NodeIndex> = HashMap::new();
    for t in tasks {
        nodes.insert(t.id, graph.add_node(t.id));
    }
    for t in tasks {
        for dep in &t.dependencies {
            if known.contains(dep) {
                graph.add_edge(nodes[dep], nodes[&t.id], ());
            }
        }
    }
    is_cyclic_directed(&graph)
}

/// Kahn-style layering: a task joins the next layer once every dependency it
/// has (that is itself part of `tasks`) is already in some earlier layer.
///
/// A cycle (no progress possible on a non-empty remainder) is broken by
/// emitting the remaining tasks one per sequential group, in prioritized
/// order, and logging a diagnostic — every task still appears in exactly
/// one group, and the function always terminates.
#[must_use]
pub fn group_for_parallel_execution(tasks: &[Task]) -> Vec<TaskGroup> {
    if tasks.is_empty() {
        return Vec::new();
    }

    if detect_cycle(tasks) {
        warn!("dependency cycle detected in task graph; falling back to sequential groups for the affected tasks");
    }

    let prioritized = prioritize_tasks(tasks);
    let known: HashSet<u64> = prioritized.iter().map(|t| t.id).collect();
    let mut remaining: Vec<Task> = prioritized;
    let mut satisfied: HashSet<u64> = HashSet::new();
    let mut groups: Vec<TaskGroup> = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<Task>, Vec<Task>) = remaining.into_iter().partition(|t| {
            t.dependencies.iter().all(|d| !known.contains(d) || satisfied.contains(d))
        });

        if ready.is_empty() {
            // Cycle (or a dangling mutual wait): break it by draining the
            // blocked set one task per group, in their already-prioritized
            // order, instead of looping forever.
            warn!(
                remaining = blocked.len(),
                "dependency cycle detected while grouping tasks for parallel execution; \
                 emitting remaining tasks sequentially"
            );
            for t in blocked {
                satisfied.insert(t.id);
                groups.push(TaskGroup { tasks: vec![t], can_run_in_parallel: false });
            }
            break;
        }

        for t in &ready {
            satisfied.insert(t.id);
        }
        let can_run_in_parallel = ready.len() > 1;
        groups.push(TaskGroup { tasks: ready, can_run_in_parallel });
        remaining = blocked;
    }

    debug_assert_eq!(
        groups.iter().map(|g| g.tasks.len()).sum::<usize>(),
        known.len(),
        "every task must appear in exactly one group, cycle or not"
    );
    groups
}

/// Build the full plan: grouping plus per-preset agent utilization counts.
#[must_use]
pub fn generate_execution_plan(tasks: &[Task], presets: &[AgentPreset]) -> ExecutionPlan {
    let groups = group_for_parallel_execution(tasks);

    let mut agent_utilization: HashMap<String, usize> = HashMap::new();
    let mut total_agents = 0usize;
    for group in &groups {
        for task in &group.tasks {
            let m = recommend_agent(&task.description, presets);
            *agent_utilization.entry(m.agent_name).or_insert(0) += 1;
            total_agents += 1;
        }
    }

    ExecutionPlan { groups, total_agents, agent_utilization }
}
