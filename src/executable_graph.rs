//! Immutable execution plan produced by [`crate::builder::GraphBuilder::build`].
//!
//! `ExecutableGraph` owns everything a [`crate::task_wrapper::TaskWrapper`]
//! and [`crate::executor::Executor`] need: the step objects, the data
//! objects, per-step predecessor counts, per-step successor lists, and the
//! authorization tokens that gate every data access. Once built it is never
//! mutated; all reads are safe to share across worker threads.

use crate::data::{Data, Token};
use crate::graph_core::{StepIdx, Usage};
use crate::step::Step;
use std::sync::Arc;

/// Execution plan for one validated graph.
pub struct ExecutableGraph {
    steps: Vec<Arc<dyn Step>>,
    data_objects: Vec<Arc<Data>>,
    predecessor_counts: Vec<usize>,
    successors: Vec<Vec<StepIdx>>,
    step_tokens: Vec<Token>,
    graph_token: Token,
    step_access_rights: Vec<Vec<(usize, Usage)>>,
}

impl ExecutableGraph {
    pub(crate) fn new(
        steps: Vec<Arc<dyn Step>>,
        data_objects: Vec<Arc<Data>>,
        predecessor_counts: Vec<usize>,
        successors: Vec<Vec<StepIdx>>,
        step_tokens: Vec<Token>,
        graph_token: Token,
        step_access_rights: Vec<Vec<(usize, Usage)>>,
    ) -> Self {
        Self {
            steps,
            data_objects,
            predecessor_counts,
            successors,
            step_tokens,
            graph_token,
            step_access_rights,
        }
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn data_count(&self) -> usize {
        self.data_objects.len()
    }

    pub fn step(&self, idx: StepIdx) -> &Arc<dyn Step> {
        &self.steps[idx]
    }

    pub fn data(&self, idx: usize) -> &Arc<Data> {
        &self.data_objects[idx]
    }

    pub(crate) fn successors(&self, idx: StepIdx) -> &[StepIdx] {
        &self.successors[idx]
    }

    pub(crate) fn predecessor_count(&self, idx: StepIdx) -> usize {
        self.predecessor_counts[idx]
    }

    pub fn step_token(&self, idx: StepIdx) -> Token {
        self.step_tokens[idx]
    }

    /// The distinct, step-less token reserved for host-initiated access
    /// (invariant I8), e.g. seeding initial inputs before `execute()` runs.
    pub fn graph_token(&self) -> Token {
        self.graph_token
    }

    pub fn access_rights(&self, idx: StepIdx) -> &[(usize, Usage)] {
        &self.step_access_rights[idx]
    }

    /// Indices of every step with a zero predecessor count: the seed set
    /// for an [`crate::executor::Executor`]'s ready queue.
    pub fn get_initial_ready_steps(&self) -> Vec<StepIdx> {
        (0..self.step_count())
            .filter(|&s| self.predecessor_counts[s] == 0)
            .collect()
    }

    /// Human-readable topological layering: steps that can run
    /// concurrently are grouped on the same line. Read-only introspection;
    /// it does not affect scheduling.
    pub fn execution_plan(&self) -> String {
        let n = self.step_count();
        let mut remaining: Vec<usize> = self.predecessor_counts.clone();
        let mut done = vec![false; n];
        let mut layers: Vec<Vec<StepIdx>> = Vec::new();
        let mut processed = 0;

        while processed < n {
            let layer: Vec<StepIdx> = (0..n)
                .filter(|&s| !done[s] && remaining[s] == 0)
                .collect();
            if layer.is_empty() {
                // Defensive: a validated graph is always acyclic, but don't
                // loop forever if called on a graph built from a corrupted
                // export.
                break;
            }
            for &s in &layer {
                done[s] = true;
            }
            for &s in &layer {
                for &succ in &self.successors[s] {
                    if remaining[succ] > 0 {
                        remaining[succ] -= 1;
                    }
                }
            }
            processed += layer.len();
            layers.push(layer);
        }

        layers
            .iter()
            .enumerate()
            .map(|(i, layer)| {
                let names: Vec<String> = layer
                    .iter()
                    .map(|&s| format!("{}:{}", s, self.steps[s].friendly_name()))
                    .collect();
                if layer.len() > 1 {
                    format!("Phase {}: {} (parallel)", i + 1, names.join(" ∥ "))
                } else {
                    format!("Phase {}: {}", i + 1, names[0])
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
