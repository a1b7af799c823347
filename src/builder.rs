//! Thin adaptor bridging user step/field objects to [`GraphCore`] indices.
//!
//! `GraphBuilder` is the crate's main entry point: callers register step
//! and field objects, link them, and call [`GraphBuilder::build`] to obtain
//! an [`ExecutableGraph`]. Object identity is expressed as the index
//! returned by `add_step`/`add_field` rather than by reference equality,
//! which sidesteps needing `Eq`/`Hash` bounds on arbitrary step/field types.

use crate::data::{Data, Token, TokenFactory};
use crate::error::{CrdDagError, Result};
use crate::executable_graph::ExecutableGraph;
use crate::graph_core::{FieldIdx, GraphCore, StepIdx, TrustLevel, TypeTag, Usage};
use crate::step::Step;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Accumulates steps and fields, delegating index bookkeeping to
/// [`GraphCore`], and produces an [`ExecutableGraph`] once the graph
/// validates.
pub struct GraphBuilder {
    core: GraphCore,
    steps: Vec<Arc<dyn Step>>,
}

impl GraphBuilder {
    pub fn new(eager_validation: bool) -> Self {
        Self {
            core: GraphCore::new(eager_validation),
            steps: Vec::new(),
        }
    }

    /// Registers a step and returns its index, to be used by later
    /// `add_field`/`link_steps` calls.
    pub fn add_step(&mut self, step: impl Step + 'static) -> Result<StepIdx> {
        let idx = self.steps.len();
        self.core.add_step(idx)?;
        debug!(step = idx, class = step.class_name(), "add_step");
        self.steps.push(Arc::new(step));
        Ok(idx)
    }

    /// Registers a field declaring `owning_step`'s intent to access a data
    /// object of type `T` with the given `usage`, and returns its index.
    pub fn add_field<T: 'static>(&mut self, owning_step: StepIdx, usage: Usage) -> Result<FieldIdx> {
        let idx = self.core.field_count();
        let field = self
            .core
            .add_field(owning_step, idx, TypeTag::of::<T>(), usage)?;
        debug!(field, owner = owning_step, ?usage, "add_field");
        Ok(field)
    }

    pub fn link_steps(&mut self, before: StepIdx, after: StepIdx, trust: TrustLevel) -> Result<()> {
        debug!(before, after, ?trust, "link_steps");
        self.core.link_steps(before, after, trust)
    }

    pub fn link_fields(&mut self, a: FieldIdx, b: FieldIdx, trust: TrustLevel) -> Result<()> {
        debug!(a, b, ?trust, "link_fields");
        self.core.link_fields(a, b, trust)
    }

    /// Direct access to the underlying [`GraphCore`], e.g. to call
    /// `get_diagnostics` before committing to `build()`.
    pub fn core(&self) -> &GraphCore {
        &self.core
    }

    /// Seals the graph: runs sealed diagnostics, exports the validated
    /// graph, assigns authorization tokens, and wires predecessor counts
    /// and successor lists for execution.
    pub fn build(self) -> Result<ExecutableGraph> {
        let exported = self.core.export_graph().map_err(|e| match e {
            CrdDagError::GraphValidationError { diagnostics } => {
                info!(
                    errors = diagnostics.errors().len(),
                    warnings = diagnostics.warnings().len(),
                    "graph failed sealed validation"
                );
                CrdDagError::GraphValidationError { diagnostics }
            }
            other => other,
        })?;

        let step_count = self.steps.len();
        let mut token_factory = TokenFactory::new();
        let step_tokens: Vec<Token> = (0..step_count).map(|_| token_factory.next_token()).collect();
        let graph_token = token_factory.next_token();

        let mut data_objects = Vec::with_capacity(exported.data_objects.len());
        let mut step_access_rights: Vec<Vec<(usize, Usage)>> = vec![Vec::new(); step_count];
        for (data_idx, info) in exported.data_infos.iter().enumerate() {
            let mut rights: HashMap<Token, Usage> = HashMap::new();
            for &(step, usage) in &info.access_rights {
                rights.insert(step_tokens[step], usage);
                step_access_rights[step].push((data_idx, usage));
            }
            data_objects.push(Arc::new(Data::new(data_idx, rights)));
        }

        // The combined explicit + implicit edge list is a multigraph
        // (design notes, open question); deduplicating here keeps
        // predecessor counts and successor fan-out minimal without
        // changing scheduling semantics, since Kahn's algorithm and the
        // task-wrapper notification protocol are indifferent to duplicate
        // edges beyond wasted work.
        let mut seen_edges: HashSet<(StepIdx, StepIdx)> = HashSet::new();
        let mut successors: Vec<Vec<StepIdx>> = vec![Vec::new(); step_count];
        let mut predecessor_counts = vec![0usize; step_count];
        for &(before, after) in &exported.step_links {
            if seen_edges.insert((before, after)) {
                successors[before].push(after);
                predecessor_counts[after] += 1;
            }
        }

        info!(
            steps = step_count,
            data_objects = data_objects.len(),
            edges = seen_edges.len(),
            "graph built"
        );

        Ok(ExecutableGraph::new(
            self.steps,
            data_objects,
            predecessor_counts,
            successors,
            step_tokens,
            graph_token,
            step_access_rights,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Noop;
    impl Step for Noop {
        fn execute(&self) -> std::result::Result<(), Box<dyn StdError + Send + Sync>> {
            Ok(())
        }
    }

    struct CountingStep(Arc<AtomicUsize>);
    impl Step for CountingStep {
        fn execute(&self) -> std::result::Result<(), Box<dyn StdError + Send + Sync>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn build_fails_with_diagnostics_on_sealed_errors() {
        let mut b = GraphBuilder::new(false);
        let s0 = b.add_step(Noop).unwrap();
        let s1 = b.add_step(Noop).unwrap();
        let f0 = b.add_field::<i32>(s0, Usage::Read).unwrap();
        let f1 = b.add_field::<i32>(s1, Usage::Destroy).unwrap();
        b.link_fields(f0, f1, TrustLevel::High).unwrap();

        match b.build() {
            Err(CrdDagError::GraphValidationError { diagnostics }) => {
                assert!(!diagnostics.is_valid());
            }
            other => panic!("expected GraphValidationError, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn linear_chain_builds_executable_graph() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut b = GraphBuilder::new(false);
        let s0 = b.add_step(CountingStep(counter.clone())).unwrap();
        let s1 = b.add_step(CountingStep(counter.clone())).unwrap();
        let s2 = b.add_step(CountingStep(counter.clone())).unwrap();
        let f0 = b.add_field::<i32>(s0, Usage::Create).unwrap();
        let f1 = b.add_field::<i32>(s1, Usage::Read).unwrap();
        let f2 = b.add_field::<i32>(s2, Usage::Destroy).unwrap();
        b.link_fields(f0, f1, TrustLevel::High).unwrap();
        b.link_fields(f1, f2, TrustLevel::High).unwrap();

        let graph = b.build().unwrap();
        assert_eq!(graph.step_count(), 3);
        assert_eq!(graph.data_count(), 1);
        assert_eq!(graph.get_initial_ready_steps(), vec![0]);
        assert_eq!(graph.predecessor_count(1), 1);
        assert_eq!(graph.predecessor_count(2), 1);
        assert_eq!(graph.successors(0), &[1]);
        assert!(graph.execution_plan().contains("Phase 1"));
    }
}
