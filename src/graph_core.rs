//! Append-only, index-based DAG builder.
//!
//! `GraphCore` tracks steps and fields purely as dense indices; it knows
//! nothing about the user-level objects a [`crate::builder::GraphBuilder`]
//! attaches to them. It owns the [`crate::union_find::IterableUnionFind`]
//! backing field equivalence classes, the explicit step-link list, and the
//! implicit edges usage ordering derives, and exposes the combined
//! successor adjacency both eager validation and the deferred
//! [`crate::diagnostics`] pipeline need.

use crate::error::{CrdDagError, Result};
use crate::union_find::IterableUnionFind;
use std::any::TypeId;
use std::collections::HashSet;

pub type StepIdx = usize;
pub type FieldIdx = usize;

/// The three recognized kinds of access a field declares to a data object.
///
/// Ordinal order (`Create < Read < Destroy`) is load-bearing: it drives
/// implicit edge derivation in [`GraphCore::link_fields`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Usage {
    Create,
    Read,
    Destroy,
}

/// Ordering hint attached to every link, used only for blame ordering in
/// diagnostics; it has no bearing on execution semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrustLevel {
    Low,
    Middle,
    High,
}

/// Opaque type identity attached to a field, compared for equality only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// An explicit ordering constraint between two steps, created via
/// [`GraphCore::link_steps`].
#[derive(Debug, Clone, Copy)]
pub struct StepLink {
    pub before: StepIdx,
    pub after: StepIdx,
    pub trust: TrustLevel,
}

/// A request to merge the equivalence classes of two fields, recorded
/// verbatim for blame-ordering purposes even though the classes themselves
/// are tracked by the union-find.
#[derive(Debug, Clone, Copy)]
pub struct FieldLink {
    pub a: FieldIdx,
    pub b: FieldIdx,
    pub trust: TrustLevel,
}

/// A step edge derived from two same-class fields with an ordered usage
/// pair (Create < Read < Destroy). Carries the field-link indices whose
/// merge caused it, for blame reporting.
#[derive(Debug, Clone)]
pub struct ImplicitEdge {
    pub before: StepIdx,
    pub after: StepIdx,
    pub trust: TrustLevel,
    pub causing_field_links: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
struct FieldRecord {
    owner: StepIdx,
    type_tag: TypeTag,
    usage: Usage,
}

/// Append-only builder over step/field indices.
pub struct GraphCore {
    eager_validation: bool,
    step_count: usize,
    /// Fields owned by each step, in the order they were added.
    step_fields: Vec<Vec<FieldIdx>>,
    fields: Vec<FieldRecord>,
    uf: IterableUnionFind,
    explicit_links: Vec<StepLink>,
    field_links: Vec<FieldLink>,
    implicit_edges: Vec<ImplicitEdge>,
    /// Combined explicit + implicit successor adjacency, used for
    /// reachability checks and exported verbatim at seal time.
    successors: Vec<Vec<StepIdx>>,
}

/// Two usages are incompatible for a single step to hold simultaneously on
/// aliased fields unless both are `Read`.
fn self_alias_incompatible(a: Usage, b: Usage) -> bool {
    !(a == Usage::Read && b == Usage::Read)
}

/// The step edge(s) a pair of usages within one class induce, per the
/// Create < Read < Destroy ordering. Returns `None` when no edge is
/// induced (two Reads): callers handle the Create/Create and
/// Destroy/Destroy "forbidden" cases as MultipleCreate/MultipleDestroy
/// separately, not as edges.
fn induced_edge(usage_a: Usage, usage_b: Usage) -> Option<(bool, bool)> {
    // Returns (a_before_b, b_before_a); at most one is true.
    use Usage::*;
    match (usage_a, usage_b) {
        (Create, Read) | (Create, Destroy) | (Read, Destroy) => Some((true, false)),
        (Read, Create) | (Destroy, Create) | (Destroy, Read) => Some((false, true)),
        _ => None,
    }
}

impl GraphCore {
    pub fn new(eager_validation: bool) -> Self {
        Self {
            eager_validation,
            step_count: 0,
            step_fields: Vec::new(),
            fields: Vec::new(),
            uf: IterableUnionFind::new(),
            explicit_links: Vec::new(),
            field_links: Vec::new(),
            implicit_edges: Vec::new(),
            successors: Vec::new(),
        }
    }

    pub fn eager_validation(&self) -> bool {
        self.eager_validation
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn add_step(&mut self, expected_index: StepIdx) -> Result<StepIdx> {
        if expected_index != self.step_count {
            return Err(CrdDagError::InvalidStepIndex {
                expected: self.step_count,
                actual: expected_index,
            });
        }
        self.step_count += 1;
        self.step_fields.push(Vec::new());
        self.successors.push(Vec::new());
        Ok(expected_index)
    }

    pub fn add_field(
        &mut self,
        owning_step: StepIdx,
        expected_index: FieldIdx,
        type_tag: TypeTag,
        usage: Usage,
    ) -> Result<FieldIdx> {
        if owning_step >= self.step_count {
            return Err(CrdDagError::InvalidFieldOwner {
                step: owning_step,
                step_count: self.step_count,
            });
        }
        if expected_index != self.fields.len() {
            return Err(CrdDagError::InvalidFieldIndex {
                expected: self.fields.len(),
                actual: expected_index,
            });
        }
        let idx = self.fields.len();
        self.fields.push(FieldRecord {
            owner: owning_step,
            type_tag,
            usage,
        });
        let uf_idx = self.uf.make_set()?;
        debug_assert_eq!(uf_idx, idx, "union-find index must track field index 1:1");
        self.step_fields[owning_step].push(idx);
        Ok(idx)
    }

    fn reachable(&self, from: StepIdx, target: StepIdx) -> bool {
        if from == target {
            return true;
        }
        let mut stack = vec![from];
        let mut seen = vec![false; self.step_count];
        seen[from] = true;
        while let Some(node) = stack.pop() {
            for &next in &self.successors[node] {
                if next == target {
                    return true;
                }
                if !seen[next] {
                    seen[next] = true;
                    stack.push(next);
                }
            }
        }
        false
    }

    pub fn link_steps(
        &mut self,
        before: StepIdx,
        after: StepIdx,
        trust: TrustLevel,
    ) -> Result<()> {
        if before == after {
            return Err(CrdDagError::CycleDetected {
                detail: format!("step {} cannot be linked to itself", before),
            });
        }
        if before >= self.step_count {
            return Err(CrdDagError::index_out_of_range(before, self.step_count));
        }
        if after >= self.step_count {
            return Err(CrdDagError::index_out_of_range(after, self.step_count));
        }

        if self.eager_validation && self.reachable(after, before) {
            return Err(CrdDagError::CycleDetected {
                detail: format!(
                    "explicit link {} -> {} would close a cycle (trust={:?})",
                    before, after, trust
                ),
            });
        }

        self.explicit_links.push(StepLink {
            before,
            after,
            trust,
        });
        self.successors[before].push(after);
        Ok(())
    }

    pub fn link_fields(&mut self, a: FieldIdx, b: FieldIdx, trust: TrustLevel) -> Result<()> {
        if a >= self.fields.len() {
            return Err(CrdDagError::index_out_of_range(a, self.fields.len()));
        }
        if b >= self.fields.len() {
            return Err(CrdDagError::index_out_of_range(b, self.fields.len()));
        }

        let tag_a = self.fields[a].type_tag;
        let tag_b = self.fields[b].type_tag;
        if tag_a != tag_b {
            return Err(CrdDagError::TypeMismatch {
                a,
                b,
                tag_a: tag_a.name(),
                tag_b: tag_b.name(),
            });
        }

        let root_a = self.uf.find(a)?;
        let root_b = self.uf.find(b)?;
        if root_a == root_b {
            // Already the same class: idempotent no-op.
            return Ok(());
        }

        let members_a = self.uf.get_class_members(root_a)?;
        let members_b = self.uf.get_class_members(root_b)?;

        // Checks 1-3 below only raise synchronously in eager mode; in
        // deferred mode the merge always proceeds and `get_diagnostics`
        // reports the same violations afterward. The candidate-edge
        // derivation itself is unconditional: the merged state always needs
        // the induced edges recorded so later diagnostics and reachability
        // checks see them.
        if self.eager_validation {
            // Check 1: at most one Create, at most one Destroy across the
            // union.
            let creates_a: Vec<FieldIdx> = members_a
                .iter()
                .copied()
                .filter(|&f| self.fields[f].usage == Usage::Create)
                .collect();
            let creates_b: Vec<FieldIdx> = members_b
                .iter()
                .copied()
                .filter(|&f| self.fields[f].usage == Usage::Create)
                .collect();
            if !creates_a.is_empty() && !creates_b.is_empty() {
                return Err(CrdDagError::MultipleCreate {
                    root: creates_a[0],
                    field: creates_b[0],
                });
            }
            let destroys_a: Vec<FieldIdx> = members_a
                .iter()
                .copied()
                .filter(|&f| self.fields[f].usage == Usage::Destroy)
                .collect();
            let destroys_b: Vec<FieldIdx> = members_b
                .iter()
                .copied()
                .filter(|&f| self.fields[f].usage == Usage::Destroy)
                .collect();
            if !destroys_a.is_empty() && !destroys_b.is_empty() {
                return Err(CrdDagError::MultipleDestroy {
                    root: destroys_a[0],
                    field: destroys_b[0],
                });
            }

            // Check 2: no step ends up owning two aliased fields with
            // incompatible usages.
            for &fa in &members_a {
                for &fb in &members_b {
                    if self.fields[fa].owner == self.fields[fb].owner
                        && self_alias_incompatible(self.fields[fa].usage, self.fields[fb].usage)
                    {
                        return Err(CrdDagError::UnsafeSelfAliasing {
                            step: self.fields[fa].owner,
                            field_a: fa,
                            field_b: fb,
                        });
                    }
                }
            }
        }

        // Derive candidate implicit edges from cross-class usage pairs.
        // Computed unconditionally; only eager mode rejects on cycle.
        let new_link_idx = self.field_links.len();
        let mut candidate_edges: Vec<(StepIdx, StepIdx)> = Vec::new();
        for &fa in &members_a {
            for &fb in &members_b {
                if let Some((a_before_b, b_before_a)) =
                    induced_edge(self.fields[fa].usage, self.fields[fb].usage)
                {
                    let (before, after) = if a_before_b {
                        (self.fields[fa].owner, self.fields[fb].owner)
                    } else {
                        debug_assert!(b_before_a);
                        (self.fields[fb].owner, self.fields[fa].owner)
                    };
                    if before != after {
                        candidate_edges.push((before, after));
                    }
                }
            }
        }

        if self.eager_validation {
            // Check 3: reject if any candidate edge would close a cycle,
            // either against the existing graph or amongst the new edges
            // themselves.
            for &(before, after) in &candidate_edges {
                if self.reachable(after, before) {
                    return Err(CrdDagError::CycleDetected {
                        detail: format!(
                            "linking fields {} and {} would induce edge {} -> {} and close a cycle",
                            a, b, before, after
                        ),
                    });
                }
            }
            let mut scratch = self.successors.clone();
            for &(before, after) in &candidate_edges {
                scratch[before].push(after);
                if Self::reachable_in(&scratch, after, before) {
                    return Err(CrdDagError::CycleDetected {
                        detail: format!(
                            "linking fields {} and {} would close a cycle via combined implicit edges",
                            a, b
                        ),
                    });
                }
            }
        }

        // All checks passed (or were deferred): commit.
        self.uf.unite(root_a, root_b)?;
        self.field_links.push(FieldLink { a, b, trust });
        for (before, after) in candidate_edges {
            self.implicit_edges.push(ImplicitEdge {
                before,
                after,
                trust,
                causing_field_links: vec![new_link_idx],
            });
            self.successors[before].push(after);
        }
        Ok(())
    }

    fn reachable_in(successors: &[Vec<StepIdx>], from: StepIdx, target: StepIdx) -> bool {
        if from == target {
            return true;
        }
        let mut stack = vec![from];
        let mut seen = vec![false; successors.len()];
        seen[from] = true;
        while let Some(node) = stack.pop() {
            for &next in &successors[node] {
                if next == target {
                    return true;
                }
                if !seen[next] {
                    seen[next] = true;
                    stack.push(next);
                }
            }
        }
        false
    }

    // --- Accessors used by the diagnostics and export layers. ---

    pub(crate) fn field_owner(&self, f: FieldIdx) -> StepIdx {
        self.fields[f].owner
    }

    pub(crate) fn field_usage(&self, f: FieldIdx) -> Usage {
        self.fields[f].usage
    }

    pub(crate) fn field_type_tag(&self, f: FieldIdx) -> TypeTag {
        self.fields[f].type_tag
    }

    pub(crate) fn step_fields(&self, s: StepIdx) -> &[FieldIdx] {
        &self.step_fields[s]
    }

    pub(crate) fn explicit_links(&self) -> &[StepLink] {
        &self.explicit_links
    }

    pub(crate) fn implicit_edges(&self) -> &[ImplicitEdge] {
        &self.implicit_edges
    }

    pub(crate) fn field_links(&self) -> &[FieldLink] {
        &self.field_links
    }

    pub(crate) fn successors(&self) -> &[Vec<StepIdx>] {
        &self.successors
    }

    /// Every field equivalence class, as a sorted-by-root list of member
    /// field indices. Uses `class_root` (no compression) so it never needs
    /// `&mut self`.
    pub(crate) fn classes(&self) -> Vec<Vec<FieldIdx>> {
        let mut seen_roots = HashSet::new();
        let mut out = Vec::new();
        for f in 0..self.fields.len() {
            let root = self.uf.class_root(f).expect("field index is always valid");
            if seen_roots.insert(root) {
                out.push(self.uf.get_class_members(root).expect("root is valid"));
            }
        }
        out
    }

    pub(crate) fn class_root(&self, f: FieldIdx) -> StepIdx {
        self.uf.class_root(f).expect("field index is always valid")
    }

    /// Runs the deferred validation pipeline against the current
    /// state. `treat_as_sealed` controls whether `MissingCreate` is a
    /// warning or an error; [`GraphCore::export_graph`] always calls this
    /// with `treat_as_sealed = true`.
    pub fn get_diagnostics(&self, treat_as_sealed: bool) -> crate::diagnostics::Diagnostics {
        crate::diagnostics::compute(self, treat_as_sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_linear() -> GraphCore {
        let mut core = GraphCore::new(false);
        core.add_step(0).unwrap();
        core.add_step(1).unwrap();
        core.add_step(2).unwrap();
        core.add_field(0, 0, TypeTag::of::<i32>(), Usage::Create)
            .unwrap();
        core.add_field(1, 1, TypeTag::of::<i32>(), Usage::Read)
            .unwrap();
        core.add_field(2, 2, TypeTag::of::<i32>(), Usage::Destroy)
            .unwrap();
        core
    }

    #[test]
    fn linking_fields_derives_implicit_edges() {
        let mut core = setup_linear();
        core.link_fields(0, 1, TrustLevel::High).unwrap();
        core.link_fields(1, 2, TrustLevel::High).unwrap();
        assert_eq!(core.implicit_edges().len(), 2);
        assert_eq!(core.classes().len(), 1);
    }

    #[test]
    fn duplicate_step_index_rejected() {
        let mut core = GraphCore::new(false);
        core.add_step(0).unwrap();
        assert!(matches!(
            core.add_step(0),
            Err(CrdDagError::InvalidStepIndex {
                expected: 1,
                actual: 0
            })
        ));
    }

    #[test]
    fn self_loop_rejected() {
        let mut core = GraphCore::new(false);
        core.add_step(0).unwrap();
        assert!(matches!(
            core.link_steps(0, 0, TrustLevel::Low),
            Err(CrdDagError::CycleDetected { .. })
        ));
    }

    #[test]
    fn eager_mode_rejects_explicit_two_cycle() {
        let mut core = GraphCore::new(true);
        core.add_step(0).unwrap();
        core.add_step(1).unwrap();
        core.link_steps(0, 1, TrustLevel::Middle).unwrap();
        assert!(matches!(
            core.link_steps(1, 0, TrustLevel::Middle),
            Err(CrdDagError::CycleDetected { .. })
        ));
    }

    #[test]
    fn eager_mode_rejects_implicit_cycle() {
        let mut core = GraphCore::new(true);
        core.add_step(0).unwrap();
        core.add_step(1).unwrap();
        core.add_field(0, 0, TypeTag::of::<i32>(), Usage::Create)
            .unwrap();
        core.add_field(1, 1, TypeTag::of::<i32>(), Usage::Destroy)
            .unwrap();
        core.link_steps(1, 0, TrustLevel::Low).unwrap();
        let err = core.link_fields(0, 1, TrustLevel::High).unwrap_err();
        assert!(matches!(err, CrdDagError::CycleDetected { .. }));
    }

    #[test]
    fn type_mismatch_rejected_before_any_mutation() {
        let mut core = GraphCore::new(false);
        core.add_step(0).unwrap();
        core.add_step(1).unwrap();
        core.add_field(0, 0, TypeTag::of::<i32>(), Usage::Create)
            .unwrap();
        core.add_field(1, 1, TypeTag::of::<String>(), Usage::Read)
            .unwrap();
        assert!(matches!(
            core.link_fields(0, 1, TrustLevel::Low),
            Err(CrdDagError::TypeMismatch { .. })
        ));
        assert_eq!(core.classes().len(), 2);
    }

    #[test]
    fn multiple_create_rejected_eager() {
        let mut core = GraphCore::new(true);
        core.add_step(0).unwrap();
        core.add_step(1).unwrap();
        core.add_field(0, 0, TypeTag::of::<i32>(), Usage::Create)
            .unwrap();
        core.add_field(1, 1, TypeTag::of::<i32>(), Usage::Create)
            .unwrap();
        assert!(matches!(
            core.link_fields(0, 1, TrustLevel::Low),
            Err(CrdDagError::MultipleCreate { .. })
        ));
    }

    #[test]
    fn multiple_create_deferred_non_eager() {
        // Non-eager mode must not reject at mutation time; the merge
        // proceeds and the violation surfaces only via get_diagnostics
        // (scenario S5).
        let mut core = GraphCore::new(false);
        core.add_step(0).unwrap();
        core.add_step(1).unwrap();
        core.add_field(0, 0, TypeTag::of::<i32>(), Usage::Create)
            .unwrap();
        core.add_field(1, 1, TypeTag::of::<i32>(), Usage::Create)
            .unwrap();
        assert!(core.link_fields(0, 1, TrustLevel::Low).is_ok());
        assert_eq!(core.classes().len(), 1);
    }

    #[test]
    fn self_aliasing_mixed_usage_rejected_eager() {
        let mut core = GraphCore::new(true);
        core.add_step(0).unwrap();
        core.add_field(0, 0, TypeTag::of::<i32>(), Usage::Create)
            .unwrap();
        core.add_field(0, 1, TypeTag::of::<i32>(), Usage::Read)
            .unwrap();
        assert!(matches!(
            core.link_fields(0, 1, TrustLevel::Low),
            Err(CrdDagError::UnsafeSelfAliasing { .. })
        ));
    }

    #[test]
    fn self_aliasing_mixed_usage_deferred_non_eager() {
        let mut core = GraphCore::new(false);
        core.add_step(0).unwrap();
        core.add_field(0, 0, TypeTag::of::<i32>(), Usage::Create)
            .unwrap();
        core.add_field(0, 1, TypeTag::of::<i32>(), Usage::Read)
            .unwrap();
        assert!(core.link_fields(0, 1, TrustLevel::Low).is_ok());
    }

    #[test]
    fn self_aliasing_double_read_permitted() {
        let mut core = GraphCore::new(false);
        core.add_step(0).unwrap();
        core.add_field(0, 0, TypeTag::of::<i32>(), Usage::Read)
            .unwrap();
        core.add_field(0, 1, TypeTag::of::<i32>(), Usage::Read)
            .unwrap();
        assert!(core.link_fields(0, 1, TrustLevel::Low).is_ok());
    }

    #[test]
    fn linking_same_class_twice_is_idempotent() {
        let mut core = setup_linear();
        core.link_fields(0, 1, TrustLevel::High).unwrap();
        let edges_before = core.implicit_edges().len();
        core.link_fields(0, 1, TrustLevel::High).unwrap();
        assert_eq!(core.implicit_edges().len(), edges_before);
    }
}
