//! Deferred validation: usage-constraint checks over field equivalence
//! classes, precise cycle reporting, and orphan/unused-data hints.
//!
//! [`compute`] is the single entry point the rest of the crate uses
//! ([`crate::graph_core::GraphCore::get_diagnostics`],
//! [`crate::builder::GraphBuilder::build`]); it always recomputes from
//! scratch so that eager and deferred validation modes agree on the final
//! diagnostic set (property P4 in the design notes).

use crate::graph_core::{FieldIdx, GraphCore, StepIdx, TrustLevel, Usage};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Cycle,
    MultipleCreate,
    MultipleDestroy,
    UnsafeSelfAliasing,
    TypeMismatch,
    MissingCreate,
    OrphanStep,
    UnusedData,
    InternalError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Error,
}

/// One finding from the deferred validation pass.
#[derive(Debug, Clone)]
pub struct DiagnosticItem {
    pub category: Category,
    pub severity: Severity,
    pub message: String,
    pub involved_steps: BTreeSet<StepIdx>,
    pub involved_fields: BTreeSet<FieldIdx>,
    /// Explicit step-link indices implicated, ordered by ascending trust.
    pub blamed_step_links: Vec<usize>,
    /// Field-link indices implicated, ordered by ascending trust.
    pub blamed_field_links: Vec<usize>,
}

/// The full report produced by [`compute`].
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    items: Vec<DiagnosticItem>,
}

impl Diagnostics {
    pub fn errors(&self) -> Vec<&DiagnosticItem> {
        self.items
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&DiagnosticItem> {
        self.items
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .collect()
    }

    /// Errors first, then warnings.
    pub fn all_items(&self) -> Vec<&DiagnosticItem> {
        let mut items: Vec<&DiagnosticItem> = self.items.iter().collect();
        items.sort_by_key(|i| match i.severity {
            Severity::Error => 0,
            Severity::Warning => 1,
        });
        items
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.items.iter().any(|i| i.severity == Severity::Warning)
    }

    pub fn is_valid(&self) -> bool {
        !self.has_errors()
    }
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.items.is_empty() {
            return write!(f, "diagnostics: clean");
        }
        writeln!(
            f,
            "diagnostics: {} error(s), {} warning(s)",
            self.errors().len(),
            self.warnings().len()
        )?;
        for item in self.all_items() {
            writeln!(
                f,
                "  [{:?}/{:?}] {} (steps={:?}, fields={:?})",
                item.severity, item.category, item.message, item.involved_steps, item.involved_fields
            )?;
        }
        Ok(())
    }
}

/// Runs the full deferred validation pipeline against the current state of
/// `core`. `treat_as_sealed` controls the severity of `MissingCreate`: a
/// warning when `false`, an error when `true`.
pub fn compute(core: &GraphCore, treat_as_sealed: bool) -> Diagnostics {
    let mut items = Vec::new();

    usage_constraint_diagnostics(core, treat_as_sealed, &mut items);
    orphan_step_diagnostics(core, &mut items);
    cycle_diagnostics(core, &mut items);

    Diagnostics { items }
}

fn self_alias_incompatible(a: Usage, b: Usage) -> bool {
    !(a == Usage::Read && b == Usage::Read)
}

/// Every recorded field link whose both endpoints fall inside `members`,
/// ordered by ascending trust (Low first). Used to blame the `link_fields`
/// calls that produced a usage-constraint violation within one class.
fn class_field_link_blame(core: &GraphCore, members: &BTreeSet<FieldIdx>) -> Vec<usize> {
    let mut blamed: Vec<(usize, TrustLevel)> = core
        .field_links()
        .iter()
        .enumerate()
        .filter(|(_, link)| members.contains(&link.a) && members.contains(&link.b))
        .map(|(idx, link)| (idx, link.trust))
        .collect();
    blamed.sort_by_key(|&(_, t)| trust_rank(t));
    blamed.into_iter().map(|(idx, _)| idx).collect()
}

fn usage_constraint_diagnostics(
    core: &GraphCore,
    treat_as_sealed: bool,
    items: &mut Vec<DiagnosticItem>,
) {
    for class in core.classes() {
        let creates: Vec<FieldIdx> = class
            .iter()
            .copied()
            .filter(|&f| core.field_usage(f) == Usage::Create)
            .collect();
        let reads: Vec<FieldIdx> = class
            .iter()
            .copied()
            .filter(|&f| core.field_usage(f) == Usage::Read)
            .collect();
        let destroys: Vec<FieldIdx> = class
            .iter()
            .copied()
            .filter(|&f| core.field_usage(f) == Usage::Destroy)
            .collect();

        let class_members: BTreeSet<FieldIdx> = class.iter().copied().collect();

        if creates.len() > 1 {
            items.push(DiagnosticItem {
                category: Category::MultipleCreate,
                severity: Severity::Error,
                message: format!(
                    "data class has {} Create fields: {:?}",
                    creates.len(),
                    creates
                ),
                involved_steps: creates.iter().map(|&f| core.field_owner(f)).collect(),
                involved_fields: creates.iter().copied().collect(),
                blamed_step_links: Vec::new(),
                blamed_field_links: class_field_link_blame(core, &class_members),
            });
        }

        if destroys.len() > 1 {
            items.push(DiagnosticItem {
                category: Category::MultipleDestroy,
                severity: Severity::Error,
                message: format!(
                    "data class has {} Destroy fields: {:?}",
                    destroys.len(),
                    destroys
                ),
                involved_steps: destroys.iter().map(|&f| core.field_owner(f)).collect(),
                involved_fields: destroys.iter().copied().collect(),
                blamed_step_links: Vec::new(),
                blamed_field_links: class_field_link_blame(core, &class_members),
            });
        }

        // Self-aliasing: any step owning two fields in this class with
        // incompatible usages.
        let mut by_step: std::collections::HashMap<StepIdx, Vec<FieldIdx>> =
            std::collections::HashMap::new();
        for &f in &class {
            by_step.entry(core.field_owner(f)).or_default().push(f);
        }
        for (step, owned) in &by_step {
            for i in 0..owned.len() {
                for j in (i + 1)..owned.len() {
                    let ua = core.field_usage(owned[i]);
                    let ub = core.field_usage(owned[j]);
                    if self_alias_incompatible(ua, ub) {
                        items.push(DiagnosticItem {
                            category: Category::UnsafeSelfAliasing,
                            severity: Severity::Error,
                            message: format!(
                                "step {} owns aliased fields {} and {} with incompatible usages",
                                step, owned[i], owned[j]
                            ),
                            involved_steps: BTreeSet::from([*step]),
                            involved_fields: BTreeSet::from([owned[i], owned[j]]),
                            blamed_step_links: Vec::new(),
                            blamed_field_links: Vec::new(),
                        });
                    }
                }
            }
        }

        if creates.is_empty() && (!reads.is_empty() || !destroys.is_empty()) {
            let severity = if treat_as_sealed {
                Severity::Error
            } else {
                Severity::Warning
            };
            let mut involved_fields: BTreeSet<FieldIdx> = reads.iter().copied().collect();
            involved_fields.extend(destroys.iter().copied());
            items.push(DiagnosticItem {
                category: Category::MissingCreate,
                severity,
                message: "data class has Read/Destroy fields but no Create".to_string(),
                involved_steps: involved_fields.iter().map(|&f| core.field_owner(f)).collect(),
                involved_fields,
                blamed_step_links: Vec::new(),
                blamed_field_links: Vec::new(),
            });
        }

        if !creates.is_empty() && reads.is_empty() && destroys.is_empty() {
            items.push(DiagnosticItem {
                category: Category::UnusedData,
                severity: Severity::Warning,
                message: "data class is created but never read or destroyed".to_string(),
                involved_steps: creates.iter().map(|&f| core.field_owner(f)).collect(),
                involved_fields: creates.iter().copied().collect(),
                blamed_step_links: Vec::new(),
                blamed_field_links: Vec::new(),
            });
        }
    }
}

fn orphan_step_diagnostics(core: &GraphCore, items: &mut Vec<DiagnosticItem>) {
    let mut touched_by_explicit_link = vec![false; core.step_count()];
    for link in core.explicit_links() {
        touched_by_explicit_link[link.before] = true;
        touched_by_explicit_link[link.after] = true;
    }

    for s in 0..core.step_count() {
        if core.step_fields(s).is_empty() && !touched_by_explicit_link[s] {
            items.push(DiagnosticItem {
                category: Category::OrphanStep,
                severity: Severity::Warning,
                message: format!("step {} has no fields and no explicit links", s),
                involved_steps: BTreeSet::from([s]),
                involved_fields: BTreeSet::new(),
                blamed_step_links: Vec::new(),
                blamed_field_links: Vec::new(),
            });
        }
    }
}

/// Runs Kahn's algorithm on the combined explicit + implicit step graph.
/// Returns `Some(residual_in_degree)` if a cycle exists (entries for
/// vertices still unprocessed are left non-zero), `None` if the graph is
/// acyclic.
fn kahn_residual(core: &GraphCore) -> Option<Vec<usize>> {
    let n = core.step_count();
    let mut in_degree = vec![0usize; n];
    for link in core.explicit_links() {
        in_degree[link.after] += 1;
    }
    for edge in core.implicit_edges() {
        in_degree[edge.after] += 1;
    }

    let mut queue: std::collections::VecDeque<StepIdx> = (0..n)
        .filter(|&s| in_degree[s] == 0)
        .collect();
    let mut processed = 0;
    let mut residual = in_degree.clone();
    while let Some(node) = queue.pop_front() {
        processed += 1;
        for &next in &core.successors()[node] {
            residual[next] -= 1;
            if residual[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if processed == n {
        None
    } else {
        Some(residual)
    }
}

/// Iterative Tarjan SCC restricted to the vertices in `subgraph`.
fn tarjan_scc(n: usize, successors: &[Vec<StepIdx>], subgraph: &[bool]) -> Vec<Vec<StepIdx>> {
    let mut index_counter = 0usize;
    let mut indices = vec![None; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut sccs = Vec::new();

    // Work-list based iterative Tarjan: each frame tracks the node and an
    // iteration cursor into its adjacency list.
    for start in 0..n {
        if !subgraph[start] || indices[start].is_some() {
            continue;
        }
        let mut call_stack: Vec<(StepIdx, usize)> = vec![(start, 0)];
        indices[start] = Some(index_counter);
        lowlink[start] = index_counter;
        index_counter += 1;
        stack.push(start);
        on_stack[start] = true;

        while let Some(&mut (node, ref mut i)) = call_stack.last_mut() {
            let neighbors = &successors[node];
            if *i < neighbors.len() {
                let next = neighbors[*i];
                *i += 1;
                if !subgraph[next] {
                    continue;
                }
                if indices[next].is_none() {
                    indices[next] = Some(index_counter);
                    lowlink[next] = index_counter;
                    index_counter += 1;
                    stack.push(next);
                    on_stack[next] = true;
                    call_stack.push((next, 0));
                } else if on_stack[next] {
                    lowlink[node] = lowlink[node].min(indices[next].unwrap());
                }
            } else {
                call_stack.pop();
                if let Some(&mut (parent, _)) = call_stack.last_mut() {
                    lowlink[parent] = lowlink[parent].min(lowlink[node]);
                }
                if lowlink[node] == indices[node].unwrap() {
                    let mut component = Vec::new();
                    loop {
                        let w = stack.pop().unwrap();
                        on_stack[w] = false;
                        component.push(w);
                        if w == node {
                            break;
                        }
                    }
                    sccs.push(component);
                }
            }
        }
    }

    sccs
}

fn trust_rank(t: TrustLevel) -> u8 {
    match t {
        TrustLevel::Low => 0,
        TrustLevel::Middle => 1,
        TrustLevel::High => 2,
    }
}

fn cycle_diagnostics(core: &GraphCore, items: &mut Vec<DiagnosticItem>) {
    let residual = match kahn_residual(core) {
        None => return,
        Some(r) => r,
    };

    let subgraph: Vec<bool> = residual.iter().map(|&r| r > 0).collect();
    let sccs = tarjan_scc(core.step_count(), core.successors(), &subgraph);

    for scc in sccs {
        if scc.len() <= 1 {
            continue;
        }
        let members: BTreeSet<StepIdx> = scc.iter().copied().collect();

        let mut blamed_step_links: Vec<(usize, TrustLevel)> = Vec::new();
        for (idx, link) in core.explicit_links().iter().enumerate() {
            if members.contains(&link.before) && members.contains(&link.after) {
                blamed_step_links.push((idx, link.trust));
            }
        }
        blamed_step_links.sort_by_key(|&(_, t)| trust_rank(t));

        let mut blamed_field_links: BTreeSet<usize> = BTreeSet::new();
        let mut edge_trusts: Vec<TrustLevel> = Vec::new();
        for edge in core.implicit_edges() {
            if members.contains(&edge.before) && members.contains(&edge.after) {
                edge_trusts.push(edge.trust);
                blamed_field_links.extend(edge.causing_field_links.iter().copied());
            }
        }
        let mut blamed_field_links: Vec<(usize, TrustLevel)> = blamed_field_links
            .into_iter()
            .map(|fl_idx| (fl_idx, core.field_links()[fl_idx].trust))
            .collect();
        blamed_field_links.sort_by_key(|&(_, t)| trust_rank(t));

        let mut involved_fields: BTreeSet<FieldIdx> = BTreeSet::new();
        for &s in &members {
            involved_fields.extend(core.step_fields(s).iter().copied());
        }

        items.push(DiagnosticItem {
            category: Category::Cycle,
            severity: Severity::Error,
            message: format!("cycle detected among steps {:?}", members),
            involved_steps: members,
            involved_fields,
            blamed_step_links: blamed_step_links.into_iter().map(|(i, _)| i).collect(),
            blamed_field_links: blamed_field_links.into_iter().map(|(i, _)| i).collect(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_core::TypeTag;

    #[test]
    fn clean_graph_has_no_diagnostics() {
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
        core.link_fields(0, 1, TrustLevel::High).unwrap();
        core.link_fields(1, 2, TrustLevel::High).unwrap();

        let diag = compute(&core, true);
        assert!(diag.is_valid());
        assert!(diag.warnings().is_empty());
    }

    #[test]
    fn missing_create_is_warning_unsealed_error_sealed() {
        let mut core = GraphCore::new(false);
        core.add_step(0).unwrap();
        core.add_step(1).unwrap();
        core.add_field(0, 0, TypeTag::of::<i32>(), Usage::Read)
            .unwrap();
        core.add_field(1, 1, TypeTag::of::<i32>(), Usage::Destroy)
            .unwrap();
        core.link_fields(0, 1, TrustLevel::High).unwrap();

        let unsealed = compute(&core, false);
        assert!(unsealed.is_valid());
        assert_eq!(unsealed.warnings().len(), 1);
        assert_eq!(unsealed.warnings()[0].category, Category::MissingCreate);

        let sealed = compute(&core, true);
        assert!(!sealed.is_valid());
        assert_eq!(sealed.errors().len(), 1);
        assert_eq!(sealed.errors()[0].category, Category::MissingCreate);
    }

    #[test]
    fn implicit_cycle_reports_precise_scc_and_blame_order() {
        let mut core = GraphCore::new(false);
        core.add_step(0).unwrap();
        core.add_step(1).unwrap();
        core.add_field(0, 0, TypeTag::of::<i32>(), Usage::Create)
            .unwrap();
        core.add_field(1, 1, TypeTag::of::<i32>(), Usage::Destroy)
            .unwrap();
        core.link_steps(1, 0, TrustLevel::Low).unwrap();
        core.link_fields(0, 1, TrustLevel::High).unwrap();

        let diag = compute(&core, false);
        assert!(!diag.is_valid());
        let cycles: Vec<&DiagnosticItem> = diag
            .errors()
            .into_iter()
            .filter(|i| i.category == Category::Cycle)
            .collect();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].involved_steps, BTreeSet::from([0, 1]));
        assert_eq!(cycles[0].blamed_step_links, vec![0]);
        assert_eq!(cycles[0].blamed_field_links, vec![0]);
    }

    #[test]
    fn multiple_create_blame_is_trust_ordered() {
        let mut core = GraphCore::new(false);
        core.add_step(0).unwrap();
        core.add_step(1).unwrap();
        core.add_step(2).unwrap();
        core.add_field(0, 0, TypeTag::of::<i32>(), Usage::Create)
            .unwrap();
        core.add_field(1, 1, TypeTag::of::<i32>(), Usage::Read)
            .unwrap();
        core.add_field(2, 2, TypeTag::of::<i32>(), Usage::Create)
            .unwrap();
        core.link_fields(0, 1, TrustLevel::High).unwrap();
        core.link_fields(1, 2, TrustLevel::Low).unwrap();

        let diag = compute(&core, false);
        let mc: Vec<&DiagnosticItem> = diag
            .errors()
            .into_iter()
            .filter(|i| i.category == Category::MultipleCreate)
            .collect();
        assert_eq!(mc.len(), 1);
        // link_fields(0,1,High) is field-link 0; link_fields(1,2,Low) is
        // field-link 1. Lower trust is blamed first (scenario S5).
        assert_eq!(mc[0].blamed_field_links, vec![1, 0]);
    }

    #[test]
    fn orphan_step_is_a_warning() {
        let mut core = GraphCore::new(false);
        core.add_step(0).unwrap();
        let diag = compute(&core, false);
        assert!(diag.is_valid());
        assert_eq!(diag.warnings().len(), 1);
        assert_eq!(diag.warnings()[0].category, Category::OrphanStep);
    }

    #[test]
    fn display_renders_clean_report() {
        let core = GraphCore::new(false);
        let diag = compute(&core, false);
        assert_eq!(diag.to_string(), "diagnostics: clean");
    }

    #[test]
    fn display_renders_counts_and_items() {
        let mut core = GraphCore::new(false);
        core.add_step(0).unwrap();
        core.add_field(0, 0, TypeTag::of::<i32>(), Usage::Read)
            .unwrap();
        let diag = compute(&core, true);
        let rendered = diag.to_string();
        assert!(rendered.starts_with("diagnostics: 1 error(s), 0 warning(s)"));
        assert!(rendered.contains("MissingCreate"));
    }

    #[test]
    fn unused_data_is_a_warning() {
        let mut core = GraphCore::new(false);
        core.add_step(0).unwrap();
        core.add_field(0, 0, TypeTag::of::<i32>(), Usage::Create)
            .unwrap();
        let diag = compute(&core, false);
        assert!(diag.is_valid());
        assert!(diag
            .warnings()
            .iter()
            .any(|i| i.category == Category::UnusedData));
    }
}
