//! Immutable snapshot produced once a graph passes sealed validation.
//!
//! [`GraphCore::export_graph`] is the only way to obtain an
//! [`ExportedGraph`]; it runs the deferred diagnostics pass with
//! `treat_as_sealed = true` and refuses to export if any error survives.

use crate::diagnostics::compute;
use crate::error::{CrdDagError, Result};
use crate::graph_core::{FieldIdx, GraphCore, StepIdx, TypeTag, Usage};

/// One field equivalence class: the data object fields alias into.
#[derive(Debug, Clone)]
pub struct DataObject {
    pub type_tag: TypeTag,
    pub members: Vec<FieldIdx>,
}

/// Per-data-object access-rights table: which steps may access it, and how.
#[derive(Debug, Clone)]
pub struct DataInfo {
    pub access_rights: Vec<(StepIdx, Usage)>,
}

/// Immutable export of a validated graph: everything
/// [`crate::builder::GraphBuilder::build`] needs to construct an
/// executable plan, with no remaining dependency on `GraphCore`.
#[derive(Debug, Clone)]
pub struct ExportedGraph {
    pub step_count: usize,
    pub data_objects: Vec<DataObject>,
    pub field_to_data: Vec<usize>,
    /// Combined explicit + implicit edges, as `(before, after)` pairs.
    /// Not deduplicated: consumers should treat this as a multigraph.
    pub step_links: Vec<(StepIdx, StepIdx)>,
    pub data_infos: Vec<DataInfo>,
}

impl GraphCore {
    /// Runs sealed diagnostics and, if clean, produces an [`ExportedGraph`].
    /// Fails with [`CrdDagError::GraphValidationError`] otherwise.
    pub fn export_graph(&self) -> Result<ExportedGraph> {
        let diagnostics = compute(self, true);
        if diagnostics.has_errors() {
            return Err(CrdDagError::GraphValidationError { diagnostics });
        }

        let classes = self.classes();
        let mut field_to_data = vec![0usize; self.field_count()];
        let mut data_objects = Vec::with_capacity(classes.len());
        let mut data_infos = Vec::with_capacity(classes.len());

        for (data_idx, members) in classes.into_iter().enumerate() {
            let type_tag = self.field_type_tag(members[0]);
            for &f in &members {
                field_to_data[f] = data_idx;
            }
            let access_rights = members
                .iter()
                .map(|&f| (self.field_owner(f), self.field_usage(f)))
                .collect();
            data_objects.push(DataObject { type_tag, members });
            data_infos.push(DataInfo { access_rights });
        }

        let mut step_links = Vec::with_capacity(
            self.explicit_links().len() + self.implicit_edges().len(),
        );
        step_links.extend(self.explicit_links().iter().map(|l| (l.before, l.after)));
        step_links.extend(self.implicit_edges().iter().map(|e| (e.before, e.after)));

        Ok(ExportedGraph {
            step_count: self.step_count(),
            data_objects,
            field_to_data,
            step_links,
            data_infos,
        })
    }
}
