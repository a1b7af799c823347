//! `crd-dag`: a validated DAG task-graph runtime.
//!
//! Vertices are user-supplied [`Step`]s; edges are ordering constraints
//! derived from how each step **C**reates, **R**eads, or **D**estroys a
//! shared [`Data`] object (hence "CRD-DAG"). [`GraphBuilder`] validates the
//! graph eagerly or on demand via [`Diagnostics`], exports an immutable
//! [`ExecutableGraph`], and [`Executor`] runs it single-threaded or across
//! a worker pool, with each step's [`TaskWrapper`] notifying its
//! successors directly as it completes.
//!
//! ```
//! use crd_dag::{Executor, ExecutorConfig, GraphBuilder, Step, TrustLevel, Usage};
//! use std::error::Error as StdError;
//!
//! struct Print(&'static str);
//! impl Step for Print {
//!     fn execute(&self) -> Result<(), Box<dyn StdError + Send + Sync>> {
//!         println!("{}", self.0);
//!         Ok(())
//!     }
//! }
//!
//! let mut builder = GraphBuilder::new(false);
//! let producer = builder.add_step(Print("produce")).unwrap();
//! let consumer = builder.add_step(Print("consume")).unwrap();
//! let out = builder.add_field::<i32>(producer, Usage::Create).unwrap();
//! let inp = builder.add_field::<i32>(consumer, Usage::Destroy).unwrap();
//! builder.link_fields(out, inp, TrustLevel::High).unwrap();
//!
//! let graph = builder.build().unwrap();
//! let result = Executor::new(ExecutorConfig::default()).execute(std::sync::Arc::new(graph));
//! assert!(result.success);
//! ```

pub mod builder;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod executable_graph;
pub mod executor;
pub mod export;
pub mod graph_core;
pub mod step;
mod task_wrapper;
pub mod union_find;
pub mod vardata;

pub use builder::GraphBuilder;
pub use data::{Data, Token};
pub use diagnostics::{Category, DiagnosticItem, Diagnostics, Severity};
pub use error::{CrdDagError, Result};
pub use executable_graph::ExecutableGraph;
pub use executor::{ExecutionResult, Executor, ExecutorConfig};
pub use export::{DataInfo, DataObject, ExportedGraph};
pub use graph_core::{FieldIdx, GraphCore, StepIdx, TrustLevel, TypeTag, Usage};
pub use step::Step;
pub use union_find::IterableUnionFind;
pub use vardata::VarData;
