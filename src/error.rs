//! Error types for the CRD-DAG runtime.
//!
//! Every fallible operation in this crate returns [`Result<T>`], an alias
//! around a single structured error enum. Validation errors (index/type/usage
//! problems, cycles detected eagerly) are distinct variants from the seal-time
//! [`CrdDagError::GraphValidationError`], which carries the full
//! [`crate::diagnostics::Diagnostics`] report rather than duplicating its
//! contents as strings.
//!
//! Failures raised by user step code are *not* modeled here: those are
//! captured by the executor and reported as data on
//! [`crate::executor::ExecutionResult`], never as a `CrdDagError`.

use crate::diagnostics::Diagnostics;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrdDagError>;

#[derive(Error, Debug)]
pub enum CrdDagError {
    #[error("index {index} out of range: valid range is [0, {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("union-find cannot grow past {max} elements")]
    Overflow { max: usize },

    #[error("expected next step index to be {expected}, got {actual}")]
    InvalidStepIndex { expected: usize, actual: usize },

    #[error("step index {index} already exists")]
    DuplicateStepIndex { index: usize },

    #[error("field owner step {step} does not exist (step_count = {step_count})")]
    InvalidFieldOwner { step: usize, step_count: usize },

    #[error("expected next field index to be {expected}, got {actual}")]
    InvalidFieldIndex { expected: usize, actual: usize },

    #[error("field index {index} already exists")]
    DuplicateFieldIndex { index: usize },

    #[error("cannot link field {a} and field {b}: type tags differ ({tag_a} != {tag_b})")]
    TypeMismatch {
        a: usize,
        b: usize,
        tag_a: &'static str,
        tag_b: &'static str,
    },

    #[error("linking would introduce a cycle: {detail}")]
    CycleDetected { detail: String },

    #[error(
        "data class rooted at field {root} would gain a second Create field (at field {field})"
    )]
    MultipleCreate { root: usize, field: usize },

    #[error(
        "data class rooted at field {root} would gain a second Destroy field (at field {field})"
    )]
    MultipleDestroy { root: usize, field: usize },

    #[error(
        "step {step} would hold two aliased fields ({field_a}, {field_b}) with incompatible usages"
    )]
    UnsafeSelfAliasing {
        step: usize,
        field_a: usize,
        field_b: usize,
    },

    #[error("graph failed validation with {} error(s)", .diagnostics.errors().len())]
    GraphValidationError { diagnostics: Diagnostics },

    #[error("token does not authorize this access to data object {data}")]
    UnauthorizedAccess { data: usize },

    #[error("data object {data} has not been created yet")]
    DataNotInitialized { data: usize },

    #[error("data object {data} was already created")]
    AlreadyCreated { data: usize },

    #[error("data object {data} was already destroyed")]
    AlreadyDestroyed { data: usize },

    #[error("VarData is empty")]
    VarDataEmpty,

    #[error("VarData holds a different type than requested")]
    VarDataTypeMismatch,

    #[error("internal error: {0}")]
    InternalError(String),
}

impl CrdDagError {
    pub fn index_out_of_range(index: usize, len: usize) -> Self {
        CrdDagError::IndexOutOfRange { index, len }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CrdDagError::InternalError(msg.into())
    }
}
