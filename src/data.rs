//! Execution-time data objects: the typed, access-controlled counterpart to
//! a [`crate::export::DataObject`]. Every data object validates every call
//! against the step token that is attempting it.

use crate::error::{CrdDagError, Result};
use crate::graph_core::{StepIdx, Usage};
use crate::vardata::VarData;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;

/// Opaque per-step authorization handle. Tokens are assigned once, at
/// build time, and are a bijection with step indices; one additional
/// token is reserved at the graph level for host-initiated access outside
/// of any step (e.g. seeding initial inputs before `execute()` begins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u64);

pub(crate) struct TokenFactory {
    next: u64,
}

impl TokenFactory {
    pub(crate) fn new() -> Self {
        Self { next: 0 }
    }

    pub(crate) fn next_token(&mut self) -> Token {
        let t = Token(self.next);
        self.next += 1;
        t
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataState {
    Empty,
    Created,
    Destroyed,
}

/// A single shared data object, guarding access by usage and by token.
pub struct Data {
    index: usize,
    access_rights: HashMap<Token, Usage>,
    state: Mutex<DataState>,
    value: VarData,
}

impl Data {
    pub(crate) fn new(index: usize, access_rights: HashMap<Token, Usage>) -> Self {
        Self {
            index,
            access_rights,
            state: Mutex::new(DataState::Empty),
            value: VarData::new(),
        }
    }

    fn authorize(&self, token: Token, required: Usage) -> Result<()> {
        match self.access_rights.get(&token) {
            Some(&usage) if usage == required => Ok(()),
            _ => Err(CrdDagError::UnauthorizedAccess { data: self.index }),
        }
    }

    /// Create access: stores `payload`, failing if the token is not
    /// authorized for `Create` or if the object already holds a value.
    pub fn set_value<T: Any + Send + Sync>(&self, token: Token, payload: T) -> Result<()> {
        self.authorize(token, Usage::Create)?;
        let mut state = self.state.lock();
        match *state {
            DataState::Empty => {
                self.value.emplace(payload);
                *state = DataState::Created;
                Ok(())
            }
            DataState::Created => Err(CrdDagError::AlreadyCreated { data: self.index }),
            DataState::Destroyed => Err(CrdDagError::AlreadyDestroyed { data: self.index }),
        }
    }

    /// Read access: returns a cloned handle sharing the stored payload.
    pub fn get_value(&self, token: Token) -> Result<VarData> {
        self.authorize(token, Usage::Read)?;
        let state = self.state.lock();
        match *state {
            DataState::Empty => Err(CrdDagError::DataNotInitialized { data: self.index }),
            DataState::Created => Ok(self.value.clone()),
            DataState::Destroyed => Err(CrdDagError::AlreadyDestroyed { data: self.index }),
        }
    }

    /// Destroy access: returns the stored payload and empties the object.
    pub fn remove_value(&self, token: Token) -> Result<VarData> {
        self.authorize(token, Usage::Destroy)?;
        let mut state = self.state.lock();
        match *state {
            DataState::Empty => Err(CrdDagError::DataNotInitialized { data: self.index }),
            DataState::Created => {
                *state = DataState::Destroyed;
                let taken = self.value.clone();
                self.value.reset();
                Ok(taken)
            }
            DataState::Destroyed => Err(CrdDagError::AlreadyDestroyed { data: self.index }),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

#[allow(dead_code)]
fn assert_send_sync<T: Send + Sync>() {}
