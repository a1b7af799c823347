//! Type-erased, value-semantic, copy-shared storage for a single arbitrary
//! value.
//!
//! `VarData` is the contract data objects use to move values between steps:
//! cloning a `VarData` shares the underlying payload (multiple handles can
//! observe the same object), while emptying or replacing the value through
//! one handle is visible to every clone. Concurrent reads and clones never
//! require external synchronization; the container enforces its own.

use crate::error::{CrdDagError, Result};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use std::any::{Any, TypeId};
use std::sync::Arc;

struct Slot {
    type_id: Option<TypeId>,
    type_name: &'static str,
    value: Option<Box<dyn Any + Send + Sync>>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            type_id: None,
            type_name: "()",
            value: None,
        }
    }
}

/// Copy-shared, type-erased single-value container.
#[derive(Clone)]
pub struct VarData {
    inner: Arc<RwLock<Slot>>,
}

impl VarData {
    /// A new, empty container with no shared payload yet.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Slot::empty())),
        }
    }

    /// A new container already holding `value`.
    pub fn of<T: Any + Send + Sync>(value: T) -> Self {
        let data = Self::new();
        data.emplace(value);
        data
    }

    pub fn empty(&self) -> bool {
        self.inner.read().value.is_none()
    }

    pub fn has_type<T: Any>(&self) -> bool {
        self.inner.read().type_id == Some(TypeId::of::<T>())
    }

    pub fn type_name(&self) -> &'static str {
        self.inner.read().type_name
    }

    /// Replaces the contained value with `value`, regardless of what (if
    /// anything) was there before.
    pub fn emplace<T: Any + Send + Sync>(&self, value: T) {
        let mut slot = self.inner.write();
        slot.type_id = Some(TypeId::of::<T>());
        slot.type_name = std::any::type_name::<T>();
        slot.value = Some(Box::new(value));
    }

    /// Alias for [`VarData::emplace`], matching the contract's naming.
    pub fn set<T: Any + Send + Sync>(&self, value: T) {
        self.emplace(value);
    }

    /// A shared reference to the contained value. Fails if empty or if the
    /// requested type does not match the stored one.
    pub fn get<T: Any + Send + Sync>(&self) -> Result<MappedRwLockReadGuard<'_, T>> {
        let guard = self.inner.read();
        if guard.value.is_none() {
            return Err(CrdDagError::VarDataEmpty);
        }
        if guard.type_id != Some(TypeId::of::<T>()) {
            return Err(CrdDagError::VarDataTypeMismatch);
        }
        Ok(RwLockReadGuard::map(guard, |s| {
            s.value.as_ref().unwrap().downcast_ref::<T>().unwrap()
        }))
    }

    /// Like [`VarData::get`], but returns `None` on a type mismatch or an
    /// empty container instead of an error.
    pub fn try_as<T: Any + Send + Sync>(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
        self.get::<T>().ok()
    }

    /// A cloned copy of the contained value.
    pub fn as_owned<T: Any + Send + Sync + Clone>(&self) -> Result<T> {
        self.get::<T>().map(|guard| guard.clone())
    }

    /// Moves the value out of the container, leaving it empty. Fails if
    /// empty or if `T` does not match the stored type; in that case the
    /// container is left untouched.
    pub fn release<T: Any + Send + Sync>(&self) -> Result<T> {
        let mut slot = self.inner.write();
        if slot.value.is_none() {
            return Err(CrdDagError::VarDataEmpty);
        }
        if slot.type_id != Some(TypeId::of::<T>()) {
            return Err(CrdDagError::VarDataTypeMismatch);
        }
        let boxed = slot.value.take().unwrap();
        slot.type_id = None;
        slot.type_name = "()";
        Ok(*boxed.downcast::<T>().unwrap())
    }

    /// Empties the container, dropping the payload if this was the last
    /// handle observing it.
    pub fn reset(&self) {
        let mut slot = self.inner.write();
        slot.value = None;
        slot.type_id = None;
        slot.type_name = "()";
    }
}

impl Default for VarData {
    fn default() -> Self {
        Self::new()
    }
}
