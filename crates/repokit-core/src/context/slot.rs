//! Lazily built, resettable repository slots
//!
//! A context hands out [`RepositorySlot`]s and remembers them in its
//! [`SlotRegistry`]. Resetting the context clears every registered slot so
//! the next access rebuilds the engine against the new connection.

use std::sync::{Arc, Mutex, Weak};

pub(crate) trait Invalidate: Send + Sync {
    fn invalidate(&self);
}

struct SlotCell<E> {
    engine: Mutex<Option<Arc<E>>>,
}

impl<E: Send + Sync> Invalidate for SlotCell<E> {
    fn invalidate(&self) {
        self.engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

/// Cached child repository owned by a context or store
pub struct RepositorySlot<E> {
    cell: Arc<SlotCell<E>>,
}

impl<E> Clone for RepositorySlot<E> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<E: Send + Sync + 'static> RepositorySlot<E> {
    /// The cached engine, if one has been built since the last reset
    pub fn get(&self) -> Option<Arc<E>> {
        self.cell
            .engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_built(&self) -> bool {
        self.get().is_some()
    }

    /// Return the cached engine, building it with `build` if the slot is empty
    pub fn get_or_build(&self, build: impl FnOnce() -> E) -> Arc<E> {
        let mut engine = self
            .cell
            .engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(engine.get_or_insert_with(|| Arc::new(build())))
    }
}

/// Weak references to every slot a context has handed out
#[derive(Default)]
pub(crate) struct SlotRegistry {
    slots: Mutex<Vec<Weak<dyn Invalidate>>>,
}

impl SlotRegistry {
    pub(crate) fn slot<E: Send + Sync + 'static>(&self) -> RepositorySlot<E> {
        let cell = Arc::new(SlotCell {
            engine: Mutex::new(None),
        });
        let weak: Weak<dyn Invalidate> = Arc::downgrade(&cell) as Weak<dyn Invalidate>;
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(weak);
        RepositorySlot { cell }
    }

    /// Clear every live slot and forget the ones that were dropped
    pub(crate) fn invalidate_all(&self) {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.retain(|weak| match weak.upgrade() {
            Some(slot) => {
                slot.invalidate();
                true
            }
            None => false,
        });
    }
}
