//! Per-thread scope stack and slot bookkeeping.
//!
//! Each thread keeps, per factory, a LIFO stack of the slots it currently has
//! open and a cache of idle slots kept alive by the reuse policy. Nothing here
//! is shared between threads: slots are `Rc`-counted and live in a
//! `thread_local!` map keyed by factory id.
//!
//! A slot closes its physical connection when the last `Rc` goes away, so idle
//! slots close when their thread exits. State left behind by a dropped factory
//! is discarded the next time the thread touches any factory.

use crate::db::dialect::Connection;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

static NEXT_FACTORY_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Scope state of every live factory this thread has open or idle slots for.
    static CONTEXTS: RefCell<HashMap<u64, ContextState>> = RefCell::new(HashMap::new());
}

/// Identity of a factory in the per-thread maps.
///
/// Per-thread state keeps a `Weak` to `alive`; once the factory is gone the
/// state is orphaned and gets discarded.
#[derive(Debug)]
pub(crate) struct FactoryKey {
    pub(crate) id: u64,
    alive: Arc<()>,
}

impl FactoryKey {
    pub(crate) fn new() -> Self {
        Self {
            id: NEXT_FACTORY_ID.fetch_add(1, Ordering::Relaxed),
            alive: Arc::new(()),
        }
    }
}

/// What happens to a slot once its last scope ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPolicy {
    /// Close the physical connection when the outermost scope ends.
    Ephemeral,
    /// Keep the physical connection open and cached for the next scope.
    Cached,
}

impl SlotPolicy {
    pub fn from_auto_dispose(auto_dispose: bool) -> Self {
        if auto_dispose {
            Self::Ephemeral
        } else {
            Self::Cached
        }
    }

    pub fn is_auto_dispose(&self) -> bool {
        matches!(self, Self::Ephemeral)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Referenced by at least one open scope.
    Open,
    /// No open scope; physical connection retained for reuse.
    Idle,
    /// Physical connection closed. Terminal.
    Closed,
}

/// Binds a logical connection name to one physical connection.
pub struct Slot {
    pub(crate) name: String,
    pub(crate) physical_id: u64,
    pub(crate) connection: RefCell<Box<dyn Connection>>,
    ref_count: Cell<usize>,
    state: Cell<SlotState>,
}

impl Slot {
    /// New open slot with ref-count 1.
    pub(crate) fn new(name: String, physical_id: u64, connection: Box<dyn Connection>) -> Self {
        Self {
            name,
            physical_id,
            connection: RefCell::new(connection),
            ref_count: Cell::new(1),
            state: Cell::new(SlotState::Open),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.get()
    }

    pub fn state(&self) -> SlotState {
        self.state.get()
    }

    /// One more scope uses this slot.
    pub(crate) fn retain(&self) {
        self.ref_count.set(self.ref_count.get() + 1);
    }

    /// Bring an idle slot back into use with ref-count 1.
    pub(crate) fn reopen(&self) {
        self.ref_count.set(1);
        self.state.set(SlotState::Open);
    }

    /// Drop one scope reference and return the remaining count.
    /// Saturates at 0 to prevent underflow from extra release calls.
    pub(crate) fn release(&self) -> usize {
        let count = self.ref_count.get();
        if count == 0 {
            warn!(name = %self.name, "Slot ref-count underflow detected - extra release call");
            return 0;
        }
        self.ref_count.set(count - 1);
        count - 1
    }

    pub(crate) fn park(&self) {
        self.state.set(SlotState::Idle);
    }

    pub(crate) fn mark_closed(&self) {
        self.state.set(SlotState::Closed);
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("name", &self.name)
            .field("physical_id", &self.physical_id)
            .field("ref_count", &self.ref_count.get())
            .field("state", &self.state.get())
            .finish()
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.state.get() == SlotState::Closed {
            return;
        }
        self.state.set(SlotState::Closed);

        // may run during thread teardown; a panicking driver must not abort
        let connection = self.connection.get_mut();
        match panic::catch_unwind(AssertUnwindSafe(|| connection.close())) {
            Ok(Ok(())) => debug!(
                name = %self.name,
                physical_id = self.physical_id,
                "Closed physical connection of discarded slot"
            ),
            Ok(Err(e)) => warn!(
                name = %self.name,
                physical_id = self.physical_id,
                error = %e,
                "Failed to close physical connection of discarded slot"
            ),
            Err(_) => warn!(
                name = %self.name,
                physical_id = self.physical_id,
                "Driver panicked while closing physical connection of discarded slot"
            ),
        }
    }
}

/// LIFO record of the slots opened by one thread.
#[derive(Debug, Default)]
pub struct ScopeStack {
    entries: Vec<Rc<Slot>>,
}

impl ScopeStack {
    pub fn push(&mut self, slot: Rc<Slot>) {
        self.entries.push(slot);
    }

    /// Remove the most recently pushed entry, whatever its name.
    pub fn pop_top(&mut self) -> Option<Rc<Slot>> {
        self.entries.pop()
    }

    /// Nearest slot for `name`, scanning from the top.
    pub fn find_nearest(&self, name: &str) -> Option<&Rc<Slot>> {
        self.entries.iter().rev().find(|slot| slot.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One thread's view of one factory.
#[derive(Debug)]
pub struct ContextState {
    pub stack: ScopeStack,
    /// Idle slots by name. Only populated under [`SlotPolicy::Cached`].
    pub idle: HashMap<String, Rc<Slot>>,
    owner: Weak<()>,
}

impl ContextState {
    fn new(key: &FactoryKey) -> Self {
        Self {
            stack: ScopeStack::default(),
            idle: HashMap::new(),
            owner: Arc::downgrade(&key.alive),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty() && self.idle.is_empty()
    }

    fn is_orphaned(&self) -> bool {
        self.owner.strong_count() == 0
    }
}

/// Run `f` against the calling thread's state for `key`.
///
/// The entry is created on demand and removed again once it holds no slots.
/// `f` must not call back into the factory or into driver code.
pub(crate) fn with_context<R>(key: &FactoryKey, f: impl FnOnce(&mut ContextState) -> R) -> R {
    discard_orphaned();
    CONTEXTS.with(|contexts| {
        let mut contexts = contexts.borrow_mut();
        let ctx = contexts
            .entry(key.id)
            .or_insert_with(|| ContextState::new(key));
        let result = f(ctx);
        if ctx.is_empty() {
            contexts.remove(&key.id);
        }
        result
    })
}

/// Read the calling thread's state for `key` without creating it.
pub(crate) fn read_context<R>(key: &FactoryKey, f: impl FnOnce(Option<&ContextState>) -> R) -> R {
    discard_orphaned();
    CONTEXTS.with(|contexts| f(contexts.borrow().get(&key.id)))
}

/// Remove and return the calling thread's state for `key`.
///
/// Returns None when the thread-local map is already being torn down.
pub(crate) fn take_context(key: &FactoryKey) -> Option<ContextState> {
    CONTEXTS
        .try_with(|contexts| contexts.borrow_mut().remove(&key.id))
        .ok()
        .flatten()
}

/// Number of factories with state on the calling thread.
pub fn thread_context_count() -> usize {
    CONTEXTS.with(|contexts| contexts.borrow().len())
}

/// Drop this thread's state for factories that no longer exist.
///
/// The slots are dropped outside the map borrow, which closes their
/// connections.
fn discard_orphaned() {
    let orphaned: Vec<ContextState> = CONTEXTS.with(|contexts| {
        let mut contexts = contexts.borrow_mut();
        let ids: Vec<u64> = contexts
            .iter()
            .filter(|(_, ctx)| ctx.is_orphaned())
            .map(|(id, _)| *id)
            .collect();
        ids.iter().filter_map(|id| contexts.remove(id)).collect()
    });
    for state in &orphaned {
        debug!(idle = state.idle.len(), "Discarding state of a dropped factory");
    }
}
