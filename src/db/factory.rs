//! Connection factory.
//!
//! Hands out scoped [`ConnectionHandle`]s for registered connection names and
//! decides, per open, which physical connection backs the handle:
//!
//! 1. a slot for the same name already open on this thread's scope stack
//!    (nested opens always share one physical connection),
//! 2. an idle slot cached by an earlier scope (reuse policy only),
//! 3. a fresh physical connection from the entry's dialect.
//!
//! # Caller contract
//!
//! Handles must be released in reverse order of acquisition on a thread.
//! Nested `let` bindings drop in that order on their own. Releasing always pops
//! the top of the scope stack; a handle released out of order is logged and
//! leaves the stack inconsistent for the names involved.
//!
//! # Threads
//!
//! The factory is `Send + Sync` and may be shared; handles are not `Send`. Each
//! thread has its own scope stack and, under the reuse policy, its own idle
//! cache, so a physical connection never leaves the thread that opened it.

use crate::config::FactoryConfig;
use crate::db::dialect::{Connection, DialectHandle};
use crate::db::registry::{ConnectionRegistry, RegistryEntry};
use crate::db::scope::{self, FactoryKey, Slot, SlotPolicy, SlotState};
use crate::db::sqlx_dialect::SqlxDialect;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, mask_connection_string};
use std::cell::RefMut;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

static NEXT_PHYSICAL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct ConnectionFactory {
    /// Key of this factory's per-thread scope state.
    key: FactoryKey,
    registry: ConnectionRegistry,
    policy: SlotPolicy,
}

impl ConnectionFactory {
    /// Create a factory whose default connection uses `default_dialect`.
    ///
    /// With `auto_dispose` the physical connection is closed as soon as its
    /// outermost scope ends; otherwise it stays open for the next scope.
    pub fn new(
        default_connection_string: impl Into<String>,
        auto_dispose: bool,
        default_dialect: DialectHandle,
    ) -> Self {
        Self::with_policy(
            default_connection_string,
            SlotPolicy::from_auto_dispose(auto_dispose),
            default_dialect,
        )
    }

    pub fn with_policy(
        default_connection_string: impl Into<String>,
        policy: SlotPolicy,
        default_dialect: DialectHandle,
    ) -> Self {
        let key = FactoryKey::new();
        let registry = ConnectionRegistry::new(default_connection_string, default_dialect);
        debug!(factory_id = key.id, policy = ?policy, "Created connection factory");
        Self {
            key,
            registry,
            policy,
        }
    }

    /// Build a factory from configuration, using sqlx dialects picked from
    /// each connection string's scheme. Engines share one dialect.
    pub fn from_config(config: &FactoryConfig) -> DbResult<Self> {
        config.validate().map_err(DbError::invalid_input)?;

        let mut dialects: HashMap<DatabaseType, DialectHandle> = HashMap::new();
        let mut dialect_for = |connection_string: &str| -> DbResult<DialectHandle> {
            let db_type = DatabaseType::from_connection_string(connection_string).ok_or_else(|| {
                DbError::invalid_input(format!(
                    "Unknown database type in connection string: {}",
                    mask_connection_string(connection_string)
                ))
            })?;
            if let Some(dialect) = dialects.get(&db_type) {
                return Ok(Arc::clone(dialect));
            }
            let dialect: DialectHandle = Arc::new(SqlxDialect::new(db_type)?);
            dialects.insert(db_type, Arc::clone(&dialect));
            Ok(dialect)
        };

        let factory = Self::new(
            config.default_connection.clone(),
            config.auto_dispose,
            dialect_for(&config.default_connection)?,
        );
        for named in &config.connections {
            factory.register_connection(
                &named.name,
                named.connection_string.clone(),
                dialect_for(&named.connection_string)?,
            )?;
        }
        Ok(factory)
    }

    /// Register a named connection. Fails if the name is taken.
    pub fn register_connection(
        &self,
        name: &str,
        connection_string: impl Into<String>,
        dialect: DialectHandle,
    ) -> DbResult<()> {
        self.registry.register(name, connection_string, dialect)
    }

    /// Registered connection names, sorted.
    pub fn registered_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn policy(&self) -> SlotPolicy {
        self.policy
    }

    pub fn is_auto_dispose(&self) -> bool {
        self.policy.is_auto_dispose()
    }

    /// Open the default connection.
    pub fn open_default(&self) -> DbResult<ConnectionHandle<'_>> {
        self.open("")
    }

    /// Open a scope on the named connection (`""` for the default).
    pub fn open(&self, name: &str) -> DbResult<ConnectionHandle<'_>> {
        let entry = self.registry.resolve(name)?;

        if let Some(slot) = self.reuse_slot(&entry.name) {
            return Ok(ConnectionHandle::new(self, slot));
        }

        let slot = Rc::new(self.open_physical(&entry)?);
        let depth = scope::with_context(&self.key, |ctx| {
            ctx.stack.push(Rc::clone(&slot));
            ctx.stack.len()
        });
        debug!(
            name = %slot.name,
            physical_id = slot.physical_id,
            depth,
            "Pushed new connection scope"
        );
        Ok(ConnectionHandle::new(self, slot))
    }

    /// Find a slot this thread can reuse for `name` and push it.
    fn reuse_slot(&self, name: &str) -> Option<Rc<Slot>> {
        let policy = self.policy;
        scope::with_context(&self.key, |ctx| {
            let slot = if let Some(open) = ctx.stack.find_nearest(name) {
                let open = Rc::clone(open);
                open.retain();
                debug!(
                    name = %name,
                    physical_id = open.physical_id,
                    ref_count = open.ref_count(),
                    "Reusing connection open in an enclosing scope"
                );
                open
            } else if policy == SlotPolicy::Cached {
                let idle = ctx.idle.remove(name)?;
                idle.reopen();
                debug!(
                    name = %name,
                    physical_id = idle.physical_id,
                    "Reusing cached idle connection"
                );
                idle
            } else {
                return None;
            };
            ctx.stack.push(Rc::clone(&slot));
            Some(slot)
        })
    }

    fn open_physical(&self, entry: &RegistryEntry) -> DbResult<Slot> {
        let connection = entry
            .dialect
            .open_connection(&entry.connection_string)
            .inspect_err(|e| {
                warn!(
                    name = %entry.name,
                    dialect = %entry.dialect.name(),
                    error = %e,
                    "Failed to open physical connection"
                );
            })?;

        let physical_id = NEXT_PHYSICAL_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            name = %entry.name,
            dialect = %entry.dialect.name(),
            physical_id,
            "Opened physical connection"
        );
        Ok(Slot::new(entry.name.clone(), physical_id, connection))
    }

    /// Release path shared by [`ConnectionHandle::release`] and `Drop`.
    fn release_slot(&self, slot: &Rc<Slot>) -> DbResult<()> {
        let policy = self.policy;
        let to_close = scope::with_context(&self.key, |ctx| {
            match ctx.stack.pop_top() {
                Some(top) if Rc::ptr_eq(&top, slot) => {}
                Some(top) => warn!(
                    released = %slot.name,
                    popped = %top.name,
                    "Connection handles released out of order"
                ),
                None => warn!(name = %slot.name, "Released a connection with an empty scope stack"),
            }

            let remaining = slot.release();
            debug!(
                name = %slot.name,
                physical_id = slot.physical_id,
                ref_count = remaining,
                depth = ctx.stack.len(),
                "Popped connection scope"
            );
            if remaining > 0 {
                return None;
            }

            match policy {
                SlotPolicy::Ephemeral => Some(Rc::clone(slot)),
                SlotPolicy::Cached => {
                    slot.park();
                    ctx.idle.insert(slot.name.clone(), Rc::clone(slot));
                    None
                }
            }
        });

        match to_close {
            Some(slot) => close_slot(&slot),
            None => Ok(()),
        }
    }

    /// Close this thread's idle connection for `name`.
    ///
    /// Returns `Ok(false)` if there was none, and `ConnectionInUse` while a
    /// scope on this thread still holds it.
    pub fn invalidate(&self, name: &str) -> DbResult<bool> {
        let entry = self.registry.resolve(name)?;
        let idle = scope::with_context(&self.key, |ctx| {
            if let Some(open) = ctx.stack.find_nearest(&entry.name) {
                return Err(DbError::connection_in_use(&entry.name, open.ref_count()));
            }
            Ok(ctx.idle.remove(&entry.name))
        })?;

        match idle {
            Some(slot) => close_slot(&slot).map(|_| true),
            None => Ok(false),
        }
    }

    /// Close every idle connection cached on this thread.
    ///
    /// All slots are discarded even when some fail to close; the first failure
    /// is returned.
    pub fn close_idle(&self) -> DbResult<usize> {
        let idle: Vec<Rc<Slot>> =
            scope::with_context(&self.key, |ctx| ctx.idle.drain().map(|(_, slot)| slot).collect());
        close_all(&idle)
    }

    /// Number of open scopes on this thread.
    pub fn scope_depth(&self) -> usize {
        scope::read_context(&self.key, |ctx| ctx.map_or(0, |ctx| ctx.stack.len()))
    }

    /// Number of idle cached connections on this thread.
    pub fn idle_count(&self) -> usize {
        scope::read_context(&self.key, |ctx| ctx.map_or(0, |ctx| ctx.idle.len()))
    }
}

impl Drop for ConnectionFactory {
    fn drop(&mut self) {
        // Handles borrow the factory, so only idle slots can remain here.
        // Other threads discard theirs on their next factory access or on exit.
        let Some(state) = scope::take_context(&self.key) else {
            return;
        };
        let idle: Vec<Rc<Slot>> = state.idle.into_values().collect();
        if let Err(e) = close_all(&idle) {
            warn!(factory_id = self.key.id, error = %e, "Failed to close idle connections");
        }
    }
}

fn close_all(slots: &[Rc<Slot>]) -> DbResult<usize> {
    let mut first_error = None;
    for slot in slots {
        if let Err(e) = close_slot(slot) {
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(slots.len()),
    }
}

/// Close a slot's physical connection. The slot is closed afterwards whether
/// or not the driver reported an error.
fn close_slot(slot: &Slot) -> DbResult<()> {
    if slot.state() == SlotState::Closed {
        return Ok(());
    }
    slot.mark_closed();

    let result = match slot.connection.try_borrow_mut() {
        Ok(mut connection) => connection.close(),
        Err(_) => Err(DbError::connection_busy(&slot.name)),
    };

    match result {
        Ok(()) => {
            info!(
                name = %slot.name,
                physical_id = slot.physical_id,
                "Closed physical connection"
            );
            Ok(())
        }
        Err(e) => {
            warn!(
                name = %slot.name,
                physical_id = slot.physical_id,
                error = %e,
                "Failed to close physical connection"
            );
            // keep the driver's text; the slot name replaces the driver's label
            let message = match e {
                DbError::ConnectionClose { message, .. } => message,
                other => other.to_string(),
            };
            Err(DbError::connection_close(&slot.name, message))
        }
    }
}

/// Scoped use of a connection obtained from [`ConnectionFactory::open`].
///
/// Releasing the handle (explicitly with [`release`](Self::release) or by
/// dropping it) ends the scope. Prefer `release()` where a close failure
/// matters: `Drop` can only log it.
pub struct ConnectionHandle<'f> {
    factory: &'f ConnectionFactory,
    slot: Rc<Slot>,
    released: bool,
}

impl std::fmt::Debug for ConnectionHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("slot", &self.slot)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl<'f> ConnectionHandle<'f> {
    fn new(factory: &'f ConnectionFactory, slot: Rc<Slot>) -> Self {
        Self {
            factory,
            slot,
            released: false,
        }
    }

    /// Registered name of the connection.
    pub fn name(&self) -> &str {
        self.slot.name()
    }

    /// Process-unique id of the underlying physical connection.
    pub fn physical_id(&self) -> u64 {
        self.slot.physical_id
    }

    /// True when both handles are backed by the same physical connection.
    pub fn is_same_connection(&self, other: &ConnectionHandle<'_>) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }

    /// Number of open scopes sharing this physical connection.
    pub fn ref_count(&self) -> usize {
        self.slot.ref_count()
    }

    /// Borrow the physical connection.
    ///
    /// Nested handles share one connection, so only one borrow may be live at a
    /// time; a second one fails with `ConnectionBusy`.
    pub fn connection(&self) -> DbResult<RefMut<'_, Box<dyn Connection>>> {
        self.slot
            .connection
            .try_borrow_mut()
            .map_err(|_| DbError::connection_busy(self.name()))
    }

    /// Borrow the physical connection as its concrete driver type.
    pub fn downcast<C: Connection>(&self) -> DbResult<RefMut<'_, C>> {
        let connection = self
            .slot
            .connection
            .try_borrow_mut()
            .map_err(|_| DbError::connection_busy(self.name()))?;
        RefMut::filter_map(connection, |c| c.as_any_mut().downcast_mut::<C>()).map_err(|_| {
            DbError::invalid_input(format!(
                "Connection '{}' is not a {}",
                self.slot.name,
                std::any::type_name::<C>()
            ))
        })
    }

    /// End the scope, surfacing a failure to close the physical connection.
    pub fn release(mut self) -> DbResult<()> {
        self.released = true;
        self.factory.release_slot(&self.slot)
    }
}

impl Drop for ConnectionHandle<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.factory.release_slot(&self.slot) {
            warn!(name = %self.slot.name, error = %e, "Connection release failed on drop");
        }
    }
}
