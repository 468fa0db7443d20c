//! Thread-safe tables mapping small integer ids to client callbacks.
//!
//! The renderer cannot call into the client directly. Instead the client
//! registers a callback, sends the resulting [`CallbackId`] along with the
//! request that may trigger it, and the renderer later emits events tagged
//! with that id. The event reader looks the id up here and runs the callback.
//!
//! Each table holds callbacks of a single signature `F` (usually a
//! `dyn Fn(..) + Send + Sync`). Ids are unique within one table only.
//!
//! The table is a registry, not an execution context: the lock is never held
//! while a callback runs, so a callback may freely re-enter the table (for
//! example to unregister itself).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Key of a registered callback within one [`CallbackTable`].
///
/// Client code cannot build one: an id can only be obtained by registering a
/// callback, so a request can never carry an id that was not registered
/// before it was sent.
///
/// ```compile_fail
/// let id = renderlink::callback_id_from_wire(7);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u32);

impl CallbackId {
    /// Rebuild an id received from the wire.
    pub(crate) const fn from_wire(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw value to put in a request.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct TableInner<F: ?Sized> {
    /// Next candidate id. Never 0.
    next_id: u32,
    entries: HashMap<CallbackId, Arc<F>>,
}

/// Registry of callbacks of one signature, keyed by [`CallbackId`].
pub struct CallbackTable<F: ?Sized> {
    name: &'static str,
    inner: Mutex<TableInner<F>>,
}

impl<F: ?Sized> fmt::Debug for CallbackTable<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackTable")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<F: ?Sized> CallbackTable<F> {
    /// Create an empty table. `name` only shows up in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(TableInner {
                next_id: 1,
                entries: HashMap::new(),
            }),
        }
    }

    /// Name of the callback family this table serves.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Store `callback` under a fresh id.
    ///
    /// Ids increase monotonically. After wrapping past `u32::MAX` the
    /// allocator skips every id that is still registered, so a live id is
    /// never handed out twice.
    pub fn register(&self, callback: Arc<F>) -> CallbackId {
        let mut inner = self.inner.lock();
        let id = loop {
            let candidate = CallbackId(inner.next_id);
            inner.next_id = match inner.next_id.checked_add(1) {
                Some(next) => next,
                None => 1,
            };
            if !inner.entries.contains_key(&candidate) {
                break candidate;
            }
        };
        inner.entries.insert(id, callback);
        tracing::trace!(table = self.name, %id, "registered callback");
        id
    }

    /// Remove the entry holding this exact callback value.
    ///
    /// Callbacks are compared by identity (`Arc::ptr_eq`), not by what they
    /// do. Returns the freed id, or `None` if the callback is not registered;
    /// unregistering twice is therefore harmless.
    pub fn unregister(&self, callback: &Arc<F>) -> Option<CallbackId> {
        let mut inner = self.inner.lock();
        let id = inner
            .entries
            .iter()
            .find(|(_, stored)| Arc::ptr_eq(stored, callback))
            .map(|(id, _)| *id)?;
        inner.entries.remove(&id);
        tracing::trace!(table = self.name, %id, "unregistered callback");
        Some(id)
    }

    /// Remove the entry under `id`, returning its callback.
    pub fn unregister_id(&self, id: CallbackId) -> Option<Arc<F>> {
        let removed = self.inner.lock().entries.remove(&id);
        if removed.is_some() {
            tracing::trace!(table = self.name, %id, "unregistered callback");
        }
        removed
    }

    /// Look up the callback registered under `id`.
    pub fn lookup(&self, id: CallbackId) -> Option<Arc<F>> {
        self.inner.lock().entries.get(&id).cloned()
    }

    /// Run the callback registered under `id`.
    ///
    /// The callback is cloned out of the table and the lock released before
    /// `call` runs. An unknown id is dropped: an event racing an unregister
    /// is expected and is not an error. Returns `None` when dropped.
    pub fn invoke<R>(&self, id: CallbackId, call: impl FnOnce(&F) -> R) -> Option<R> {
        let Some(callback) = self.lookup(id) else {
            tracing::debug!(table = self.name, %id, "no callback registered, dropping event");
            return None;
        };
        Some(call(&callback))
    }

    /// Copy of every registered callback, in id order.
    pub fn snapshot(&self) -> Vec<Arc<F>> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner.entries.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        entries.into_iter().map(|(_, f)| Arc::clone(f)).collect()
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the table has no live registrations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register `callback` and tie its lifetime to the returned guard.
    ///
    /// The guard only ever removes the id it was given, even if the same
    /// callback is registered elsewhere in the table.
    pub fn scoped(table: &Arc<Self>, callback: Arc<F>) -> Registration<F> {
        let id = table.register(callback);
        Registration {
            table: Arc::clone(table),
            id,
        }
    }
}

/// A registration that is removed from its table when dropped.
pub struct Registration<F: ?Sized> {
    table: Arc<CallbackTable<F>>,
    id: CallbackId,
}

impl<F: ?Sized> Registration<F> {
    /// Id to send to the renderer.
    pub fn id(&self) -> CallbackId {
        self.id
    }

    /// Unregister now. Same as dropping the guard.
    pub fn unregister(self) {}
}

impl<F: ?Sized> fmt::Debug for Registration<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("table", &self.table.name())
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<F: ?Sized> Drop for Registration<F> {
    fn drop(&mut self) {
        self.table.unregister_id(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    type Callback = dyn Fn(u32) -> u32 + Send + Sync;

    fn table() -> CallbackTable<Callback> {
        CallbackTable::new("test")
    }

    #[test]
    fn register_then_lookup() {
        let table = table();
        let double: Arc<Callback> = Arc::new(|x| x * 2);
        let id = table.register(Arc::clone(&double));

        let found = table.lookup(id).unwrap();
        assert!(Arc::ptr_eq(&found, &double));
        assert_eq!(table.invoke(id, |f| f(21)), Some(42));
    }

    #[test]
    fn ids_are_fresh() {
        let table = table();
        let a = table.register(Arc::new(|x| x));
        let b = table.register(Arc::new(|x| x));
        assert_ne!(a, b);
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
    }

    #[test]
    fn unregister_frees_the_allocated_id() {
        let table = table();
        let f: Arc<Callback> = Arc::new(|x| x + 1);
        let id = table.register(Arc::clone(&f));

        assert_eq!(table.unregister(&f), Some(id));
        assert!(table.lookup(id).is_none());
        assert_eq!(table.unregister(&f), None);
        assert!(table.is_empty());

        let again = table.register(Arc::clone(&f));
        assert_ne!(again, id);
        assert_eq!(table.invoke(again, |f| f(1)), Some(2));
    }

    #[test]
    fn unregister_compares_identity_not_behaviour() {
        let table = table();
        let a: Arc<Callback> = Arc::new(|x| x);
        let b: Arc<Callback> = Arc::new(|x| x);
        let id_a = table.register(Arc::clone(&a));
        let id_b = table.register(Arc::clone(&b));

        assert_eq!(table.unregister(&b), Some(id_b));
        assert!(table.lookup(id_a).is_some());
        assert!(table.lookup(id_b).is_none());
    }

    #[test]
    fn invoke_unknown_id_is_a_noop() {
        let table = table();
        assert_eq!(table.invoke(CallbackId::from_wire(99), |f| f(1)), None);

        let f: Arc<Callback> = Arc::new(|x| x);
        let id = table.register(Arc::clone(&f));
        table.unregister(&f);
        assert_eq!(table.invoke(id, |f| f(1)), None);

        // Table still usable afterwards.
        let id = table.register(f);
        assert_eq!(table.invoke(id, |f| f(5)), Some(5));
    }

    #[test]
    fn callback_can_unregister_itself() {
        let table: Arc<CallbackTable<dyn Fn() + Send + Sync>> =
            Arc::new(CallbackTable::new("reentrant"));
        let calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<CallbackId>>> = Arc::new(Mutex::new(None));

        let id = table.register(Arc::new({
            let table = Arc::clone(&table);
            let calls = Arc::clone(&calls);
            let slot = Arc::clone(&slot);
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(id) = *slot.lock() {
                    table.unregister_id(id);
                }
            }
        }));
        *slot.lock() = Some(id);

        assert_eq!(table.invoke(id, |f| f()), Some(()));
        assert_eq!(table.invoke(id, |f| f()), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn repeated_cycles_do_not_grow() {
        let table = table();
        let f: Arc<Callback> = Arc::new(|x| x);
        for _ in 0..10_000 {
            let id = table.register(Arc::clone(&f));
            assert_eq!(table.unregister(&f), Some(id));
        }
        assert!(table.is_empty());
        assert_eq!(table.inner.lock().next_id, 10_001);
    }

    #[test]
    fn wrap_around_skips_live_ids() {
        let table = table();
        let keep = table.register(Arc::new(|x| x));
        assert_eq!(keep.get(), 1);

        table.inner.lock().next_id = u32::MAX;
        let last = table.register(Arc::new(|x| x));
        assert_eq!(last.get(), u32::MAX);

        // 0 is never issued and 1 is still live.
        let wrapped = table.register(Arc::new(|x| x));
        assert_eq!(wrapped.get(), 2);
    }

    #[test]
    fn concurrent_register_and_unregister() {
        let table: Arc<CallbackTable<Callback>> = Arc::new(table());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for i in 0..500u32 {
                        let f: Arc<Callback> = Arc::new(move |x| x + t + i);
                        let id = table.register(Arc::clone(&f));
                        assert_eq!(table.invoke(id, |f| f(0)), Some(t + i));
                        assert_eq!(table.unregister(&f), Some(id));
                        assert!(table.lookup(id).is_none());
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert!(table.is_empty());
    }

    #[test]
    fn registration_guard_unregisters_on_drop() {
        let table: Arc<CallbackTable<Callback>> = Arc::new(table());
        let guard = CallbackTable::scoped(&table, Arc::new(|x| x));
        let id = guard.id();
        assert!(table.lookup(id).is_some());

        drop(guard);
        assert!(table.lookup(id).is_none());

        let guard = CallbackTable::scoped(&table, Arc::new(|x| x));
        let id = guard.id();
        guard.unregister();
        assert!(table.lookup(id).is_none());
    }

    #[test]
    fn registration_guard_only_removes_its_own_id() {
        let table: Arc<CallbackTable<Callback>> = Arc::new(table());
        let f: Arc<Callback> = Arc::new(|x| x);
        let direct = table.register(Arc::clone(&f));

        let guard = CallbackTable::scoped(&table, Arc::clone(&f));
        assert_ne!(guard.id(), direct);
        assert!(table.unregister_id(guard.id()).is_some());

        drop(guard);
        assert!(table.lookup(direct).is_some());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn registration_guard_survives_shared_callback() {
        let table: Arc<CallbackTable<Callback>> = Arc::new(table());
        let f: Arc<Callback> = Arc::new(|x| x);
        let first = CallbackTable::scoped(&table, Arc::clone(&f));
        let second = CallbackTable::scoped(&table, Arc::clone(&f));

        let kept = second.id();
        drop(first);
        assert!(table.lookup(kept).is_some());
        drop(second);
        assert!(table.is_empty());
    }
}
