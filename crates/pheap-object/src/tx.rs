//! Crash-atomic groups of field writes.
//!
//! A transaction is bound to the calling thread and to one heap. While it is
//! active, every field write on that heap made from this thread is buffered
//! instead of committed; reads from the same thread see the buffered values.
//! The outermost [`Transaction::run`] hands the whole buffer to
//! [`Heap::commit`](pheap_store::Heap::commit) as one group, or drops it if
//! anything failed.
//!
//! Regions allocated inside a transaction are released again when it does
//! not commit. A process crash before the outcome is known can still leave
//! such regions allocated but unreferenced.
//!
//! Mutating an object on any other heap while a transaction is open fails
//! and dooms the transaction: that write could not be rolled back with it.

use std::cell::RefCell;

use indexmap::IndexMap;
use pheap_store::{SlotWrite, WriteBatch};
use pheap_types::{Handle, HeapId, Slot};
use tracing::{debug, warn};

use crate::error::{ObjectError, ObjectResult};
use crate::object::SharedHeap;

thread_local! {
    static ACTIVE: RefCell<Option<ActiveTransaction>> = const { RefCell::new(None) };
}

struct ActiveTransaction {
    heap: SharedHeap,
    depth: u32,
    /// Set when an enclosed `run` failed; the outermost commit is refused.
    doomed: bool,
    writes: IndexMap<(Handle, u32), Slot>,
    /// Regions allocated by this transaction, released if it does not commit.
    allocations: Vec<Handle>,
}

impl ActiveTransaction {
    fn roll_back(&self) {
        for &handle in self.allocations.iter().rev() {
            if let Err(e) = self.heap.deallocate(handle) {
                warn!(heap = %self.heap.id(), %handle, error = %e, "could not release region of aborted transaction");
            }
        }
        if !self.allocations.is_empty() {
            debug!(heap = %self.heap.id(), released = self.allocations.len(), "transaction allocations released");
        }
    }
}

enum Entry {
    Outermost,
    Nested,
}

/// Unwinds the thread-local state if `action` panics.
struct Guard {
    entry: Option<Entry>,
}

impl Guard {
    fn disarm(&mut self) {
        self.entry = None;
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        match self.entry.take() {
            Some(Entry::Outermost) => {
                if let Some(tx) = ACTIVE.with(|cell| cell.borrow_mut().take()) {
                    tx.roll_back();
                }
                warn!("transaction discarded during unwind");
            }
            Some(Entry::Nested) => ACTIVE.with(|cell| {
                if let Some(tx) = cell.borrow_mut().as_mut() {
                    tx.depth -= 1;
                    tx.doomed = true;
                }
            }),
            None => {}
        }
    }
}

/// Entry point for transactional work.
pub struct Transaction;

impl Transaction {
    /// Run `action` so that every field write it makes on `heap` becomes
    /// visible and durable as one group, or not at all.
    ///
    /// Nested calls on the same heap join the enclosing transaction; only the
    /// outermost call commits. An error returned by `action` at any depth
    /// discards the whole transaction and is passed back unchanged. If an
    /// enclosed call failed but the outer action still returned `Ok`, the
    /// commit is refused with [`ObjectError::TransactionAbort`]. A failed
    /// commit is reported the same way, wrapping the cause.
    pub fn run<R, E, F>(heap: &SharedHeap, action: F) -> Result<R, E>
    where
        F: FnOnce() -> Result<R, E>,
        E: From<ObjectError>,
    {
        let entry = Self::enter(heap).map_err(E::from)?;
        let nested = matches!(entry, Entry::Nested);
        let mut guard = Guard { entry: Some(entry) };
        let result = action();
        guard.disarm();

        if nested {
            ACTIVE.with(|cell| {
                if let Some(tx) = cell.borrow_mut().as_mut() {
                    tx.depth -= 1;
                    if result.is_err() {
                        tx.doomed = true;
                    }
                }
            });
            return result;
        }

        let tx = ACTIVE
            .with(|cell| cell.borrow_mut().take())
            .ok_or_else(|| E::from(ObjectError::abort("transaction state lost")))?;

        match result {
            Err(e) => {
                warn!(heap = %tx.heap.id(), discarded = tx.writes.len(), "transaction aborted");
                tx.roll_back();
                Err(e)
            }
            Ok(_) if tx.doomed => {
                warn!(heap = %tx.heap.id(), discarded = tx.writes.len(), "transaction doomed by enclosed failure");
                tx.roll_back();
                Err(E::from(ObjectError::abort("an enclosed operation failed")))
            }
            Ok(value) => {
                let batch: WriteBatch = tx
                    .writes
                    .iter()
                    .map(|(&(handle, slot), &value)| SlotWrite {
                        handle,
                        slot,
                        value,
                    })
                    .collect();
                if let Err(e) = tx.heap.commit(&batch) {
                    tx.roll_back();
                    return Err(E::from(ObjectError::TransactionAbort {
                        reason: "commit failed".into(),
                        source: Some(Box::new(ObjectError::from(e))),
                    }));
                }
                debug!(heap = %tx.heap.id(), writes = batch.len(), "transaction committed");
                Ok(value)
            }
        }
    }

    /// Returns `true` if this thread is inside a transaction.
    pub fn is_active() -> bool {
        ACTIVE.with(|cell| cell.borrow().is_some())
    }

    /// Nesting depth of this thread's transaction (0 when inactive).
    pub fn depth() -> u32 {
        ACTIVE.with(|cell| cell.borrow().as_ref().map_or(0, |tx| tx.depth))
    }

    fn enter(heap: &SharedHeap) -> Result<Entry, ObjectError> {
        ACTIVE.with(|cell| {
            let mut active = cell.borrow_mut();
            match active.as_mut() {
                Some(tx) if tx.heap.id() == heap.id() => {
                    tx.depth += 1;
                    Ok(Entry::Nested)
                }
                Some(tx) => Err(ObjectError::abort(format!(
                    "cannot open a transaction on {} inside one on {}",
                    heap.id(),
                    tx.heap.id()
                ))),
                None => {
                    *active = Some(ActiveTransaction {
                        heap: heap.clone(),
                        depth: 1,
                        doomed: false,
                        writes: IndexMap::new(),
                        allocations: Vec::new(),
                    });
                    debug!(heap = %heap.id(), "transaction started");
                    Ok(Entry::Outermost)
                }
            }
        })
    }
}

/// Check a mutation of `heap` against this thread's transaction.
///
/// Returns `true` if the transaction is on `heap` and the mutation must go
/// through it, `false` if no transaction is open. A transaction on another
/// heap is doomed and the mutation refused.
pub(crate) fn enlist(heap: HeapId) -> ObjectResult<bool> {
    ACTIVE.with(|cell| match cell.borrow_mut().as_mut() {
        None => Ok(false),
        Some(tx) if tx.heap.id() == heap => Ok(true),
        Some(tx) => {
            tx.doomed = true;
            warn!(active = %tx.heap.id(), target = %heap, "mutation of another heap inside a transaction");
            Err(ObjectError::abort(format!(
                "cannot mutate {heap} inside a transaction on {}",
                tx.heap.id()
            )))
        }
    })
}

/// Buffer a write in this thread's transaction on `heap`. Returns `false`
/// when no transaction is open and the caller must commit the write itself.
pub(crate) fn buffer_write(
    heap: HeapId,
    handle: Handle,
    slot: u32,
    value: Slot,
) -> ObjectResult<bool> {
    if !enlist(heap)? {
        return Ok(false);
    }
    ACTIVE.with(|cell| {
        if let Some(tx) = cell.borrow_mut().as_mut() {
            tx.writes.insert((handle, slot), value);
        }
    });
    Ok(true)
}

/// Remember a region allocated inside this thread's transaction on `heap`.
pub(crate) fn track_allocation(heap: HeapId, handle: Handle) {
    ACTIVE.with(|cell| match cell.borrow_mut().as_mut() {
        Some(tx) if tx.heap.id() == heap => tx.allocations.push(handle),
        _ => {}
    })
}

/// The value this thread's transaction has buffered for a slot, if any.
pub(crate) fn pending_write(heap: HeapId, handle: Handle, slot: u32) -> Option<Slot> {
    ACTIVE.with(|cell| match cell.borrow().as_ref() {
        Some(tx) if tx.heap.id() == heap => tx.writes.get(&(handle, slot)).copied(),
        _ => None,
    })
}

/// Overlay this thread's buffered writes onto a slot snapshot.
pub(crate) fn overlay_pending(heap: HeapId, handle: Handle, slots: &mut [Slot]) {
    ACTIVE.with(|cell| {
        if let Some(tx) = cell.borrow().as_ref().filter(|tx| tx.heap.id() == heap) {
            for (&(h, slot), value) in &tx.writes {
                if h == handle {
                    if let Some(target) = slots.get_mut(slot as usize) {
                        *target = *value;
                    }
                }
            }
        }
    })
}
