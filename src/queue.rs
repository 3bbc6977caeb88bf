//! Unbounded MPMC FIFO queue over counted references.
//!
//! The queue is a singly-linked list with a sentinel at the tail: `head`
//! points at the oldest node, `tail` at the sentinel a producer will
//! publish into next. Both slots, and every node's `next`, hold a
//! *counted reference* `{external_count, pointer}` updated by 128-bit
//! CAS. Acquiring a slot increments the count embedded in it; that
//! acquisition is later cashed in against the node's [`SplitCounter`],
//! either directly (`release_ref`) or folded into a slot retirement
//! (`detach_slot`). Whoever drives the node's counter to zero frees it —
//! no epochs, no hazard pointers, no guard objects.
//!
//! Producers race a CAS on the sentinel's `data`; the winner links in a
//! fresh sentinel and advances `tail`. Losers *help*: they install their
//! own spare node as the successor and advance `tail` themselves, so a
//! producer stalled between publishing data and linking the successor
//! never wedges the queue. The helping step is what makes the queue
//! lock-free rather than merely obstruction-free.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

use crate::counter::SplitCounter;
use crate::pair::Pair;

/// A decoded counted reference: how many acquisitions the originating
/// slot has handed out, and the node they point at.
struct CountedRef<T> {
    count: u64,
    ptr: *mut Node<T>,
}

impl<T> Copy for CountedRef<T> {}

impl<T> Clone for CountedRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

/// An atomic counted-reference slot. Pointer in the lo word, external
/// count in the hi word, so a null check never decodes the count.
struct Link<T> {
    pair: Pair,
    _marker: std::marker::PhantomData<*mut Node<T>>,
}

impl<T> Link<T> {
    fn new(count: u64, ptr: *mut Node<T>) -> Self {
        Self {
            pair: Pair::new(ptr as usize as u64, count),
            _marker: std::marker::PhantomData,
        }
    }

    const fn null() -> Self {
        Self {
            pair: Pair::new(0, 0),
            _marker: std::marker::PhantomData,
        }
    }

    #[inline]
    fn load(&self) -> CountedRef<T> {
        let (lo, hi) = self.pair.load();
        CountedRef {
            count: hi,
            ptr: lo as usize as *mut Node<T>,
        }
    }

    /// Pointer half only — a single 8-byte load on native targets.
    #[inline]
    fn load_ptr(&self) -> *mut Node<T> {
        self.pair.load_lo() as usize as *mut Node<T>
    }

    /// Acquire a usable reference: bump the embedded external count and
    /// return the incremented pair. This is the only legal way to obtain
    /// a dereferencable pointer from a queue-level slot; the caller owes
    /// exactly one matching release (`release_ref`) or slot retirement
    /// (`detach_slot`).
    #[inline]
    fn acquire(&self) -> CountedRef<T> {
        let (mut lo, mut hi) = self.pair.load();
        loop {
            match self.pair.compare_exchange_weak(lo, hi, lo, hi + 1) {
                Ok(_) => {
                    return CountedRef {
                        count: hi + 1,
                        ptr: lo as usize as *mut Node<T>,
                    };
                }
                Err((l, h)) => {
                    lo = l;
                    hi = h;
                }
            }
        }
    }

    /// Replace `old` with `new`, failing (with the observed value) if the
    /// slot has moved on — including by a mere count bump.
    #[inline]
    fn compare_exchange(
        &self,
        old: CountedRef<T>,
        new: CountedRef<T>,
    ) -> Result<(), CountedRef<T>> {
        match self.pair.compare_exchange(
            old.ptr as usize as u64,
            old.count,
            new.ptr as usize as u64,
            new.count,
        ) {
            Ok(_) => Ok(()),
            Err((lo, hi)) => Err(CountedRef {
                count: hi,
                ptr: lo as usize as *mut Node<T>,
            }),
        }
    }

    /// One-shot transition from the null reference to `new`. Used for a
    /// node's `next`, which is written exactly once; on failure the
    /// already-installed successor is returned.
    #[inline]
    fn try_install(&self, new: CountedRef<T>) -> Result<(), CountedRef<T>> {
        match self
            .pair
            .compare_exchange(0, 0, new.ptr as usize as u64, new.count)
        {
            Ok(_) => Ok(()),
            Err((lo, hi)) => Err(CountedRef {
                count: hi,
                ptr: lo as usize as *mut Node<T>,
            }),
        }
    }
}

struct Node<T> {
    /// Null until a producer wins the publication CAS; exchanged back to
    /// null by the one consumer that pops this node.
    data: AtomicPtr<T>,
    counter: SplitCounter,
    /// Null counted reference until the successor is linked in. Written
    /// once, by the publishing producer or by a helper.
    next: Link<T>,
}

impl<T> Node<T> {
    fn alloc() -> *mut Self {
        Box::into_raw(Box::new(Self {
            data: AtomicPtr::new(ptr::null_mut()),
            counter: SplitCounter::new(),
            next: Link::null(),
        }))
    }

    /// Cash in one acquisition against the node, freeing it if this was
    /// the last reference overall.
    ///
    /// # Safety
    ///
    /// `node` must come from an acquisition the caller has not yet
    /// released or folded into a slot retirement.
    #[inline]
    unsafe fn release_ref(node: *mut Self) {
        if unsafe { (*node).counter.release_ref() } {
            unsafe { drop(Box::from_raw(node)) };
        }
    }

    /// Retire a queue-level slot's reference. `old` is the exact value
    /// the retiring thread CAS-replaced out of the slot; its count folds
    /// the slot's baseline reference and the retirer's own acquisition
    /// (hence the −2), and the surplus is handed to the internal count.
    ///
    /// # Safety
    ///
    /// The caller must have CAS-replaced `old` out of `head` or `tail`,
    /// and must not touch `old.ptr` afterwards.
    #[inline]
    unsafe fn detach_slot(old: CountedRef<T>) {
        debug_assert!(old.count >= 2, "slot retired without an acquisition");
        let handover = old.count as i32 - 2;
        if unsafe { (*old.ptr).counter.detach_slot(handover) } {
            unsafe { drop(Box::from_raw(old.ptr)) };
        }
    }
}

/// Unbounded lock-free MPMC FIFO queue.
///
/// Nodes are reclaimed by split reference counting the moment the last
/// holder lets go — memory usage tracks queue contents, not thread
/// activity.
///
/// # Example
///
/// ```rust
/// use petek::Queue;
///
/// let q = Queue::new();
/// q.push(1);
/// q.push(2);
/// assert_eq!(q.try_pop(), Some(1));
/// assert_eq!(q.try_pop(), Some(2));
/// assert_eq!(q.try_pop(), None);
/// ```
pub struct Queue<T> {
    head: CachePadded<Link<T>>,
    tail: CachePadded<Link<T>>,
}

// SAFETY: values cross threads (pushed on one, popped on another); all
// shared state is behind atomics.
unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    /// Creates an empty queue: one sentinel node, referenced by both
    /// slots at external count 1 each, counter pre-credited at 2.
    pub fn new() -> Self {
        let sentinel = Node::alloc();
        Self {
            head: CachePadded::new(Link::new(1, sentinel)),
            tail: CachePadded::new(Link::new(1, sentinel)),
        }
    }

    /// Appends `value` to the tail of the queue.
    ///
    /// Lock-free: a stalled producer cannot prevent other producers (or
    /// consumers) from completing, because losers of the publication race
    /// install the successor and advance the tail on the winner's behalf.
    pub fn push(&self, value: T) {
        // Both allocations happen before any shared state is touched, so
        // an allocation failure can never leave a half-published node.
        let new_data = Box::into_raw(Box::new(value));
        let mut spare = CountedRef {
            count: 1,
            ptr: Node::alloc(),
        };

        let backoff = Backoff::new();
        loop {
            let old_tail = self.tail.acquire();
            let tail_node = old_tail.ptr;

            // SAFETY: the acquisition above keeps tail_node alive until
            // we release it or retire the slot.
            let published = unsafe {
                (*tail_node)
                    .data
                    .compare_exchange(
                        ptr::null_mut(),
                        new_data,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            };

            if published {
                // The value is in; ownership passed to the queue. Link in
                // our spare as the new sentinel, unless a helper beat us
                // to it with theirs.
                let successor = match unsafe { (*tail_node).next.try_install(spare) } {
                    Ok(()) => spare,
                    Err(installed) => {
                        // SAFETY: our spare never became visible to anyone.
                        unsafe { drop(Box::from_raw(spare.ptr)) };
                        installed
                    }
                };
                self.set_new_tail(old_tail, successor);
                return;
            }

            // Another producer won the sentinel. Help it: install a
            // successor so consumers are not stuck behind a publisher
            // that stalled between its two CASes, then advance tail and
            // retry with a fresh sentinel.
            let target = match unsafe { (*tail_node).next.try_install(spare) } {
                Ok(()) => {
                    let installed = spare;
                    spare = CountedRef {
                        count: 1,
                        ptr: Node::alloc(),
                    };
                    installed
                }
                Err(installed) => installed,
            };
            self.set_new_tail(old_tail, target);
            backoff.spin();
        }
    }

    /// Removes and returns the oldest element, or `None` if the queue
    /// was empty at some point during the call.
    ///
    /// Never blocks; emptiness is an answer, not an error.
    pub fn try_pop(&self) -> Option<T> {
        let backoff = Backoff::new();
        loop {
            let old_head = self.head.acquire();
            let node = old_head.ptr;

            // Empty check comes after the acquisition: with the count
            // bumped, the sentinel cannot be reclaimed between the two
            // slot reads. The acquisition still has to be cashed in —
            // walking away without the release would leave the node's
            // balance one high forever.
            if node == self.tail.load_ptr() {
                // SAFETY: acquired above, not yet released.
                unsafe { Node::release_ref(node) };
                return None;
            }

            // head != tail, so this node's successor was linked before
            // tail moved past it; next is immutable from then on.
            // SAFETY: acquisition keeps node alive.
            let next = unsafe { (*node).next.load() };

            if self.head.compare_exchange(old_head, next).is_ok() {
                // SAFETY: we unlinked node; data was published before the
                // successor was installed, and only the thread that wins
                // the head CAS exchanges it out.
                let data = unsafe { (*node).data.swap(ptr::null_mut(), Ordering::AcqRel) };
                debug_assert!(!data.is_null());
                // SAFETY: exclusive ownership of the value cell.
                let value = unsafe { *Box::from_raw(data) };
                // SAFETY: old_head is exactly what we replaced out of the
                // head slot.
                unsafe { Node::detach_slot(old_head) };
                return Some(value);
            }

            // Lost the race; cash in the acquisition and retry.
            // SAFETY: acquired above, not yet released.
            unsafe { Node::release_ref(node) };
            backoff.spin();
        }
    }

    /// Advances `tail` from `old_tail` to `new_tail`, exactly once across
    /// all racing helpers. Whichever thread performs the replacement
    /// retires the slot's reference; everyone else releases only the
    /// acquisition they walked in with.
    fn set_new_tail(&self, mut old_tail: CountedRef<T>, new_tail: CountedRef<T>) {
        let node = old_tail.ptr;
        loop {
            match self.tail.compare_exchange(old_tail, new_tail) {
                Ok(()) => {
                    // SAFETY: old_tail is exactly what we replaced out of
                    // the tail slot.
                    unsafe { Node::detach_slot(old_tail) };
                    return;
                }
                Err(current) => {
                    if current.ptr != node {
                        // Someone else advanced tail; our acquisition is
                        // all we hold.
                        // SAFETY: acquired by our caller, not yet released.
                        unsafe { Node::release_ref(node) };
                        return;
                    }
                    // Only the count moved; retry with the fresh value so
                    // a successful CAS retires the true acquisition total.
                    old_tail = current;
                }
            }
        }
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        // &mut self: no concurrent access. Drain values through the
        // normal path, then free the one remaining sentinel.
        while self.try_pop().is_some() {}
        let sentinel = self.head.load_ptr();
        // SAFETY: after the drain head == tail == sentinel and no other
        // reference exists.
        unsafe { drop(Box::from_raw(sentinel)) };
    }
}
