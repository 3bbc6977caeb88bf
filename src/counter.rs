//! Per-node split counter.
//!
//! Each node packs two counts into one 32-bit word:
//!
//! - the **external counters** field (low 2 bits) counts how many of the
//!   queue-level slots — head and tail — still hold a counted reference
//!   to the node. It starts at 2 and only ever decreases.
//! - the **internal count** (upper 30 bits, two's complement) absorbs
//!   the acquisitions released against the node. Threads that acquired a
//!   reference and walked away decrement it; a slot retirement hands its
//!   surplus acquisitions over by adding them.
//!
//! Whichever update drives the whole word to zero owns the node and must
//! free it. Keeping both halves in one word makes that decision a single
//! CAS, with no window where two threads both see "last one out".

use core::sync::atomic::{AtomicU32, Ordering};

const EXTERNAL_BITS: u32 = 2;
const EXTERNAL_MASK: u32 = (1 << EXTERNAL_BITS) - 1;

/// Internal count in the upper 30 bits so sign extension on unpack is a
/// single arithmetic shift; the original packs them the other way around
/// but the arithmetic is identical.
const fn pack(internal: i32, external: u32) -> u32 {
    ((internal as u32) << EXTERNAL_BITS) | (external & EXTERNAL_MASK)
}

const fn unpack(bits: u32) -> (i32, u32) {
    ((bits as i32) >> EXTERNAL_BITS, bits & EXTERNAL_MASK)
}

pub(crate) struct SplitCounter(AtomicU32);

impl SplitCounter {
    /// Counter for a freshly allocated node: internal count 0, external
    /// counters 2 — pre-credited for the two slot retirements (tail,
    /// then head) every node eventually goes through.
    pub(crate) const fn new() -> Self {
        Self(AtomicU32::new(pack(0, 2)))
    }

    /// Cash in one acquisition. Called by a thread that acquired a
    /// reference but did not retire the slot it came from.
    ///
    /// Returns `true` when this decrement was the last release overall
    /// and the caller must free the node.
    #[inline]
    pub(crate) fn release_ref(&self) -> bool {
        let mut old = self.0.load(Ordering::Relaxed);
        loop {
            let (internal, external) = unpack(old);
            let new = pack(internal - 1, external);
            match self
                .0
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Acquire)
            {
                // pack(0, 0) == 0
                Ok(_) => return new == 0,
                Err(bits) => old = bits,
            }
        }
    }

    /// Absorb one slot retirement: drop an external counter and hand the
    /// slot's surplus acquisitions (`external_count - 2`: one for the
    /// slot's own reference, one for the retiring thread's acquisition)
    /// over to the internal count.
    ///
    /// Returns `true` when the caller must free the node.
    #[inline]
    pub(crate) fn detach_slot(&self, handover: i32) -> bool {
        let mut old = self.0.load(Ordering::Relaxed);
        loop {
            let (internal, external) = unpack(old);
            debug_assert!(external >= 1, "node detached from more slots than exist");
            let new = pack(internal + handover, external - 1);
            match self
                .0
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return new == 0,
                Err(bits) => old = bits,
            }
        }
    }
}
