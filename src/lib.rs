#![doc(
    html_logo_url = "https://raw.githubusercontent.com/vertexclique/petek/master/art/petek-square.svg"
)]
//! Petek: lock-free MPMC FIFO queue with built-in split reference
//! counting.
//!
//! Most lock-free queues outsource the hard part — freeing a popped node
//! while racing threads may still hold raw pointers into it — to an
//! external reclaimer (epochs, hazard pointers, a GC). Petek keeps the
//! reclamation inside the node: every external reference carries an
//! acquisition count, every node carries a packed counter pair, and the
//! thread whose release drives both halves to zero frees the node on the
//! spot.
//!
//! # Key Properties
//!
//! - **Lock-Free Progress**: producers that lose the publication race
//!   help the winner, so no stalled thread can wedge the queue
//! - **Immediate Reclamation**: a node is freed by its last release, not
//!   at some later epoch boundary — memory tracks queue contents
//! - **No Thread Registration**: no pins, guards, or thread-local state;
//!   any thread may push or pop at any time
//! - **Unbounded**: push never fails and never waits for consumers
//!
//! # Example
//!
//! ```rust
//! use petek::Queue;
//!
//! let q = Queue::new();
//! q.push("hello");
//! q.push("world");
//! assert_eq!(q.try_pop(), Some("hello"));
//! assert_eq!(q.try_pop(), Some("world"));
//! assert_eq!(q.try_pop(), None);
//! ```

#![warn(missing_docs)]

mod counter;
mod pair;
mod queue;

pub use queue::Queue;
