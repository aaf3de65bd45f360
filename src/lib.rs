//! An unbounded lock-free multi-producer/multi-consumer linked queue with
//! pluggable memory reclamation.
//!
//! The queue is built on Tim Harris' lock-free linked list [[1]]: elements are
//! removed by first *marking* a node as logically removed with a single
//! *compare-and-swap* and only then unlinking it physically.
//! Each node stores its removal marker and the pointer to its successor in
//! one packed machine word, so both are always updated together and a marked
//! node can no longer be linked to by new successors.
//!
//! Marked nodes a removing thread failed to unlink are unlinked by the next
//! traversal that encounters them.
//!
//! # Consistency
//!
//! The queue is **not** linearizable.
//! Elements pushed along a single causal chain (e.g. by one thread) are popped
//! in FIFO order, and every element is popped at most once, but concurrent
//! operations need not agree on a single global order.
//! The element count returned by [`len_hint`][Queue::len_hint] is advisory and
//! only exact at quiescence.
//!
//! # Memory Reclamation
//!
//! Removed nodes can not always be deallocated right away, since other threads
//! might still be traversing them.
//! The queue is generic over a [`Reclaim`] strategy, which decides how this
//! problem is solved:
//!
//! - [`Locked`]: all operations on a queue are serialized through one mutex,
//!   removed nodes are deallocated immediately.
//! - [`RefCounted`]: every node carries an atomic reference count in its
//!   control word, nodes are returned to a per-queue pool once their count
//!   drops to zero (64-bit targets only).
//! - [`Leak`]: removed nodes are never deallocated.
//!
//! The default strategy ([`DefaultReclaim`]) is chosen by the crate's cargo
//! features: `ref-count` (enabled by default) selects [`RefCounted`], `lock`
//! selects [`Locked`] and disabling both selects [`Leak`].
//!
//! # Blocking
//!
//! Pushing and popping never block (except under [`Locked`]).
//! Consumers that prefer to sleep while the queue is empty can use
//! [`wait_for`][Queue::wait_for], which only involves a mutex while somebody
//! is actually waiting.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use harris_queue::Queue;
//!
//! let queue: Arc<Queue<i32>> = Arc::new(Queue::new());
//!
//! let producer = {
//!     let queue = Arc::clone(&queue);
//!     thread::spawn(move || {
//!         for i in 0..100 {
//!             queue.push_back(i);
//!         }
//!     })
//! };
//!
//! producer.join().unwrap();
//!
//! let mut expected = 0;
//! while let Some(i) = queue.pop_front() {
//!     assert_eq!(i, expected);
//!     expected += 1;
//! }
//!
//! assert_eq!(expected, 100);
//! ```
//!
//! [1]: https://doi.org/10.1007/3-540-45414-4_21

#![warn(missing_docs)]

mod control;
mod node;
#[cfg(target_pointer_width = "64")]
mod pool;
mod queue;
mod shared;
mod strategy;
mod wait;


use cfg_if::cfg_if;

pub use crate::queue::Queue;
#[cfg(target_pointer_width = "64")]
pub use crate::strategy::RefCounted;
pub use crate::strategy::{Leak, Locked, Reclaim};
pub use crate::wait::WaitStatus;

cfg_if! {
    if #[cfg(all(feature = "ref-count", target_pointer_width = "64"))] {
        /// The reclamation strategy selected by the crate's cargo features.
        pub type DefaultReclaim = RefCounted;
    } else if #[cfg(any(feature = "lock", feature = "ref-count"))] {
        /// The reclamation strategy selected by the crate's cargo features.
        pub type DefaultReclaim = Locked;
    } else {
        /// The reclamation strategy selected by the crate's cargo features.
        pub type DefaultReclaim = Leak;
    }
}
