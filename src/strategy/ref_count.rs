use core::ptr::NonNull;

use tracing::trace;

use crate::control::ControlBlock;
use crate::node::Node;
use crate::pool::Pool;

use super::Reclaim;

////////////////////////////////////////////////////////////////////////////////////////////////////
// RefCounted
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Lock-free reclamation through per-node atomic reference counts.
///
/// Every handle to a node owns one reference and so does the `next` pointer of
/// the node's predecessor (the *list reference*).
/// Acquiring the successor of a node first increments the successor's count
/// and then validates that the node still links to it, undoing the increment
/// otherwise.
/// The thread whose decrement brings the count to zero claims the node by
/// setting its reclaimed flag and returns it to the queue's node pool, after
/// which it releases the list reference the node itself held on its own
/// successor.
///
/// Pooled nodes are re-used by subsequent pushes to the same queue and are
/// only deallocated when the queue is dropped.
///
/// Only available on 64-bit targets.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub struct RefCounted;

/********** impl inherent *************************************************************************/

impl RefCounted {
    #[inline]
    fn increment<T>(node: &Node<T>) {
        let _ = node.update(|control| control.with_ref_count(control.ref_count() + 1));
    }

    /// Decrements the count of `node` and returns `true` if the caller has
    /// claimed the node for reclamation.
    #[inline]
    fn decrement<T>(node: &Node<T>) -> bool {
        let prev = node.update(|control| {
            assert!(control.ref_count() > 0, "reference count underflow");
            control.with_ref_count(control.ref_count() - 1)
        });

        let curr = prev.with_ref_count(prev.ref_count() - 1);
        if curr.ref_count() > 0 || curr.is_reclaimed() {
            return false;
        }

        // only the exact zero-count word may be claimed, a concurrent increment by a
        // stale handle lets the CAS fail and hands the claim to that handle's release
        node.compare_exchange(curr, curr.with_reclaimed(true)).is_ok()
    }

    /// Returns `node` and every successor whose count drops to zero in turn to
    /// the pool.
    ///
    /// # Safety
    ///
    /// `node` must have been claimed by the caller.
    #[inline]
    unsafe fn reclaim<T>(pool: &Pool<T>, mut node: NonNull<Node<T>>) {
        loop {
            let next = node.as_ref().next();
            pool.push(node);

            match NonNull::new(next) {
                Some(next) if Self::decrement(next.as_ref()) => node = next,
                _ => return,
            }
        }
    }
}

/********** impl Reclaim **************************************************************************/

unsafe impl Reclaim for RefCounted {
    type Arena<T> = Pool<T>;

    #[inline]
    fn alloc_sentinel<T>() -> NonNull<Node<T>> {
        // the queue itself owns the head's only reference
        Node::sentinel(ControlBlock::EMPTY.with_ref_count(1))
    }

    #[inline]
    fn alloc<T>(arena: &Self::Arena<T>, value: T) -> NonNull<Node<T>> {
        match arena.pop() {
            Some(node) => unsafe {
                let node_ref = node.as_ref();
                node_ref.write_value(value);
                // stale handles may have incremented the count of the pooled node, their
                // references have to survive re-initialization
                let _ = node_ref.update(|control| {
                    ControlBlock::EMPTY.with_ref_count(control.ref_count() + 1)
                });

                node
            },
            None => arena.alloc(value, ControlBlock::EMPTY.with_ref_count(1)),
        }
    }

    #[inline]
    unsafe fn acquire<T>(_: &Self::Arena<T>, node: NonNull<Node<T>>) {
        Self::increment(node.as_ref());
    }

    #[inline]
    unsafe fn protect_next<T>(
        arena: &Self::Arena<T>,
        node: &Node<T>,
    ) -> (ControlBlock, Option<NonNull<Node<T>>>) {
        loop {
            let control = node.load();
            let next = match NonNull::new(control.next_ptr::<Node<T>>()) {
                Some(next) => next,
                None => return (control, None),
            };

            // the successor may already have been pooled or even re-used, but since pooled
            // nodes are never freed, incrementing its count is still safe
            Self::increment(next.as_ref());
            let validated = node.load();
            if validated.next() == control.next() {
                return (validated, Some(next));
            }

            trace!("successor changed while acquiring it, retrying");
            Self::release(arena, next);
        }
    }

    #[inline]
    unsafe fn release<T>(arena: &Self::Arena<T>, node: NonNull<Node<T>>) {
        if Self::decrement(node.as_ref()) {
            Self::reclaim(arena, node);
        }
    }

    #[inline]
    unsafe fn retire<T>(arena: &Self::Arena<T>, first: *mut Node<T>, _: *mut Node<T>) {
        // the remainder of the run is released by the cascade in `reclaim`
        if let Some(first) = NonNull::new(first) {
            Self::release(arena, first);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;

    #[test]
    fn acquire_release_symmetry() {
        const THREADS: usize = 8;
        const ITERATIONS: usize = 10_000;

        let pool = Arc::new(Pool::new());
        let node = pool.alloc(0usize, ControlBlock::EMPTY.with_ref_count(1));
        let addr = node.as_ptr() as usize;
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let node = NonNull::new(addr as *mut Node<usize>).unwrap();
                    barrier.wait();
                    for _ in 0..ITERATIONS {
                        unsafe {
                            RefCounted::acquire(&*pool, node);
                            RefCounted::release(&*pool, node);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let control = unsafe { node.as_ref().load() };
        assert_eq!(control.ref_count(), 1);
        assert!(!control.is_reclaimed());
        assert!(pool.is_empty());

        unsafe {
            RefCounted::release(&*pool, node);
            assert!(node.as_ref().load().is_reclaimed());
        }
        assert!(!pool.is_empty());
    }

    #[test]
    fn reclaim_exactly_once() {
        let pool = Pool::new();
        let node = pool.alloc(1, ControlBlock::EMPTY.with_ref_count(1));

        unsafe {
            assert_eq!(node.as_ref().take_value(), 1);
            RefCounted::release(&pool, node);
        }
        assert_eq!(pool.count(), 1);

        // a stale handle acquiring and releasing the pooled node must not push it again
        unsafe {
            RefCounted::increment(node.as_ref());
            assert!(!RefCounted::decrement(node.as_ref()));
        }
        assert_eq!(pool.count(), 1);
    }

    #[test]
    fn stale_reference_survives_reuse() {
        let pool = Pool::new();
        let node = pool.alloc(1, ControlBlock::EMPTY.with_ref_count(1));

        unsafe {
            assert_eq!(node.as_ref().take_value(), 1);
            RefCounted::release(&pool, node);
            // stale increment on the pooled node
            RefCounted::increment(node.as_ref());

            let reused = RefCounted::alloc(&pool, 2);
            assert_eq!(reused, node);
            let control = reused.as_ref().load();
            assert_eq!(control.ref_count(), 2);
            assert!(!control.is_reclaimed());
            assert!(!control.is_marked());
            assert!(control.next_ptr::<Node<i32>>().is_null());
            assert_eq!(*reused.as_ref().value(), 2);

            // the stale handle lets go again
            RefCounted::release(&pool, reused);
            assert_eq!(reused.as_ref().load().ref_count(), 1);
            assert!(pool.is_empty());

            reused.as_ref().drop_value();
            RefCounted::release(&pool, reused);
        }

        assert!(!pool.is_empty());
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn cascade_releases_successors() {
        let pool = Pool::new();
        let a = pool.alloc(1, ControlBlock::EMPTY.with_ref_count(1));
        let b = pool.alloc(2, ControlBlock::EMPTY.with_ref_count(1));
        let c = pool.alloc(3, ControlBlock::EMPTY.with_ref_count(1));

        unsafe {
            a.as_ref().link(b.as_ptr());
            b.as_ref().link(c.as_ptr());
            // an extra handle keeps `c` alive
            RefCounted::acquire(&pool, c);

            for node in [a, b, c] {
                node.as_ref().drop_value();
            }

            RefCounted::retire(&pool, a.as_ptr(), c.as_ptr());
        }

        assert_eq!(pool.count(), 2);
        assert_eq!(unsafe { c.as_ref().load().ref_count() }, 1);

        unsafe { RefCounted::release(&pool, c) };
        assert_eq!(pool.count(), 3);
    }
}
