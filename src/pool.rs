//! A lock-free stack of reclaimed nodes that allocation draws from.
//!
//! Nodes are type-stable: once allocated by a queue they are only ever handed
//! back and forth between the queue's list and its pool and are not returned
//! to the global allocator before the pool itself is dropped.
//! Consequently, a stale pointer to a pooled node always points to a valid
//! `Node`, which is what makes it sound for the reference counting strategy
//! to increment a node's count before validating that it is still linked.
//!
//! Popping uses a tag in the upper bits of the head word, which is incremented
//! on every successful pop, so a head that was popped and pushed again in the
//! mean time is not mistaken for the one that was originally read.

use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::control::ControlBlock;
use crate::node::Node;

const PTR_BITS: u32 = 48;
const PTR_MASK: usize = (1 << PTR_BITS) - 1;
const TAG_ONE: usize = 1 << PTR_BITS;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Pool
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The per-queue node pool used by the reference counting strategy.
pub struct Pool<T> {
    head: AtomicUsize,
    allocated: AtomicUsize,
    _marker: PhantomData<*mut Node<T>>,
}

/********** impl Send & Sync *********************************************************************/

unsafe impl<T: Send> Send for Pool<T> {}
unsafe impl<T: Send> Sync for Pool<T> {}

/********** impl Default **************************************************************************/

impl<T> Default for Pool<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/********** impl inherent *************************************************************************/

impl<T> Pool<T> {
    /// Creates a new empty `Pool`.
    #[inline]
    pub const fn new() -> Self {
        Self { head: AtomicUsize::new(0), allocated: AtomicUsize::new(0), _marker: PhantomData }
    }

    /// Returns the number of nodes that were allocated from the global
    /// allocator on behalf of this pool.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Returns `true` if the pool is currently empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        Self::decompose(self.head.load(Ordering::Relaxed)).0.is_null()
    }

    /// Allocates a fresh node holding `value` with the control word `control`,
    /// which is owned by the pool from now on.
    #[inline]
    pub fn alloc(&self, value: T, control: ControlBlock) -> NonNull<Node<T>> {
        let allocated = self.allocated.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(allocated, "node pool exhausted, allocating fresh node");
        Node::boxed(value, control)
    }

    /// Pushes `node` to the top of the pool.
    ///
    /// # Safety
    ///
    /// `node` must have been claimed for reclamation by the caller, so no
    /// other thread may push it concurrently.
    #[inline]
    pub unsafe fn push(&self, node: NonNull<Node<T>>) {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let (top, tag) = Self::decompose(head);
            node.as_ref().set_free_next(top);

            // (POO:1) this `Release` CAS synchronizes-with the `Acquire` loads in (POO:2) and
            // (POO:3)
            match self.head.compare_exchange_weak(
                head,
                Self::compose(node.as_ptr(), tag),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    /// Pops the node on top of the pool, if there is any.
    #[inline]
    pub fn pop(&self) -> Option<NonNull<Node<T>>> {
        // (POO:2) this `Acquire` load synchronizes-with the `Release` CAS in (POO:1)
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let (top, tag) = Self::decompose(head);
            let top = NonNull::new(top)?;
            // pooled nodes are never freed while the pool is alive, so reading a
            // stale top is safe, the tag makes the following CAS fail in that case
            let next = unsafe { top.as_ref().free_next() };

            // (POO:3) this `Acquire` CAS synchronizes-with the `Release` CAS in (POO:1)
            match self.head.compare_exchange_weak(
                head,
                Self::compose(next, tag.wrapping_add(1)),
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(top),
                Err(actual) => head = actual,
            }
        }
    }

    /// Same as repeatedly popping until the pool is empty, but without
    /// synchronization.
    /// Requires exclusive access through the `&mut self` receiver.
    #[inline]
    pub fn take_all_unsync(&mut self) -> *mut Node<T> {
        let head = self.head.swap(0, Ordering::Relaxed);
        Self::decompose(head).0
    }

    /// Counts the pooled nodes, only meaningful while no other thread
    /// accesses the pool.
    #[cfg(test)]
    pub fn count(&self) -> usize {
        let mut count = 0;
        let mut curr = Self::decompose(self.head.load(Ordering::Acquire)).0;
        while let Some(node) = unsafe { curr.as_ref() } {
            count += 1;
            curr = node.free_next();
        }

        count
    }

    #[inline]
    fn compose(node: *mut Node<T>, tag: usize) -> usize {
        debug_assert_eq!(node as usize & !PTR_MASK, 0, "node address exceeds 48 bits");
        (node as usize & PTR_MASK) | ((tag << PTR_BITS) & !PTR_MASK)
    }

    #[inline]
    fn decompose(head: usize) -> (*mut Node<T>, usize) {
        ((head & PTR_MASK) as *mut Node<T>, head / TAG_ONE)
    }
}

/********** impl Debug ****************************************************************************/

impl<T> fmt::Debug for Pool<T> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Pool")
            .field("allocated", &self.allocated())
            .field("is_empty", &self.is_empty())
            .finish()
    }
}

/********** impl Drop *****************************************************************************/

impl<T> Drop for Pool<T> {
    #[inline]
    fn drop(&mut self) {
        let mut curr = self.take_all_unsync();
        while let Some(node) = NonNull::new(curr) {
            unsafe {
                curr = node.as_ref().free_next();
                // the values of pooled nodes have always been moved out or dropped before
                Node::dealloc(node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_lifo() {
        let pool = Pool::new();
        assert!(pool.pop().is_none());

        let nodes: Vec<_> = (0..3).map(|_| Node::<i32>::sentinel(ControlBlock::EMPTY)).collect();
        for &node in &nodes {
            unsafe { pool.push(node) };
        }

        assert_eq!(pool.count(), 3);
        assert_eq!(pool.pop(), Some(nodes[2]));
        assert_eq!(pool.pop(), Some(nodes[1]));
        unsafe { pool.push(nodes[2]) };
        assert_eq!(pool.count(), 2);
        assert_eq!(pool.allocated(), 0);
        unsafe { pool.push(nodes[1]) };
    }

    #[test]
    fn tag_changes_on_pop() {
        let pool = Pool::<i32>::new();
        let node = Node::sentinel(ControlBlock::EMPTY);

        unsafe { pool.push(node) };
        let before = pool.head.load(Ordering::Relaxed);
        assert_eq!(pool.pop(), Some(node));
        unsafe { pool.push(node) };
        let after = pool.head.load(Ordering::Relaxed);

        assert_eq!(Pool::<i32>::decompose(before).0, Pool::<i32>::decompose(after).0);
        assert_ne!(before, after);
    }

    #[test]
    fn alloc_counts_fresh_nodes() {
        let pool = Pool::new();
        let node = pool.alloc(7, ControlBlock::EMPTY);
        assert_eq!(pool.allocated(), 1);
        assert!(pool.is_empty());

        unsafe {
            assert_eq!(node.as_ref().take_value(), 7);
            pool.push(node);
        }

        assert!(!pool.is_empty());
        assert_eq!(pool.count(), 1);
        assert_eq!(pool.allocated(), 1);
    }
}
