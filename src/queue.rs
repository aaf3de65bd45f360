use core::any;
use core::fmt;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_utils::CachePadded;
use tracing::{debug, trace};

use crate::node::Node;
use crate::shared::Shared;
use crate::strategy::Reclaim;
use crate::wait::{WaitStatus, Waiters};
use crate::DefaultReclaim;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Queue
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An unbounded, non-linearizable multi-producer/multi-consumer FIFO queue.
///
/// The queue is a singly linked list starting at a permanent head sentinel.
/// Elements are appended at the end of the list and removed from its front by
/// first *marking* the front node as logically removed and then physically
/// unlinking it, as in Harris' lock-free list.
/// Marked nodes that a popping thread failed to unlink are unlinked by any
/// later traversal that encounters them.
///
/// The reclamation strategy `R` decides how operations are synchronized and
/// when unlinked nodes are deallocated, see [`Locked`][crate::Locked],
/// [`RefCounted`][crate::RefCounted] and [`Leak`][crate::Leak].
///
/// # Ordering
///
/// Elements pushed by one thread are popped in the order they were pushed and
/// so are elements pushed by threads whose pushes are causally ordered.
/// There is no single global order of all operations that all threads agree
/// on.
pub struct Queue<T, R: Reclaim = DefaultReclaim> {
    head: NonNull<Node<T>>,
    arena: R::Arena<T>,
    len: CachePadded<AtomicUsize>,
    waiters: Waiters,
    _marker: PhantomData<T>,
}

/********** impl Send & Sync **********************************************************************/

unsafe impl<T: Send, R: Reclaim> Send for Queue<T, R> {}
unsafe impl<T: Send, R: Reclaim> Sync for Queue<T, R> {}

/********** impl Default **************************************************************************/

impl<T, R: Reclaim> Default for Queue<T, R> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/********** impl inherent *************************************************************************/

impl<T, R: Reclaim> Queue<T, R> {
    /// Creates a new empty `Queue`.
    #[inline]
    pub fn new() -> Self {
        Self {
            head: R::alloc_sentinel(),
            arena: Default::default(),
            len: CachePadded::new(AtomicUsize::new(0)),
            waiters: Waiters::default(),
            _marker: PhantomData,
        }
    }

    /// Appends `value` at the end of the queue.
    ///
    /// This never blocks and never fails, but traverses the entire queue.
    #[inline]
    pub fn push_back(&self, value: T) {
        let node = R::alloc(&self.arena, value);

        {
            let _guard = R::enter(&self.arena);
            loop {
                let Window { left, right } = self.search(false);
                debug_assert!(right.is_none(), "end search must stop at the tail");

                unsafe { node.as_ref().link(ptr::null_mut()) };
                if left.swing_next(ptr::null_mut(), node.as_ptr()) {
                    break;
                }

                trace!("lost race for tail, retrying push");
            }
        }

        self.len.fetch_add(1, Ordering::Relaxed);
        self.waiters.notify_one();
    }

    /// Removes the element at the front of the queue and returns it or `None`
    /// if the queue is empty.
    ///
    /// Every element is returned by exactly one successful call.
    #[inline]
    pub fn pop_front(&self) -> Option<T> {
        let _guard = R::enter(&self.arena);

        let (left, right) = loop {
            let Window { left, right } = self.search(true);
            let right = right?;

            let control = right.load();
            if !control.is_marked() && right.mark(control.next_ptr()) {
                break (left, right);
            }

            trace!("lost race for front element, retrying pop");
        };

        self.len.fetch_sub(1, Ordering::Relaxed);
        // the successful mark makes this thread the unique owner of the value
        let value = unsafe { right.take_value() };

        // a marked node's successor can no longer change
        let (control, right_next) = right.load_next();
        let right_next_ptr = control.next_ptr();
        if let Some(next) = &right_next {
            next.acquire_link();
        }

        if left.swing_next(right.as_ptr(), right_next_ptr) {
            unsafe { R::retire(&self.arena, right.as_ptr(), right_next_ptr) };
        } else {
            if let Some(next) = &right_next {
                unsafe { next.release_link() };
            }

            trace!("front node was unlinked concurrently, repairing");
            let _ = self.search(true);
        }

        Some(value)
    }

    /// Returns a reference to the element at the front of the queue.
    #[inline]
    pub fn front(&mut self) -> Option<&T> {
        let _guard = R::enter(&self.arena);
        let right = self.search(true).right?;
        // exclusive access keeps the node linked and alive for the lifetime of the borrow
        let node = right.as_ptr();
        drop(right);

        Some(unsafe { (*node).value() })
    }

    /// Returns the number of elements in the queue.
    ///
    /// This traverses the entire queue.
    #[inline]
    pub fn len(&mut self) -> usize {
        let mut count = 0;
        let mut curr = unsafe { self.head.as_ref() }.next();
        while let Some(node) = unsafe { curr.as_ref() } {
            let control = node.load();
            if !control.is_marked() {
                count += 1;
            }

            curr = control.next_ptr();
        }

        debug_assert_eq!(count, *self.len.get_mut(), "advisory element count is inconsistent");
        count
    }

    /// Returns the approximate number of elements in the queue.
    ///
    /// The returned value is exact when no other thread concurrently modifies
    /// the queue.
    #[inline]
    pub fn len_hint(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns `true` if the queue contains no elements.
    ///
    /// Under concurrency the result is only a snapshot.
    #[inline]
    pub fn is_empty(&self) -> bool {
        let _guard = R::enter(&self.arena);
        self.search(true).right.is_none()
    }

    /// Removes and drops all elements.
    #[inline]
    pub fn clear(&mut self) {
        {
            let _guard = R::enter(&self.arena);
            let head = unsafe { self.head.as_ref() };
            let first: *mut Node<T> = head.update(|control| control.with_next(0)).next_ptr();

            let mut dropped = 0usize;
            let mut curr = first;
            while let Some(node) = unsafe { curr.as_ref() } {
                let control = node.update(|control| control.with_marker());
                if !control.is_marked() {
                    unsafe { node.drop_value() };
                    dropped += 1;
                }

                curr = control.next_ptr();
            }

            unsafe { R::retire(&self.arena, first, ptr::null_mut()) };
            self.len.store(0, Ordering::Relaxed);
            debug!(dropped, "cleared queue");
        }

        self.waiters.notify_all();
    }

    /// Blocks the current thread until an element is available or `timeout`
    /// has elapsed.
    ///
    /// Returns immediately if the queue is not empty.
    /// A returned [`WaitStatus::Woken`] does not guarantee a subsequent
    /// [`pop_front`][Queue::pop_front] succeeds, since other consumers may
    /// have taken the element in the mean time.
    #[inline]
    pub fn wait_for(&self, timeout: Duration) -> WaitStatus {
        self.waiters.wait_for(timeout, || !self.is_empty())
    }

    #[inline]
    fn is_removed(node: &Option<Shared<'_, T, R>>) -> bool {
        node.as_ref().map_or(false, |node| node.is_logically_removed())
    }

    #[inline]
    fn head(&self) -> Shared<'_, T, R> {
        unsafe { Shared::acquire(self.head, &self.arena) }
    }

    /// Locates the window `(left, right)`, where `left` is the last live node
    /// before `right` and `right` is either the first live node (if
    /// `find_front` is `true`) or `None` (the end of the list).
    ///
    /// Runs of marked nodes between `left` and `right` are unlinked.
    fn search(&self, find_front: bool) -> Window<'_, T, R> {
        loop {
            let mut left = self.head();
            // holding on to the node `left` links to prevents it from being recycled and
            // re-linked at the same address until the CAS below
            let (control, mut left_next) = left.load_next();
            debug_assert!(!control.is_marked(), "head sentinel must never be marked");
            let mut next = left_next.clone();

            let right = loop {
                let curr = match next {
                    Some(curr) => curr,
                    None => break None,
                };

                if find_front && !curr.is_logically_removed() {
                    break Some(curr);
                }

                let (control, curr_next) = curr.load_next();
                if !control.is_marked() {
                    if find_front {
                        break Some(curr);
                    }

                    left = curr;
                    left_next = curr_next.clone();
                }

                next = curr_next;
            };

            let left_next_ptr = left_next.as_ref().map_or(ptr::null_mut(), Shared::as_ptr);
            let right_ptr = right.as_ref().map_or(ptr::null_mut(), Shared::as_ptr);

            if left_next_ptr == right_ptr {
                if Self::is_removed(&right) {
                    continue;
                }

                return Window { left, right };
            }

            // a run of marked nodes lies between `left` and `right`, the new link from `left`
            // to `right` needs its own reference
            if let Some(right) = &right {
                right.acquire_link();
            }

            if left.swing_next(left_next_ptr, right_ptr) {
                trace!("unlinked run of removed nodes");
                unsafe { R::retire(&self.arena, left_next_ptr, right_ptr) };
                if Self::is_removed(&right) {
                    continue;
                }

                return Window { left, right };
            }

            if let Some(right) = &right {
                unsafe { right.release_link() };
            }

            trace!("lost race while unlinking removed nodes, restarting search");
        }
    }
}

/********** impl Extend ***************************************************************************/

impl<T, R: Reclaim> Extend<T> for Queue<T, R> {
    #[inline]
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push_back(value);
        }
    }
}

impl<'a, T, R: Reclaim> Extend<T> for &'a Queue<T, R> {
    #[inline]
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push_back(value);
        }
    }
}

/********** impl Debug ****************************************************************************/

impl<T, R: Reclaim> fmt::Debug for Queue<T, R> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Queue")
            .field("len_hint", &self.len_hint())
            .field("reclaim", &any::type_name::<R>())
            .finish()
    }
}

/********** impl Drop *****************************************************************************/

impl<T, R: Reclaim> Drop for Queue<T, R> {
    #[inline]
    fn drop(&mut self) {
        unsafe {
            let mut curr = self.head.as_ref().next();
            while let Some(node) = NonNull::new(curr) {
                let control = node.as_ref().load();
                if !control.is_marked() {
                    node.as_ref().drop_value();
                }

                curr = control.next_ptr();
                Node::dealloc(node);
            }

            Node::dealloc(self.head);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Window
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The result of a search: `left` linked directly to `right` when the search
/// returned.
struct Window<'a, T, R: Reclaim> {
    left: Shared<'a, T, R>,
    right: Option<Shared<'a, T, R>>,
}

#[cfg(test)]
impl<T, R: Reclaim> Queue<T, R> {
    /// Returns the raw head sentinel.
    pub(crate) fn head_ptr(&self) -> NonNull<Node<T>> {
        self.head
    }

    /// Returns the strategy's arena.
    pub(crate) fn arena(&self) -> &R::Arena<T> {
        &self.arena
    }

    /// Overrides the advisory element count.
    pub(crate) fn set_len_hint(&self, len: usize) {
        self.len.store(len, Ordering::Relaxed);
    }
}
