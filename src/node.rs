use core::cell::UnsafeCell;
use core::fmt;
use core::mem::MaybeUninit;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::control::ControlBlock;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Node
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A list node holding a single (possibly uninitialized) value and the
/// control word that links it to its successor.
///
/// The control word is never stored to blindly once a node is shared, all
/// updates go through *compare-and-swap* loops, so concurrent changes to the
/// reference count are never lost.
#[repr(C, align(8))]
pub struct Node<T> {
    control: AtomicUsize,
    /// The link used while the node rests in a node pool.
    free: AtomicPtr<Node<T>>,
    value: UnsafeCell<MaybeUninit<T>>,
}

/********** impl inherent *************************************************************************/

impl<T> Node<T> {
    /// Allocates a new node containing `value` with the given initial control
    /// word and returns a pointer to it.
    #[inline]
    pub fn boxed(value: T, control: ControlBlock) -> NonNull<Self> {
        Self::alloc(MaybeUninit::new(value), control)
    }

    /// Allocates a new node without a value, as used for head sentinels.
    #[inline]
    pub fn sentinel(control: ControlBlock) -> NonNull<Self> {
        Self::alloc(MaybeUninit::uninit(), control)
    }

    /// Frees the memory of `node` without dropping its value.
    ///
    /// # Safety
    ///
    /// `node` must have been allocated by [`boxed`][Node::boxed] or
    /// [`sentinel`][Node::sentinel] and must not be accessed afterwards by
    /// any thread.
    #[inline]
    pub unsafe fn dealloc(node: NonNull<Self>) {
        drop(Box::from_raw(node.as_ptr()));
    }

    /// Loads a snapshot of the node's control word.
    #[inline]
    pub fn load(&self) -> ControlBlock {
        ControlBlock::from_raw(self.control.load(Ordering::Acquire))
    }

    /// Returns the node's current successor or `null`.
    #[inline]
    pub fn next(&self) -> *mut Self {
        self.load().next_ptr()
    }

    /// Returns `true` if the node has been logically removed.
    #[inline]
    pub fn is_logically_removed(&self) -> bool {
        self.load().is_marked()
    }

    /// Attempts to replace the control word `current` with `new`.
    #[inline]
    pub fn compare_exchange(
        &self,
        current: ControlBlock,
        new: ControlBlock,
    ) -> Result<ControlBlock, ControlBlock> {
        self.control
            .compare_exchange(current.into_raw(), new.into_raw(), Ordering::AcqRel, Ordering::Acquire)
            .map(ControlBlock::from_raw)
            .map_err(ControlBlock::from_raw)
    }

    /// Repeatedly applies `f` to the current control word until the result
    /// can be installed and returns the previous word.
    #[inline]
    pub fn update(&self, mut f: impl FnMut(ControlBlock) -> ControlBlock) -> ControlBlock {
        let res = self.control.fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
            Some(f(ControlBlock::from_raw(raw)).into_raw())
        });

        match res {
            Ok(prev) | Err(prev) => ControlBlock::from_raw(prev),
        }
    }

    /// Swings the successor from `expected` to `new`.
    ///
    /// Fails if the node is marked or its successor is no longer `expected`,
    /// concurrent changes to any other part of the control word are retried.
    #[inline]
    pub fn swing_next(&self, expected: *mut Self, new: *mut Self) -> bool {
        self.cas_loop(expected, |control| control.with_next(new as usize))
    }

    /// Sets the removal marker while the successor is still `expected_next`.
    ///
    /// Fails if the node is already marked or its successor has changed.
    #[inline]
    pub fn mark(&self, expected_next: *mut Self) -> bool {
        self.cas_loop(expected_next, ControlBlock::with_marker)
    }

    /// Sets the successor of a node that has not yet been published.
    ///
    /// Only the reference count may be changed concurrently, which is
    /// preserved.
    #[inline]
    pub fn link(&self, next: *mut Self) {
        let _ = self.update(|control| control.with_next(next as usize));
    }

    /// Returns a reference to the node's value.
    ///
    /// # Safety
    ///
    /// The value must be initialized and must not be moved out concurrently.
    #[inline]
    pub unsafe fn value(&self) -> &T {
        &*(*self.value.get()).as_ptr()
    }

    /// Moves the value out of the node, leaving it logically uninitialized.
    ///
    /// # Safety
    ///
    /// The value must be initialized and the caller must be the unique thread
    /// that removed the node.
    #[inline]
    pub unsafe fn take_value(&self) -> T {
        ptr::read((*self.value.get()).as_ptr())
    }

    /// Drops the node's value in place.
    ///
    /// # Safety
    ///
    /// Same as [`take_value`][Node::take_value].
    #[inline]
    pub unsafe fn drop_value(&self) {
        ptr::drop_in_place((*self.value.get()).as_mut_ptr());
    }

    /// Writes `value` into a node that is exclusively owned by the caller.
    ///
    /// # Safety
    ///
    /// The node must be unpublished and its previous value must have been
    /// moved out or dropped already.
    #[inline]
    pub unsafe fn write_value(&self, value: T) {
        (*self.value.get()).write(value);
    }

    /// Returns the node's link inside a node pool.
    #[inline]
    pub fn free_next(&self) -> *mut Self {
        self.free.load(Ordering::Relaxed)
    }

    /// Sets the node's link inside a node pool.
    #[inline]
    pub fn set_free_next(&self, next: *mut Self) {
        self.free.store(next, Ordering::Relaxed);
    }

    #[inline]
    fn alloc(value: MaybeUninit<T>, control: ControlBlock) -> NonNull<Self> {
        let node = Box::leak(Box::new(Self {
            control: AtomicUsize::new(control.into_raw()),
            free: AtomicPtr::new(ptr::null_mut()),
            value: UnsafeCell::new(value),
        }));

        debug_assert_eq!(node as *const Self as usize % 8, 0, "node allocation is misaligned");
        NonNull::from(node)
    }

    #[inline]
    fn cas_loop(&self, expected: *mut Self, f: impl Fn(ControlBlock) -> ControlBlock) -> bool {
        let mut current = self.load();
        loop {
            if current.is_marked() || current.next() != expected as usize {
                return false;
            }

            match self.control.compare_exchange_weak(
                current.into_raw(),
                f(current).into_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = ControlBlock::from_raw(actual),
            }
        }
    }
}

/********** impl Debug ****************************************************************************/

impl<T> fmt::Debug for Node<T> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Node").field("control", &self.load()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::mem;

    use super::*;

    #[test]
    fn alignment() {
        assert!(mem::align_of::<Node<u8>>() >= 8);

        let nodes: Vec<_> = (0..16u8).map(|i| Node::boxed(i, ControlBlock::EMPTY)).collect();
        for node in nodes {
            assert_eq!(node.as_ptr() as usize & 0b111, 0);
            unsafe { Node::dealloc(node) };
        }
    }

    #[test]
    fn swing_and_mark() {
        let a = Node::boxed(1, ControlBlock::EMPTY);
        let b = Node::boxed(2, ControlBlock::EMPTY);
        let c = Node::boxed(3, ControlBlock::EMPTY);

        unsafe {
            let node = a.as_ref();
            assert!(node.swing_next(ptr::null_mut(), b.as_ptr()));
            assert_eq!(node.next(), b.as_ptr());
            // wrong expectation
            assert!(!node.swing_next(ptr::null_mut(), c.as_ptr()));
            assert!(!node.mark(c.as_ptr()));
            assert!(!node.is_logically_removed());

            assert!(node.mark(b.as_ptr()));
            assert!(node.is_logically_removed());
            assert_eq!(node.next(), b.as_ptr());

            // marked nodes can neither be marked again nor swung
            assert!(!node.mark(b.as_ptr()));
            assert!(!node.swing_next(b.as_ptr(), c.as_ptr()));
            assert_eq!(node.next(), b.as_ptr());

            assert_eq!(node.take_value(), 1);
            b.as_ref().drop_value();
            c.as_ref().drop_value();
            Node::dealloc(a);
            Node::dealloc(b);
            Node::dealloc(c);
        }
    }

    #[test]
    fn link_preserves_foreign_bits() {
        let a = Node::boxed(String::from("a"), ControlBlock::EMPTY);
        let b = Node::boxed(String::from("b"), ControlBlock::EMPTY);

        unsafe {
            a.as_ref().link(b.as_ptr());
            assert_eq!(a.as_ref().next(), b.as_ptr());
            assert_eq!(a.as_ref().value(), "a");

            a.as_ref().link(ptr::null_mut());
            assert!(a.as_ref().next().is_null());

            a.as_ref().drop_value();
            b.as_ref().drop_value();
            Node::dealloc(a);
            Node::dealloc(b);
        }
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn swing_tolerates_ref_count() {
        let a = Node::boxed(0, ControlBlock::EMPTY.with_ref_count(3));
        let b = Node::boxed(1, ControlBlock::EMPTY);

        unsafe {
            let node = a.as_ref();
            let _ = node.update(|control| control.with_ref_count(control.ref_count() + 1));
            assert!(node.swing_next(ptr::null_mut(), b.as_ptr()));
            assert_eq!(node.load().ref_count(), 4);
            node.link(ptr::null_mut());
            assert_eq!(node.load().ref_count(), 4);

            Node::dealloc(a);
            Node::dealloc(b);
        }
    }
}
